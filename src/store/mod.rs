//! # Durable Store
//!
//! Single source of truth for identities, consultations and messages.
//! Components talk to it through the repository traits below; every
//! method is one transaction scoped to one logical operation.
//!
//! Failure of the store is not recoverable by any caller: it surfaces
//! as a service-level error, never as a client error.

pub mod schema;
pub mod sqlite;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::identity::{Identity, Provider};
use crate::consultation::model::{Consultation, ConsultationStatus, Message};

pub use sqlite::SqliteStore;

/// Run store-bound work on tokio's blocking pool. Store calls may wait
/// on SQLite locks for the busy timeout and must not park a runtime
/// worker.
pub async fn blocking<T, E, F>(op: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
}

/// Current time at the resolution the store keeps (microseconds), so a
/// record built in memory equals the same record read back.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    now.duration_trunc(TimeDelta::microseconds(1)).unwrap_or(now)
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Unique or primary key constraint violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A fault point fired inside a transaction; the transaction rolled back
    #[error("Transaction interrupted at {0}")]
    Interrupted(&'static str),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Connection pool error: {0}")]
    Pool(String),

    /// A stored row could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// The blocking task running the operation panicked or was cancelled
    #[error("Store worker failed: {0}")]
    Worker(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ffi;

        match &e {
            rusqlite::Error::SqliteFailure(err, msg)
                if err.code == rusqlite::ErrorCode::ConstraintViolation
                    && matches!(
                        err.extended_code,
                        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    ) =>
            {
                StoreError::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..) => StoreError::Corrupt(e.to_string()),
            _ => StoreError::Backend(e.to_string()),
        }
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        StoreError::Pool(e.to_string())
    }
}

/// Outcome of appending a message.
///
/// Status and membership are checked in the same transaction as the
/// insert, so a message can never land in a completed consultation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(Message),
    ConsultationMissing,
    ConsultationClosed,
    NotMember,
}

/// Identity and external link storage
pub trait IdentityRepository: Send + Sync {
    fn find_identity(&self, id: Uuid) -> StoreResult<Option<Identity>>;

    fn find_identity_by_email(&self, email: &str) -> StoreResult<Option<Identity>>;

    fn find_identity_by_link(
        &self,
        provider: Provider,
        provider_subject_id: &str,
    ) -> StoreResult<Option<Identity>>;

    /// Insert an identity and its first link atomically.
    ///
    /// Fails with `Conflict` if the email or the link already exists.
    fn create_identity_with_link(
        &self,
        identity: &Identity,
        provider: Provider,
        provider_subject_id: &str,
    ) -> StoreResult<()>;

    /// Link an existing identity. Fails with `Conflict` if the link exists.
    fn link_identity(
        &self,
        identity_id: Uuid,
        provider: Provider,
        provider_subject_id: &str,
    ) -> StoreResult<()>;

    fn update_display_name(
        &self,
        identity_id: Uuid,
        display_name: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    fn set_active(&self, identity_id: Uuid, active: bool) -> StoreResult<()>;
}

/// Consultation storage
pub trait ConsultationRepository: Send + Sync {
    /// Insert a consultation and its seed message in one transaction.
    /// Returns the seed as stored.
    fn create_consultation(&self, consultation: &Consultation, seed: &Message) -> StoreResult<Message>;

    fn find_consultation(&self, id: Uuid) -> StoreResult<Option<Consultation>>;

    /// Transition `active -> completed` and append the closing notice in
    /// one transaction. `None` if the consultation was not active.
    fn complete_consultation(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
        notice: &Message,
    ) -> StoreResult<Option<(Consultation, Message)>>;

    /// Consultations where the participant is either party, newest first
    fn list_consultations(
        &self,
        participant_id: Uuid,
        status: ConsultationStatus,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Consultation>>;
}

/// Append-only message storage
pub trait MessageRepository: Send + Sync {
    fn append_message(&self, draft: &Message) -> StoreResult<AppendOutcome>;

    /// All messages of a consultation in insertion order
    fn list_messages(&self, consultation_id: Uuid) -> StoreResult<Vec<Message>>;
}

/// Everything the service needs from durable storage
pub trait Store: IdentityRepository + ConsultationRepository + MessageRepository {}

impl<T> Store for T where T: IdentityRepository + ConsultationRepository + MessageRepository {}
