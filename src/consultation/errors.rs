//! # Session Errors
//!
//! Outcomes of consultation operations. Every variant except `Store` is
//! the caller's to handle; `Store` means nothing can make progress.

use thiserror::Error;

use crate::store::StoreError;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Session-layer errors
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Bad client/expert pair or bad opening message
    #[error("Invalid participant: {0}")]
    InvalidParticipant(String),

    /// Caller is not one of the two participants
    #[error("Access denied")]
    AccessDenied,

    #[error("Consultation not found")]
    NotFound,

    /// Already completed
    #[error("Consultation is already completed")]
    InvalidTransition,

    /// Consultation completed before the operation could run
    #[error("Consultation is closed")]
    SessionClosed,

    /// Message rejected; the connection stays open
    #[error("Invalid send: {0}")]
    InvalidSend(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            SessionError::InvalidParticipant(_) | SessionError::InvalidSend(_) => 400,
            SessionError::AccessDenied => 403,
            SessionError::NotFound => 404,
            SessionError::InvalidTransition | SessionError::SessionClosed => 409,
            SessionError::Store(_) => 503,
        }
    }

    /// Stable code used in streaming error frames
    pub fn frame_code(&self) -> &'static str {
        match self {
            SessionError::SessionClosed | SessionError::InvalidTransition => "SESSION_CLOSED",
            SessionError::Store(_) => "UNAVAILABLE",
            _ => "INVALID_SEND",
        }
    }
}
