//! SQLite-backed store.
//!
//! Connections come from an r2d2 pool. Write transactions are opened
//! with `BEGIN IMMEDIATE` so concurrent writers queue on the database
//! lock instead of failing on upgrade. No method takes a second pooled
//! connection while holding one.

use std::path::Path;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use uuid::Uuid;

use super::schema::{self, CONNECTION_PRAGMAS};
use super::{
    AppendOutcome, ConsultationRepository, IdentityRepository, MessageRepository, StoreError,
    StoreResult,
};
use crate::auth::identity::{Identity, Provider, Role};
use crate::consultation::model::{Consultation, ConsultationStatus, Message, MessageKind};
use crate::crash_point::{points, FaultPoints};

const IDENTITY_COLUMNS: &str =
    "i.id, i.email, i.display_name, i.role, i.is_active, i.created_at, i.updated_at";
const CONSULTATION_COLUMNS: &str = "id, client_id, expert_id, status, created_at, ended_at";
const MESSAGE_COLUMNS: &str = "id, consultation_id, sender_id, content, kind, created_at";

/// SQLite store
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
    faults: FaultPoints,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema
    pub fn open(path: impl AsRef<Path>, pool_size: u32) -> StoreResult<Self> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
        Self::with_manager(manager, pool_size)
    }

    /// Private in-memory database.
    ///
    /// Each SQLite memory connection is its own database, so the pool is
    /// limited to one connection.
    pub fn open_in_memory() -> StoreResult<Self> {
        let manager =
            SqliteConnectionManager::memory().with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
        Self::with_manager(manager, 1)
    }

    fn with_manager(manager: SqliteConnectionManager, pool_size: u32) -> StoreResult<Self> {
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;
        {
            let conn = pool.get()?;
            schema::migrate(&conn)?;
        }
        Ok(Self {
            pool,
            faults: FaultPoints::new(),
        })
    }

    /// Fault points for this instance
    pub fn faults(&self) -> &FaultPoints {
        &self.faults
    }

    fn conn(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn interrupt(&self, point: &'static str) -> StoreResult<()> {
        if self.faults.fire(point) {
            return Err(StoreError::Interrupted(point));
        }
        Ok(())
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("pool_size", &self.pool.max_size())
            .finish()
    }
}

// ==================
// Row decoding
// ==================

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(StoreError::Corrupt(message)))
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(value: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(value)
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: i64 = row.get(idx)?;
    from_micros(raw).ok_or_else(|| conversion_error(idx, format!("timestamp out of range: {raw}")))
}

fn opt_time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(raw) => from_micros(raw)
            .map(Some)
            .ok_or_else(|| conversion_error(idx, format!("timestamp out of range: {raw}"))),
        None => Ok(None),
    }
}

fn identity_from_row(row: &Row<'_>) -> rusqlite::Result<Identity> {
    let role: String = row.get(3)?;
    Ok(Identity {
        id: uuid_col(row, 0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        role: Role::parse(&role).ok_or_else(|| conversion_error(3, format!("unknown role: {role}")))?,
        is_active: row.get(4)?,
        created_at: time_col(row, 5)?,
        updated_at: time_col(row, 6)?,
    })
}

fn consultation_from_row(row: &Row<'_>) -> rusqlite::Result<Consultation> {
    let status: String = row.get(3)?;
    Ok(Consultation {
        id: uuid_col(row, 0)?,
        client_id: uuid_col(row, 1)?,
        expert_id: uuid_col(row, 2)?,
        status: ConsultationStatus::parse(&status)
            .ok_or_else(|| conversion_error(3, format!("unknown status: {status}")))?,
        created_at: time_col(row, 4)?,
        ended_at: opt_time_col(row, 5)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let kind: String = row.get(4)?;
    Ok(Message {
        id: uuid_col(row, 0)?,
        consultation_id: uuid_col(row, 1)?,
        sender_id: uuid_col(row, 2)?,
        content: row.get(3)?,
        kind: MessageKind::parse(&kind)
            .ok_or_else(|| conversion_error(4, format!("unknown message kind: {kind}")))?,
        created_at: time_col(row, 5)?,
    })
}

fn select_consultation(conn: &Connection, id: Uuid) -> StoreResult<Option<Consultation>> {
    let sql = format!("SELECT {CONSULTATION_COLUMNS} FROM consultations WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_string()], consultation_from_row)
        .optional()?)
}

/// Insert a message, moving its timestamp forward if needed so
/// `created_at` never decreases within a consultation.
fn insert_message(conn: &Connection, draft: &Message) -> StoreResult<Message> {
    let last: Option<i64> = conn.query_row(
        "SELECT MAX(created_at) FROM messages WHERE consultation_id = ?1",
        params![draft.consultation_id.to_string()],
        |row| row.get(0),
    )?;
    let created_at = micros(draft.created_at).max(last.unwrap_or(i64::MIN));

    conn.execute(
        "INSERT INTO messages (id, consultation_id, sender_id, content, kind, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            draft.id.to_string(),
            draft.consultation_id.to_string(),
            draft.sender_id.to_string(),
            draft.content,
            draft.kind.as_str(),
            created_at,
        ],
    )?;

    let created_at = from_micros(created_at)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {created_at}")))?;
    Ok(Message {
        created_at,
        ..draft.clone()
    })
}

// ==================
// Repositories
// ==================

impl IdentityRepository for SqliteStore {
    fn find_identity(&self, id: Uuid) -> StoreResult<Option<Identity>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {IDENTITY_COLUMNS} FROM identities i WHERE i.id = ?1");
        Ok(conn
            .query_row(&sql, params![id.to_string()], identity_from_row)
            .optional()?)
    }

    fn find_identity_by_email(&self, email: &str) -> StoreResult<Option<Identity>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {IDENTITY_COLUMNS} FROM identities i WHERE i.email = ?1");
        Ok(conn
            .query_row(&sql, params![email], identity_from_row)
            .optional()?)
    }

    fn find_identity_by_link(
        &self,
        provider: Provider,
        provider_subject_id: &str,
    ) -> StoreResult<Option<Identity>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities i
             JOIN identity_links l ON l.identity_id = i.id
             WHERE l.provider = ?1 AND l.provider_subject_id = ?2"
        );
        Ok(conn
            .query_row(
                &sql,
                params![provider.as_str(), provider_subject_id],
                identity_from_row,
            )
            .optional()?)
    }

    fn create_identity_with_link(
        &self,
        identity: &Identity,
        provider: Provider,
        provider_subject_id: &str,
    ) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO identities (id, email, display_name, role, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                identity.id.to_string(),
                identity.email,
                identity.display_name,
                identity.role.as_str(),
                identity.is_active,
                micros(identity.created_at),
                micros(identity.updated_at),
            ],
        )?;

        self.interrupt(points::IDENTITY_AFTER_INSERT)?;

        tx.execute(
            "INSERT INTO identity_links (provider, provider_subject_id, identity_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                provider.as_str(),
                provider_subject_id,
                identity.id.to_string(),
                micros(identity.created_at),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn link_identity(
        &self,
        identity_id: Uuid,
        provider: Provider,
        provider_subject_id: &str,
    ) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO identity_links (provider, provider_subject_id, identity_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                provider.as_str(),
                provider_subject_id,
                identity_id.to_string(),
                micros(Utc::now()),
            ],
        )?;
        Ok(())
    }

    fn update_display_name(
        &self,
        identity_id: Uuid,
        display_name: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE identities SET display_name = ?2, updated_at = ?3 WHERE id = ?1",
            params![identity_id.to_string(), display_name, micros(updated_at)],
        )?;
        Ok(())
    }

    fn set_active(&self, identity_id: Uuid, active: bool) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE identities SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
            params![identity_id.to_string(), active, micros(Utc::now())],
        )?;
        Ok(())
    }
}

impl ConsultationRepository for SqliteStore {
    fn create_consultation(&self, consultation: &Consultation, seed: &Message) -> StoreResult<Message> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO consultations (id, client_id, expert_id, status, created_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                consultation.id.to_string(),
                consultation.client_id.to_string(),
                consultation.expert_id.to_string(),
                consultation.status.as_str(),
                micros(consultation.created_at),
                consultation.ended_at.map(micros),
            ],
        )?;

        self.interrupt(points::CONSULTATION_AFTER_INSERT)?;

        let seed = insert_message(&tx, seed)?;

        self.interrupt(points::CONSULTATION_AFTER_SEED)?;

        tx.commit()?;
        Ok(seed)
    }

    fn find_consultation(&self, id: Uuid) -> StoreResult<Option<Consultation>> {
        let conn = self.conn()?;
        select_consultation(&conn, id)
    }

    fn complete_consultation(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
        notice: &Message,
    ) -> StoreResult<Option<(Consultation, Message)>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let updated = tx.execute(
            "UPDATE consultations SET status = 'completed', ended_at = ?2
             WHERE id = ?1 AND status = 'active'",
            params![id.to_string(), micros(ended_at)],
        )?;
        if updated == 0 {
            return Ok(None);
        }

        self.interrupt(points::CLOSE_AFTER_STATUS_UPDATE)?;

        let notice = insert_message(&tx, notice)?;
        let consultation = select_consultation(&tx, id)?
            .ok_or_else(|| StoreError::Corrupt(format!("consultation {id} vanished during close")))?;

        tx.commit()?;
        Ok(Some((consultation, notice)))
    }

    fn list_consultations(
        &self,
        participant_id: Uuid,
        status: ConsultationStatus,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Consultation>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {CONSULTATION_COLUMNS} FROM consultations
             WHERE (client_id = ?1 OR expert_id = ?1) AND status = ?2
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3"
        );
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![participant_id.to_string(), status.as_str(), limit],
            consultation_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl MessageRepository for SqliteStore {
    fn append_message(&self, draft: &Message) -> StoreResult<AppendOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(consultation) = select_consultation(&tx, draft.consultation_id)? else {
            return Ok(AppendOutcome::ConsultationMissing);
        };
        if !consultation.is_active() {
            return Ok(AppendOutcome::ConsultationClosed);
        }
        if !consultation.is_member(draft.sender_id) {
            return Ok(AppendOutcome::NotMember);
        }

        self.interrupt(points::MESSAGE_BEFORE_INSERT)?;

        let message = insert_message(&tx, draft)?;
        tx.commit()?;
        Ok(AppendOutcome::Appended(message))
    }

    fn list_messages(&self, consultation_id: Uuid) -> StoreResult<Vec<Message>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE consultation_id = ?1 ORDER BY seq ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![consultation_id.to_string()], message_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_pair() -> (SqliteStore, Identity, Identity) {
        let store = SqliteStore::open_in_memory().unwrap();
        let client = Identity::new("client@example.com".into(), Some("Client".into()), Role::Client);
        let expert = Identity::new("expert@example.com".into(), Some("Expert".into()), Role::Expert);
        store
            .create_identity_with_link(&client, Provider::Google, "g-client")
            .unwrap();
        store
            .create_identity_with_link(&expert, Provider::Linkedin, "li-expert")
            .unwrap();
        (store, client, expert)
    }

    fn seeded(store: &SqliteStore, client: &Identity, expert: &Identity) -> Consultation {
        let consultation = Consultation::new(client.id, expert.id);
        let seed = Message::new(consultation.id, client.id, "hello".into(), MessageKind::Ordinary);
        store.create_consultation(&consultation, &seed).unwrap();
        consultation
    }

    #[test]
    fn test_identity_lookup_by_link_and_email() {
        let (store, client, _) = store_with_pair();

        let by_link = store
            .find_identity_by_link(Provider::Google, "g-client")
            .unwrap()
            .unwrap();
        assert_eq!(by_link, client);

        let by_email = store.find_identity_by_email("client@example.com").unwrap();
        assert_eq!(by_email.map(|i| i.id), Some(client.id));
        assert!(store
            .find_identity_by_link(Provider::Linkedin, "g-client")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_duplicate_email_is_conflict() {
        let (store, _, _) = store_with_pair();
        let dup = Identity::new("client@example.com".into(), None, Role::Client);

        let err = store
            .create_identity_with_link(&dup, Provider::Google, "g-other")
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_duplicate_link_is_conflict() {
        let (store, client, _) = store_with_pair();
        let err = store
            .link_identity(client.id, Provider::Google, "g-client")
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_identity_insert_rolls_back_without_link() {
        let (store, _, _) = store_with_pair();
        store.faults().arm(points::IDENTITY_AFTER_INSERT);

        let fresh = Identity::new("fresh@example.com".into(), None, Role::Client);
        let err = store
            .create_identity_with_link(&fresh, Provider::Google, "g-fresh")
            .unwrap_err();
        assert!(matches!(err, StoreError::Interrupted(_)));
        assert!(store.find_identity(fresh.id).unwrap().is_none());
    }

    #[test]
    fn test_create_consultation_is_atomic() {
        let (store, client, expert) = store_with_pair();
        store.faults().arm(points::CONSULTATION_AFTER_SEED);

        let consultation = Consultation::new(client.id, expert.id);
        let seed = Message::new(consultation.id, client.id, "hello".into(), MessageKind::Ordinary);
        assert!(store.create_consultation(&consultation, &seed).is_err());

        assert!(store.find_consultation(consultation.id).unwrap().is_none());
        assert!(store.list_messages(consultation.id).unwrap().is_empty());
    }

    #[test]
    fn test_append_checks_status_and_membership() {
        let (store, client, expert) = store_with_pair();
        let consultation = seeded(&store, &client, &expert);

        let stranger = Message::new(consultation.id, Uuid::new_v4(), "hi".into(), MessageKind::Ordinary);
        assert_eq!(store.append_message(&stranger).unwrap(), AppendOutcome::NotMember);

        let missing = Message::new(Uuid::new_v4(), client.id, "hi".into(), MessageKind::Ordinary);
        assert_eq!(
            store.append_message(&missing).unwrap(),
            AppendOutcome::ConsultationMissing
        );

        let notice = Message::new(consultation.id, expert.id, "closed".into(), MessageKind::System);
        store
            .complete_consultation(consultation.id, Utc::now(), &notice)
            .unwrap()
            .unwrap();

        let late = Message::new(consultation.id, client.id, "late".into(), MessageKind::Ordinary);
        assert_eq!(
            store.append_message(&late).unwrap(),
            AppendOutcome::ConsultationClosed
        );
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let (store, client, expert) = store_with_pair();
        let consultation = seeded(&store, &client, &expert);

        let mut backdated = Message::new(consultation.id, expert.id, "old".into(), MessageKind::Ordinary);
        backdated.created_at = consultation.created_at - chrono::Duration::hours(1);

        let AppendOutcome::Appended(stored) = store.append_message(&backdated).unwrap() else {
            panic!("append rejected");
        };
        let history = store.list_messages(consultation.id).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].created_at <= history[1].created_at);
        assert_eq!(history[1], stored);
    }

    #[test]
    fn test_complete_only_once() {
        let (store, client, expert) = store_with_pair();
        let consultation = seeded(&store, &client, &expert);

        let notice = Message::new(consultation.id, client.id, "closed".into(), MessageKind::System);
        let (closed, _) = store
            .complete_consultation(consultation.id, Utc::now(), &notice)
            .unwrap()
            .unwrap();
        assert_eq!(closed.status, ConsultationStatus::Completed);
        assert!(closed.ended_at.is_some());

        let again = Message::new(consultation.id, client.id, "closed".into(), MessageKind::System);
        assert!(store
            .complete_consultation(consultation.id, Utc::now(), &again)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_list_newest_first_with_limit() {
        let (store, client, expert) = store_with_pair();
        let first = seeded(&store, &client, &expert);
        let second = seeded(&store, &client, &expert);

        let all = store
            .list_consultations(expert.id, ConsultationStatus::Active, None)
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[1].id, first.id);

        let limited = store
            .list_consultations(client.id, ConsultationStatus::Active, Some(1))
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert!(store
            .list_consultations(client.id, ConsultationStatus::Completed, None)
            .unwrap()
            .is_empty());
    }
}
