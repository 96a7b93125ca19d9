//! SQLite schema.
//!
//! Timestamps are stored as microseconds since the Unix epoch. Message
//! order is the `seq` column, not the timestamp.

use rusqlite::Connection;

/// Stamped into `PRAGMA user_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Applied to every pooled connection
pub const CONNECTION_PRAGMAS: &str = "
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA journal_mode = WAL;
";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id            TEXT PRIMARY KEY,
    email         TEXT NOT NULL UNIQUE,
    display_name  TEXT,
    role          TEXT NOT NULL CHECK (role IN ('client', 'expert', 'admin')),
    is_active     INTEGER NOT NULL DEFAULT 1,
    created_at    INTEGER NOT NULL,
    updated_at    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS identity_links (
    provider             TEXT NOT NULL,
    provider_subject_id  TEXT NOT NULL,
    identity_id          TEXT NOT NULL REFERENCES identities(id),
    created_at           INTEGER NOT NULL,
    PRIMARY KEY (provider, provider_subject_id)
);

CREATE TABLE IF NOT EXISTS consultations (
    id          TEXT PRIMARY KEY,
    client_id   TEXT NOT NULL REFERENCES identities(id),
    expert_id   TEXT NOT NULL REFERENCES identities(id),
    status      TEXT NOT NULL CHECK (status IN ('active', 'completed')),
    created_at  INTEGER NOT NULL,
    ended_at    INTEGER,
    CHECK (client_id <> expert_id)
);

CREATE INDEX IF NOT EXISTS idx_consultations_client ON consultations (client_id, status);
CREATE INDEX IF NOT EXISTS idx_consultations_expert ON consultations (expert_id, status);

CREATE TABLE IF NOT EXISTS messages (
    seq              INTEGER PRIMARY KEY AUTOINCREMENT,
    id               TEXT NOT NULL UNIQUE,
    consultation_id  TEXT NOT NULL REFERENCES consultations(id) ON DELETE CASCADE,
    sender_id        TEXT NOT NULL REFERENCES identities(id),
    content          TEXT NOT NULL,
    kind             TEXT NOT NULL CHECK (kind IN ('ordinary', 'system')),
    created_at       INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_consultation ON messages (consultation_id, seq);
";

/// Create tables and indexes if missing
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)
}
