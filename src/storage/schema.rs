//! Schema and connection pragmas.

use rusqlite::Connection;
use std::time::Duration;

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Apply per-connection pragmas.
///
/// `synchronous=FULL` makes every committed enqueue and remove durable
/// before the call returns.
pub fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch(
        r#"
        PRAGMA synchronous = FULL;
        PRAGMA foreign_keys = ON;
        "#,
    )
}

/// Create tables and switch the database to WAL mode.
///
/// Idempotent; safe to run on every startup.
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS uplink_queue (
            sequence     INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id   TEXT    NOT NULL UNIQUE,
            dedup_id     TEXT    NOT NULL UNIQUE,
            payload      BLOB    NOT NULL,
            enqueued_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS targets (
            id                  INTEGER PRIMARY KEY,
            name                TEXT    NOT NULL UNIQUE,
            address             TEXT    NOT NULL,
            last_response_code  INTEGER NOT NULL DEFAULT 0,
            last_seen           INTEGER
        );
        "#,
    )
}
