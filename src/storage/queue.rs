//! Durable uplink queue.
//!
//! A row exists if and only if its event has not yet been delivered.
//! Rows are inserted by the ingestion gateway, deleted by the drain worker
//! after a confirmed delivery, and never updated in place.
//!
//! Each operation is a single statement and therefore individually atomic.
//! No cross-operation transaction is provided: a crash between a delivery
//! and its `remove` leads to redelivery, which consumers must tolerate.

use clap::ValueEnum;
use rusqlite::{params, OptionalExtension};

use super::pool::StorePool;
use super::StoreError;
use crate::now_millis;

/// A queued event awaiting delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRecord {
    /// Monotonically increasing admission order
    pub sequence: i64,
    pub message_id: String,
    pub dedup_id: String,
    /// Original payload bytes, forwarded verbatim
    pub payload: Vec<u8>,
    /// Admission time, Unix milliseconds
    pub enqueued_at: i64,
}

/// Order in which [`QueueStore::peek_batch`] returns records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum QueueOrdering {
    /// Oldest admitted first. Every record is eventually attempted.
    #[default]
    Fifo,
    /// Newest admitted first. Under sustained ingest older records can starve.
    Lifo,
}

impl QueueOrdering {
    fn order_by(self) -> &'static str {
        match self {
            Self::Fifo => "ASC",
            Self::Lifo => "DESC",
        }
    }
}

/// Result of a [`QueueStore::remove`] call. Callers treat both as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    /// The record was already gone, e.g. removed before a crash.
    AlreadyRemoved,
}

/// The durable queue of pending uplink events.
#[derive(Clone)]
pub struct QueueStore {
    pool: StorePool,
    ordering: QueueOrdering,
}

impl QueueStore {
    pub fn new(pool: StorePool, ordering: QueueOrdering) -> Self {
        Self { pool, ordering }
    }

    pub fn ordering(&self) -> QueueOrdering {
        self.ordering
    }

    /// Persist a new record, returning its sequence number.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateKey`] if either `message_id` or `dedup_id` is
    /// already queued; nothing is written in that case.
    pub fn enqueue(
        &self,
        message_id: &str,
        dedup_id: &str,
        payload: &[u8],
    ) -> Result<i64, StoreError> {
        let conn = self.pool.get()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO uplink_queue (message_id, dedup_id, payload, enqueued_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![message_id, dedup_id, payload, now_millis()],
        )?;

        if inserted == 0 {
            return Err(StoreError::DuplicateKey);
        }
        Ok(conn.last_insert_rowid())
    }

    /// Read up to `limit` records in the store's ordering.
    ///
    /// Every call re-reads current state; no cursor is kept between calls.
    pub fn peek_batch(&self, limit: usize) -> Result<Vec<QueueRecord>, StoreError> {
        let conn = self.pool.get()?;
        let sql = format!(
            "SELECT sequence, message_id, dedup_id, payload, enqueued_at
             FROM uplink_queue ORDER BY sequence {} LIMIT ?1",
            self.ordering.order_by()
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = stmt
            .query_map([limit], |row| {
                Ok(QueueRecord {
                    sequence: row.get(0)?,
                    message_id: row.get(1)?,
                    dedup_id: row.get(2)?,
                    payload: row.get(3)?,
                    enqueued_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Delete the record with `message_id`. Idempotent.
    pub fn remove(&self, message_id: &str) -> Result<RemoveOutcome, StoreError> {
        let conn = self.pool.get()?;
        let deleted = conn.execute(
            "DELETE FROM uplink_queue WHERE message_id = ?1",
            [message_id],
        )?;
        Ok(if deleted == 0 {
            RemoveOutcome::AlreadyRemoved
        } else {
            RemoveOutcome::Removed
        })
    }

    /// Number of records awaiting delivery.
    pub fn depth(&self) -> Result<u64, StoreError> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM uplink_queue", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Look up a queued record by its dedup key.
    pub fn find_by_dedup(&self, dedup_id: &str) -> Result<Option<QueueRecord>, StoreError> {
        let conn = self.pool.get()?;
        let record = conn
            .query_row(
                "SELECT sequence, message_id, dedup_id, payload, enqueued_at
                 FROM uplink_queue WHERE dedup_id = ?1",
                [dedup_id],
                |row| {
                    Ok(QueueRecord {
                        sequence: row.get(0)?,
                        message_id: row.get(1)?,
                        dedup_id: row.get(2)?,
                        payload: row.get(3)?,
                        enqueued_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}
