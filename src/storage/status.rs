//! Supervisor target table.
//!
//! Target identities are fixed once the supervisor starts. Afterwards the
//! only writes are [`StatusStore::record_probe`] calls, each scoped to one
//! row and issued only by that row's prober.

use rusqlite::params;

use super::pool::StorePool;
use super::StoreError;

/// Response code persisted when a probe fails at the transport level.
pub const TRANSPORT_FAILURE_CODE: i64 = 0;

/// A supervised service and its last observed status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: i64,
    pub name: String,
    pub address: String,
    /// Last HTTP status, or [`TRANSPORT_FAILURE_CODE`]
    pub last_response_code: i64,
    /// Unix milliseconds of the last probe, `None` if never probed
    pub last_seen: Option<i64>,
}

/// Access to the `targets` table.
#[derive(Clone)]
pub struct StatusStore {
    pool: StorePool,
}

impl StatusStore {
    pub fn new(pool: StorePool) -> Self {
        Self { pool }
    }

    /// Load every registered target ordered by id.
    pub fn load_targets(&self) -> Result<Vec<Target>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, address, last_response_code, last_seen FROM targets ORDER BY id ASC",
        )?;
        let targets = stmt
            .query_map([], |row| {
                Ok(Target {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    address: row.get(2)?,
                    last_response_code: row.get(3)?,
                    last_seen: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(targets)
    }

    /// Register a target, or update its address if the name exists.
    ///
    /// Returns the target id. Only valid before the supervisor starts.
    pub fn upsert_target(&self, name: &str, address: &str) -> Result<i64, StoreError> {
        let conn = self.pool.get()?;
        let id = conn.query_row(
            "INSERT INTO targets (name, address) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET address = excluded.address
             RETURNING id",
            params![name, address],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Persist a probe result for one target.
    pub fn record_probe(&self, id: i64, response_code: i64, seen_at: i64) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE targets SET last_response_code = ?1, last_seen = ?2 WHERE id = ?3",
            params![response_code, seen_at, id],
        )?;
        Ok(())
    }

    /// Fetch one target by id.
    pub fn get_target(&self, id: i64) -> Result<Option<Target>, StoreError> {
        Ok(self.load_targets()?.into_iter().find(|t| t.id == id))
    }
}
