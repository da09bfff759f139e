//! SQLite storage layer for the relay.
//!
//! Provides:
//! - Schema initialization and connection pragmas
//! - Pooled connections shared by the gateway, drain worker and probers
//! - The durable uplink queue
//! - The supervisor's target status table

pub mod pool;
pub mod queue;
pub mod schema;
pub mod status;

pub use pool::StorePool;
pub use queue::{QueueOrdering, QueueRecord, QueueStore, RemoveOutcome};
pub use status::{StatusStore, Target};

use thiserror::Error;

/// Error type for storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The `message_id` or `dedup_id` is already queued.
    #[error("duplicate key")]
    DuplicateKey,

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("blocking storage task failed: {0}")]
    Blocking(String),

    #[error("failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True for errors caused by storage I/O rather than data.
    pub fn is_io(&self) -> bool {
        !matches!(self, Self::DuplicateKey)
    }
}

/// Run a blocking storage call off the async runtime.
///
/// SQLite calls are synchronous; running them here keeps connections from
/// being held across await points.
pub async fn run_blocking<F, T>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Blocking(e.to_string()))?
}
