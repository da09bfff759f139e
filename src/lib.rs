//! Uplink relay: store-and-forward telemetry relay with a liveness supervisor.
//!
//! Device events arrive over MQTT, are persisted to a SQLite queue and
//! drained to an HTTP uplink endpoint with at-least-once semantics. A
//! separate supervisor probes a fixed set of dependent services and
//! records their last response in the same database.
//!
//! # Architecture
//!
//! - **Durable**: queue rows are removed only after the sink returns 200
//! - **Idempotent admission**: duplicate `deduplicationId`s are no-ops
//! - **Isolated workers**: one drain task, one prober task per target
//! - **Observable**: structured tracing and OpenTelemetry metrics
//!
//! # Modules
//!
//! - [`config`]: CLI and environment configuration
//! - [`observability`]: Metrics and tracing setup
//! - [`relay`]: Ingestion gateway, MQTT feed, delivery sink, drain worker
//! - [`runtime`]: Process wiring and graceful shutdown
//! - [`storage`]: SQLite persistence layer
//! - [`supervisor`]: Target registry and liveness probers

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // storage::queue::QueueStore is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::needless_raw_string_hashes, // r#""# is fine for SQL
    clippy::similar_names,              // seq/seq_no/sequence are fine
    clippy::struct_excessive_bools,     // Config structs may have flags
    clippy::too_many_lines              // Some functions are inherently long
)]

pub mod config;
pub mod observability;
pub mod relay;
pub mod runtime;
pub mod storage;
pub mod supervisor;

use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable) message ID.
///
/// # Example
///
/// ```
/// let id = uplink_relay::generate_message_id();
/// assert!(id.len() == 36); // UUID string format
/// ```
#[must_use]
pub fn generate_message_id() -> String {
    Uuid::now_v7().to_string()
}

/// Get the current Unix timestamp in milliseconds.
///
/// Clocks set before the epoch read as 0.
#[must_use]
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
