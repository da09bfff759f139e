//! Observability infrastructure.
//!
//! Provides:
//! - Structured tracing via tracing-subscriber
//! - OpenTelemetry metrics for ingest, delivery and probing

pub mod metrics;
pub mod tracing;
