//! Configuration parsing for the uplink relay.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides (`UPLINK_*`)
//! - Sensible defaults for quick start

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::relay::drain::{ExponentialBackoff, FixedInterval, RetryPolicy};
use crate::storage::queue::QueueOrdering;

/// Uplink relay: store-and-forward telemetry relay with liveness supervision.
#[derive(Parser, Debug, Clone)]
#[command(name = "uplink-relay")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Path to the SQLite database file
    #[arg(short, long, env = "UPLINK_DATABASE", default_value = "./data/relay.db")]
    pub database: PathBuf,

    /// Size of the SQLite connection pool
    #[arg(long, env = "UPLINK_POOL_SIZE", default_value_t = 8)]
    pub pool_size: u32,

    /// MQTT broker host
    #[arg(long, env = "UPLINK_MQTT_HOST", default_value = "127.0.0.1")]
    pub mqtt_host: String,

    /// MQTT broker port
    #[arg(long, env = "UPLINK_MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    /// MQTT username
    #[arg(long, env = "UPLINK_MQTT_USER")]
    pub mqtt_user: Option<String>,

    /// MQTT password
    #[arg(long, env = "UPLINK_MQTT_PASSWORD", hide_env_values = true)]
    pub mqtt_password: Option<String>,

    /// MQTT client identifier
    #[arg(long, env = "UPLINK_MQTT_CLIENT_ID", default_value = "uplink-relay")]
    pub mqtt_client_id: String,

    /// Topic filter to subscribe to
    #[arg(long, env = "UPLINK_TOPIC_FILTER", default_value = "application/#")]
    pub topic_filter: String,

    /// Seconds to wait for the broker to accept the connection at startup
    #[arg(long, env = "UPLINK_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Event types admitted into the queue
    #[arg(long = "event-type", env = "UPLINK_EVENT_TYPES", value_delimiter = ',', default_value = "up")]
    pub event_types: Vec<String>,

    /// Maximum number of inbound messages handled concurrently
    #[arg(long, env = "UPLINK_MAX_IN_FLIGHT", default_value_t = 64)]
    pub max_in_flight: usize,

    /// HTTP endpoint receiving forwarded payloads
    #[arg(long, env = "UPLINK_ENDPOINT", default_value = "http://127.0.0.1:8080/uplink")]
    pub uplink_endpoint: String,

    /// Timeout for a single delivery request, in seconds
    #[arg(long, env = "UPLINK_DELIVERY_TIMEOUT_SECS", default_value_t = 10)]
    pub delivery_timeout_secs: u64,

    /// Drain cycle interval in milliseconds
    #[arg(long, env = "UPLINK_DRAIN_INTERVAL_MS", default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub drain_interval_ms: u64,

    /// Maximum records pulled per drain cycle
    #[arg(long, env = "UPLINK_BATCH_LIMIT", default_value_t = 20)]
    pub batch_limit: usize,

    /// Order in which queued records are drained
    #[arg(long, env = "UPLINK_ORDERING", value_enum, default_value_t = QueueOrdering::Fifo)]
    pub ordering: QueueOrdering,

    /// Retry policy for failed deliveries
    #[arg(long, env = "UPLINK_RETRY", value_enum, default_value_t = RetryMode::Fixed)]
    pub retry: RetryMode,

    /// First backoff step for the exponential retry policy, in milliseconds
    #[arg(long, env = "UPLINK_BACKOFF_BASE_MS", default_value_t = 1000)]
    pub backoff_base_ms: u64,

    /// Upper bound for the exponential retry policy, in milliseconds
    #[arg(long, env = "UPLINK_BACKOFF_MAX_MS", default_value_t = 60_000)]
    pub backoff_max_ms: u64,

    /// Liveness probe interval in milliseconds
    #[arg(long, env = "UPLINK_PROBE_INTERVAL_MS", default_value_t = 5000, value_parser = clap::value_parser!(u64).range(1..))]
    pub probe_interval_ms: u64,

    /// Timeout for a single liveness probe, in milliseconds
    #[arg(long, env = "UPLINK_PROBE_TIMEOUT_MS", default_value_t = 3000)]
    pub probe_timeout_ms: u64,

    /// Supervised targets as name=url, registered before probing starts
    #[arg(long = "target", env = "UPLINK_TARGETS", value_delimiter = ',')]
    pub targets: Vec<TargetSpec>,

    /// Disable the liveness supervisor
    #[arg(long, env = "UPLINK_NO_SUPERVISOR")]
    pub no_supervisor: bool,

    /// Seconds allowed for graceful shutdown before forcing exit
    #[arg(long, env = "UPLINK_SHUTDOWN_GRACE_SECS", default_value_t = 30)]
    pub shutdown_grace_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// OpenTelemetry collector endpoint for metrics export (optional)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,
}

/// Delivery retry policy selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RetryMode {
    /// Retry every drain cycle
    Fixed,
    /// Back off exponentially per record
    Exponential,
}

/// A `name=url` pair naming one supervised service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetSpec {
    pub name: String,
    pub address: String,
}

impl FromStr for TargetSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, address) = s
            .split_once('=')
            .ok_or_else(|| format!("expected name=url, got '{s}'"))?;
        let name = name.trim();
        let address = address.trim();
        if name.is_empty() {
            return Err(format!("target name is empty in '{s}'"));
        }
        reqwest::Url::parse(address).map_err(|e| format!("invalid target url '{address}': {e}"))?;
        Ok(Self {
            name: name.to_string(),
            address: address.to_string(),
        })
    }
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    /// Drain cycle period, never shorter than 1 ms.
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms.max(1))
    }

    /// Probe period, never shorter than 1 ms.
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Build the retry policy selected by `--retry`.
    pub fn retry_policy(&self) -> Arc<dyn RetryPolicy> {
        match self.retry {
            RetryMode::Fixed => Arc::new(FixedInterval),
            RetryMode::Exponential => Arc::new(ExponentialBackoff::new(
                Duration::from_millis(self.backoff_base_ms),
                Duration::from_millis(self.backoff_max_ms),
            )),
        }
    }

    /// Create a configuration for tests: short intervals, no supervisor targets.
    #[cfg(test)]
    pub fn test_config(database: PathBuf) -> Self {
        Self {
            database,
            pool_size: 4,
            drain_interval_ms: 50,
            probe_interval_ms: 50,
            probe_timeout_ms: 200,
            shutdown_grace_secs: 5,
            log_level: "debug".into(),
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from("./data/relay.db"),
            pool_size: 8,
            mqtt_host: "127.0.0.1".into(),
            mqtt_port: 1883,
            mqtt_user: None,
            mqtt_password: None,
            mqtt_client_id: "uplink-relay".into(),
            topic_filter: "application/#".into(),
            connect_timeout_secs: 10,
            event_types: vec!["up".into()],
            max_in_flight: 64,
            uplink_endpoint: "http://127.0.0.1:8080/uplink".into(),
            delivery_timeout_secs: 10,
            drain_interval_ms: 1000,
            batch_limit: 20,
            ordering: QueueOrdering::Fifo,
            retry: RetryMode::Fixed,
            backoff_base_ms: 1000,
            backoff_max_ms: 60_000,
            probe_interval_ms: 5000,
            probe_timeout_ms: 3000,
            targets: Vec::new(),
            no_supervisor: false,
            shutdown_grace_secs: 30,
            log_level: "info".into(),
            otel_endpoint: None,
        }
    }
}
