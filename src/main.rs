//! uplink-relay: store-and-forward telemetry relay with a liveness supervisor.
//!
//! # Usage
//!
//! ```bash
//! uplink-relay --database ./data/relay.db --mqtt-host broker.local \
//!     --uplink-endpoint https://ingest.example.com/uplink \
//!     --target api=http://10.0.0.5:8080/health
//! ```
//!
//! Environment variables can also be used:
//! - `UPLINK_DATABASE`: SQLite database path
//! - `UPLINK_MQTT_HOST`, `UPLINK_MQTT_PORT`: Broker address
//! - `UPLINK_ENDPOINT`: Delivery sink URL
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use tokio::sync::watch;
use uplink_relay::config::Config;
use uplink_relay::observability::metrics::init_metrics_with_endpoint;
use uplink_relay::observability::tracing::init_tracing;
use uplink_relay::runtime::{run_relay, ShutdownOutcome};

/// Print startup banner with version and configuration.
fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        r#"
  Uplink Relay v{}

  Configuration:
    Database:   {}
    Broker:     {}:{} ({})
    Uplink:     {}
    Drain:      every {} ms, {} per batch, {:?}
    Supervisor: {}
    Log Level:  {}

  Press Ctrl+C to shutdown gracefully.
"#,
        version,
        config.database.display(),
        config.mqtt_host,
        config.mqtt_port,
        config.topic_filter,
        config.uplink_endpoint,
        config.drain_interval_ms,
        config.batch_limit,
        config.ordering,
        if config.no_supervisor { "disabled" } else { "enabled" },
        config.log_level
    );
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, initiating shutdown...");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse_args();

    init_tracing(&config.log_level);
    init_metrics_with_endpoint(config.otel_endpoint.as_deref());
    print_banner(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => {
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for shutdown signals");
                // Dropping the sender would read as a shutdown request.
                shutdown_tx.closed().await;
            }
        }
    });

    match run_relay(config, shutdown_rx).await {
        Ok(ShutdownOutcome::Graceful) => {
            tracing::info!("Uplink relay shutdown complete");
            Ok(())
        }
        Ok(ShutdownOutcome::GraceExceeded) => {
            tracing::warn!("Uplink relay terminated before all workers finished");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Uplink relay failed to start");
            Err(e.into())
        }
    }
}
