//! OpenTelemetry metrics.
//!
//! Key metrics:
//! - relay_ingest_total: Counter of inbound messages by outcome
//! - relay_delivery_total: Counter of delivery attempts by outcome
//! - relay_delivery_latency_seconds: Histogram of sink round trips
//! - relay_queue_depth: Gauge of records awaiting delivery
//! - relay_probe_total: Counter of liveness probes by target and outcome

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Relay metrics registry.
#[derive(Debug)]
pub struct Metrics {
    pub ingest_total: Counter<u64>,
    pub delivery_total: Counter<u64>,
    pub delivery_latency: Histogram<f64>,
    pub queue_depth: Gauge<i64>,
    pub probe_total: Counter<u64>,
}

impl Metrics {
    fn new(meter: &Meter) -> Self {
        Self {
            ingest_total: meter
                .u64_counter("relay_ingest_total")
                .with_description("Inbound messages handled, by outcome")
                .with_unit("1")
                .init(),
            delivery_total: meter
                .u64_counter("relay_delivery_total")
                .with_description("Delivery attempts, by outcome")
                .with_unit("1")
                .init(),
            delivery_latency: meter
                .f64_histogram("relay_delivery_latency_seconds")
                .with_description("Delivery sink round-trip time")
                .with_unit("s")
                .init(),
            queue_depth: meter
                .i64_gauge("relay_queue_depth")
                .with_description("Records awaiting delivery at the end of a drain cycle")
                .with_unit("1")
                .init(),
            probe_total: meter
                .u64_counter("relay_probe_total")
                .with_description("Liveness probes, by target and outcome")
                .with_unit("1")
                .init(),
        }
    }
}

/// Initialize the metrics system.
///
/// This should be called once at startup. Subsequent calls are ignored.
///
/// # Arguments
///
/// * `otel_endpoint` - Optional OTLP endpoint for metrics export
pub fn init_metrics_with_endpoint(otel_endpoint: Option<&str>) {
    METRICS.get_or_init(|| {
        if let Some(endpoint) = otel_endpoint {
            use opentelemetry_otlp::{Protocol, WithExportConfig};

            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_protocol(Protocol::Grpc);

            match opentelemetry_otlp::new_pipeline()
                .metrics(opentelemetry_sdk::runtime::Tokio)
                .with_exporter(exporter)
                .with_period(std::time::Duration::from_secs(10))
                .build()
            {
                Ok(provider) => {
                    global::set_meter_provider(provider);
                    tracing::info!(endpoint, "OTLP metrics exporter configured");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to create OTLP exporter, using no-op metrics");
                    install_manual_reader();
                }
            }
        } else {
            // Recorded but not exported
            install_manual_reader();
        }

        let meter = global::meter("uplink-relay");
        Metrics::new(&meter)
    });
}

fn install_manual_reader() {
    let reader = ManualReader::builder().build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    global::set_meter_provider(provider);
}

/// Initialize the metrics system without OTLP export.
pub fn init_metrics() {
    init_metrics_with_endpoint(None);
}

/// Record one handled inbound message.
pub fn record_ingest(outcome: &'static str) {
    if let Some(m) = METRICS.get() {
        m.ingest_total.add(1, &[KeyValue::new("outcome", outcome)]);
    }
}

/// Record one delivery attempt.
pub fn record_delivery(outcome: &'static str, latency_seconds: f64) {
    if let Some(m) = METRICS.get() {
        let attrs = [KeyValue::new("outcome", outcome)];
        m.delivery_total.add(1, &attrs);
        m.delivery_latency.record(latency_seconds, &attrs);
    }
}

/// Record the queue depth observed after a drain cycle.
pub fn record_queue_depth(depth: u64) {
    if let Some(m) = METRICS.get() {
        m.queue_depth
            .record(i64::try_from(depth).unwrap_or(i64::MAX), &[]);
    }
}

/// Record one liveness probe.
pub fn record_probe(target: &str, outcome: &'static str) {
    if let Some(m) = METRICS.get() {
        let attrs = [
            KeyValue::new("target", target.to_string()),
            KeyValue::new("outcome", outcome),
        ];
        m.probe_total.add(1, &attrs);
    }
}
