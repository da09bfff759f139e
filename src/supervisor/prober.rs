//! Per-target prober.
//!
//! `Idle → Probing → Persisting → Idle` on every tick, until cancelled.
//! A prober writes only its own target's row.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::probe::LivenessProbe;
use crate::now_millis;
use crate::observability::metrics::record_probe;
use crate::storage::status::TRANSPORT_FAILURE_CODE;
use crate::storage::{run_blocking, StatusStore, StoreError, Target};

/// Result of one probe, as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub response_code: i64,
    pub seen_at: i64,
}

/// Periodically probes one target and records the result.
pub struct Prober {
    target: Target,
    store: StatusStore,
    probe: Arc<dyn LivenessProbe>,
    interval: Duration,
}

impl Prober {
    pub fn new(
        target: Target,
        store: StatusStore,
        probe: Arc<dyn LivenessProbe>,
        interval: Duration,
    ) -> Self {
        Self {
            target,
            store,
            probe,
            interval,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Probe once and persist `last_seen` and `last_response_code`.
    ///
    /// A transport failure is still a result: it is stored with
    /// [`TRANSPORT_FAILURE_CODE`].
    pub async fn probe_once(&self) -> Result<ProbeOutcome, StoreError> {
        let response_code = match self.probe.probe(&self.target.address).await {
            Ok(status) => {
                tracing::debug!(target_name = %self.target.name, status, "Probe answered");
                record_probe(&self.target.name, "answered");
                i64::from(status)
            }
            Err(e) => {
                tracing::warn!(
                    target_name = %self.target.name,
                    address = %self.target.address,
                    error = %e,
                    "Probe failed"
                );
                record_probe(&self.target.name, "unreachable");
                TRANSPORT_FAILURE_CODE
            }
        };

        let outcome = ProbeOutcome {
            response_code,
            seen_at: now_millis(),
        };
        let store = self.store.clone();
        let id = self.target.id;
        run_blocking(move || store.record_probe(id, outcome.response_code, outcome.seen_at))
            .await?;
        Ok(outcome)
    }

    /// Probe on every tick until `cancel` fires.
    ///
    /// Cancellation is checked once per cycle; an in-flight probe is left
    /// to complete or time out.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            target_name = %self.target.name,
            address = %self.target.address,
            interval_ms = self.interval.as_millis() as u64,
            "Prober started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.probe_once().await {
                tracing::warn!(target_name = %self.target.name, error = %e, "Failed to persist probe result");
            }
        }

        tracing::info!(target_name = %self.target.name, "Prober stopped");
    }
}
