//! Drain worker.
//!
//! Once per tick: peek a bounded batch, attempt each record in batch order,
//! then remove the records the sink confirmed. Removal strictly follows
//! confirmation, so a crash in between causes a redelivery, never a loss.
//!
//! A failed delivery leaves the record queued and does not stop the rest
//! of the batch. A storage failure aborts the current cycle only; the
//! worker tries again on the next tick.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::sink::DeliverySink;
use crate::observability::metrics::{record_delivery, record_queue_depth};
use crate::storage::{run_blocking, QueueStore, RemoveOutcome, StoreError};

/// Decides whether a previously failed record is attempted this cycle.
///
/// Consulted only for records with at least one recorded failure.
pub trait RetryPolicy: Send + Sync + Debug {
    /// `failures` is the number of consecutive failed attempts,
    /// `since_last_failure` the time elapsed since the most recent one.
    fn should_attempt(&self, failures: u32, since_last_failure: Duration) -> bool;
}

/// Retry on every cycle; the drain interval is the retry interval.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedInterval;

impl RetryPolicy for FixedInterval {
    fn should_attempt(&self, _failures: u32, _since_last_failure: Duration) -> bool {
        true
    }
}

/// Per-record exponential backoff: `base * 2^(failures - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay required after `failures` consecutive failures.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let shift = (failures - 1).min(31);
        self.base
            .checked_mul(1u32 << shift)
            .map_or(self.max, |d| d.min(self.max))
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn should_attempt(&self, failures: u32, since_last_failure: Duration) -> bool {
        since_last_failure >= self.delay_for(failures)
    }
}

/// Drain worker tuning.
#[derive(Debug, Clone)]
pub struct DrainConfig {
    pub interval: Duration,
    pub batch_limit: usize,
    pub retry: Arc<dyn RetryPolicy>,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            batch_limit: 20,
            retry: Arc::new(FixedInterval),
        }
    }
}

/// Counts for one drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Records returned by the peek
    pub peeked: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Skipped by the retry policy this cycle
    pub deferred: usize,
    /// Confirmed deliveries removed from the queue
    pub removed: usize,
}

#[derive(Debug, Clone, Copy)]
struct FailureState {
    failures: u32,
    last_failure: Instant,
}

/// Periodically forwards queued records to a [`DeliverySink`].
///
/// Exactly one worker should drain a given queue.
pub struct DrainWorker {
    store: QueueStore,
    sink: Arc<dyn DeliverySink>,
    config: DrainConfig,
    failures: HashMap<String, FailureState>,
}

impl DrainWorker {
    pub fn new(store: QueueStore, sink: Arc<dyn DeliverySink>, config: DrainConfig) -> Self {
        Self {
            store,
            sink,
            config,
            failures: HashMap::new(),
        }
    }

    /// Run drain cycles until `cancel` fires.
    ///
    /// Cancellation is checked between cycles; a cycle in progress runs to
    /// completion.
    pub async fn run(mut self, cancel: CancellationToken) {
        // tokio rejects a zero period
        let mut ticker = tokio::time::interval(self.config.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = self.config.interval.as_millis() as u64,
            batch_limit = self.config.batch_limit,
            ordering = ?self.store.ordering(),
            "Drain worker started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_cycle().await {
                Ok(report) if report.peeked > 0 => {
                    tracing::debug!(
                        peeked = report.peeked,
                        delivered = report.delivered,
                        failed = report.failed,
                        deferred = report.deferred,
                        removed = report.removed,
                        "Drain cycle complete"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Drain cycle aborted on storage error, retrying next tick");
                }
            }
        }

        tracing::info!("Drain worker stopped");
    }

    /// Execute one drain cycle.
    ///
    /// # Errors
    ///
    /// A storage failure while peeking or removing. Records delivered but
    /// not yet removed when that happens are redelivered later.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, StoreError> {
        let store = self.store.clone();
        let limit = self.config.batch_limit;
        let batch = run_blocking(move || store.peek_batch(limit)).await?;

        let mut report = CycleReport {
            peeked: batch.len(),
            ..CycleReport::default()
        };
        if batch.is_empty() {
            self.failures.clear();
            return Ok(report);
        }

        // Forget failure history for records no longer in view.
        self.failures
            .retain(|id, _| batch.iter().any(|r| &r.message_id == id));

        let mut confirmed = Vec::with_capacity(batch.len());
        for record in &batch {
            if let Some(state) = self.failures.get(&record.message_id) {
                if !self
                    .config
                    .retry
                    .should_attempt(state.failures, state.last_failure.elapsed())
                {
                    report.deferred += 1;
                    continue;
                }
            }

            let started = Instant::now();
            let result = self.sink.deliver(record).await;
            let latency = started.elapsed().as_secs_f64();

            match result {
                Ok(()) => {
                    record_delivery("delivered", latency);
                    tracing::info!(
                        message_id = %record.message_id,
                        dedup_id = %record.dedup_id,
                        sequence = record.sequence,
                        "Delivered record"
                    );
                    self.failures.remove(&record.message_id);
                    confirmed.push(record.message_id.clone());
                    report.delivered += 1;
                }
                Err(e) => {
                    record_delivery("failed", latency);
                    let state = self
                        .failures
                        .entry(record.message_id.clone())
                        .or_insert(FailureState {
                            failures: 0,
                            last_failure: started,
                        });
                    state.failures = state.failures.saturating_add(1);
                    state.last_failure = Instant::now();
                    tracing::warn!(
                        message_id = %record.message_id,
                        dedup_id = %record.dedup_id,
                        attempts = state.failures,
                        error = %e,
                        "Delivery failed, record stays queued"
                    );
                    report.failed += 1;
                }
            }
        }

        report.removed = self.remove_confirmed(confirmed).await?;

        let store = self.store.clone();
        match run_blocking(move || store.depth()).await {
            Ok(depth) => record_queue_depth(depth),
            Err(e) => tracing::debug!(error = %e, "Failed to read queue depth"),
        }

        Ok(report)
    }

    async fn remove_confirmed(&self, confirmed: Vec<String>) -> Result<usize, StoreError> {
        if confirmed.is_empty() {
            return Ok(0);
        }
        let store = self.store.clone();
        run_blocking(move || {
            let mut removed = 0;
            for message_id in &confirmed {
                match store.remove(message_id)? {
                    RemoveOutcome::Removed => {}
                    RemoveOutcome::AlreadyRemoved => {
                        tracing::debug!(message_id = %message_id, "Record already removed");
                    }
                }
                removed += 1;
            }
            Ok(removed)
        })
        .await
    }
}
