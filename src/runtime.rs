//! Process wiring and lifecycle.
//!
//! Startup builds every service explicitly and fails fast if the store or
//! the inbound feed is unreachable. Shutdown:
//! 1. stops the feed (no new inbound messages),
//! 2. cancels the drain worker and probers at their next cycle boundary,
//! 3. waits for in-flight work up to the grace period,
//! 4. drops the store and sink handles.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::relay::{
    DeliveryError, DeliverySink, DrainConfig, DrainWorker, FeedConfig, FeedError, Gateway,
    HttpSink, MqttFeed,
};
use crate::storage::{run_blocking, QueueStore, StatusStore, StoreError, StorePool};
use crate::supervisor::{HttpProbe, LivenessProbe, ProbeError, Supervisor, TargetRegistry};

/// Failure to bring up a required collaborator. The process must not start.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("inbound feed unavailable: {0}")]
    Feed(#[from] FeedError),

    #[error("delivery sink misconfigured: {0}")]
    Sink(#[from] DeliveryError),

    #[error("liveness probe misconfigured: {0}")]
    Probe(#[from] ProbeError),
}

/// Every service the workers need, constructed before any worker starts.
pub struct Services {
    pub pool: StorePool,
    pub queue: QueueStore,
    pub status: StatusStore,
    pub sink: Arc<dyn DeliverySink>,
    pub drain: DrainConfig,
    pub event_types: Vec<String>,
    pub probe: Arc<dyn LivenessProbe>,
    pub probe_interval: Duration,
    /// `None` disables the supervisor
    pub registry: Option<TargetRegistry>,
}

impl Services {
    /// Open the store and build the sink, probe and target registry.
    pub async fn build(config: &Config) -> Result<Self, StartupError> {
        let db_path = config.database.clone();
        let pool_size = config.pool_size;
        let pool = run_blocking(move || StorePool::open(db_path, pool_size)).await?;
        tracing::info!(database = %config.database.display(), "Store opened");

        let queue = QueueStore::new(pool.clone(), config.ordering);
        let status = StatusStore::new(pool.clone());

        let sink = HttpSink::new(&config.uplink_endpoint, config.delivery_timeout())?;
        tracing::info!(endpoint = %sink.endpoint(), "Delivery sink configured");

        let registry = if config.no_supervisor {
            None
        } else {
            let store = status.clone();
            let seeds = config.targets.clone();
            Some(run_blocking(move || TargetRegistry::load(&store, &seeds)).await?)
        };

        Ok(Self {
            pool,
            queue,
            status,
            sink: Arc::new(sink),
            drain: DrainConfig {
                interval: config.drain_interval(),
                batch_limit: config.batch_limit.max(1),
                retry: config.retry_policy(),
            },
            event_types: config.event_types.clone(),
            probe: Arc::new(HttpProbe::new(config.probe_timeout())?),
            probe_interval: config.probe_interval(),
            registry,
        })
    }
}

/// How shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Graceful,
    /// Workers were still running when the grace period expired
    GraceExceeded,
}

/// Running relay: feed, drain worker and supervisor.
pub struct RelayRuntime {
    tracker: TaskTracker,
    feed_cancel: CancellationToken,
    worker_cancel: CancellationToken,
    supervisor: Option<Supervisor>,
    gateway: Gateway,
    pool: StorePool,
}

impl RelayRuntime {
    /// Start all workers. `feed` may be `None` when messages are admitted
    /// through [`RelayRuntime::gateway`] directly.
    pub fn start(services: Services, feed: Option<MqttFeed>) -> Self {
        let tracker = TaskTracker::new();
        let feed_cancel = CancellationToken::new();
        let worker_cancel = CancellationToken::new();

        let gateway = Gateway::new(services.queue.clone(), services.event_types);

        if let Some(feed) = feed {
            tracker.spawn(feed.run(gateway.clone(), tracker.clone(), feed_cancel.clone()));
        }

        let worker = DrainWorker::new(services.queue, services.sink, services.drain);
        tracker.spawn(worker.run(worker_cancel.clone()));

        let supervisor = services.registry.map(|registry| {
            Supervisor::start(
                registry,
                services.status,
                services.probe,
                services.probe_interval,
                worker_cancel.child_token(),
            )
        });

        Self {
            tracker,
            feed_cancel,
            worker_cancel,
            supervisor,
            gateway,
            pool: services.pool,
        }
    }

    /// Admission entry point shared with the feed.
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn supervisor(&self) -> Option<&Supervisor> {
        self.supervisor.as_ref()
    }

    /// Stop accepting input, let current cycles finish, then release the store.
    pub async fn shutdown(self, grace: Duration) -> ShutdownOutcome {
        let Self {
            tracker,
            feed_cancel,
            worker_cancel,
            supervisor,
            gateway,
            pool,
        } = self;

        tracing::info!("Stopping inbound feed");
        feed_cancel.cancel();
        tracing::info!("Cancelling drain worker and probers");
        worker_cancel.cancel();
        tracker.close();

        let drained = tokio::time::timeout(grace, async move {
            tracker.wait().await;
            if let Some(supervisor) = supervisor {
                supervisor.shutdown().await;
            }
        })
        .await;

        let outcome = match drained {
            Ok(()) => ShutdownOutcome::Graceful,
            Err(_) => {
                tracing::warn!(
                    grace_secs = grace.as_secs(),
                    "Shutdown grace period exceeded, forcing termination"
                );
                ShutdownOutcome::GraceExceeded
            }
        };

        drop(gateway);
        let state = pool.state();
        drop(pool);
        tracing::info!(
            connections = state.connections,
            idle = state.idle_connections,
            "Store handles released"
        );
        outcome
    }
}

/// Run the relay until `shutdown_rx` signals, then shut down gracefully.
///
/// # Errors
///
/// Only startup failures; everything after startup is contained and logged.
pub async fn run_relay(
    config: Config,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<ShutdownOutcome, StartupError> {
    let services = Services::build(&config).await?;
    let feed = MqttFeed::connect(FeedConfig::from(&config)).await?;

    let runtime = RelayRuntime::start(services, Some(feed));
    tracing::info!("Uplink relay running");

    // A closed channel also means shutdown.
    while !*shutdown_rx.borrow() {
        if shutdown_rx.changed().await.is_err() {
            break;
        }
    }
    tracing::info!("Shutdown signal received");

    Ok(runtime.shutdown(config.shutdown_grace()).await)
}
