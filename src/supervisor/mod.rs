//! Liveness supervisor.
//!
//! One independent [`prober::Prober`] task per registered target. Probers
//! share nothing but the connection pool, so a slow or hanging target
//! never delays another target's probes.

pub mod probe;
pub mod prober;
pub mod registry;

pub use probe::{HttpProbe, LivenessProbe, ProbeError};
pub use prober::{ProbeOutcome, Prober};
pub use registry::TargetRegistry;

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::storage::StatusStore;

/// Handle to one running prober.
struct ProberHandle {
    target_id: i64,
    name: String,
    task: JoinHandle<()>,
}

/// Owns every prober task spawned at startup.
pub struct Supervisor {
    probers: Vec<ProberHandle>,
    cancel: CancellationToken,
}

impl Supervisor {
    /// Spawn one prober per target in `registry`.
    ///
    /// Probers stop when `cancel` (or a parent of it) is cancelled, or on
    /// [`Supervisor::shutdown`].
    pub fn start(
        registry: TargetRegistry,
        store: StatusStore,
        probe: Arc<dyn LivenessProbe>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let probers = registry
            .into_iter()
            .map(|target| {
                let target_id = target.id;
                let name = target.name.clone();
                let prober = Prober::new(target, store.clone(), Arc::clone(&probe), interval);
                let task = tokio::spawn(prober.run(cancel.clone()));
                ProberHandle {
                    target_id,
                    name,
                    task,
                }
            })
            .collect::<Vec<_>>();

        tracing::info!(probers = probers.len(), "Liveness supervisor started");
        Self { probers, cancel }
    }

    pub fn len(&self) -> usize {
        self.probers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probers.is_empty()
    }

    pub fn target_ids(&self) -> Vec<i64> {
        self.probers.iter().map(|p| p.target_id).collect()
    }

    /// Cancel every prober and wait for all of them to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let (names, tasks): (Vec<_>, Vec<_>) =
            self.probers.into_iter().map(|p| (p.name, p.task)).unzip();
        for (name, result) in names.iter().zip(join_all(tasks).await) {
            if let Err(e) = result {
                tracing::error!(target_name = %name, error = %e, "Prober task panicked");
            }
        }
        tracing::info!("Liveness supervisor stopped");
    }
}
