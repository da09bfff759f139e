//! Target registry: the fixed set of targets the supervisor probes.
//!
//! Loaded once at startup. Configured seeds are registered first so that
//! `--target` entries and rows added with `relayctl` are probed alike.

use crate::config::TargetSpec;
use crate::storage::{StatusStore, StoreError, Target};

/// Immutable set of supervised targets.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: Vec<Target>,
}

impl TargetRegistry {
    /// Register `seeds`, then load every target from the status table.
    pub fn load(store: &StatusStore, seeds: &[TargetSpec]) -> Result<Self, StoreError> {
        for seed in seeds {
            let id = store.upsert_target(&seed.name, &seed.address)?;
            tracing::debug!(id, name = %seed.name, address = %seed.address, "Registered target");
        }
        let targets = store.load_targets()?;
        tracing::info!(count = targets.len(), "Target registry loaded");
        Ok(Self { targets })
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl IntoIterator for TargetRegistry {
    type Item = Target;
    type IntoIter = std::vec::IntoIter<Target>;

    fn into_iter(self) -> Self::IntoIter {
        self.targets.into_iter()
    }
}
