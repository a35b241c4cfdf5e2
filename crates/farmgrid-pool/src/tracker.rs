//! Pool tracker — refreshes the worker pool once per cycle.
//!
//! Keeps the set of node names seen last cycle so newly rooted or
//! purchased workers, and workers that disappeared, show up in the logs.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use farm_core::Environment;

use crate::pool::{RamReserve, WorkerPool};

/// Nodes that appeared or vanished since the previous refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolChanges {
    pub discovered: Vec<String>,
    pub decommissioned: Vec<String>,
}

impl PoolChanges {
    pub fn is_empty(&self) -> bool {
        self.discovered.is_empty() && self.decommissioned.is_empty()
    }
}

pub struct PoolTracker {
    reserve: RamReserve,
    known: BTreeSet<String>,
}

impl PoolTracker {
    pub fn new(reserve: RamReserve) -> Self {
        Self {
            reserve,
            known: BTreeSet::new(),
        }
    }

    pub fn reserve(&self) -> &RamReserve {
        &self.reserve
    }

    /// Take a fresh snapshot from the environment.
    pub fn refresh(&mut self, env: &dyn Environment) -> (WorkerPool, PoolChanges) {
        let pool = WorkerPool::from_nodes(env.worker_snapshot(), &self.reserve);
        let changes = self.observe(&pool);
        (pool, changes)
    }

    /// Record the node set of `pool` and report what changed.
    pub fn observe(&mut self, pool: &WorkerPool) -> PoolChanges {
        let current: BTreeSet<String> = pool.nodes().iter().map(|n| n.name.clone()).collect();

        let discovered: Vec<String> = current.difference(&self.known).cloned().collect();
        let decommissioned: Vec<String> = self.known.difference(&current).cloned().collect();

        for name in &discovered {
            if let Some(node) = pool.get(name) {
                info!(
                    node = %name,
                    ram = node.ram_max,
                    cores = node.cores,
                    purchased = node.purchased,
                    "worker joined pool"
                );
            }
        }
        for name in &decommissioned {
            warn!(node = %name, "worker left pool");
        }

        debug!(
            workers = current.len(),
            free_ram = pool.total_free_ram(),
            "worker pool refreshed"
        );

        self.known = current;
        PoolChanges {
            discovered,
            decommissioned,
        }
    }
}
