//! Placement engine — greedy bin-fill of threads onto workers.
//!
//! Given a thread count and a per-thread RAM cost, the placer:
//! 1. Drops nodes that cannot host one whole thread
//! 2. Ranks the rest by the requested priority (using scorer)
//! 3. Fills each node up to its capacity until the need is met
//!
//! A short pool yields a partial plan with the shortfall recorded. Whether
//! a partial plan is acceptable is the caller's decision.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use farmgrid_pool::WorkerPool;

use crate::scorer::{NodePriority, rank_nodes};

/// Threads placed on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub node: String,
    pub threads: u32,
}

/// An allocation decision for one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub ram_per_thread: f64,
    pub threads_requested: u32,
    /// Node assignments in fill order.
    pub assignments: Vec<Assignment>,
}

impl AllocationPlan {
    pub fn empty(threads_requested: u32, ram_per_thread: f64) -> Self {
        Self {
            ram_per_thread,
            threads_requested,
            assignments: Vec::new(),
        }
    }

    pub fn threads_placed(&self) -> u32 {
        self.assignments.iter().map(|a| a.threads).sum()
    }

    pub fn shortfall(&self) -> u32 {
        self.threads_requested.saturating_sub(self.threads_placed())
    }

    pub fn is_complete(&self) -> bool {
        self.shortfall() == 0
    }

    pub fn is_empty(&self) -> bool {
        self.threads_placed() == 0
    }

    pub fn ram_committed(&self) -> f64 {
        f64::from(self.threads_placed()) * self.ram_per_thread
    }

    /// RAM this plan takes from each node.
    pub fn ram_by_node(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.assignments
            .iter()
            .map(|a| (a.node.as_str(), f64::from(a.threads) * self.ram_per_thread))
    }

    /// The pool as it will look once this plan is running.
    pub fn apply_to(&self, pool: &WorkerPool) -> WorkerPool {
        pool.charged(self.ram_by_node())
    }
}

/// Distribute `threads_needed` threads over `pool`.
pub fn allocate(
    threads_needed: u32,
    ram_per_thread: f64,
    pool: &WorkerPool,
    priority: NodePriority,
) -> AllocationPlan {
    let mut plan = AllocationPlan::empty(threads_needed, ram_per_thread);
    if threads_needed == 0 || ram_per_thread <= 0.0 {
        return plan;
    }

    let mut remaining = threads_needed;
    for node in rank_nodes(pool, ram_per_thread, priority) {
        if remaining == 0 {
            break;
        }
        let to_place = remaining.min(node.capacity);
        plan.assignments.push(Assignment {
            node: node.node.clone(),
            threads: to_place,
        });
        remaining -= to_place;
        debug!(
            node = %node.node,
            threads = to_place,
            score = node.score,
            "placed threads"
        );
    }

    if remaining > 0 {
        warn!(
            requested = threads_needed,
            placed = threads_needed - remaining,
            shortfall = remaining,
            ram_per_thread,
            "could not place all threads — insufficient worker RAM"
        );
    }

    plan
}
