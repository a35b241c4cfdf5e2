//! Share allocation and bonus math.
//!
//! ```text
//! threads_n          = floor(free_n * ram_percentage / ram_per_thread)
//!                      (0 below min_threads, capped at max_threads)
//! capability_bonus   = 1 + 2 * stat^0.8 / 600
//! effective_threads  = Σ threads_n * core_bonus_n * capability_bonus
//! bonus_multiplier   = 1 + ln(effective_threads) / 25,  or 1 when ≤ 0
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use farm_core::ShareConfig;
use farm_core::formulas::core_bonus;
use farmgrid_placement::{AllocationPlan, Assignment, NodePriority, rank_nodes};
use farmgrid_pool::WorkerPool;

/// Share threads on one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareAssignment {
    pub node: String,
    pub threads: u32,
    pub cores: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareAllocation {
    /// Assignments in core-weighted order.
    pub assignments: Vec<ShareAssignment>,
    pub ram_per_thread: f64,
    pub base_threads: u32,
    /// Thread-weighted mean core bonus across assignments.
    pub core_bonus: f64,
    pub capability_bonus: f64,
    pub effective_threads: f64,
    pub bonus_multiplier: f64,
}

impl ShareAllocation {
    pub fn inactive(ram_per_thread: f64) -> Self {
        Self {
            assignments: Vec::new(),
            ram_per_thread,
            base_threads: 0,
            core_bonus: 1.0,
            capability_bonus: 1.0,
            effective_threads: 0.0,
            bonus_multiplier: 1.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.base_threads == 0
    }

    pub fn ram_committed(&self) -> f64 {
        f64::from(self.base_threads) * self.ram_per_thread
    }

    /// The allocation as a dispatchable plan.
    pub fn to_plan(&self) -> AllocationPlan {
        AllocationPlan {
            ram_per_thread: self.ram_per_thread,
            threads_requested: self.base_threads,
            assignments: self
                .assignments
                .iter()
                .map(|a| Assignment {
                    node: a.node.clone(),
                    threads: a.threads,
                })
                .collect(),
        }
    }
}

pub fn capability_bonus(stat: f64) -> f64 {
    1.0 + 2.0 * stat.max(0.0).powf(0.8) / 600.0
}

pub fn bonus_multiplier(effective_threads: f64) -> f64 {
    if effective_threads <= 0.0 {
        return 1.0;
    }
    1.0 + effective_threads.ln() / 25.0
}

/// Size the share workload for the RAM left in `pool`.
///
/// `active` is the environment's activation signal; when it is false the
/// allocation is empty and the multiplier is exactly 1.
pub fn compute_allocation(
    pool: &WorkerPool,
    config: &ShareConfig,
    ram_per_thread: f64,
    capability_stat: f64,
    active: bool,
) -> ShareAllocation {
    if !active || ram_per_thread <= 0.0 {
        return ShareAllocation::inactive(ram_per_thread);
    }

    let mut assignments = Vec::new();
    for candidate in rank_nodes(pool, ram_per_thread, NodePriority::CoreWeighted) {
        let Some(node) = pool.get(&candidate.node) else {
            continue;
        };
        let raw = (node.free_ram() * config.ram_percentage / ram_per_thread).floor();
        let threads = raw.min(f64::from(config.max_threads)) as u32;
        if threads < config.min_threads || threads == 0 {
            continue;
        }
        assignments.push(ShareAssignment {
            node: node.name.clone(),
            threads,
            cores: node.cores,
        });
    }

    let base_threads: u32 = assignments.iter().map(|a| a.threads).sum();
    let weighted: f64 = assignments
        .iter()
        .map(|a| f64::from(a.threads) * core_bonus(a.cores))
        .sum();
    let capability = capability_bonus(capability_stat);
    let effective_threads = weighted * capability;

    let allocation = ShareAllocation {
        ram_per_thread,
        base_threads,
        core_bonus: if base_threads > 0 {
            weighted / f64::from(base_threads)
        } else {
            1.0
        },
        capability_bonus: capability,
        effective_threads,
        bonus_multiplier: bonus_multiplier(effective_threads),
        assignments,
    };

    debug!(
        nodes = allocation.assignments.len(),
        threads = base_threads,
        effective = effective_threads,
        multiplier = allocation.bonus_multiplier,
        "share allocation computed"
    );
    allocation
}

#[cfg(test)]
mod tests {
    use super::*;
    use farm_core::WorkerNode;
    use farmgrid_pool::RamReserve;

    fn make_node(name: &str, max: f64, used: f64, cores: u32) -> WorkerNode {
        WorkerNode {
            name: name.to_string(),
            ram_max: max,
            ram_used: used,
            cores,
            has_root: true,
            purchased: false,
        }
    }

    fn make_pool(nodes: Vec<WorkerNode>) -> WorkerPool {
        WorkerPool::from_nodes(nodes, &RamReserve::none())
    }

    #[test]
    fn inactive_signal_allocates_nothing() {
        let pool = make_pool(vec![make_node("home", 1024.0, 0.0, 8)]);
        let alloc = compute_allocation(&pool, &ShareConfig::default(), 4.0, 500.0, false);
        assert!(alloc.is_empty());
        assert!(alloc.assignments.is_empty());
        assert_eq!(alloc.ram_committed(), 0.0);
        assert_eq!(alloc.bonus_multiplier, 1.0);
    }

    #[test]
    fn zero_effective_threads_gives_unit_multiplier() {
        // Each node fits fewer than min_threads.
        let pool = make_pool(vec![make_node("a", 16.0, 0.0, 1), make_node("b", 12.0, 0.0, 1)]);
        let alloc = compute_allocation(&pool, &ShareConfig::default(), 4.0, 100.0, true);
        assert_eq!(alloc.effective_threads, 0.0);
        assert_eq!(alloc.bonus_multiplier, 1.0);
        assert_eq!(bonus_multiplier(0.0), 1.0);
        assert_eq!(bonus_multiplier(-3.0), 1.0);
    }

    #[test]
    fn threads_follow_ram_percentage() {
        // 100 free * 0.8 / 4 = 20 threads.
        let pool = make_pool(vec![make_node("pserv-0", 128.0, 28.0, 1)]);
        let alloc = compute_allocation(&pool, &ShareConfig::default(), 4.0, 0.0, true);
        assert_eq!(alloc.base_threads, 20);
        assert_eq!(alloc.ram_committed(), 80.0);
        assert_eq!(alloc.effective_threads, 20.0);
        assert!((alloc.bonus_multiplier - (1.0 + 20f64.ln() / 25.0)).abs() < 1e-12);
    }

    #[test]
    fn max_threads_caps_each_node() {
        let config = ShareConfig {
            max_threads: 10,
            ..ShareConfig::default()
        };
        let pool = make_pool(vec![make_node("a", 1024.0, 0.0, 1), make_node("b", 1024.0, 0.0, 1)]);
        let alloc = compute_allocation(&pool, &config, 4.0, 0.0, true);
        assert!(alloc.assignments.iter().all(|a| a.threads == 10));
        assert_eq!(alloc.base_threads, 20);
    }

    #[test]
    fn multicore_nodes_come_first_and_weigh_more() {
        let pool = make_pool(vec![
            make_node("pserv-0", 64.0, 0.0, 1),
            make_node("home", 64.0, 0.0, 9),
        ]);
        let alloc = compute_allocation(&pool, &ShareConfig::default(), 4.0, 0.0, true);
        assert_eq!(alloc.assignments[0].node, "home");
        // 12 threads each; home's 9 cores give a 1.5x bonus.
        assert_eq!(alloc.base_threads, 24);
        assert!((alloc.effective_threads - (12.0 * 1.5 + 12.0)).abs() < 1e-9);
        assert!((alloc.core_bonus - 1.25).abs() < 1e-9);
    }

    #[test]
    fn capability_raises_effective_threads() {
        assert_eq!(capability_bonus(0.0), 1.0);
        assert!(capability_bonus(1000.0) > capability_bonus(10.0));

        let pool = make_pool(vec![make_node("a", 64.0, 0.0, 1)]);
        let low = compute_allocation(&pool, &ShareConfig::default(), 4.0, 0.0, true);
        let high = compute_allocation(&pool, &ShareConfig::default(), 4.0, 1000.0, true);
        assert!(high.effective_threads > low.effective_threads);
        assert!(high.bonus_multiplier > low.bonus_multiplier);
    }

    #[test]
    fn plan_mirrors_assignments() {
        let pool = make_pool(vec![make_node("a", 64.0, 0.0, 1), make_node("b", 32.0, 0.0, 1)]);
        let alloc = compute_allocation(&pool, &ShareConfig::default(), 4.0, 0.0, true);
        let plan = alloc.to_plan();
        assert_eq!(plan.threads_placed(), alloc.base_threads);
        assert!(plan.is_complete());
        assert_eq!(plan.ram_committed(), alloc.ram_committed());
    }
}
