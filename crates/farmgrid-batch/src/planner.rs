//! Batch planner — sizes, times and places one batch.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use farm_core::{Environment, FarmConfig, OperationKind, TargetSnapshot};
use farmgrid_placement::{AllocationPlan, NodePriority, allocate};
use farmgrid_pool::WorkerPool;
use farmgrid_targets::batch_threads;

use crate::error::{BatchError, BatchResult};
use crate::timing::landing_schedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Planned,
    Executing,
    Completed,
    Failed,
}

/// One operation of a batch with its placement and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhasePlan {
    pub kind: OperationKind,
    pub threads: u32,
    pub plan: AllocationPlan,
    pub start_delay: Duration,
    /// Offset from dispatch at which this phase takes effect.
    pub landing: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub target: String,
    /// Phases in landing order.
    pub phases: Vec<PhasePlan>,
    /// Offset from dispatch at which the final phase lands.
    pub landing: Duration,
    /// Money the harvest phase is expected to take.
    pub expected_yield: f64,
    pub status: BatchStatus,
}

impl Batch {
    pub fn total_threads(&self) -> u32 {
        self.phases.iter().map(|p| p.threads).sum()
    }

    pub fn ram_committed(&self) -> f64 {
        self.phases.iter().map(|p| p.plan.ram_committed()).sum()
    }

    pub fn phase(&self, kind: OperationKind) -> Option<&PhasePlan> {
        self.phases.iter().find(|p| p.kind == kind)
    }

    pub fn mark(&mut self, status: BatchStatus) {
        debug!(target = %self.target, from = ?self.status, to = ?status, "batch status");
        self.status = status;
    }
}

/// Plan a batch against a fresh snapshot of a prepped target.
///
/// Each phase is allocated against the pool with the earlier phases
/// already charged. A phase that does not fit in full fails the batch and
/// nothing is returned for dispatch.
pub fn plan_batch(
    target: &TargetSnapshot,
    pool: &WorkerPool,
    env: &dyn Environment,
    config: &FarmConfig,
) -> BatchResult<Batch> {
    if let Err(violation) = target.validate() {
        return Err(BatchError::StaleSnapshot {
            target: target.name.clone(),
            violation,
        });
    }
    if !target.is_prepped(config.prep.security_epsilon, config.prep.money_ratio) {
        return Err(BatchError::Unprepped {
            target: target.name.clone(),
        });
    }

    let chance = env.hack_chance(target);
    let threads = batch_threads(
        env.hack_fraction(target),
        config.batch.steal_fraction,
        config.batch.grow_margin,
        |multiplier| env.growth_threads(target, multiplier, 1),
    )
    .filter(|_| chance > 0.0)
    .ok_or_else(|| BatchError::NoYield {
        target: target.name.clone(),
    })?;

    let schedule = landing_schedule(&target.durations, config.batch.spacing());

    let mut remaining = pool.clone();
    let mut phases = Vec::with_capacity(schedule.len());
    for timing in schedule {
        let needed = threads.for_kind(timing.kind);
        let ram_per_thread = timing.kind.ram_cost(&config.scripts);
        let plan = allocate(needed, ram_per_thread, &remaining, NodePriority::MostFreeRam);
        if !plan.is_complete() {
            warn!(
                target = %target.name,
                phase = %timing.kind,
                placed = plan.threads_placed(),
                needed,
                "batch does not fit — skipping"
            );
            return Err(BatchError::InsufficientRam {
                phase: timing.kind,
                placed: plan.threads_placed(),
                needed,
            });
        }
        remaining = plan.apply_to(&remaining);
        phases.push(PhasePlan {
            kind: timing.kind,
            threads: needed,
            plan,
            start_delay: timing.start_delay,
            landing: timing.landing,
        });
    }

    let batch = Batch {
        target: target.name.clone(),
        landing: schedule[schedule.len() - 1].landing,
        expected_yield: target.money * threads.stolen_fraction * chance,
        phases,
        status: BatchStatus::Planned,
    };

    info!(
        target = %batch.target,
        hack = threads.hack,
        weaken_hack = threads.weaken_hack,
        grow = threads.grow,
        weaken_grow = threads.weaken_grow,
        ram = batch.ram_committed(),
        landing_ms = batch.landing.as_millis() as u64,
        expected_yield = batch.expected_yield,
        "batch planned"
    );
    Ok(batch)
}
