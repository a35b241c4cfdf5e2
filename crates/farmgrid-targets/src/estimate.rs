//! Thread counts for one batch.
//!
//! Used twice: at scoring time against the simulated prepared state, and
//! again by the batch planner against the live snapshot right before
//! dispatch.

use farm_core::formulas::{
    GROW_SECURITY_PER_THREAD, HACK_SECURITY_PER_THREAD, weaken_threads_for,
};
use farm_core::{OperationKind, ScriptCosts};
use serde::{Deserialize, Serialize};

/// Largest fraction of money a batch may leave stolen; keeps the regrowth
/// multiplier finite when a single hack thread overshoots.
const MAX_STOLEN: f64 = 0.99;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchThreads {
    pub hack: u32,
    pub weaken_hack: u32,
    pub grow: u32,
    pub weaken_grow: u32,
    /// Fraction of money the hack threads take when they all succeed.
    pub stolen_fraction: f64,
}

impl BatchThreads {
    pub fn for_kind(&self, kind: OperationKind) -> u32 {
        match kind {
            OperationKind::Harvest => self.hack,
            OperationKind::SuppressAfterHarvest => self.weaken_hack,
            OperationKind::Replenish => self.grow,
            OperationKind::SuppressAfterReplenish => self.weaken_grow,
        }
    }

    pub fn total(&self) -> u32 {
        self.hack + self.weaken_hack + self.grow + self.weaken_grow
    }

    /// RAM the whole batch holds while it runs.
    pub fn ram(&self, costs: &ScriptCosts) -> f64 {
        OperationKind::ALL
            .iter()
            .map(|k| f64::from(self.for_kind(*k)) * k.ram_cost(costs))
            .sum()
    }
}

/// Size a batch.
///
/// `growth_threads` maps a money multiplier to fractional grow threads at
/// the target's current state. Returns `None` when a hack thread would
/// steal nothing.
pub fn batch_threads(
    hack_fraction: f64,
    steal_fraction: f64,
    grow_margin: f64,
    growth_threads: impl Fn(f64) -> f64,
) -> Option<BatchThreads> {
    if hack_fraction <= 0.0 || !hack_fraction.is_finite() {
        return None;
    }

    let hack = ((steal_fraction / hack_fraction).floor() as u32).max(1);
    let stolen = (f64::from(hack) * hack_fraction).min(MAX_STOLEN);
    let multiplier = 1.0 / (1.0 - stolen);

    let grow_exact = growth_threads(multiplier).max(0.0);
    let grow = ((grow_exact * (1.0 + grow_margin)).ceil() as u32).max(1);

    Some(BatchThreads {
        hack,
        weaken_hack: weaken_threads_for(f64::from(hack) * HACK_SECURITY_PER_THREAD),
        grow,
        weaken_grow: weaken_threads_for(f64::from(grow) * GROW_SECURITY_PER_THREAD),
        stolen_fraction: stolen,
    })
}
