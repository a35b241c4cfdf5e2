//! Persisted counter types.

use serde::{Deserialize, Serialize};

/// Orchestrator-wide running totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleCounters {
    pub batches_completed: u64,
    pub batches_skipped: u64,
    pub total_yield: f64,
    /// Orchestrator cycles run.
    pub cycles: u64,
}

/// Running totals for one target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetTotals {
    pub target: String,
    pub batches_completed: u64,
    pub total_yield: f64,
}
