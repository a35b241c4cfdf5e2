//! Status record types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use farm_core::OperationKind;
use farmgrid_batch::BatchStatus;
use farmgrid_prep::PrepState;

/// Why a target loop did not dispatch this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InsufficientRam,
    /// Prep could not place a single thread.
    Blocked,
    /// The environment rejected a dispatch.
    PlacementFailed,
    StaleSnapshot,
    Unreachable,
}

impl SkipReason {
    pub fn label(self) -> &'static str {
        match self {
            SkipReason::InsufficientRam => "insufficient_ram",
            SkipReason::Blocked => "blocked",
            SkipReason::PlacementFailed => "placement_failed",
            SkipReason::StaleSnapshot => "stale_snapshot",
            SkipReason::Unreachable => "unreachable",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    Prep,
    Batch,
}

/// One batch phase and when it takes effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseInFlight {
    pub kind: OperationKind,
    pub threads: u32,
    /// Zero once the phase has landed.
    pub lands_in_ms: u64,
}

/// Work dispatched against one target that has not landed yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InFlight {
    pub target: String,
    pub kind: WorkKind,
    pub threads: u32,
    pub ram: f64,
    pub expected_yield: f64,
    /// Milliseconds until the last operation lands.
    pub lands_in_ms: u64,
    /// Set for batches only.
    pub batch_status: Option<BatchStatus>,
    /// Batch phases in landing order; empty for prep passes.
    pub phases: Vec<PhaseInFlight>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetStatus {
    pub prep: Option<PrepState>,
    /// Prep could not place anything on its last attempt.
    pub blocked: bool,
    /// Prep hit its pass limit; the loop for this target stopped.
    pub stalled: bool,
    pub last_skip: Option<SkipReason>,
    /// Status of the most recent batch against this target.
    pub last_batch: Option<BatchStatus>,
    pub batches_completed: u64,
    pub total_yield: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RamUsage {
    pub primary: f64,
    pub secondary: f64,
    pub pool_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareStatus {
    pub active: bool,
    pub threads: u32,
    pub ram: f64,
    pub bonus_multiplier: f64,
}

impl Default for ShareStatus {
    fn default() -> Self {
        Self {
            active: false,
            threads: 0,
            ram: 0.0,
            bonus_multiplier: 1.0,
        }
    }
}

/// Point-in-time view of the whole orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub uptime_secs: f64,
    pub cycles: u64,
    pub in_flight: Vec<InFlight>,
    pub targets: BTreeMap<String, TargetStatus>,
    pub ram: RamUsage,
    pub share: ShareStatus,
    pub batches_completed: u64,
    pub batches_skipped: u64,
    pub skipped_by_reason: BTreeMap<SkipReason, u64>,
    pub total_yield: f64,
    /// Yield earned since this process started, per second of uptime.
    pub yield_per_sec: f64,
}

impl StatusSnapshot {
    pub fn active_batches(&self) -> impl Iterator<Item = &InFlight> {
        self.in_flight.iter().filter(|f| f.kind == WorkKind::Batch)
    }
}
