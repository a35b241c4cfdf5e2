//! Shared types used across farmgrid crates.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ScriptCosts;
use crate::formulas;

// ── Workers ────────────────────────────────────────────────────────

/// A compute node that can run timed remote jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerNode {
    pub name: String,
    pub ram_max: f64,
    pub ram_used: f64,
    pub cores: u32,
    pub has_root: bool,
    /// Bought by us rather than found on the network.
    #[serde(default)]
    pub purchased: bool,
}

impl WorkerNode {
    pub fn free_ram(&self) -> f64 {
        (self.ram_max - self.ram_used).max(0.0)
    }

    /// Whole threads of a script costing `ram_per_thread` that fit right now.
    pub fn thread_capacity(&self, ram_per_thread: f64) -> u32 {
        if ram_per_thread <= 0.0 {
            return 0;
        }
        let threads = (self.free_ram() / ram_per_thread).floor();
        threads.min(f64::from(u32::MAX)) as u32
    }
}

// ── Targets ────────────────────────────────────────────────────────

/// Live durations of the three remote scripts against one target.
///
/// All three scale with the target's current security, so they are only
/// valid for the snapshot they came with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperationDurations {
    pub hack: Duration,
    pub grow: Duration,
    pub weaken: Duration,
}

impl OperationDurations {
    pub fn of(&self, script: Script) -> Duration {
        match script {
            Script::Hack => self.hack,
            Script::Grow => self.grow,
            Script::Weaken => self.weaken,
            Script::Share => Duration::ZERO,
        }
    }
}

/// Point-in-time view of a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSnapshot {
    pub name: String,
    pub money_max: f64,
    pub money: f64,
    pub security: f64,
    pub min_security: f64,
    pub required_level: f64,
    #[serde(default)]
    pub required_ports: u32,
    /// Server growth parameter fed into the growth formula.
    pub growth: f64,
    pub has_root: bool,
    pub durations: OperationDurations,
}

/// Ways a snapshot can contradict the target invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SnapshotViolation {
    SecurityBelowMinimum { security: f64, min_security: f64 },
    MoneyOutOfRange { money: f64, money_max: f64 },
}

impl std::fmt::Display for SnapshotViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotViolation::SecurityBelowMinimum {
                security,
                min_security,
            } => write!(f, "security {security:.3} below minimum {min_security:.3}"),
            SnapshotViolation::MoneyOutOfRange { money, money_max } => {
                write!(f, "money {money:.0} outside [0, {money_max:.0}]")
            }
        }
    }
}

/// Slack allowed when comparing floats that went through the environment.
const INVARIANT_SLACK: f64 = 1e-6;

impl TargetSnapshot {
    pub fn security_delta(&self) -> f64 {
        (self.security - self.min_security).max(0.0)
    }

    pub fn money_ratio(&self) -> f64 {
        if self.money_max <= 0.0 {
            0.0
        } else {
            self.money / self.money_max
        }
    }

    /// Whether the target satisfies the readiness invariant.
    pub fn is_prepped(&self, security_epsilon: f64, money_ratio: f64) -> bool {
        self.money_max > 0.0
            && self.security_delta() <= security_epsilon
            && self.money_ratio() >= money_ratio
    }

    /// Check the snapshot invariants. A violation means the snapshot is stale.
    pub fn validate(&self) -> Result<(), SnapshotViolation> {
        if self.security + INVARIANT_SLACK < self.min_security {
            return Err(SnapshotViolation::SecurityBelowMinimum {
                security: self.security,
                min_security: self.min_security,
            });
        }
        if self.money < -INVARIANT_SLACK || self.money > self.money_max + INVARIANT_SLACK {
            return Err(SnapshotViolation::MoneyOutOfRange {
                money: self.money,
                money_max: self.money_max,
            });
        }
        Ok(())
    }

    /// The same target at minimum security and full money, with durations
    /// re-estimated for that security at the given player level.
    pub fn prepared(&self, player_level: f64) -> TargetSnapshot {
        let (level, required, security) = (player_level, self.required_level, self.min_security);
        TargetSnapshot {
            money: self.money_max,
            security: self.min_security,
            durations: OperationDurations {
                hack: formulas::hack_time(level, required, security),
                grow: formulas::grow_time(level, required, security),
                weaken: formulas::weaken_time(level, required, security),
            },
            ..self.clone()
        }
    }
}

// ── Scripts and operations ─────────────────────────────────────────

/// Remote script that a worker thread runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Script {
    Hack,
    Grow,
    Weaken,
    Share,
}

impl Script {
    pub fn ram_cost(self, costs: &ScriptCosts) -> f64 {
        match self {
            Script::Hack => costs.hack,
            Script::Grow => costs.grow,
            Script::Weaken => costs.weaken,
            Script::Share => costs.share,
        }
    }

    /// Security added (positive) or removed (negative) per thread on landing.
    pub fn security_per_thread(self) -> f64 {
        match self {
            Script::Hack => formulas::HACK_SECURITY_PER_THREAD,
            Script::Grow => formulas::GROW_SECURITY_PER_THREAD,
            Script::Weaken => -formulas::WEAKEN_SECURITY_PER_THREAD,
            Script::Share => 0.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Script::Hack => "hack",
            Script::Grow => "grow",
            Script::Weaken => "weaken",
            Script::Share => "share",
        }
    }
}

impl std::fmt::Display for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The four phases of a batch, in landing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Harvest,
    SuppressAfterHarvest,
    Replenish,
    SuppressAfterReplenish,
}

impl OperationKind {
    pub const ALL: [OperationKind; 4] = [
        OperationKind::Harvest,
        OperationKind::SuppressAfterHarvest,
        OperationKind::Replenish,
        OperationKind::SuppressAfterReplenish,
    ];

    pub fn script(self) -> Script {
        match self {
            OperationKind::Harvest => Script::Hack,
            OperationKind::Replenish => Script::Grow,
            OperationKind::SuppressAfterHarvest | OperationKind::SuppressAfterReplenish => {
                Script::Weaken
            }
        }
    }

    /// Position in landing order, 0 for the first to land.
    pub fn phase_index(self) -> u32 {
        match self {
            OperationKind::Harvest => 0,
            OperationKind::SuppressAfterHarvest => 1,
            OperationKind::Replenish => 2,
            OperationKind::SuppressAfterReplenish => 3,
        }
    }

    pub fn ram_cost(self, costs: &ScriptCosts) -> f64 {
        self.script().ram_cost(costs)
    }

    pub fn duration(self, durations: &OperationDurations) -> Duration {
        durations.of(self.script())
    }

    pub fn label(self) -> &'static str {
        match self {
            OperationKind::Harvest => "harvest",
            OperationKind::SuppressAfterHarvest => "suppress-harvest",
            OperationKind::Replenish => "replenish",
            OperationKind::SuppressAfterReplenish => "suppress-replenish",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
