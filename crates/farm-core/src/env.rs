//! The boundary between the orchestrator and the world it farms.
//!
//! Every observation and every side effect goes through [`Environment`].
//! Dispatch never fails loudly: a rejected job comes back as `None` so the
//! caller can count it as a shortfall.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::formulas;
use crate::types::{Script, TargetSnapshot, WorkerNode};

/// Opaque handle to a job the environment accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: u64,
    pub node: String,
}

/// One remote job launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub node: String,
    pub script: Script,
    pub threads: u32,
    /// Target server; `None` for the share workload.
    pub target: Option<String>,
    /// Wait inside the job before the operation starts.
    pub start_delay: Duration,
    /// Free-form tag distinguishing otherwise identical jobs.
    pub tag: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootOutcome {
    AlreadyRooted,
    Rooted,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RootError {
    #[error("root on {0} temporarily unavailable")]
    TemporarilyUnavailable(String),

    #[error("{0} cannot be rooted with current capability")]
    PermanentlyUnreachable(String),
}

/// External collaborators the orchestration core consumes.
pub trait Environment: Send + Sync {
    /// Current RAM and root state of every reachable worker.
    fn worker_snapshot(&self) -> Vec<WorkerNode>;

    /// Names of every server that could be a target.
    fn target_names(&self) -> Vec<String>;

    fn target_snapshot(&self, name: &str) -> Option<TargetSnapshot>;

    /// Launch a job. `None` means the launch failed.
    fn dispatch(&self, request: &DispatchRequest) -> Option<JobHandle>;

    /// Kill a running job, returning whether it was still alive.
    fn terminate(&self, job: &JobHandle) -> bool;

    /// Whether the secondary workload should run this cycle.
    fn secondary_activation_signal(&self) -> bool;

    /// Stat feeding the secondary workload's capability bonus.
    fn player_capability_stat(&self) -> f64;

    fn player_level(&self) -> f64;

    /// Number of port openers currently owned.
    fn root_credentials(&self) -> u32;

    fn gain_root(&self, target: &str) -> Result<RootOutcome, RootError>;

    /// Fraction of current money one hack thread steals against `target`.
    fn hack_fraction(&self, target: &TargetSnapshot) -> f64 {
        formulas::hack_fraction(self.player_level(), target.required_level, target.security)
    }

    fn hack_chance(&self, target: &TargetSnapshot) -> f64 {
        formulas::hack_chance(self.player_level(), target.required_level, target.security)
    }

    /// Grow threads (fractional) needed to multiply money by `multiplier`.
    fn growth_threads(&self, target: &TargetSnapshot, multiplier: f64, cores: u32) -> f64 {
        formulas::growth_threads(target.security, target.growth, multiplier, cores)
    }
}
