//! Preparation controller error types.

use thiserror::Error;

use farm_core::SnapshotViolation;

#[derive(Debug, Error, PartialEq)]
pub enum PrepError {
    /// The snapshot contradicts the target invariants; refetch and restart.
    #[error("stale snapshot for {target}: {violation}")]
    StaleSnapshot {
        target: String,
        violation: SnapshotViolation,
    },

    /// Security or money is drifting faster than prep can correct it.
    #[error("{target} still unprepped after {passes} correction passes")]
    PassLimit { target: String, passes: u32 },
}

pub type PrepResult<T> = Result<T, PrepError>;
