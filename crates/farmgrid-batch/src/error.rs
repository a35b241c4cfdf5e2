//! Batch planning error types.

use thiserror::Error;

use farm_core::{OperationKind, SnapshotViolation};

#[derive(Debug, Error, PartialEq)]
pub enum BatchError {
    #[error("{target} is not prepped")]
    Unprepped { target: String },

    #[error("stale snapshot for {target}: {violation}")]
    StaleSnapshot {
        target: String,
        violation: SnapshotViolation,
    },

    /// Hack fraction or hack chance is zero at the current state.
    #[error("{target} yields nothing per batch")]
    NoYield { target: String },

    #[error("insufficient RAM for {phase}: placed {placed} of {needed} threads")]
    InsufficientRam {
        phase: OperationKind,
        placed: u32,
        needed: u32,
    },
}

pub type BatchResult<T> = Result<T, BatchError>;
