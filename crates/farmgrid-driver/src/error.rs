//! Driver error types.

use thiserror::Error;

use farm_core::ConfigError;
use farmgrid_prep::PrepError;

/// Errors that stop the orchestrator or one of its target loops.
///
/// Per-cycle trouble (short RAM, a rejected dispatch, a stale snapshot)
/// is not an error here; it becomes a skip record and the loop retries.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("prep failed: {0}")]
    Prep(#[from] PrepError),

    #[error("state store error: {0}")]
    State(#[from] farmgrid_state::StateError),

    #[error("metrics error: {0}")]
    Metrics(#[from] anyhow::Error),
}

pub type DriverResult<T> = Result<T, DriverError>;
