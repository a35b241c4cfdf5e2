//! farm-core — shared vocabulary for the farmgrid batch orchestrator.
//!
//! Everything the engine crates agree on lives here: worker and target
//! snapshots, the closed set of operation kinds, the hack/grow/weaken
//! formulas, `farm.toml` parsing, and the [`Environment`] trait that every
//! side effect goes through.

pub mod config;
pub mod env;
pub mod formulas;
pub mod types;

pub use config::{
    BatchConfig, ConfigError, DriverConfig, FarmConfig, PrepConfig, ScriptCosts, ShareConfig,
};
pub use env::{DispatchRequest, Environment, JobHandle, RootError, RootOutcome};
pub use types::*;
