//! farmgrid-sim — an in-memory [`Environment`](farm_core::Environment).
//!
//! Workers and targets live in one mutex-guarded world. Jobs hold RAM
//! from dispatch until they land; landings are applied lazily, in landing
//! order, whenever the world is observed. Time comes from `tokio::time`,
//! so tests can pause and advance the clock.

pub mod env;
pub mod world;

pub use env::{SimBuilder, SimEnvironment};
pub use world::{DispatchRecord, Landing, SimTarget};
