//! farmgrid-pool — worker pool tracking.
//!
//! Every cycle starts by turning the environment's worker list into an
//! immutable [`WorkerPool`]: rooted nodes only, with reserved RAM already
//! charged. Components receive the snapshot by reference and never see
//! the environment's live state directly.
//!
//! # Components
//!
//! - **`pool`** — `WorkerPool` snapshot and RAM reservations
//! - **`tracker`** — `PoolTracker`, which diffs successive snapshots

pub mod pool;
pub mod tracker;

pub use pool::{RamReserve, WorkerPool};
pub use tracker::{PoolChanges, PoolTracker};
