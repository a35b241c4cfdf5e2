//! farmgrid resource allocator — thread placement across the worker pool.
//!
//! Shared by primary batching, the preparation controller and the share
//! workload. It does NOT launch anything (that's `farmgrid-driver`).
//! Instead, it ranks nodes and produces allocation plans that the driver
//! dispatches.
//!
//! # Components
//!
//! - **`scorer`** — Node ranking (most free RAM, core-weighted)
//! - **`placer`** — Greedy bin-fill into an `AllocationPlan`

pub mod placer;
pub mod scorer;

pub use placer::{AllocationPlan, Assignment, allocate};
pub use scorer::{NodePriority, NodeScore, rank_nodes};
