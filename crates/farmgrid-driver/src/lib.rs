//! farmgrid-driver — runs the farm.
//!
//! The orchestrator refreshes the worker pool, scores targets, keeps one
//! cooperative loop running per selected target, and spends leftover RAM
//! on the share workload. Every path that turns a pool snapshot into
//! dispatched jobs goes through the [`AllocationGate`], so loops never
//! double-book RAM.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator (one cycle every cycle_interval)
//!   ├── AllocationGate ─ PoolTracker, share jobs, per-target slices (one mutex)
//!   ├── rank_targets() → top max_targets whose batch fits a slice
//!   ├── TargetLoop per target (tokio task)
//!   │     ├── gain_root
//!   │     ├── PrepController::step → Dispatcher → commit → sleep(wait)
//!   │     └── plan_batch → Dispatcher (last phase first) → commit → sleep(landing + buffer)
//!   ├── compute_allocation() on leftover RAM → share jobs
//!   └── MetricsCollector → StatusSnapshot, CounterStore
//! ```

pub mod dispatch;
pub mod error;
pub mod gate;
pub mod orchestrator;
pub mod target_loop;

pub use dispatch::{Dispatcher, PlanDispatch};
pub use error::{DriverError, DriverResult};
pub use gate::{AllocationGate, GateGuard};
pub use orchestrator::{CycleReport, Orchestrator};
pub use target_loop::{CycleOutcome, TargetLoop};
