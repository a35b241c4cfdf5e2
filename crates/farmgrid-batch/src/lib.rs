//! farmgrid-batch — plans one harvest/suppress/replenish/suppress batch.
//!
//! A batch is sized against the live target snapshot, timed so its four
//! operations land in order `spacing` apart, and placed all-or-nothing:
//! either every phase fits in the pool or nothing is dispatched.

pub mod error;
pub mod planner;
pub mod timing;

pub use error::{BatchError, BatchResult};
pub use planner::{Batch, BatchStatus, PhasePlan, plan_batch};
pub use timing::{PhaseTiming, landing_schedule};
