//! farmgrid-share — the secondary workload.
//!
//! Whatever RAM primary work leaves behind can run share threads, which
//! pay out a bonus multiplier with diminishing returns. The allocation is
//! recomputed from scratch every cycle and never competes with batches:
//! the driver tears it down before primary work allocates.

pub mod allocation;

pub use allocation::{
    ShareAllocation, ShareAssignment, bonus_multiplier, capability_bonus, compute_allocation,
};
