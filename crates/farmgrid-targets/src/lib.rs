//! farmgrid-targets — target selection.
//!
//! Targets are ranked by what they would earn once prepared, not by their
//! live state: a target sitting at high security with drained money still
//! scores at minimum security and full money, since preparation is a
//! one-time cost.
//!
//! # Components
//!
//! - **`estimate`** — Batch thread math shared with the batch planner
//! - **`scorer`** — Readiness classification and efficiency ranking

pub mod estimate;
pub mod scorer;

pub use estimate::{BatchThreads, batch_threads};
pub use scorer::{Readiness, ScoredTarget, ScoringContext, classify, rank_targets, score_target};
