//! farmgrid-state — embedded counter store for farmgrid.
//!
//! Backed by [redb](https://docs.rs/redb). Holds the running totals the
//! orchestrator reports (batches completed and skipped, yield, cycles) so
//! a restarted daemon carries on counting where it stopped. Nothing here
//! drives scheduling decisions.
//!
//! Values are JSON-serialized into redb's `&[u8]` columns. The
//! `CounterStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::CounterStore;
pub use types::*;
