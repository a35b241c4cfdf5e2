//! farmgrid-prep — the preparation control loop.
//!
//! Batches only return what they promise against a prepared target
//! (security at minimum, money at maximum). The controller measures the
//! target, picks one corrective pass (weaken or grow), sizes and places
//! it, and tells the caller how long to wait before measuring again.
//!
//! # State machine
//!
//! ```text
//! Unprepped ──► AwaitingSuppress ──► AwaitingReplenish ──► Prepped
//!     ▲               │   ▲                 │
//!     │               └───┘                 │ grow raised security,
//!     │                                     ▼ weaken again
//!     └──────── stale snapshot ◄──── AwaitingSuppress
//! ```

pub mod controller;
pub mod error;

pub use controller::{PrepController, PrepDecision, PrepPass, PrepState};
pub use error::{PrepError, PrepResult};
