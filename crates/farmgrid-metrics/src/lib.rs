//! farmgrid-metrics — what the orchestrator is doing right now.
//!
//! Target loops and the orchestrator report into one shared
//! [`MetricsCollector`]; anyone can ask it for a serializable
//! [`StatusSnapshot`].
//!
//! # Architecture
//!
//! ```text
//! MetricsCollector
//!   ├── batch_started() / batch_finished() / batch_failed()  ← target loops
//!   ├── prep_started() / set_prep_state()   ← target loops
//!   ├── record_skip()                       ← target loops, orchestrator
//!   ├── set_share()                         ← orchestrator
//!   ├── flush() → persists CycleCounters to CounterStore
//!   └── snapshot() → StatusSnapshot
//! ```

pub mod collector;
pub mod status;

pub use collector::MetricsCollector;
pub use status::{
    InFlight, PhaseInFlight, RamUsage, ShareStatus, SkipReason, StatusSnapshot, TargetStatus,
    WorkKind,
};
