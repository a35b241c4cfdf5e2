//! Landing schedule for the four phases.
//!
//! Phase `i` (in landing order) must land at `T - spacing * (3 - i)`,
//! where `T` is the earliest time the slowest phase can make its slot:
//!
//! ```text
//! T       = max_i(duration_i + spacing * (3 - i))
//! delay_i = T - spacing * (3 - i) - duration_i
//! ```
//!
//! Every delay is non-negative and landings are strictly ordered.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use farm_core::{OperationDurations, OperationKind};

/// When one phase starts and lands, relative to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub kind: OperationKind,
    pub duration: Duration,
    pub start_delay: Duration,
    pub landing: Duration,
}

/// Slots remaining after phase `kind` lands.
fn slots_after(kind: OperationKind) -> u32 {
    (OperationKind::ALL.len() as u32 - 1) - kind.phase_index()
}

pub fn landing_schedule(durations: &OperationDurations, spacing: Duration) -> [PhaseTiming; 4] {
    let horizon = OperationKind::ALL
        .iter()
        .map(|k| k.duration(durations) + spacing * slots_after(*k))
        .max()
        .unwrap_or_default();

    OperationKind::ALL.map(|kind| {
        let duration = kind.duration(durations);
        let landing = horizon - spacing * slots_after(kind);
        PhaseTiming {
            kind,
            duration,
            start_delay: landing - duration,
            landing,
        }
    })
}
