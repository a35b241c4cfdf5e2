//! redb table definitions for the counter store.

use redb::TableDefinition;

/// Orchestrator-wide counters under the single key [`GLOBAL_KEY`].
pub const COUNTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("counters");

/// Per-target totals keyed by target name.
pub const TARGET_TOTALS: TableDefinition<&str, &[u8]> = TableDefinition::new("target_totals");

pub const GLOBAL_KEY: &str = "global";
