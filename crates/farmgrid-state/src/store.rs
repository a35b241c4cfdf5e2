//! CounterStore — redb-backed counter persistence.
//!
//! Supports both on-disk and in-memory backends (the latter for testing
//! and for runs without a configured `state_path`).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn corrupt(key: &str) -> impl FnOnce(serde_json::Error) -> StateError + '_ {
    move |e| StateError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    }
}

/// Thread-safe counter store backed by redb.
#[derive(Clone)]
pub struct CounterStore {
    db: Arc<Database>,
}

impl CounterStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "counter store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory counter store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        txn.open_table(COUNTERS).map_err(map_err!(Storage))?;
        txn.open_table(TARGET_TOTALS).map_err(map_err!(Storage))?;
        txn.commit().map_err(map_err!(Storage))?;
        Ok(())
    }

    // ── Global counters ────────────────────────────────────────────

    /// Stored counters, or zeroes on a fresh store.
    pub fn load_counters(&self) -> StateResult<CycleCounters> {
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(COUNTERS).map_err(map_err!(Storage))?;
        match table.get(GLOBAL_KEY).map_err(map_err!(Storage))? {
            Some(guard) => serde_json::from_slice(guard.value()).map_err(corrupt(GLOBAL_KEY)),
            None => Ok(CycleCounters::default()),
        }
    }

    pub fn save_counters(&self, counters: &CycleCounters) -> StateResult<()> {
        let value = serde_json::to_vec(counters).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        {
            let mut table = txn.open_table(COUNTERS).map_err(map_err!(Storage))?;
            table
                .insert(GLOBAL_KEY, value.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Storage))?;
        debug!(
            cycles = counters.cycles,
            completed = counters.batches_completed,
            "counters stored"
        );
        Ok(())
    }

    // ── Per-target totals ──────────────────────────────────────────

    pub fn get_target(&self, target: &str) -> StateResult<Option<TargetTotals>> {
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(TARGET_TOTALS).map_err(map_err!(Storage))?;
        match table.get(target).map_err(map_err!(Storage))? {
            Some(guard) => {
                let totals: TargetTotals =
                    serde_json::from_slice(guard.value()).map_err(corrupt(target))?;
                Ok(Some(totals))
            }
            None => Ok(None),
        }
    }

    pub fn put_target(&self, totals: &TargetTotals) -> StateResult<()> {
        let value = serde_json::to_vec(totals).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        {
            let mut table = txn.open_table(TARGET_TOTALS).map_err(map_err!(Storage))?;
            table
                .insert(totals.target.as_str(), value.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Storage))?;
        Ok(())
    }

    pub fn list_targets(&self) -> StateResult<Vec<TargetTotals>> {
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(TARGET_TOTALS).map_err(map_err!(Storage))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (key, value) = entry.map_err(map_err!(Storage))?;
            let totals: TargetTotals =
                serde_json::from_slice(value.value()).map_err(corrupt(key.value()))?;
            results.push(totals);
        }
        Ok(results)
    }

    /// Add one completed batch and its yield to a target's totals.
    pub fn record_batch(&self, target: &str, yield_amount: f64) -> StateResult<TargetTotals> {
        let mut totals = self.get_target(target)?.unwrap_or_else(|| TargetTotals {
            target: target.to_string(),
            ..TargetTotals::default()
        });
        totals.batches_completed += 1;
        totals.total_yield += yield_amount;
        self.put_target(&totals)?;
        Ok(totals)
    }
}
