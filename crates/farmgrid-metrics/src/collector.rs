//! Metrics collector — aggregates reports from target loops.
//!
//! Running totals are restored from the [`CounterStore`] at construction
//! and written back on [`MetricsCollector::flush`]. Everything else lives
//! only in memory and is rebuilt as loops report in.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use farm_core::OperationKind;
use farmgrid_batch::{Batch, BatchStatus};
use farmgrid_prep::PrepState;
use farmgrid_state::{CounterStore, CycleCounters};

use crate::status::{
    InFlight, PhaseInFlight, RamUsage, ShareStatus, SkipReason, StatusSnapshot, TargetStatus,
    WorkKind,
};

struct PendingPhase {
    kind: OperationKind,
    threads: u32,
    lands_at: Instant,
}

struct PendingWork {
    kind: WorkKind,
    threads: u32,
    ram: f64,
    expected_yield: f64,
    lands_at: Instant,
    batch_status: Option<BatchStatus>,
    phases: Vec<PendingPhase>,
}

#[derive(Default)]
struct Inner {
    counters: CycleCounters,
    session_yield: f64,
    skipped_by_reason: BTreeMap<SkipReason, u64>,
    targets: BTreeMap<String, TargetStatus>,
    pending: HashMap<String, PendingWork>,
    share: ShareStatus,
    pool_total: f64,
}

/// Shared status aggregator. Cheap to clone.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<RwLock<Inner>>,
    store: CounterStore,
    started: Instant,
}

impl MetricsCollector {
    /// Create a collector, picking up totals from a previous run.
    pub fn new(store: CounterStore) -> anyhow::Result<Self> {
        let counters = store.load_counters()?;
        let targets: BTreeMap<String, TargetStatus> = store
            .list_targets()?
            .into_iter()
            .map(|totals| {
                let status = TargetStatus {
                    batches_completed: totals.batches_completed,
                    total_yield: totals.total_yield,
                    ..TargetStatus::default()
                };
                (totals.target, status)
            })
            .collect();
        if counters.cycles > 0 {
            info!(
                cycles = counters.cycles,
                completed = counters.batches_completed,
                total_yield = counters.total_yield,
                targets = targets.len(),
                "restored counters"
            );
        }
        Ok(Self {
            inner: Arc::new(RwLock::new(Inner {
                counters,
                targets,
                ..Inner::default()
            })),
            store,
            started: Instant::now(),
        })
    }

    pub async fn set_prep_state(&self, target: &str, state: PrepState) {
        let mut inner = self.inner.write().await;
        let status = inner.targets.entry(target.to_string()).or_default();
        status.prep = Some(state);
        status.blocked = false;
    }

    /// A prep pass went out and lands after `wait`.
    pub async fn prep_started(&self, target: &str, threads: u32, ram: f64, wait: Duration) {
        let mut inner = self.inner.write().await;
        inner.pending.insert(
            target.to_string(),
            PendingWork {
                kind: WorkKind::Prep,
                threads,
                ram,
                expected_yield: 0.0,
                lands_at: Instant::now() + wait,
                batch_status: None,
                phases: Vec::new(),
            },
        );
    }

    /// A batch went out; the loop checks back after `wait`.
    pub async fn batch_started(&self, batch: &Batch, wait: Duration) {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        inner.pending.insert(
            batch.target.clone(),
            PendingWork {
                kind: WorkKind::Batch,
                threads: batch.total_threads(),
                ram: batch.ram_committed(),
                expected_yield: batch.expected_yield,
                lands_at: now + wait,
                batch_status: Some(batch.status),
                phases: batch
                    .phases
                    .iter()
                    .map(|p| PendingPhase {
                        kind: p.kind,
                        threads: p.threads,
                        lands_at: now + p.landing,
                    })
                    .collect(),
            },
        );
        inner
            .targets
            .entry(batch.target.clone())
            .or_default()
            .last_batch = Some(batch.status);
    }

    /// A batch landed; account its expected yield.
    pub async fn batch_finished(&self, batch: &Batch) -> anyhow::Result<()> {
        let target = batch.target.as_str();
        let yield_amount = batch.expected_yield;
        {
            let mut inner = self.inner.write().await;
            inner.pending.remove(target);
            inner.counters.batches_completed += 1;
            inner.counters.total_yield += yield_amount;
            inner.session_yield += yield_amount;
            let status = inner.targets.entry(target.to_string()).or_default();
            status.batches_completed += 1;
            status.total_yield += yield_amount;
            status.last_skip = None;
            status.last_batch = Some(batch.status);
        }
        self.store.record_batch(target, yield_amount)?;
        debug!(%target, yield_amount, "batch accounted");
        Ok(())
    }

    /// A batch could not be placed in full and was withdrawn.
    pub async fn batch_failed(&self, batch: &Batch) {
        let mut inner = self.inner.write().await;
        inner.pending.remove(&batch.target);
        inner
            .targets
            .entry(batch.target.clone())
            .or_default()
            .last_batch = Some(batch.status);
    }

    /// Forget in-flight work for `target` (it landed or was abandoned).
    pub async fn clear_in_flight(&self, target: &str) {
        self.inner.write().await.pending.remove(target);
    }

    pub async fn record_skip(&self, target: &str, reason: SkipReason) {
        let mut inner = self.inner.write().await;
        inner.counters.batches_skipped += 1;
        *inner.skipped_by_reason.entry(reason).or_insert(0) += 1;
        let status = inner.targets.entry(target.to_string()).or_default();
        status.last_skip = Some(reason);
        status.blocked = reason == SkipReason::Blocked;
        debug!(%target, %reason, "cycle skipped");
    }

    pub async fn mark_stalled(&self, target: &str) {
        let mut inner = self.inner.write().await;
        inner.pending.remove(target);
        inner.targets.entry(target.to_string()).or_default().stalled = true;
    }

    /// Drop a target that is no longer farmed. Its totals are kept.
    pub async fn remove_target(&self, target: &str) {
        let mut inner = self.inner.write().await;
        inner.pending.remove(target);
        let Some(status) = inner.targets.remove(target) else {
            return;
        };
        if status.batches_completed > 0 {
            inner.targets.insert(
                target.to_string(),
                TargetStatus {
                    batches_completed: status.batches_completed,
                    total_yield: status.total_yield,
                    ..TargetStatus::default()
                },
            );
        }
    }

    pub async fn set_share(&self, share: ShareStatus) {
        self.inner.write().await.share = share;
    }

    pub async fn set_pool_total(&self, ram: f64) {
        self.inner.write().await.pool_total = ram;
    }

    pub async fn cycle_completed(&self) {
        self.inner.write().await.counters.cycles += 1;
    }

    /// Persist running totals.
    pub async fn flush(&self) -> anyhow::Result<()> {
        let counters = self.inner.read().await.counters.clone();
        self.store.save_counters(&counters)?;
        Ok(())
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.read().await;
        let now = Instant::now();
        let uptime = now.duration_since(self.started).as_secs_f64();

        let mut in_flight: Vec<InFlight> = inner
            .pending
            .iter()
            .map(|(target, w)| InFlight {
                target: target.clone(),
                kind: w.kind,
                threads: w.threads,
                ram: w.ram,
                expected_yield: w.expected_yield,
                lands_in_ms: w.lands_at.saturating_duration_since(now).as_millis() as u64,
                batch_status: w.batch_status,
                phases: w
                    .phases
                    .iter()
                    .map(|p| PhaseInFlight {
                        kind: p.kind,
                        threads: p.threads,
                        lands_in_ms: p.lands_at.saturating_duration_since(now).as_millis() as u64,
                    })
                    .collect(),
            })
            .collect();
        in_flight.sort_by(|a, b| a.target.cmp(&b.target));

        let primary = in_flight.iter().map(|f| f.ram).sum();

        StatusSnapshot {
            uptime_secs: uptime,
            cycles: inner.counters.cycles,
            in_flight,
            targets: inner.targets.clone(),
            ram: RamUsage {
                primary,
                secondary: inner.share.ram,
                pool_total: inner.pool_total,
            },
            share: inner.share.clone(),
            batches_completed: inner.counters.batches_completed,
            batches_skipped: inner.counters.batches_skipped,
            skipped_by_reason: inner.skipped_by_reason.clone(),
            total_yield: inner.counters.total_yield,
            yield_per_sec: if uptime > 0.0 {
                inner.session_yield / uptime
            } else {
                0.0
            },
        }
    }
}
