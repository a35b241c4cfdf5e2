//! Orchestrator — the top-level cycle.
//!
//! Every `cycle_interval` the orchestrator:
//! 1. Tears down the share workload and refreshes the worker pool
//! 2. Scores every target and keeps a loop running for the best ones
//! 3. Lets the loops claim RAM, then spends what is left on share
//! 4. Publishes counters
//!
//! Loops are sticky: a running loop keeps its slot as long as its target
//! is still worth farming, and free slots go to the best unfarmed targets.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use farm_core::{Environment, FarmConfig, Script};
use farmgrid_metrics::{MetricsCollector, ShareStatus, StatusSnapshot};
use farmgrid_pool::RamReserve;
use farmgrid_share::{bonus_multiplier, compute_allocation};
use farmgrid_targets::{ScoredTarget, ScoringContext, rank_targets};

use crate::dispatch::Dispatcher;
use crate::error::DriverResult;
use crate::gate::AllocationGate;
use crate::target_loop::TargetLoop;

/// Per-target loop state held by the orchestrator.
struct LoopSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// What one orchestrator cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub workers: usize,
    pub candidates: usize,
    /// Targets with a running loop after this cycle, best first.
    pub farming: Vec<String>,
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub share_threads: u32,
}

pub struct Orchestrator {
    env: Arc<dyn Environment>,
    gate: Arc<AllocationGate>,
    metrics: MetricsCollector,
    config: Arc<FarmConfig>,
    loops: HashMap<String, LoopSlot>,
    /// Targets whose loop gave up; never restarted in this run.
    halted: BTreeSet<String>,
}

impl Orchestrator {
    pub fn new(
        env: Arc<dyn Environment>,
        config: FarmConfig,
        metrics: MetricsCollector,
    ) -> DriverResult<Self> {
        config.validate()?;
        let reserve = RamReserve::home(config.driver.home_reserve_ram);
        let gate = Arc::new(AllocationGate::new(Arc::clone(&env), reserve));
        Ok(Self {
            env,
            gate,
            metrics,
            config: Arc::new(config),
            loops: HashMap::new(),
            halted: BTreeSet::new(),
        })
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Targets with a running loop.
    pub fn farming(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loops.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run one orchestrator cycle.
    pub async fn cycle(&mut self) -> DriverResult<CycleReport> {
        let mut report = CycleReport::default();
        self.reap_finished().await;

        // ── Selection ──────────────────────────────────────────────
        let pool = {
            let mut guard = self.gate.lock().await;
            guard.teardown_share();
            guard.pool()
        };
        report.workers = pool.len();

        let snapshots: Vec<_> = self
            .env
            .target_names()
            .iter()
            .filter_map(|name| self.env.target_snapshot(name))
            .collect();
        let ctx = ScoringContext {
            player_level: self.env.player_level(),
            root_credentials: self.env.root_credentials(),
            batch: self.config.batch.clone(),
            scripts: self.config.scripts.clone(),
        };
        let scored: Vec<ScoredTarget> = rank_targets(&snapshots, &ctx, &pool)
            .into_iter()
            .filter(|s| !self.halted.contains(&s.name))
            .collect();
        let ranked: Vec<String> = scored.iter().map(|s| s.name.clone()).collect();
        report.candidates = ranked.len();

        let stale: Vec<String> = self
            .loops
            .keys()
            .filter(|name| !ranked.contains(*name))
            .cloned()
            .collect();
        for name in stale {
            self.stop_loop(&name).await;
            report.stopped.push(name);
        }

        // Every loop gets an equal slice of the pool; a new target is only
        // admitted while the widest batch still fits in one.
        let mut widest = scored
            .iter()
            .filter(|s| self.loops.contains_key(&s.name))
            .map(|s| s.batch_ram)
            .fold(0.0, f64::max);
        let mut admitted = Vec::new();
        for candidate in &scored {
            let running = self.loops.len() + admitted.len();
            if running >= self.config.driver.max_targets {
                break;
            }
            if self.loops.contains_key(&candidate.name) {
                continue;
            }
            let slice = pool.total_ram() / (running + 1) as f64;
            if running > 0 && widest.max(candidate.batch_ram) > slice {
                debug!(
                    target = %candidate.name,
                    batch_ram = candidate.batch_ram,
                    slice,
                    "no room for another loop"
                );
                continue;
            }
            widest = widest.max(candidate.batch_ram);
            admitted.push(candidate.name.clone());
        }
        // Resize slices before any new loop can take a snapshot.
        let slices = {
            let mut guard = self.gate.lock().await;
            guard.set_slots(self.loops.len() + admitted.len());
            guard.slots()
        };
        for name in admitted {
            self.start_loop(&name);
            report.started.push(name);
        }
        report.farming = ranked
            .iter()
            .filter(|name| self.loops.contains_key(*name))
            .cloned()
            .collect();

        // Loops claim primary RAM before share sees the pool.
        tokio::task::yield_now().await;

        // ── Share ──────────────────────────────────────────────────
        report.share_threads = self.run_share().await;

        self.metrics.set_pool_total(pool.total_ram()).await;
        self.metrics.cycle_completed().await;
        if let Err(e) = self.metrics.flush().await {
            error!(error = %e, "failed to persist counters");
        }

        debug!(
            workers = report.workers,
            candidates = report.candidates,
            farming = report.farming.len(),
            slices,
            share_threads = report.share_threads,
            "orchestrator cycle complete"
        );
        Ok(report)
    }

    async fn run_share(&self) -> u32 {
        let mut guard = self.gate.lock().await;
        if !self.env.secondary_activation_signal() {
            guard.teardown_share();
            self.metrics.set_share(ShareStatus::default()).await;
            return 0;
        }

        let pool = guard.pool();
        let allocation = compute_allocation(
            &pool,
            &self.config.share,
            self.config.scripts.share,
            self.env.player_capability_stat(),
            true,
        );
        if allocation.is_empty() {
            self.metrics
                .set_share(ShareStatus {
                    active: true,
                    ..ShareStatus::default()
                })
                .await;
            return 0;
        }

        let mut dispatcher = Dispatcher::new(self.gate.env(), "share");
        let mut out = dispatcher.dispatch(
            &allocation.to_plan(),
            Script::Share,
            None,
            Duration::ZERO,
        );
        guard.record_share(std::mem::take(&mut out.jobs));
        drop(guard);

        if out.shortfall > 0 {
            warn!(shortfall = out.shortfall, "share workload partially dispatched");
        }
        let multiplier = if out.is_complete() {
            allocation.bonus_multiplier
        } else {
            // Scale down to what actually started.
            let started = f64::from(out.threads_dispatched) / f64::from(allocation.base_threads);
            bonus_multiplier(allocation.effective_threads * started)
        };
        self.metrics
            .set_share(ShareStatus {
                active: true,
                threads: out.threads_dispatched,
                ram: f64::from(out.threads_dispatched) * allocation.ram_per_thread,
                bonus_multiplier: multiplier,
            })
            .await;
        info!(
            threads = out.threads_dispatched,
            multiplier,
            "share workload running"
        );
        out.threads_dispatched
    }

    fn start_loop(&mut self, target: &str) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let target_loop = TargetLoop::new(
            target,
            Arc::clone(&self.gate),
            self.metrics.clone(),
            Arc::clone(&self.config),
        );
        let handle = tokio::spawn(target_loop.run(shutdown_rx));
        self.loops.insert(
            target.to_string(),
            LoopSlot {
                handle,
                shutdown_tx,
            },
        );
        info!(%target, "farming target");
    }

    async fn stop_loop(&mut self, target: &str) {
        if let Some(slot) = self.loops.remove(target) {
            let _ = slot.shutdown_tx.send(true);
            if let Err(e) = slot.handle.await {
                warn!(%target, error = %e, "target loop did not stop cleanly");
            }
            self.gate.lock().await.release(target);
            self.metrics.remove_target(target).await;
            info!(%target, "stopped farming target");
        }
    }

    /// Drop slots whose loop ended on its own; those targets halted.
    async fn reap_finished(&mut self) {
        let finished: Vec<String> = self
            .loops
            .iter()
            .filter(|(_, slot)| slot.handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        for name in finished {
            if let Some(slot) = self.loops.remove(&name) {
                let _ = slot.handle.await;
            }
            self.gate.lock().await.release(&name);
            warn!(target = %name, "target loop ended — not restarting");
            self.halted.insert(name);
        }
    }

    /// Cycle until `shutdown` fires, then stop everything.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> DriverResult<StatusSnapshot> {
        info!(
            interval_ms = self.config.driver.cycle_interval_ms,
            max_targets = self.config.driver.max_targets,
            "orchestrator started"
        );

        loop {
            if let Err(e) = self.cycle().await {
                error!(error = %e, "orchestrator cycle failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.driver.cycle_interval()) => {}
                _ = shutdown.changed() => {
                    info!("orchestrator shutting down");
                    break;
                }
            }
        }

        self.shutdown().await
    }

    /// Stop all loops, tear down share and persist counters.
    pub async fn shutdown(&mut self) -> DriverResult<StatusSnapshot> {
        let names: Vec<String> = self.loops.keys().cloned().collect();
        for slot in self.loops.values() {
            let _ = slot.shutdown_tx.send(true);
        }
        for name in names {
            if let Some(slot) = self.loops.remove(&name) {
                let _ = slot.handle.await;
            }
        }
        self.gate.lock().await.teardown_share();
        self.metrics.set_share(ShareStatus::default()).await;
        self.metrics.flush().await?;
        Ok(self.metrics.snapshot().await)
    }
}
