//! Target loop — the cooperative task that farms one target.
//!
//! Each call to [`TargetLoop::cycle`] does one unit of work (root, one prep
//! pass, or one batch) and says how long to sleep before the next.
//! [`TargetLoop::run`] repeats that until told to stop or until prep
//! gives up on the target.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use farm_core::{FarmConfig, JobHandle, OperationKind, RootError, RootOutcome, Script, TargetSnapshot};
use farmgrid_batch::{Batch, BatchError, BatchStatus, plan_batch};
use farmgrid_metrics::{MetricsCollector, SkipReason};
use farmgrid_pool::WorkerPool;
use farmgrid_prep::{PrepController, PrepDecision, PrepError, PrepPass};

use crate::dispatch::Dispatcher;
use crate::error::DriverError;
use crate::gate::{AllocationGate, GateGuard};

/// Result of one loop iteration.
#[derive(Debug)]
pub enum CycleOutcome {
    /// A prep pass is in flight.
    Prepping { script: Script, wait: Duration },
    /// A batch is in flight; it lands after `wait`.
    Batching { expected_yield: f64, wait: Duration },
    /// Nothing dispatched this time.
    Skipped { reason: SkipReason, retry_in: Duration },
    /// The loop cannot make progress on this target.
    Halted(DriverError),
}

impl CycleOutcome {
    fn wait(&self) -> Option<Duration> {
        match self {
            CycleOutcome::Prepping { wait, .. } | CycleOutcome::Batching { wait, .. } => {
                Some(*wait)
            }
            CycleOutcome::Skipped { retry_in, .. } => Some(*retry_in),
            CycleOutcome::Halted(_) => None,
        }
    }
}

/// Jobs and RAM of a batch whose every phase was accepted.
#[derive(Debug, Default)]
struct PlacedBatch {
    jobs: Vec<JobHandle>,
    ram_by_node: Vec<(String, f64)>,
}

pub struct TargetLoop {
    target: String,
    gate: Arc<AllocationGate>,
    metrics: MetricsCollector,
    config: Arc<FarmConfig>,
    prep: PrepController,
    /// The batch whose landing we are waiting on.
    in_flight: Option<Batch>,
}

impl TargetLoop {
    pub fn new(
        target: &str,
        gate: Arc<AllocationGate>,
        metrics: MetricsCollector,
        config: Arc<FarmConfig>,
    ) -> Self {
        let prep = PrepController::new(target, config.prep.clone(), config.scripts.clone());
        Self {
            target: target.to_string(),
            gate,
            metrics,
            config,
            prep,
            in_flight: None,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Run until `shutdown` fires or the target is abandoned.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(target = %self.target, "target loop started");
        loop {
            let outcome = self.cycle().await;
            let Some(wait) = outcome.wait() else {
                if let CycleOutcome::Halted(e) = outcome {
                    error!(target = %self.target, error = %e, "target loop halted");
                }
                break;
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    debug!(target = %self.target, "target loop shutting down");
                    break;
                }
            }
        }
        self.metrics.clear_in_flight(&self.target).await;
    }

    /// One unit of work. Call again after the returned wait.
    pub async fn cycle(&mut self) -> CycleOutcome {
        if let Some(batch) = self.in_flight.take() {
            self.finish_batch(batch).await;
        }
        self.metrics.clear_in_flight(&self.target).await;

        let Some(mut snapshot) = self.gate.env().target_snapshot(&self.target) else {
            return self.skip(SkipReason::Unreachable).await;
        };
        if !snapshot.has_root {
            match self.gain_root().await {
                Some(fresh) => snapshot = fresh,
                None => return self.skip(SkipReason::Unreachable).await,
            }
        }

        let gate = Arc::clone(&self.gate);
        let mut guard = gate.lock().await;
        let pool = guard.primary_pool_for(&self.target);
        let env = gate.env();

        let decision = match self.prep.step(&snapshot, &pool, env) {
            Ok(decision) => decision,
            Err(PrepError::StaleSnapshot { .. }) => {
                drop(guard);
                self.metrics.set_prep_state(&self.target, self.prep.state()).await;
                return self
                    .skip_for(SkipReason::StaleSnapshot, self.config.prep.settle_buffer())
                    .await;
            }
            Err(e @ PrepError::PassLimit { .. }) => {
                drop(guard);
                self.metrics.mark_stalled(&self.target).await;
                return CycleOutcome::Halted(DriverError::Prep(e));
            }
        };

        match decision {
            PrepDecision::Dispatch(pass) => self.dispatch_prep(&mut guard, &pass).await,
            PrepDecision::Blocked { .. } => {
                drop(guard);
                self.skip(SkipReason::Blocked).await
            }
            PrepDecision::Prepped => {
                self.metrics.set_prep_state(&self.target, self.prep.state()).await;
                self.dispatch_batch(&mut guard, &snapshot, &pool).await
            }
        }
    }

    async fn gain_root(&self) -> Option<TargetSnapshot> {
        let env = self.gate.env();
        match env.gain_root(&self.target) {
            Ok(RootOutcome::Rooted) => {
                info!(target = %self.target, "root gained");
                env.target_snapshot(&self.target)
            }
            Ok(RootOutcome::AlreadyRooted) => env.target_snapshot(&self.target),
            Err(RootError::TemporarilyUnavailable(_)) => {
                debug!(target = %self.target, "root not available yet");
                None
            }
            Err(e @ RootError::PermanentlyUnreachable(_)) => {
                warn!(target = %self.target, error = %e, "target cannot be rooted");
                None
            }
        }
    }

    async fn dispatch_prep(&mut self, guard: &mut GateGuard<'_>, pass: &PrepPass) -> CycleOutcome {
        let mut dispatcher = Dispatcher::new(self.gate.env(), format!("prep:{}", self.target));
        let out = dispatcher.dispatch(&pass.plan, pass.script, Some(&self.target), Duration::ZERO);
        self.metrics.set_prep_state(&self.target, self.prep.state()).await;

        if out.threads_dispatched == 0 {
            // Nothing went out; measure again next cycle instead of waiting
            // on a pass that never started.
            self.prep.reset();
            return self.skip(SkipReason::PlacementFailed).await;
        }

        guard.commit(&self.target, &out.ram_by_node, Instant::now() + pass.wait);
        let ram = f64::from(out.threads_dispatched) * pass.plan.ram_per_thread;
        self.metrics
            .prep_started(&self.target, out.threads_dispatched, ram, pass.wait)
            .await;
        info!(
            target = %self.target,
            script = %pass.script,
            threads = out.threads_dispatched,
            shortfall = pass.threads_needed.saturating_sub(out.threads_dispatched),
            wait_ms = pass.wait.as_millis() as u64,
            "prep pass dispatched"
        );
        CycleOutcome::Prepping {
            script: pass.script,
            wait: pass.wait,
        }
    }

    async fn dispatch_batch(
        &mut self,
        guard: &mut GateGuard<'_>,
        snapshot: &TargetSnapshot,
        pool: &WorkerPool,
    ) -> CycleOutcome {
        let env = self.gate.env();
        let mut batch = match plan_batch(snapshot, pool, env, &self.config) {
            Ok(batch) => batch,
            Err(BatchError::InsufficientRam { .. }) => {
                return self.skip(SkipReason::InsufficientRam).await;
            }
            Err(BatchError::StaleSnapshot { .. }) => {
                return self.skip(SkipReason::StaleSnapshot).await;
            }
            Err(BatchError::Unprepped { .. }) => {
                self.prep.reset();
                return self
                    .skip_for(SkipReason::StaleSnapshot, self.config.prep.settle_buffer())
                    .await;
            }
            Err(e @ BatchError::NoYield { .. }) => {
                warn!(target = %self.target, error = %e, "batch would earn nothing");
                return self.skip(SkipReason::Unreachable).await;
            }
        };

        let mut placed = self.place_batch(&batch);
        let rejecting = match &placed {
            Err(nodes) => nodes.clone(),
            Ok(_) => Vec::new(),
        };
        if !rejecting.is_empty() {
            // One more try on whatever the rejecting nodes leave.
            let rest = rejecting.iter().fold(pool.clone(), |p, node| p.without(node));
            match plan_batch(snapshot, &rest, env, &self.config) {
                Ok(replanned) => {
                    info!(
                        target = %self.target,
                        excluded = ?rejecting,
                        "batch replanned without rejecting nodes"
                    );
                    batch = replanned;
                    placed = self.place_batch(&batch);
                }
                Err(e) => {
                    debug!(target = %self.target, error = %e, "no batch fits without rejecting nodes");
                }
            }
        }
        let Ok(placed) = placed else {
            return self.abandon_batch(batch).await;
        };

        let wait = batch.landing + self.config.batch.landing_buffer();
        guard.commit(&self.target, &placed.ram_by_node, Instant::now() + wait);
        batch.mark(BatchStatus::Executing);
        self.metrics.batch_started(&batch, wait).await;
        info!(
            target = %self.target,
            threads = batch.total_threads(),
            jobs = placed.jobs.len(),
            committed = guard.committed(&self.target),
            hack = batch.phase(OperationKind::Harvest).map(|p| p.threads).unwrap_or(0),
            landing_ms = batch.landing.as_millis() as u64,
            "batch dispatched"
        );

        let expected_yield = batch.expected_yield;
        self.in_flight = Some(batch);
        CycleOutcome::Batching {
            expected_yield,
            wait,
        }
    }

    /// Dispatch every phase of `batch`, or none of them.
    ///
    /// Phases go out last-landing first, so a harvest never runs without
    /// the operations that cover it. When a phase comes up short, every job
    /// already accepted is terminated and the nodes that rejected are
    /// returned.
    fn place_batch(&self, batch: &Batch) -> Result<PlacedBatch, Vec<String>> {
        let env = self.gate.env();
        let mut dispatcher = Dispatcher::new(env, format!("batch:{}", self.target));
        let mut placed = PlacedBatch::default();

        for phase in batch.phases.iter().rev() {
            let out = dispatcher.dispatch(
                &phase.plan,
                phase.kind.script(),
                Some(&self.target),
                phase.start_delay,
            );
            let complete = out.is_complete();
            let shortfall = out.shortfall;
            placed.jobs.extend(out.jobs);
            placed.ram_by_node.extend(out.ram_by_node);
            if !complete {
                let withdrawn = placed.jobs.iter().filter(|job| env.terminate(job)).count();
                warn!(
                    target = %self.target,
                    phase = %phase.kind,
                    shortfall,
                    withdrawn,
                    "batch phase short — withdrawing batch"
                );
                return Err(dispatcher.failed_nodes().iter().cloned().collect());
            }
        }
        Ok(placed)
    }

    async fn abandon_batch(&self, mut batch: Batch) -> CycleOutcome {
        batch.mark(BatchStatus::Failed);
        self.metrics.batch_failed(&batch).await;
        self.skip(SkipReason::PlacementFailed).await
    }

    async fn finish_batch(&mut self, mut batch: Batch) {
        batch.mark(BatchStatus::Completed);
        if let Err(e) = self.metrics.batch_finished(&batch).await {
            warn!(target = %self.target, error = %e, "failed to record batch");
        }
    }

    async fn skip(&self, reason: SkipReason) -> CycleOutcome {
        self.skip_for(reason, self.config.driver.cycle_interval()).await
    }

    async fn skip_for(&self, reason: SkipReason, retry_in: Duration) -> CycleOutcome {
        self.metrics.record_skip(&self.target, reason).await;
        CycleOutcome::Skipped { reason, retry_in }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farm_core::Environment;
    use farmgrid_pool::RamReserve;
    use farmgrid_prep::PrepState;
    use farmgrid_sim::{SimEnvironment, SimTarget};
    use farmgrid_state::CounterStore;

    fn make_loop(sim: &SimEnvironment, target: &str) -> TargetLoop {
        let env: Arc<dyn Environment> = Arc::new(sim.clone());
        let gate = Arc::new(AllocationGate::new(env, RamReserve::none()));
        let metrics = MetricsCollector::new(CounterStore::open_in_memory().unwrap()).unwrap();
        TargetLoop::new(target, gate, metrics, Arc::new(FarmConfig::default()))
    }

    fn expect_wait(outcome: &CycleOutcome) -> Duration {
        outcome.wait().expect("loop halted")
    }

    #[tokio::test(start_paused = true)]
    async fn prepped_target_goes_straight_to_batching() {
        let sim = SimEnvironment::builder()
            .player_level(100.0)
            .worker("home", 4096.0, 1)
            .target(SimTarget::prepped("n00dles", 1e6, 5.0))
            .build();
        let mut l = make_loop(&sim, "n00dles");

        let outcome = l.cycle().await;
        assert!(matches!(outcome, CycleOutcome::Batching { .. }), "{outcome:?}");
        assert_eq!(l.prep.state(), PrepState::Prepped);

        let scripts: Vec<Script> = sim.dispatches().iter().map(|d| d.script).collect();
        // Last-landing phase goes out first.
        assert_eq!(
            scripts,
            vec![Script::Weaken, Script::Grow, Script::Weaken, Script::Hack]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_phase_withdraws_the_whole_batch() {
        let sim = SimEnvironment::builder()
            .player_level(100.0)
            .worker("pserv-a", 500.0, 1)
            .worker("pserv-b", 480.0, 1)
            .target(SimTarget::prepped("n00dles", 1e6, 5.0))
            .build();
        sim.reject_dispatch_on("pserv-b", true);
        let mut l = make_loop(&sim, "n00dles");

        let outcome = l.cycle().await;
        assert!(
            matches!(
                outcome,
                CycleOutcome::Skipped {
                    reason: SkipReason::PlacementFailed,
                    ..
                }
            ),
            "{outcome:?}"
        );
        assert_eq!(sim.running_jobs(), 0);
        assert!(sim.dispatches().iter().all(|d| d.script != Script::Hack));

        let status = l.metrics.snapshot().await;
        assert_eq!(status.targets["n00dles"].last_batch, Some(BatchStatus::Failed));
        assert!(status.in_flight.is_empty());

        tokio::time::advance(Duration::from_secs(600)).await;
        assert!(sim.landings().is_empty());
        let target = sim.target_state("n00dles").unwrap();
        assert_eq!(target.money, target.money_max);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_is_replanned_without_a_rejecting_node() {
        let sim = SimEnvironment::builder()
            .player_level(100.0)
            .worker("pserv-a", 700.0, 1)
            .worker("pserv-b", 800.0, 1)
            .target(SimTarget::prepped("n00dles", 1e6, 5.0))
            .build();
        sim.reject_dispatch_on("pserv-b", true);
        let mut l = make_loop(&sim, "n00dles");

        let outcome = l.cycle().await;
        let CycleOutcome::Batching { wait, .. } = outcome else {
            panic!("expected a batch, got {outcome:?}");
        };
        assert!(sim.dispatches().iter().all(|d| d.node == "pserv-a"));

        tokio::time::advance(wait).await;
        let landed: Vec<Script> = sim.landings().iter().map(|l| l.script).collect();
        assert_eq!(
            landed,
            vec![Script::Hack, Script::Weaken, Script::Grow, Script::Weaken]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn drifted_target_goes_back_to_prep() {
        let sim = SimEnvironment::builder()
            .player_level(100.0)
            .security_drift(0.1)
            .worker("home", 4096.0, 1)
            .target(SimTarget::prepped("n00dles", 1e6, 5.0))
            .build();
        let mut l = make_loop(&sim, "n00dles");

        let first = l.cycle().await;
        assert!(matches!(first, CycleOutcome::Batching { .. }), "{first:?}");
        tokio::time::advance(expect_wait(&first)).await;

        let second = l.cycle().await;
        assert!(
            matches!(
                second,
                CycleOutcome::Prepping {
                    script: Script::Weaken,
                    ..
                }
            ),
            "{second:?}"
        );
        assert_eq!(l.prep.state(), PrepState::AwaitingSuppress);
        assert_eq!(l.metrics.snapshot().await.batches_completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_keeps_batching_after_a_worker_vanishes() {
        let sim = SimEnvironment::builder()
            .player_level(100.0)
            .worker("home", 4096.0, 1)
            .worker("pserv-0", 4096.0, 1)
            .target(SimTarget::prepped("n00dles", 1e6, 5.0))
            .build();
        let mut l = make_loop(&sim, "n00dles");

        let first = l.cycle().await;
        tokio::time::advance(expect_wait(&first)).await;
        sim.remove_worker("pserv-0");

        let second = l.cycle().await;
        assert!(matches!(second, CycleOutcome::Batching { .. }), "{second:?}");
        let dispatches = sim.dispatches();
        let last_four: Vec<&str> = dispatches
            .iter()
            .rev()
            .take(4)
            .map(|d| d.node.as_str())
            .collect();
        assert_eq!(last_four, vec!["home"; 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_is_accounted_after_landing() {
        let sim = SimEnvironment::builder()
            .player_level(100.0)
            .worker("home", 4096.0, 1)
            .target(SimTarget::prepped("n00dles", 1e6, 5.0))
            .build();
        let mut l = make_loop(&sim, "n00dles");

        let first = l.cycle().await;
        let CycleOutcome::Batching { expected_yield, wait } = first else {
            panic!("expected a batch, got {first:?}");
        };
        tokio::time::advance(wait).await;
        l.cycle().await;

        let snap = l.metrics.snapshot().await;
        assert_eq!(snap.batches_completed, 1);
        assert!((snap.total_yield - expected_yield).abs() < 1e-6);
        assert!((sim.total_stolen() - expected_yield).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn unrooted_target_is_rooted_first() {
        let sim = SimEnvironment::builder()
            .player_level(100.0)
            .root_credentials(1)
            .worker("home", 4096.0, 1)
            .target(
                SimTarget::prepped("foodnstuff", 1e6, 5.0)
                    .unrooted()
                    .with_requirements(1.0, 1),
            )
            .build();
        let mut l = make_loop(&sim, "foodnstuff");
        let outcome = l.cycle().await;
        assert!(sim.target_state("foodnstuff").unwrap().has_root);
        assert!(matches!(outcome, CycleOutcome::Batching { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credentials_skip_until_acquired() {
        let sim = SimEnvironment::builder()
            .player_level(100.0)
            .worker("home", 4096.0, 1)
            .target(
                SimTarget::prepped("phantasy", 1e6, 5.0)
                    .unrooted()
                    .with_requirements(1.0, 2),
            )
            .build();
        let mut l = make_loop(&sim, "phantasy");
        let outcome = l.cycle().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Skipped {
                reason: SkipReason::Unreachable,
                ..
            }
        ));
        assert!(sim.dispatches().is_empty());

        // A second credential makes it rootable on the next pass.
        sim.set_root_credentials(2);
        let outcome = l.cycle().await;
        assert!(matches!(outcome, CycleOutcome::Batching { .. }), "{outcome:?}");
        assert!(sim.target_state("phantasy").unwrap().has_root);
    }

    #[tokio::test(start_paused = true)]
    async fn tiny_pool_skips_batch_without_dispatch() {
        let sim = SimEnvironment::builder()
            .player_level(100.0)
            .worker("home", 8.0, 1)
            .target(SimTarget::prepped("n00dles", 1e6, 5.0))
            .build();
        let mut l = make_loop(&sim, "n00dles");
        let outcome = l.cycle().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Skipped {
                reason: SkipReason::InsufficientRam,
                ..
            }
        ));
        assert!(sim.dispatches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_prep_dispatch_is_a_placement_failure() {
        let sim = SimEnvironment::builder()
            .player_level(100.0)
            .worker("home", 4096.0, 1)
            .target(SimTarget::prepped("n00dles", 1e6, 5.0).with_security(15.0))
            .build();
        sim.reject_dispatch_on("home", true);
        let mut l = make_loop(&sim, "n00dles");
        let outcome = l.cycle().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Skipped {
                reason: SkipReason::PlacementFailed,
                ..
            }
        ));
        assert_eq!(l.prep.state(), PrepState::Unprepped);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let sim = SimEnvironment::builder()
            .player_level(100.0)
            .worker("home", 4096.0, 1)
            .target(SimTarget::prepped("n00dles", 1e6, 5.0).with_money(2e5))
            .build();
        let l = make_loop(&sim, "n00dles");
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(l.run(rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(!sim.dispatches().is_empty());
    }

    #[test]
    fn halted_outcome_has_no_wait() {
        let halted = CycleOutcome::Halted(DriverError::Prep(PrepError::PassLimit {
            target: "x".to_string(),
            passes: 40,
        }));
        assert!(halted.wait().is_none());
        let skipped = CycleOutcome::Skipped {
            reason: SkipReason::Blocked,
            retry_in: Duration::from_secs(2),
        };
        assert_eq!(expect_wait(&skipped), Duration::from_secs(2));
    }
}
