//! Prep controller — drives one target toward the prepared state.
//!
//! The controller is a pure state machine: `step()` reads a fresh target
//! snapshot and pool, and returns the next corrective pass. The caller
//! dispatches it, waits the returned duration, refetches, and steps again.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use farm_core::formulas::weaken_threads_for;
use farm_core::{Environment, PrepConfig, Script, ScriptCosts, TargetSnapshot};
use farmgrid_placement::{AllocationPlan, NodePriority, allocate};
use farmgrid_pool::WorkerPool;

use crate::error::{PrepError, PrepResult};

/// Security delta treated as zero after a grow pass.
const SECURITY_SLACK: f64 = 1e-6;

/// Current phase of preparation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrepState {
    Unprepped,
    /// A weaken pass is in flight.
    AwaitingSuppress,
    /// A grow pass is in flight; its security increase still has to go.
    AwaitingReplenish,
    Prepped,
}

/// One corrective pass ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct PrepPass {
    pub script: Script,
    pub threads_needed: u32,
    pub plan: AllocationPlan,
    /// Live duration of the script plus the settle buffer.
    pub wait: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrepDecision {
    Dispatch(PrepPass),
    /// Not one thread of the needed script fits right now.
    Blocked {
        script: Script,
        needed: u32,
        available: u64,
    },
    Prepped,
}

pub struct PrepController {
    target: String,
    state: PrepState,
    passes: u32,
    config: PrepConfig,
    scripts: ScriptCosts,
}

impl PrepController {
    pub fn new(target: &str, config: PrepConfig, scripts: ScriptCosts) -> Self {
        Self {
            target: target.to_string(),
            state: PrepState::Unprepped,
            passes: 0,
            config,
            scripts,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> PrepState {
        self.state
    }

    /// Correction passes since the target was last prepped.
    pub fn passes(&self) -> u32 {
        self.passes
    }

    /// Forget everything and start over from `Unprepped`.
    pub fn reset(&mut self) {
        self.state = PrepState::Unprepped;
        self.passes = 0;
    }

    /// Decide the next pass for `target`.
    pub fn step(
        &mut self,
        target: &TargetSnapshot,
        pool: &WorkerPool,
        env: &dyn Environment,
    ) -> PrepResult<PrepDecision> {
        if let Err(violation) = target.validate() {
            self.reset();
            return Err(PrepError::StaleSnapshot {
                target: self.target.clone(),
                violation,
            });
        }

        let delta = target.security_delta();
        let after_grow = self.state == PrepState::AwaitingReplenish;
        let needs_suppress =
            delta > self.config.security_epsilon || (after_grow && delta > SECURITY_SLACK);
        let needs_replenish = target.money_ratio() < self.config.money_ratio;

        if !needs_suppress && !needs_replenish {
            if self.state != PrepState::Prepped {
                info!(
                    target = %self.target,
                    passes = self.passes,
                    security_delta = delta,
                    money_ratio = target.money_ratio(),
                    "target prepped"
                );
            }
            self.state = PrepState::Prepped;
            self.passes = 0;
            return Ok(PrepDecision::Prepped);
        }

        if self.passes >= self.config.max_passes {
            warn!(
                target = %self.target,
                passes = self.passes,
                security_delta = delta,
                money_ratio = target.money_ratio(),
                "prep pass limit reached"
            );
            return Err(PrepError::PassLimit {
                target: self.target.clone(),
                passes: self.passes,
            });
        }

        let (script, threads_needed, next_state) = if needs_suppress {
            (Script::Weaken, weaken_threads_for(delta), PrepState::AwaitingSuppress)
        } else {
            let multiplier = target.money_max / target.money.max(1.0);
            let threads = env.growth_threads(target, multiplier, 1).ceil().max(1.0) as u32;
            (Script::Grow, threads, PrepState::AwaitingReplenish)
        };

        let ram_per_thread = script.ram_cost(&self.scripts);
        let plan = allocate(threads_needed, ram_per_thread, pool, NodePriority::MostFreeRam);
        if plan.is_empty() {
            let available = pool.max_threads(ram_per_thread);
            warn!(
                target = %self.target,
                %script,
                needed = threads_needed,
                available,
                "prep blocked — insufficient capacity"
            );
            return Ok(PrepDecision::Blocked {
                script,
                needed: threads_needed,
                available,
            });
        }

        self.passes += 1;
        self.state = next_state;
        let wait = target.durations.of(script) + self.config.settle_buffer();

        debug!(
            target = %self.target,
            %script,
            threads_needed,
            threads_placed = plan.threads_placed(),
            pass = self.passes,
            wait_ms = wait.as_millis() as u64,
            "prep pass planned"
        );

        Ok(PrepDecision::Dispatch(PrepPass {
            script,
            threads_needed,
            plan,
            wait,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farm_core::{
        DispatchRequest, JobHandle, OperationDurations, RootError, RootOutcome, WorkerNode,
        formulas,
    };
    use farmgrid_pool::RamReserve;

    /// Environment stub: only the formula defaults are exercised.
    struct FormulaEnv;

    impl Environment for FormulaEnv {
        fn worker_snapshot(&self) -> Vec<WorkerNode> {
            Vec::new()
        }
        fn target_names(&self) -> Vec<String> {
            Vec::new()
        }
        fn target_snapshot(&self, _name: &str) -> Option<TargetSnapshot> {
            None
        }
        fn dispatch(&self, _request: &DispatchRequest) -> Option<JobHandle> {
            None
        }
        fn terminate(&self, _job: &JobHandle) -> bool {
            false
        }
        fn secondary_activation_signal(&self) -> bool {
            false
        }
        fn player_capability_stat(&self) -> f64 {
            0.0
        }
        fn player_level(&self) -> f64 {
            100.0
        }
        fn root_credentials(&self) -> u32 {
            0
        }
        fn gain_root(&self, _target: &str) -> Result<RootOutcome, RootError> {
            Ok(RootOutcome::AlreadyRooted)
        }
    }

    fn make_target(money_ratio: f64, security_delta: f64) -> TargetSnapshot {
        TargetSnapshot {
            name: "joesguns".to_string(),
            money_max: 1_000_000.0,
            money: 1_000_000.0 * money_ratio,
            security: 10.0 + security_delta,
            min_security: 10.0,
            required_level: 10.0,
            required_ports: 0,
            growth: 40.0,
            has_root: true,
            durations: OperationDurations {
                hack: Duration::from_secs(10),
                grow: Duration::from_secs(32),
                weaken: Duration::from_secs(40),
            },
        }
    }

    fn pool(ram: f64) -> WorkerPool {
        WorkerPool::from_nodes(
            vec![WorkerNode {
                name: "home".to_string(),
                ram_max: ram,
                ram_used: 0.0,
                cores: 1,
                has_root: true,
                purchased: false,
            }],
            &RamReserve::none(),
        )
    }

    fn controller() -> PrepController {
        PrepController::new("joesguns", PrepConfig::default(), ScriptCosts::default())
    }

    fn expect_pass(decision: PrepDecision) -> PrepPass {
        match decision {
            PrepDecision::Dispatch(pass) => pass,
            other => panic!("expected a dispatch, got {other:?}"),
        }
    }

    #[test]
    fn prepped_target_needs_no_dispatch() {
        let mut c = controller();
        let decision = c.step(&make_target(1.0, 0.0), &pool(1024.0), &FormulaEnv).unwrap();
        assert_eq!(decision, PrepDecision::Prepped);
        assert_eq!(c.state(), PrepState::Prepped);
        assert_eq!(c.passes(), 0);
    }

    #[test]
    fn within_tolerance_counts_as_prepped() {
        let mut c = controller();
        let decision = c.step(&make_target(0.96, 4.0), &pool(1024.0), &FormulaEnv).unwrap();
        assert_eq!(decision, PrepDecision::Prepped);
    }

    #[test]
    fn suppresses_before_replenishing() {
        let mut c = controller();
        let pass = expect_pass(c.step(&make_target(0.6, 10.0), &pool(1024.0), &FormulaEnv).unwrap());
        assert_eq!(pass.script, Script::Weaken);
        assert_eq!(pass.threads_needed, 200);
        assert_eq!(pass.plan.threads_placed(), 200);
        assert_eq!(pass.wait, Duration::from_secs(40) + Duration::from_millis(200));
        assert_eq!(c.state(), PrepState::AwaitingSuppress);
    }

    #[test]
    fn replenish_sized_from_money_ratio() {
        let mut c = controller();
        let target = make_target(0.6, 0.0);
        let pass = expect_pass(c.step(&target, &pool(4096.0), &FormulaEnv).unwrap());
        let expected = formulas::growth_threads(10.0, 40.0, 1.0 / 0.6, 1).ceil() as u32;
        assert_eq!(pass.script, Script::Grow);
        assert_eq!(pass.threads_needed, expected);
        assert_eq!(c.state(), PrepState::AwaitingReplenish);
    }

    #[test]
    fn grow_security_is_always_cancelled() {
        let mut c = controller();
        let target = make_target(0.6, 0.0);
        let grow = expect_pass(c.step(&target, &pool(4096.0), &FormulaEnv).unwrap());

        // The grow landed: money is full, security rose by its increment.
        let increase = f64::from(grow.threads_needed) * formulas::GROW_SECURITY_PER_THREAD;
        assert!(increase < PrepConfig::default().security_epsilon);
        let grown = make_target(1.0, increase);

        let weaken = expect_pass(c.step(&grown, &pool(4096.0), &FormulaEnv).unwrap());
        assert_eq!(weaken.script, Script::Weaken);
        assert_eq!(weaken.threads_needed, weaken_threads_for(increase));

        let done = c.step(&make_target(1.0, 0.0), &pool(4096.0), &FormulaEnv).unwrap();
        assert_eq!(done, PrepDecision::Prepped);
    }

    #[test]
    fn zero_money_uses_floor_of_one() {
        let mut c = controller();
        let target = make_target(0.0, 0.0);
        let pass = expect_pass(c.step(&target, &pool(1e9), &FormulaEnv).unwrap());
        let expected = formulas::growth_threads(10.0, 40.0, 1_000_000.0, 1).ceil() as u32;
        assert_eq!(pass.threads_needed, expected);
    }

    #[test]
    fn partial_plan_is_still_dispatched() {
        let mut c = controller();
        // 35 RAM holds 20 of the 200 weaken threads.
        let pass = expect_pass(c.step(&make_target(1.0, 10.0), &pool(35.0), &FormulaEnv).unwrap());
        assert_eq!(pass.plan.threads_placed(), 20);
        assert_eq!(pass.plan.shortfall(), 180);
    }

    #[test]
    fn blocked_without_capacity() {
        let mut c = controller();
        let decision = c.step(&make_target(1.0, 10.0), &pool(1.0), &FormulaEnv).unwrap();
        assert_eq!(
            decision,
            PrepDecision::Blocked {
                script: Script::Weaken,
                needed: 200,
                available: 0
            }
        );
        assert_eq!(c.state(), PrepState::Unprepped);
        assert_eq!(c.passes(), 0);
    }

    #[test]
    fn stale_snapshot_resets_state() {
        let mut c = controller();
        expect_pass(c.step(&make_target(0.6, 10.0), &pool(1024.0), &FormulaEnv).unwrap());

        let mut broken = make_target(0.6, 0.0);
        broken.security = 5.0;
        let err = c.step(&broken, &pool(1024.0), &FormulaEnv).unwrap_err();
        assert!(matches!(err, PrepError::StaleSnapshot { .. }));
        assert_eq!(c.state(), PrepState::Unprepped);
        assert_eq!(c.passes(), 0);
    }

    #[test]
    fn pass_limit_stops_runaway_correction() {
        let config = PrepConfig {
            max_passes: 3,
            ..PrepConfig::default()
        };
        let mut c = PrepController::new("joesguns", config, ScriptCosts::default());
        let drifting = make_target(1.0, 20.0);
        for _ in 0..3 {
            expect_pass(c.step(&drifting, &pool(1024.0), &FormulaEnv).unwrap());
        }
        let err = c.step(&drifting, &pool(1024.0), &FormulaEnv).unwrap_err();
        assert_eq!(
            err,
            PrepError::PassLimit {
                target: "joesguns".to_string(),
                passes: 3
            }
        );
    }
}
