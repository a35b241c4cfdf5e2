//! Simulated world state and job landing.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};
use tracing::trace;

use farm_core::formulas::{self, core_bonus};
use farm_core::{OperationDurations, Script, TargetSnapshot, WorkerNode};

/// Security never drifts above this.
const MAX_SECURITY: f64 = 100.0;

/// A target as the simulation tracks it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimTarget {
    pub name: String,
    pub money_max: f64,
    pub money: f64,
    pub security: f64,
    pub min_security: f64,
    pub required_level: f64,
    pub required_ports: u32,
    pub growth: f64,
    pub has_root: bool,
}

impl SimTarget {
    /// A rooted target sitting at its prepared state.
    pub fn prepped(name: &str, money_max: f64, min_security: f64) -> Self {
        Self {
            name: name.to_string(),
            money_max,
            money: money_max,
            security: min_security,
            min_security,
            required_level: 1.0,
            required_ports: 0,
            growth: 40.0,
            has_root: true,
        }
    }

    pub fn with_money(mut self, money: f64) -> Self {
        self.money = money.clamp(0.0, self.money_max);
        self
    }

    pub fn with_security(mut self, security: f64) -> Self {
        self.security = security.max(self.min_security);
        self
    }

    pub fn with_requirements(mut self, level: f64, ports: u32) -> Self {
        self.required_level = level;
        self.required_ports = ports;
        self
    }

    pub fn with_growth(mut self, growth: f64) -> Self {
        self.growth = growth;
        self
    }

    pub fn unrooted(mut self) -> Self {
        self.has_root = false;
        self
    }

    pub fn snapshot(&self, player_level: f64) -> TargetSnapshot {
        TargetSnapshot {
            name: self.name.clone(),
            money_max: self.money_max,
            money: self.money,
            security: self.security,
            min_security: self.min_security,
            required_level: self.required_level,
            required_ports: self.required_ports,
            growth: self.growth,
            has_root: self.has_root,
            durations: OperationDurations {
                hack: formulas::hack_time(player_level, self.required_level, self.security),
                grow: formulas::grow_time(player_level, self.required_level, self.security),
                weaken: formulas::weaken_time(player_level, self.required_level, self.security),
            },
        }
    }
}

/// Every accepted dispatch, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub id: u64,
    pub node: String,
    pub script: Script,
    pub threads: u32,
    pub target: Option<String>,
    /// Time since the world was built.
    pub at: Duration,
}

/// One operation taking effect on a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landing {
    pub job: u64,
    pub target: String,
    pub script: Script,
    pub threads: u32,
    pub at: Duration,
    /// Money taken (hack only).
    pub stolen: f64,
    pub security_after: f64,
    pub money_after: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct SimJob {
    pub node: String,
    pub script: Script,
    pub threads: u32,
    pub target: Option<String>,
    pub ram: f64,
    pub cores: u32,
    /// `None` for jobs that run until terminated.
    pub lands_at: Option<Instant>,
}

#[derive(Debug)]
pub(crate) struct World {
    pub started: Instant,
    pub workers: BTreeMap<String, WorkerNode>,
    pub targets: BTreeMap<String, SimTarget>,
    pub jobs: BTreeMap<u64, SimJob>,
    pub next_job: u64,
    pub player_level: f64,
    pub capability_stat: f64,
    pub root_credentials: u32,
    pub share_active: bool,
    /// Security added per second to every target.
    pub security_drift: f64,
    pub last_drift: Instant,
    pub rejecting: HashSet<String>,
    pub dispatches: Vec<DispatchRecord>,
    pub landings: Vec<Landing>,
    pub total_stolen: f64,
}

impl World {
    pub fn new(now: Instant) -> Self {
        Self {
            started: now,
            workers: BTreeMap::new(),
            targets: BTreeMap::new(),
            jobs: BTreeMap::new(),
            next_job: 1,
            player_level: 1.0,
            capability_stat: 0.0,
            root_credentials: 0,
            share_active: false,
            security_drift: 0.0,
            last_drift: now,
            rejecting: HashSet::new(),
            dispatches: Vec::new(),
            landings: Vec::new(),
            total_stolen: 0.0,
        }
    }

    /// Apply every landing due by `now`, oldest first.
    pub fn settle(&mut self, now: Instant) {
        let mut due: Vec<(Instant, u64)> = self
            .jobs
            .iter()
            .filter_map(|(id, job)| job.lands_at.filter(|at| *at <= now).map(|at| (at, *id)))
            .collect();
        due.sort();

        for (at, id) in due {
            self.apply_drift(at);
            if let Some(job) = self.jobs.remove(&id) {
                self.release(&job);
                self.land(id, &job, at);
            }
        }
        self.apply_drift(now);
    }

    fn apply_drift(&mut self, until: Instant) {
        if until <= self.last_drift {
            return;
        }
        let secs = until.duration_since(self.last_drift).as_secs_f64();
        self.last_drift = until;
        if self.security_drift <= 0.0 {
            return;
        }
        for target in self.targets.values_mut() {
            target.security = (target.security + self.security_drift * secs).min(MAX_SECURITY);
        }
    }

    fn release(&mut self, job: &SimJob) {
        if let Some(worker) = self.workers.get_mut(&job.node) {
            worker.ram_used = (worker.ram_used - job.ram).max(0.0);
        }
    }

    fn land(&mut self, id: u64, job: &SimJob, at: Instant) {
        let Some(name) = &job.target else {
            return;
        };
        let level = self.player_level;
        let Some(target) = self.targets.get_mut(name) else {
            return;
        };

        let threads = f64::from(job.threads);
        let mut stolen = 0.0;
        match job.script {
            Script::Hack => {
                let fraction =
                    formulas::hack_fraction(level, target.required_level, target.security);
                let chance = formulas::hack_chance(level, target.required_level, target.security);
                stolen = target.money * (fraction * threads).min(1.0) * chance;
                target.money -= stolen;
                target.security += formulas::HACK_SECURITY_PER_THREAD * threads;
            }
            Script::Grow => {
                let multiplier = formulas::grow_multiplier(
                    target.security,
                    target.growth,
                    threads,
                    job.cores,
                );
                target.money = (target.money.max(1.0) * multiplier).min(target.money_max);
                target.security += formulas::GROW_SECURITY_PER_THREAD * threads;
            }
            Script::Weaken => {
                let removed = formulas::WEAKEN_SECURITY_PER_THREAD * threads * core_bonus(job.cores);
                target.security = (target.security - removed).max(target.min_security);
            }
            Script::Share => {}
        }
        target.security = target.security.min(MAX_SECURITY);

        trace!(target = %name, script = %job.script, threads = job.threads, stolen, "job landed");
        self.total_stolen += stolen;
        self.landings.push(Landing {
            job: id,
            target: name.clone(),
            script: job.script,
            threads: job.threads,
            at: at.duration_since(self.started),
            stolen,
            security_after: target.security,
            money_after: target.money,
        });
    }
}
