//! [`SimEnvironment`] and its builder.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::time::Instant;
use tracing::debug;

use farm_core::{
    DispatchRequest, Environment, JobHandle, RootError, RootOutcome, Script, ScriptCosts,
    TargetSnapshot, WorkerNode,
};

use crate::world::{DispatchRecord, Landing, SimJob, SimTarget, World};

/// In-memory environment. Cheap to clone; clones share one world.
#[derive(Clone)]
pub struct SimEnvironment {
    world: Arc<Mutex<World>>,
    costs: ScriptCosts,
}

pub struct SimBuilder {
    world: World,
    costs: ScriptCosts,
}

impl SimBuilder {
    pub fn player_level(mut self, level: f64) -> Self {
        self.world.player_level = level;
        self
    }

    pub fn capability_stat(mut self, stat: f64) -> Self {
        self.world.capability_stat = stat;
        self
    }

    pub fn root_credentials(mut self, credentials: u32) -> Self {
        self.world.root_credentials = credentials;
        self
    }

    pub fn share_active(mut self, active: bool) -> Self {
        self.world.share_active = active;
        self
    }

    /// Security every target gains per second while nothing weakens it.
    pub fn security_drift(mut self, per_sec: f64) -> Self {
        self.world.security_drift = per_sec;
        self
    }

    pub fn script_costs(mut self, costs: ScriptCosts) -> Self {
        self.costs = costs;
        self
    }

    /// A rooted worker with nothing running on it.
    pub fn worker(self, name: &str, ram: f64, cores: u32) -> Self {
        self.worker_node(WorkerNode {
            name: name.to_string(),
            ram_max: ram,
            ram_used: 0.0,
            cores,
            has_root: true,
            purchased: name.starts_with("pserv"),
        })
    }

    pub fn worker_node(mut self, node: WorkerNode) -> Self {
        self.world.workers.insert(node.name.clone(), node);
        self
    }

    pub fn target(mut self, target: SimTarget) -> Self {
        self.world.targets.insert(target.name.clone(), target);
        self
    }

    pub fn build(self) -> SimEnvironment {
        SimEnvironment {
            world: Arc::new(Mutex::new(self.world)),
            costs: self.costs,
        }
    }
}

impl SimEnvironment {
    pub fn builder() -> SimBuilder {
        SimBuilder {
            world: World::new(Instant::now()),
            costs: ScriptCosts::default(),
        }
    }

    /// A deterministic world of `workers` purchased servers plus `home`,
    /// and `targets` targets of increasing value and difficulty.
    pub fn generated(workers: usize, targets: usize) -> SimEnvironment {
        let mut builder = Self::builder()
            .player_level(250.0)
            .capability_stat(100.0)
            .root_credentials(3)
            .share_active(true)
            .worker("home", 256.0, 4);
        for i in 0..workers {
            let ram = 32.0 * f64::from(1u32 << (i % 4));
            builder = builder.worker(&format!("pserv-{i}"), ram, 1);
        }
        for i in 0..targets {
            let step = i as f64;
            let name = format!("target-{i:02}");
            let min_security = 5.0 + step * 2.0;
            let target = SimTarget::prepped(&name, 1e6 * (1.0 + step).powi(2), min_security)
                .with_money(1e6 * (1.0 + step).powi(2) * 0.4)
                .with_security(min_security * 2.5)
                .with_requirements(1.0 + step * 40.0, (i % 5) as u32)
                .with_growth(20.0 + step * 5.0);
            builder = builder.target(if i % 2 == 0 { target } else { target.unrooted() });
        }
        builder.build()
    }

    fn settled(&self) -> MutexGuard<'_, World> {
        let mut world = self.world.lock().unwrap_or_else(|e| e.into_inner());
        world.settle(Instant::now());
        world
    }

    // ── Scripted changes ───────────────────────────────────────────

    pub fn set_share_active(&self, active: bool) {
        self.settled().share_active = active;
    }

    pub fn set_player_level(&self, level: f64) {
        self.settled().player_level = level;
    }

    pub fn set_root_credentials(&self, credentials: u32) {
        self.settled().root_credentials = credentials;
    }

    /// Make `node` reject (or accept again) every dispatch.
    pub fn reject_dispatch_on(&self, node: &str, reject: bool) {
        let mut world = self.settled();
        if reject {
            world.rejecting.insert(node.to_string());
        } else {
            world.rejecting.remove(node);
        }
    }

    pub fn add_worker(&self, name: &str, ram: f64, cores: u32) {
        self.settled().workers.insert(
            name.to_string(),
            WorkerNode {
                name: name.to_string(),
                ram_max: ram,
                ram_used: 0.0,
                cores,
                has_root: true,
                purchased: true,
            },
        );
    }

    /// Take a worker away along with every job on it.
    pub fn remove_worker(&self, name: &str) {
        let mut world = self.settled();
        world.workers.remove(name);
        world.jobs.retain(|_, job| job.node != name);
    }

    // ── Observation ────────────────────────────────────────────────

    pub fn target_state(&self, name: &str) -> Option<SimTarget> {
        self.settled().targets.get(name).cloned()
    }

    pub fn dispatches(&self) -> Vec<DispatchRecord> {
        self.settled().dispatches.clone()
    }

    pub fn landings(&self) -> Vec<Landing> {
        self.settled().landings.clone()
    }

    pub fn total_stolen(&self) -> f64 {
        self.settled().total_stolen
    }

    /// Running jobs of `script`, summed over threads.
    pub fn running_threads(&self, script: Script) -> u32 {
        self.settled()
            .jobs
            .values()
            .filter(|j| j.script == script)
            .map(|j| j.threads)
            .sum()
    }

    pub fn running_jobs(&self) -> usize {
        self.settled().jobs.len()
    }
}

impl Environment for SimEnvironment {
    fn worker_snapshot(&self) -> Vec<WorkerNode> {
        self.settled().workers.values().cloned().collect()
    }

    fn target_names(&self) -> Vec<String> {
        self.settled().targets.keys().cloned().collect()
    }

    fn target_snapshot(&self, name: &str) -> Option<TargetSnapshot> {
        let world = self.settled();
        world.targets.get(name).map(|t| t.snapshot(world.player_level))
    }

    fn dispatch(&self, request: &DispatchRequest) -> Option<JobHandle> {
        let now = Instant::now();
        let mut world = self.settled();
        if request.threads == 0 || world.rejecting.contains(&request.node) {
            return None;
        }

        let ram = f64::from(request.threads) * request.script.ram_cost(&self.costs);
        let worker = world.workers.get(&request.node)?;
        if !worker.has_root || worker.free_ram() + 1e-9 < ram {
            debug!(node = %request.node, ram, free = worker.free_ram(), "sim dispatch rejected");
            return None;
        }
        let cores = worker.cores;

        let lands_at = match (&request.target, request.script) {
            (_, Script::Share) => None,
            (Some(name), script) => {
                let target = world.targets.get(name)?;
                let duration = target.snapshot(world.player_level).durations.of(script);
                Some(now + request.start_delay + duration)
            }
            (None, _) => return None,
        };

        let id = world.next_job;
        world.next_job += 1;
        if let Some(worker) = world.workers.get_mut(&request.node) {
            worker.ram_used += ram;
        }
        world.jobs.insert(
            id,
            SimJob {
                node: request.node.clone(),
                script: request.script,
                threads: request.threads,
                target: request.target.clone(),
                ram,
                cores,
                lands_at,
            },
        );
        let at = now.duration_since(world.started);
        world.dispatches.push(DispatchRecord {
            id,
            node: request.node.clone(),
            script: request.script,
            threads: request.threads,
            target: request.target.clone(),
            at,
        });

        Some(JobHandle {
            id,
            node: request.node.clone(),
        })
    }

    fn terminate(&self, job: &JobHandle) -> bool {
        let mut world = self.settled();
        match world.jobs.remove(&job.id) {
            Some(removed) => {
                if let Some(worker) = world.workers.get_mut(&removed.node) {
                    worker.ram_used = (worker.ram_used - removed.ram).max(0.0);
                }
                true
            }
            None => false,
        }
    }

    fn secondary_activation_signal(&self) -> bool {
        self.settled().share_active
    }

    fn player_capability_stat(&self) -> f64 {
        self.settled().capability_stat
    }

    fn player_level(&self) -> f64 {
        self.settled().player_level
    }

    fn root_credentials(&self) -> u32 {
        self.settled().root_credentials
    }

    fn gain_root(&self, target: &str) -> Result<RootOutcome, RootError> {
        let mut world = self.settled();
        let credentials = world.root_credentials;
        let level = world.player_level;
        let Some(t) = world.targets.get_mut(target) else {
            return Err(RootError::PermanentlyUnreachable(target.to_string()));
        };
        if t.has_root {
            return Ok(RootOutcome::AlreadyRooted);
        }
        if t.required_level > level {
            return Err(RootError::PermanentlyUnreachable(target.to_string()));
        }
        if t.required_ports > credentials {
            return Err(RootError::TemporarilyUnavailable(target.to_string()));
        }
        t.has_root = true;
        Ok(RootOutcome::Rooted)
    }
}
