//! Allocation gate — the single place pool snapshots are taken for dispatch.
//!
//! Holding a [`GateGuard`] is what makes a snapshot → allocate → dispatch
//! sequence safe: nobody else can dispatch until the guard drops, so the
//! snapshot stays true for the whole sequence.
//!
//! Concurrent target loops each get a slice of every node: `ram_max /
//! slots`. The gate remembers what each target committed and until when,
//! and [`GateGuard::primary_pool_for`] hides everything outside the
//! caller's remaining slice. One loop's long prep pass therefore cannot
//! starve the others.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, info};

use farm_core::{Environment, JobHandle};
use farmgrid_pool::{PoolTracker, RamReserve, WorkerPool};

/// RAM a target holds on one node until its work lands.
struct Commitment {
    node: String,
    ram: f64,
    until: Instant,
}

struct GateState {
    tracker: PoolTracker,
    share_jobs: Vec<JobHandle>,
    /// Number of loops sharing the pool.
    slots: usize,
    commitments: HashMap<String, Vec<Commitment>>,
}

pub struct AllocationGate {
    env: Arc<dyn Environment>,
    state: Mutex<GateState>,
}

impl AllocationGate {
    pub fn new(env: Arc<dyn Environment>, reserve: RamReserve) -> Self {
        Self {
            env,
            state: Mutex::new(GateState {
                tracker: PoolTracker::new(reserve),
                share_jobs: Vec::new(),
                slots: 1,
                commitments: HashMap::new(),
            }),
        }
    }

    pub fn env(&self) -> &dyn Environment {
        self.env.as_ref()
    }

    /// Wait for exclusive access to allocation.
    pub async fn lock(&self) -> GateGuard<'_> {
        GateGuard {
            state: self.state.lock().await,
            env: self.env.as_ref(),
        }
    }
}

/// Exclusive allocation access. Dispatch only while holding one.
pub struct GateGuard<'a> {
    state: MutexGuard<'a, GateState>,
    env: &'a dyn Environment,
}

impl GateGuard<'_> {
    /// A fresh pool snapshot.
    pub fn pool(&mut self) -> WorkerPool {
        let (pool, _changes) = self.state.tracker.refresh(self.env);
        pool
    }

    /// Stop the share workload and take a fresh snapshot for primary work.
    pub fn primary_pool(&mut self) -> WorkerPool {
        self.teardown_share();
        self.pool()
    }

    /// Like [`primary_pool`](Self::primary_pool), limited to what is left of
    /// `target`'s slice on each node.
    pub fn primary_pool_for(&mut self, target: &str) -> WorkerPool {
        let pool = self.primary_pool();
        self.expire_commitments(Instant::now());
        if self.state.slots <= 1 {
            return pool;
        }

        let slots = self.state.slots as f64;
        let held = self.state.commitments.get(target);
        let hidden: Vec<(String, f64)> = pool
            .nodes()
            .iter()
            .map(|node| {
                let own: f64 = held
                    .map(|cs| cs.iter().filter(|c| c.node == node.name).map(|c| c.ram).sum())
                    .unwrap_or(0.0);
                let allowance = (node.ram_max / slots - own).max(0.0);
                (node.name.clone(), (node.free_ram() - allowance).max(0.0))
            })
            .collect();
        pool.charged(hidden.iter().map(|(name, ram)| (name.as_str(), *ram)))
    }

    /// How many loops share the pool. Zero is treated as one.
    pub fn set_slots(&mut self, slots: usize) {
        let slots = slots.max(1);
        if slots != self.state.slots {
            debug!(from = self.state.slots, to = slots, "pool slices resized");
            self.state.slots = slots;
        }
    }

    pub fn slots(&self) -> usize {
        self.state.slots
    }

    /// Charge dispatched RAM to `target`'s slice until `until`.
    pub fn commit(&mut self, target: &str, ram_by_node: &[(String, f64)], until: Instant) {
        let entry = self.state.commitments.entry(target.to_string()).or_default();
        entry.extend(ram_by_node.iter().map(|(node, ram)| Commitment {
            node: node.clone(),
            ram: *ram,
            until,
        }));
    }

    /// RAM `target` currently holds against its slice.
    pub fn committed(&self, target: &str) -> f64 {
        self.state
            .commitments
            .get(target)
            .map(|cs| cs.iter().map(|c| c.ram).sum())
            .unwrap_or(0.0)
    }

    /// Forget everything `target` committed.
    pub fn release(&mut self, target: &str) {
        self.state.commitments.remove(target);
    }

    fn expire_commitments(&mut self, now: Instant) {
        for held in self.state.commitments.values_mut() {
            held.retain(|c| c.until > now);
        }
        self.state.commitments.retain(|_, held| !held.is_empty());
    }

    /// Terminate every running share job. Returns how many were still alive.
    pub fn teardown_share(&mut self) -> usize {
        if self.state.share_jobs.is_empty() {
            return 0;
        }
        let jobs = std::mem::take(&mut self.state.share_jobs);
        let alive = jobs.iter().filter(|job| self.env.terminate(job)).count();
        info!(jobs = jobs.len(), alive, "share workload torn down");
        alive
    }

    /// Remember share jobs so the next teardown can stop them.
    pub fn record_share(&mut self, jobs: Vec<JobHandle>) {
        debug!(jobs = jobs.len(), "share jobs recorded");
        self.state.share_jobs.extend(jobs);
    }

    pub fn share_jobs(&self) -> usize {
        self.state.share_jobs.len()
    }
}
