//! Dispatcher — turns allocation plans into environment jobs.
//!
//! A node that rejects a dispatch is dropped for the rest of the
//! dispatcher's lifetime: later assignments to it are skipped and counted
//! as shortfall rather than retried.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, warn};

use farm_core::{DispatchRequest, Environment, JobHandle, Script};
use farmgrid_placement::AllocationPlan;

/// What one plan turned into.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanDispatch {
    pub jobs: Vec<JobHandle>,
    pub threads_dispatched: u32,
    /// Planned threads that never started.
    pub shortfall: u32,
    /// RAM taken by the accepted jobs, per node.
    pub ram_by_node: Vec<(String, f64)>,
}

impl PlanDispatch {
    pub fn is_complete(&self) -> bool {
        self.shortfall == 0
    }
}

pub struct Dispatcher<'a> {
    env: &'a dyn Environment,
    tag: String,
    failed: BTreeSet<String>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(env: &'a dyn Environment, tag: impl Into<String>) -> Self {
        Self {
            env,
            tag: tag.into(),
            failed: BTreeSet::new(),
        }
    }

    /// Nodes that rejected a dispatch.
    pub fn failed_nodes(&self) -> &BTreeSet<String> {
        &self.failed
    }

    pub fn dispatch(
        &mut self,
        plan: &AllocationPlan,
        script: Script,
        target: Option<&str>,
        start_delay: Duration,
    ) -> PlanDispatch {
        let mut out = PlanDispatch::default();

        for assignment in &plan.assignments {
            if self.failed.contains(&assignment.node) {
                out.shortfall += assignment.threads;
                continue;
            }
            let request = DispatchRequest {
                node: assignment.node.clone(),
                script,
                threads: assignment.threads,
                target: target.map(str::to_string),
                start_delay,
                tag: self.tag.clone(),
            };
            match self.env.dispatch(&request) {
                Some(job) => {
                    debug!(
                        node = %assignment.node,
                        %script,
                        threads = assignment.threads,
                        job = job.id,
                        "job dispatched"
                    );
                    out.threads_dispatched += assignment.threads;
                    out.ram_by_node.push((
                        assignment.node.clone(),
                        f64::from(assignment.threads) * plan.ram_per_thread,
                    ));
                    out.jobs.push(job);
                }
                None => {
                    warn!(
                        node = %assignment.node,
                        %script,
                        threads = assignment.threads,
                        "dispatch rejected — dropping node for this plan"
                    );
                    self.failed.insert(assignment.node.clone());
                    out.shortfall += assignment.threads;
                }
            }
        }

        out.shortfall += plan.shortfall();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farmgrid_placement::Assignment;
    use farmgrid_sim::{SimEnvironment, SimTarget};

    fn sim() -> SimEnvironment {
        SimEnvironment::builder()
            .player_level(100.0)
            .worker("pserv-0", 64.0, 1)
            .worker("pserv-1", 64.0, 1)
            .target(SimTarget::prepped("n00dles", 1e6, 5.0))
            .build()
    }

    fn plan(assignments: &[(&str, u32)]) -> AllocationPlan {
        AllocationPlan {
            ram_per_thread: 1.75,
            threads_requested: assignments.iter().map(|(_, t)| t).sum(),
            assignments: assignments
                .iter()
                .map(|(node, threads)| Assignment {
                    node: node.to_string(),
                    threads: *threads,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn dispatches_every_assignment() {
        let env = sim();
        let mut d = Dispatcher::new(&env, "prep");
        let out = d.dispatch(
            &plan(&[("pserv-0", 10), ("pserv-1", 5)]),
            Script::Weaken,
            Some("n00dles"),
            Duration::ZERO,
        );
        assert!(out.is_complete());
        assert_eq!(out.threads_dispatched, 15);
        assert_eq!(out.jobs.len(), 2);
        assert_eq!(env.dispatches().len(), 2);
        assert_eq!(
            out.ram_by_node,
            vec![("pserv-0".to_string(), 17.5), ("pserv-1".to_string(), 8.75)]
        );
    }

    #[tokio::test]
    async fn vanished_worker_counts_as_shortfall() {
        let env = sim();
        let planned = plan(&[("pserv-0", 4), ("pserv-1", 4)]);
        env.remove_worker("pserv-0");

        let mut d = Dispatcher::new(&env, "prep");
        let out = d.dispatch(&planned, Script::Weaken, Some("n00dles"), Duration::ZERO);
        assert_eq!(out.threads_dispatched, 4);
        assert_eq!(out.shortfall, 4);
        assert!(d.failed_nodes().contains("pserv-0"));
        assert_eq!(env.dispatches().len(), 1);
    }

    #[tokio::test]
    async fn rejected_node_is_not_retried() {
        let env = sim();
        env.reject_dispatch_on("pserv-1", true);
        let mut d = Dispatcher::new(&env, "batch");

        let first = d.dispatch(
            &plan(&[("pserv-0", 4), ("pserv-1", 6)]),
            Script::Hack,
            Some("n00dles"),
            Duration::ZERO,
        );
        assert_eq!(first.threads_dispatched, 4);
        assert_eq!(first.shortfall, 6);

        // The node recovers, but this dispatcher has already dropped it.
        env.reject_dispatch_on("pserv-1", false);
        let second = d.dispatch(
            &plan(&[("pserv-1", 2)]),
            Script::Weaken,
            Some("n00dles"),
            Duration::ZERO,
        );
        assert_eq!(second.shortfall, 2);
        assert!(second.jobs.is_empty());
        assert!(d.failed_nodes().contains("pserv-1"));
        assert_eq!(env.dispatches().len(), 1);
    }

    #[tokio::test]
    async fn planned_shortfall_is_carried() {
        let env = sim();
        let mut partial = plan(&[("pserv-0", 4)]);
        partial.threads_requested = 10;
        let out = Dispatcher::new(&env, "prep").dispatch(
            &partial,
            Script::Grow,
            Some("n00dles"),
            Duration::ZERO,
        );
        assert_eq!(out.threads_dispatched, 4);
        assert_eq!(out.shortfall, 6);
    }
}
