//! Immutable per-cycle view of the worker pool.

use std::collections::HashMap;

use farm_core::WorkerNode;
use serde::{Deserialize, Serialize};

/// RAM held back on specific nodes, charged as used when building a pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RamReserve {
    per_node: HashMap<String, f64>,
}

impl RamReserve {
    pub fn none() -> Self {
        Self::default()
    }

    /// Keep `ram` free on the `home` node.
    pub fn home(ram: f64) -> Self {
        Self::none().with("home", ram)
    }

    pub fn with(mut self, node: &str, ram: f64) -> Self {
        if ram > 0.0 {
            self.per_node.insert(node.to_string(), ram);
        }
        self
    }

    pub fn for_node(&self, node: &str) -> f64 {
        self.per_node.get(node).copied().unwrap_or(0.0)
    }
}

/// Rooted workers and their free RAM at one instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerPool {
    nodes: Vec<WorkerNode>,
}

impl WorkerPool {
    /// Build a pool from raw worker data.
    ///
    /// Unrooted and zero-RAM nodes are dropped. Reserved RAM is added to
    /// `ram_used` and capped at `ram_max`.
    pub fn from_nodes(nodes: Vec<WorkerNode>, reserve: &RamReserve) -> Self {
        let nodes = nodes
            .into_iter()
            .filter(|n| n.has_root && n.ram_max > 0.0)
            .map(|mut n| {
                n.ram_used = (n.ram_used + reserve.for_node(&n.name)).min(n.ram_max);
                n
            })
            .collect();
        Self { nodes }
    }

    pub fn nodes(&self) -> &[WorkerNode] {
        &self.nodes
    }

    pub fn get(&self, name: &str) -> Option<&WorkerNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn total_ram(&self) -> f64 {
        self.nodes.iter().map(|n| n.ram_max).sum()
    }

    pub fn total_free_ram(&self) -> f64 {
        self.nodes.iter().map(WorkerNode::free_ram).sum()
    }

    /// Whole threads that fit across the pool, node by node.
    pub fn max_threads(&self, ram_per_thread: f64) -> u64 {
        self.nodes
            .iter()
            .map(|n| u64::from(n.thread_capacity(ram_per_thread)))
            .sum()
    }

    /// A copy of this pool with extra RAM charged to the named nodes.
    ///
    /// Unknown node names are ignored.
    pub fn charged<'a, I>(&self, usage: I) -> WorkerPool
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut next = self.clone();
        for (name, ram) in usage {
            if let Some(node) = next.nodes.iter_mut().find(|n| n.name == name) {
                node.ram_used = (node.ram_used + ram).min(node.ram_max);
            }
        }
        next
    }

    /// A copy of this pool without the named node.
    pub fn without(&self, name: &str) -> WorkerPool {
        Self {
            nodes: self
                .nodes
                .iter()
                .filter(|n| n.name != name)
                .cloned()
                .collect(),
        }
    }
}
