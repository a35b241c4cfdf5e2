//! Node ranking for placement decisions.
//!
//! Nodes that cannot host a single thread are rejected outright; the rest
//! are ordered by a [`NodePriority`]:
//! - **MostFreeRam**: biggest holes first, fewest fragments per operation
//! - **CoreWeighted**: free RAM scaled by the core bonus, for work whose
//!   yield grows with cores

use farm_core::WorkerNode;
use farm_core::formulas::core_bonus;
use serde::{Deserialize, Serialize};

use farmgrid_pool::WorkerPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePriority {
    /// Primary batching and prep.
    #[default]
    MostFreeRam,
    /// Secondary share workload.
    CoreWeighted,
}

/// Scored placement candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeScore {
    pub node: String,
    /// Higher = filled first.
    pub score: f64,
    /// How many threads this node can accept.
    pub capacity: u32,
}

/// Score a single node, or `None` if it cannot take one thread.
pub fn score_node(node: &WorkerNode, ram_per_thread: f64, priority: NodePriority) -> Option<NodeScore> {
    let capacity = node.thread_capacity(ram_per_thread);
    if capacity == 0 {
        return None;
    }

    let score = match priority {
        NodePriority::MostFreeRam => node.free_ram(),
        NodePriority::CoreWeighted => node.free_ram() * core_bonus(node.cores),
    };

    Some(NodeScore {
        node: node.name.clone(),
        score,
        capacity,
    })
}

/// Score all nodes and return a sorted list (best first).
///
/// Ties break on node name so plans are reproducible.
pub fn rank_nodes(pool: &WorkerPool, ram_per_thread: f64, priority: NodePriority) -> Vec<NodeScore> {
    let mut scores: Vec<NodeScore> = pool
        .nodes()
        .iter()
        .filter_map(|n| score_node(n, ram_per_thread, priority))
        .collect();

    scores.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.node.cmp(&b.node))
    });
    scores
}
