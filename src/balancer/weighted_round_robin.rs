use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::LoadBalancer;
use super::Node;
use crate::BalancerError;
use crate::Result;

/// Per-node selection state
#[derive(Debug)]
struct WeightedNode {
    node: Node,
    /// Share used for selection; lowered on failure, healed toward `node.weight`
    effective_weight: i64,
    /// Scratch accumulator, changes every round
    current_weight: i64,
}

/// Smooth weighted round-robin balancer
///
/// On every [`select`](LoadBalancer::select):
/// 1. each node's `current_weight += effective_weight`, and the total of
///    effective weights is accumulated; a node below its configured weight
///    heals by one;
/// 2. the node with the largest `current_weight` wins, the first one in
///    insertion order on ties;
/// 3. the winner's `current_weight -= total`.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    nodes: Mutex<Vec<WeightedNode>>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a balancer from `(endpoint, weight)` pairs
    pub fn with_nodes<I>(nodes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, i64)>,
    {
        let balancer = Self::new();
        for (endpoint, weight) in nodes {
            balancer.add_node(endpoint, weight)?;
        }
        Ok(balancer)
    }

    /// Current effective weight of `endpoint`, if registered
    pub fn effective_weight(
        &self,
        endpoint: &str,
    ) -> Option<i64> {
        self.nodes
            .lock()
            .iter()
            .find(|n| n.node.endpoint == endpoint)
            .map(|n| n.effective_weight)
    }

    /// Snapshot of the registered nodes in insertion order
    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.lock().iter().map(|n| n.node.clone()).collect()
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn add_node(
        &self,
        endpoint: String,
        weight: i64,
    ) -> Result<()> {
        if weight <= 0 {
            return Err(BalancerError::InvalidWeight { endpoint, weight }.into());
        }

        debug!(%endpoint, weight, "add balancer node");
        self.nodes.lock().push(WeightedNode {
            node: Node { endpoint, weight },
            effective_weight: weight,
            current_weight: 0,
        });
        Ok(())
    }

    fn select(&self) -> Result<Node> {
        let mut nodes = self.nodes.lock();

        let mut total = 0;
        // (index, current_weight) of the best candidate so far
        let mut best: Option<(usize, i64)> = None;
        for (idx, n) in nodes.iter_mut().enumerate() {
            total += n.effective_weight;
            n.current_weight += n.effective_weight;
            if n.effective_weight < n.node.weight {
                n.effective_weight += 1;
            }

            // strict comparison keeps the first node on ties
            if best.map_or(true, |(_, w)| n.current_weight > w) {
                best = Some((idx, n.current_weight));
            }
        }

        let (best_idx, _) = best.ok_or(BalancerError::EmptyNodeSet)?;
        let chosen = &mut nodes[best_idx];
        chosen.current_weight -= total;
        trace!(endpoint = %chosen.node.endpoint, current_weight = chosen.current_weight, "node selected");
        Ok(chosen.node.clone())
    }

    fn acknowledge(
        &self,
        node: &Node,
        success: bool,
    ) {
        let mut nodes = self.nodes.lock();
        let Some(n) = nodes.iter_mut().find(|n| n.node.endpoint == node.endpoint) else {
            warn!(endpoint = %node.endpoint, "{}", BalancerError::UnknownNode(node.endpoint.clone()));
            return;
        };

        if success {
            return;
        }
        if n.effective_weight > 1 {
            n.effective_weight -= 1;
            debug!(endpoint = %n.node.endpoint, effective_weight = n.effective_weight, "node degraded");
        }
    }

    fn len(&self) -> usize {
        self.nodes.lock().len()
    }
}
