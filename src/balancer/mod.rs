//! Client-side endpoint balancing
//!
//! Outbound calls to the config service pick their destination through a
//! [`LoadBalancer`]. The default strategy is [`WeightedRoundRobin`], the
//! smooth weighted round-robin used by several reverse proxies: selections
//! follow the configured weights without bursting on the heaviest node,
//! and a node that reported failures temporarily loses share until it
//! heals back to its configured weight.

mod resolver;
mod weighted_round_robin;

pub use resolver::*;
pub use weighted_round_robin::*;

#[cfg(test)]
mod weighted_round_robin_test;

#[cfg(test)]
use mockall::automock;

use crate::Result;

/// A backend endpoint as seen by callers of the balancer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    /// Base URL of the endpoint, e.g. `http://10.0.0.1:8090`
    pub endpoint: String,
    /// Configured weight, immutable for the balancer's lifetime
    pub weight: i64,
}

/// Strategy seam for picking a backend per outbound call
#[cfg_attr(test, automock)]
pub trait LoadBalancer: Send + Sync {
    /// Register a new endpoint
    fn add_node(
        &self,
        endpoint: String,
        weight: i64,
    ) -> Result<()>;

    /// Pick the destination of the next call
    fn select(&self) -> Result<Node>;

    /// Health feedback for a node returned by [`select`](LoadBalancer::select).
    ///
    /// `false` lowers the node's share. Recovery happens one step per
    /// [`select`](LoadBalancer::select) round, so `true` leaves the share alone.
    fn acknowledge(
        &self,
        node: &Node,
        success: bool,
    );

    /// Number of registered nodes
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
