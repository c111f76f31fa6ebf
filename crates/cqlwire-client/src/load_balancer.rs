use std::collections::VecDeque;
use std::time::Instant;

use crate::node::{BackoffConfig, Node, NodeHealth};

/// Per-request routing preferences
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingHint {
    /// Tried first when routable
    pub preferred: Option<String>,
    /// Never tried for this request
    pub avoid: Option<String>,
}

impl RoutingHint {
    pub fn prefer(addr: impl Into<String>) -> Self {
        Self {
            preferred: Some(addr.into()),
            avoid: None,
        }
    }

    pub fn avoid(addr: impl Into<String>) -> Self {
        Self {
            preferred: None,
            avoid: Some(addr.into()),
        }
    }
}

/// Round-robin node selection over a static node list
pub struct LoadBalancer {
    nodes: Vec<Node>,
    order: VecDeque<usize>,
}

impl LoadBalancer {
    /// Create a load balancer; duplicate addresses are collapsed
    pub fn new(addrs: Vec<String>) -> Self {
        let mut nodes: Vec<Node> = Vec::with_capacity(addrs.len());
        for addr in addrs {
            if !nodes.iter().any(|n| n.addr == addr) {
                nodes.push(Node::new(addr));
            }
        }
        let order = (0..nodes.len()).collect();
        Self { nodes, order }
    }

    /// Candidate nodes for one acquire, in the order they should be tried.
    ///
    /// Up nodes come first in round-robin order, followed by Suspect nodes
    /// whose backoff has elapsed. Down nodes and the hint's `avoid` node are
    /// never returned.
    pub fn plan(&mut self, hint: &RoutingHint, backoff: &BackoffConfig, now: Instant) -> Vec<String> {
        let rotation: Vec<usize> = self.order.iter().copied().collect();
        // Rotate: move first to back for the next call
        if let Some(first) = self.order.pop_front() {
            self.order.push_back(first);
        }

        let routable = |node: &&Node| hint.avoid.as_deref() != Some(node.addr.as_str());
        let candidates = rotation.iter().map(|&i| &self.nodes[i]).filter(routable);

        let mut plan: Vec<String> = Vec::with_capacity(self.nodes.len());
        plan.extend(
            candidates
                .clone()
                .filter(|n| n.health == NodeHealth::Up)
                .map(|n| n.addr.clone()),
        );
        plan.extend(
            candidates
                .filter(|n| n.health == NodeHealth::Suspect && n.backoff_elapsed(backoff, now))
                .map(|n| n.addr.clone()),
        );

        if let Some(preferred) = hint.preferred.as_deref() {
            if let Some(pos) = plan.iter().position(|addr| addr == preferred) {
                let addr = plan.remove(pos);
                plan.insert(0, addr);
            }
        }
        plan
    }

    pub fn node(&self, addr: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.addr == addr)
    }

    pub fn node_mut(&mut self, addr: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.addr == addr)
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Nodes the health checker should probe
    pub fn unhealthy_nodes(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.health != NodeHealth::Up)
            .map(|n| n.addr.clone())
            .collect()
    }
}
