use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Health of a node as seen by one connection pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeHealth {
    /// Accepting connections, preferred for routing
    Up,
    /// Failed recently; retried only after its backoff elapses
    Suspect,
    /// Failed too often; only the health checker talks to it
    Down,
}

impl fmt::Display for NodeHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeHealth::Up => write!(f, "up"),
            NodeHealth::Suspect => write!(f, "suspect"),
            NodeHealth::Down => write!(f, "down"),
        }
    }
}

/// Exponential backoff applied to Suspect nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1000,
            max_ms: 60_000,
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Delay before retrying a node with `consecutive_failures` failures.
    pub fn calculate(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let backoff_ms = self.base_ms as f64 * self.multiplier.powi(exponent);
        if !backoff_ms.is_finite() || backoff_ms >= self.max_ms as f64 {
            return Duration::from_millis(self.max_ms);
        }
        Duration::from_millis(backoff_ms as u64)
    }
}

/// A configured cluster node and its health bookkeeping
#[derive(Debug, Clone)]
pub struct Node {
    pub addr: String,
    pub health: NodeHealth,
    pub consecutive_failures: u32,
    /// When the node last failed; the backoff window starts here
    pub last_failure: Option<Instant>,
    pub last_probe: Option<Instant>,
}

impl Node {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            health: NodeHealth::Up,
            consecutive_failures: 0,
            last_failure: None,
            last_probe: None,
        }
    }

    pub fn is_up(&self) -> bool {
        self.health == NodeHealth::Up
    }

    /// Resets the failure counter and marks the node Up.
    ///
    /// Returns the previous health.
    pub fn record_success(&mut self) -> NodeHealth {
        let previous = self.health;
        self.health = NodeHealth::Up;
        self.consecutive_failures = 0;
        self.last_failure = None;
        previous
    }

    /// Counts a transport failure.
    ///
    /// The node becomes Suspect, and Down once `failure_threshold`
    /// consecutive failures have accumulated. Returns the new health.
    pub fn record_failure(&mut self, failure_threshold: u32, now: Instant) -> NodeHealth {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure = Some(now);
        self.health = if self.consecutive_failures >= failure_threshold {
            NodeHealth::Down
        } else {
            NodeHealth::Suspect
        };
        self.health
    }

    /// Counts a timeout without changing health.
    pub fn record_soft_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure = Some(now);
    }

    /// Whether a Suspect node's backoff window has elapsed.
    pub fn backoff_elapsed(&self, backoff: &BackoffConfig, now: Instant) -> bool {
        match self.last_failure {
            Some(failed_at) => {
                now.saturating_duration_since(failed_at)
                    >= backoff.calculate(self.consecutive_failures)
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_creation() {
        let node = Node::new("10.0.0.1:9042");
        assert_eq!(node.addr, "10.0.0.1:9042");
        assert_eq!(node.health, NodeHealth::Up);
        assert_eq!(node.consecutive_failures, 0);
        assert!(node.last_failure.is_none());
        assert!(node.last_probe.is_none());
    }

    #[test]
    fn test_backoff_default() {
        let config = BackoffConfig::default();
        assert_eq!(config.base_ms, 1000);
        assert_eq!(config.max_ms, 60_000);
        assert_eq!(config.multiplier, 2.0);
    }

    #[test]
    fn test_backoff_calculate() {
        let config = BackoffConfig::default();
        assert_eq!(config.calculate(0), Duration::from_secs(1));
        assert_eq!(config.calculate(1), Duration::from_secs(1));
        assert_eq!(config.calculate(2), Duration::from_secs(2));
        assert_eq!(config.calculate(3), Duration::from_secs(4));
        assert_eq!(config.calculate(6), Duration::from_secs(32));
        // capped
        assert_eq!(config.calculate(7), Duration::from_secs(60));
        assert_eq!(config.calculate(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_failures_walk_up_to_down() {
        let now = Instant::now();
        let mut node = Node::new("n1");
        assert_eq!(node.record_failure(3, now), NodeHealth::Suspect);
        assert_eq!(node.record_failure(3, now), NodeHealth::Suspect);
        assert_eq!(node.record_failure(3, now), NodeHealth::Down);
        assert_eq!(node.consecutive_failures, 3);

        assert_eq!(node.record_success(), NodeHealth::Down);
        assert!(node.is_up());
        assert_eq!(node.consecutive_failures, 0);
    }

    #[test]
    fn test_threshold_of_one_goes_straight_down() {
        let mut node = Node::new("n1");
        assert_eq!(node.record_failure(1, Instant::now()), NodeHealth::Down);
    }

    #[test]
    fn test_soft_failure_keeps_health() {
        let mut node = Node::new("n1");
        node.record_soft_failure(Instant::now());
        assert_eq!(node.health, NodeHealth::Up);
        assert_eq!(node.consecutive_failures, 1);
    }

    #[test]
    fn test_backoff_elapsed() {
        let backoff = BackoffConfig {
            base_ms: 100,
            max_ms: 1000,
            multiplier: 2.0,
        };
        let failed_at = Instant::now();
        let mut node = Node::new("n1");
        assert!(node.backoff_elapsed(&backoff, failed_at));

        node.record_failure(5, failed_at);
        assert!(!node.backoff_elapsed(&backoff, failed_at + Duration::from_millis(50)));
        assert!(node.backoff_elapsed(&backoff, failed_at + Duration::from_millis(100)));

        node.record_failure(5, failed_at);
        assert!(!node.backoff_elapsed(&backoff, failed_at + Duration::from_millis(150)));
        assert!(node.backoff_elapsed(&backoff, failed_at + Duration::from_millis(200)));
    }

    #[test]
    fn test_health_display() {
        assert_eq!(NodeHealth::Up.to_string(), "up");
        assert_eq!(NodeHealth::Suspect.to_string(), "suspect");
        assert_eq!(NodeHealth::Down.to_string(), "down");
    }
}
