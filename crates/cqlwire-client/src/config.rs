//! Cluster configuration
//!
//! All durations are plain millisecond fields so that a configuration can be
//! loaded from JSON as-is. Every struct has a `Default` and deserializes
//! with missing fields filled from it.
//!
//! ```json
//! {
//!   "nodes": ["10.0.0.1:9042", "10.0.0.2:9042"],
//!   "tls": { "enabled": true, "ca_path": "ca.pem", "verify_mode": "peer" },
//!   "credentials": { "username": "cassandra", "password": "cassandra" },
//!   "default_consistency": "local_quorum",
//!   "pool": { "pool_size": 4 }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use cqlwire_common::auth::Credentials;
use cqlwire_common::transport::{host_of, TlsConfig};
use cqlwire_common::{Consistency, CqlError, Result};
use serde::{Deserialize, Serialize};

use crate::node::BackoffConfig;

/// Largest number of stream ids one connection can hand out
pub const MAX_STREAMS_PER_CONNECTION: usize = 32_768;

/// Connection pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections per node
    pub pool_size: usize,
    /// Concurrent requests per connection
    pub max_requests_per_connection: usize,
    pub acquire_timeout_ms: u64,
    /// Consecutive failures before a node is marked down
    pub failure_threshold: u32,
    /// Unleased connections older than this are closed
    pub idle_ttl_ms: u64,
    pub backoff: BackoffConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 2,
            max_requests_per_connection: 1024,
            acquire_timeout_ms: 5000,
            failure_threshold: 3,
            idle_ttl_ms: 300_000,
            backoff: BackoffConfig::default(),
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_millis(self.idle_ttl_ms)
    }
}

/// Health check configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// Bound on a single probe, connect included
    pub timeout_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5000,
            timeout_ms: 2000,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Retry policy for transport-level failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Extra attempts, each on a node not yet tried
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff_ms: 50,
        }
    }
}

/// Everything a [`Cluster`](crate::Cluster) needs to connect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// `host:port` contact points
    pub nodes: Vec<String>,
    pub tls: TlsConfig,
    pub credentials: Option<Credentials>,
    /// Keyspace used when `connect` is not given one
    pub keyspace: Option<String>,
    pub default_consistency: Consistency,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Rows per page; `None` lets the server decide
    pub page_size: Option<i32>,
    pub pool: PoolConfig,
    pub health_check: HealthCheckConfig,
    pub retry: RetryConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            tls: TlsConfig::default(),
            credentials: None,
            keyspace: None,
            default_consistency: Consistency::default(),
            request_timeout_ms: 10_000,
            connect_timeout_ms: 5000,
            page_size: Some(5000),
            pool: PoolConfig::default(),
            health_check: HealthCheckConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl ClusterConfig {
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            nodes: nodes.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Loads a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CqlError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            CqlError::InvalidConfig(format!("invalid config {}: {}", path.display(), e))
        })
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.default_consistency = consistency;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Checks the configuration for values the driver cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(CqlError::InvalidConfig("no nodes configured".to_string()));
        }
        for node in &self.nodes {
            host_of(node)?;
        }
        if self.pool.pool_size == 0 {
            return Err(CqlError::InvalidConfig("pool_size must be at least 1".to_string()));
        }
        if self.pool.max_requests_per_connection == 0
            || self.pool.max_requests_per_connection > MAX_STREAMS_PER_CONNECTION
        {
            return Err(CqlError::InvalidConfig(format!(
                "max_requests_per_connection must be between 1 and {}",
                MAX_STREAMS_PER_CONNECTION
            )));
        }
        if self.pool.failure_threshold == 0 {
            return Err(CqlError::InvalidConfig(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(CqlError::InvalidConfig("timeouts must be non-zero".to_string()));
        }
        if let Some(page_size) = self.page_size {
            if page_size <= 0 {
                return Err(CqlError::InvalidConfig(format!(
                    "page_size must be positive, got {}",
                    page_size
                )));
            }
        }
        if let Some(keyspace) = &self.keyspace {
            if keyspace.is_empty() {
                return Err(CqlError::InvalidConfig("keyspace must not be empty".to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClusterConfig::default();
        assert_eq!(config.default_consistency, Consistency::LocalQuorum);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.page_size, Some(5000));
        assert_eq!(config.pool.pool_size, 2);
        assert_eq!(config.pool.max_requests_per_connection, 1024);
        assert_eq!(config.pool.failure_threshold, 3);
        assert_eq!(config.health_check.interval(), Duration::from_secs(5));
        assert_eq!(config.retry.max_retries, 1);
        assert!(!config.tls.enabled);
    }

    #[test]
    fn test_validate() {
        assert!(ClusterConfig::default().validate().is_err());
        assert!(ClusterConfig::new(["127.0.0.1:9042"]).validate().is_ok());
        assert!(ClusterConfig::new(["no-port"]).validate().is_err());

        let mut config = ClusterConfig::new(["127.0.0.1:9042"]);
        config.pool.pool_size = 0;
        assert!(matches!(config.validate(), Err(CqlError::InvalidConfig(_))));

        let mut config = ClusterConfig::new(["127.0.0.1:9042"]);
        config.pool.max_requests_per_connection = MAX_STREAMS_PER_CONNECTION + 1;
        assert!(config.validate().is_err());

        let mut config = ClusterConfig::new(["127.0.0.1:9042"]);
        config.page_size = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ClusterConfig = serde_json::from_str(
            r#"{
                "nodes": ["db1:9042"],
                "default_consistency": "one",
                "pool": { "pool_size": 8 },
                "credentials": { "username": "u", "password": "p" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.nodes, vec!["db1:9042"]);
        assert_eq!(config.default_consistency, Consistency::One);
        assert_eq!(config.pool.pool_size, 8);
        assert_eq!(config.pool.failure_threshold, 3);
        assert_eq!(config.credentials.unwrap().username, "u");
        assert_eq!(config.request_timeout_ms, 10_000);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.json");
        std::fs::write(&path, r#"{"nodes": ["a:9042", "b:9042"], "page_size": null}"#).unwrap();
        let config = ClusterConfig::from_json_file(&path).unwrap();
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.page_size, None);

        assert!(matches!(
            ClusterConfig::from_json_file(dir.path().join("missing.json")),
            Err(CqlError::InvalidConfig(_))
        ));
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            ClusterConfig::from_json_file(&path),
            Err(CqlError::InvalidConfig(_))
        ));
    }
}
