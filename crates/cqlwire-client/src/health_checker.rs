use std::time::Duration;

use cqlwire_common::transport::TlsContext;
use cqlwire_common::{CqlError, Result};
use tracing::debug;

use crate::config::HealthCheckConfig;
use crate::connection::Connection;
use crate::pool::{ConnectionPool, WeakConnectionPool};

/// Background prober for nodes that are not Up.
///
/// Each round evicts idle connections, then probes every Down and Suspect
/// node in parallel with an OPTIONS round trip. Results are applied to the
/// pool one node at a time under its lock. The task ends once the pool is
/// closed or dropped.
pub struct HealthChecker {
    pool: WeakConnectionPool,
    config: HealthCheckConfig,
}

impl HealthChecker {
    pub fn new(pool: &ConnectionPool, config: HealthCheckConfig) -> Self {
        Self {
            pool: pool.downgrade(),
            config,
        }
    }

    /// Starts the health checker task.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Main health check loop
    async fn run(self) {
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let Some(pool) = self.pool.upgrade() else {
                debug!("Pool dropped, stopping health checker");
                return;
            };
            if pool.is_closed() {
                debug!("Pool closed, stopping health checker");
                return;
            }
            self.check_once(&pool).await;
        }
    }

    /// Runs a single round against `pool`.
    pub async fn check_once(&self, pool: &ConnectionPool) {
        let evicted = pool.evict_idle().await;
        if evicted > 0 {
            debug!("Evicted {} idle connections", evicted);
        }

        let targets = pool.probe_targets().await;
        if targets.is_empty() {
            return;
        }

        let timeout = self.config.timeout();
        let tls = pool.tls_context();
        let checks: Vec<_> = targets
            .into_iter()
            .map(|addr| async move {
                let result = Self::check_node_health(&addr, tls, timeout).await;
                (addr, result)
            })
            .collect();

        let results = futures::future::join_all(checks).await;

        for (addr, result) in results {
            pool.apply_probe_result(&addr, &result).await;
        }
    }

    /// Check a single node's health
    async fn check_node_health(
        addr: &str,
        tls: Option<&TlsContext>,
        timeout: Duration,
    ) -> Result<()> {
        tokio::time::timeout(timeout, Connection::probe(addr, tls, timeout))
            .await
            .map_err(|_| CqlError::Timeout(timeout.as_millis() as u64))?
    }
}
