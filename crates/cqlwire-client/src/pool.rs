use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use cqlwire_common::transport::{ResponseFrame, TlsContext};
use cqlwire_common::{CqlError, Request, Result};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionConfig};
use crate::load_balancer::{LoadBalancer, RoutingHint};
use crate::node::{Node, NodeHealth};

/// A leased connection.
///
/// The lease is returned to the pool when this handle is dropped, so an
/// abandoned request never leaks capacity.
pub struct PooledConnection {
    connection: Arc<Connection>,
    pool: Arc<PoolShared>,
}

impl PooledConnection {
    fn new(connection: Arc<Connection>, pool: Arc<PoolShared>) -> Self {
        Self { connection, pool }
    }

    pub fn node(&self) -> &str {
        self.connection.node()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Sends a request and reports the outcome to the pool.
    ///
    /// - success resets the node's failure counter
    /// - a transport or protocol failure removes the connection and counts
    ///   against the node
    /// - a timeout counts against the node without changing its health
    ///
    /// The request itself is never retried here.
    pub async fn send_request(
        &self,
        request: &Request,
        timeout: std::time::Duration,
    ) -> Result<ResponseFrame> {
        let result = self.connection.send_request(request, timeout).await;
        match &result {
            Ok(_) => self.pool.report_success(self.node()).await,
            Err(e) if e.is_connection_fatal() => {
                self.pool.report_broken(&self.connection, e).await
            }
            Err(CqlError::Timeout(_)) => self.pool.report_timeout(self.node()).await,
            Err(_) => {}
        }
        result
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.connection.release_lease();
        self.pool.released.notify_waiters();
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PooledConnection")
            .field(&self.connection)
            .finish()
    }
}

/// Point-in-time view of one node in the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStats {
    pub addr: String,
    pub health: NodeHealth,
    pub consecutive_failures: u32,
    pub connections: usize,
    pub leases: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub nodes: Vec<NodeStats>,
}

impl PoolStats {
    pub fn node(&self, addr: &str) -> Option<&NodeStats> {
        self.nodes.iter().find(|n| n.addr == addr)
    }

    pub fn total_connections(&self) -> usize {
        self.nodes.iter().map(|n| n.connections).sum()
    }
}

enum Choice {
    Ready(Arc<Connection>),
    Open(String),
    Wait,
    NoRoute,
}

struct PoolInner {
    balancer: LoadBalancer,
    connections: HashMap<String, Vec<Arc<Connection>>>,
    /// Connections currently being opened, per node
    opening: HashMap<String, usize>,
}

impl PoolInner {
    /// Removes broken connections and those idle past the TTL.
    ///
    /// Each broken connection found here counts as one failure of its node.
    fn take_stale(&mut self, config: &PoolConfig, now: Instant) -> Vec<Arc<Connection>> {
        let idle_ttl = config.idle_ttl();
        let mut stale = Vec::new();
        let mut broken = Vec::new();
        for (addr, connections) in self.connections.iter_mut() {
            connections.retain(|c| {
                let expired = c.idle_for(now).is_some_and(|idle| idle >= idle_ttl);
                if c.is_broken() {
                    broken.push(addr.clone());
                    stale.push(c.clone());
                    false
                } else if expired {
                    stale.push(c.clone());
                    false
                } else {
                    true
                }
            });
        }
        for addr in broken {
            debug!("Swept a broken connection to {}", addr);
            let down = self.record_failure(&addr, config.failure_threshold, now);
            stale.extend(down);
        }
        stale
    }

    /// Per node in plan order: an idle connection, else a new one under the
    /// cap, else the least-loaded connection with spare capacity.
    fn choose(&mut self, plan: &[String], config: &PoolConfig) -> Choice {
        if plan.is_empty() {
            return Choice::NoRoute;
        }

        for addr in plan {
            let connections = self.connections.get(addr).map(Vec::as_slice).unwrap_or(&[]);

            if let Some(idle) = connections.iter().find(|c| c.leases() == 0) {
                idle.lease();
                return Choice::Ready(idle.clone());
            }

            let opening = self.opening.get(addr).copied().unwrap_or(0);
            if connections.len() + opening < config.pool_size {
                *self.opening.entry(addr.clone()).or_default() += 1;
                return Choice::Open(addr.clone());
            }

            let least_loaded = connections
                .iter()
                .filter(|c| c.leases() < config.max_requests_per_connection)
                .min_by_key(|c| c.leases());
            if let Some(connection) = least_loaded {
                connection.lease();
                return Choice::Ready(connection.clone());
            }
        }
        Choice::Wait
    }

    fn opening_done(&mut self, addr: &str) {
        if let Some(count) = self.opening.get_mut(addr) {
            *count = count.saturating_sub(1);
        }
    }

    /// Counts a hard failure; a node that goes Down loses its connections.
    fn record_failure(
        &mut self,
        addr: &str,
        failure_threshold: u32,
        now: Instant,
    ) -> Vec<Arc<Connection>> {
        let Some(node) = self.balancer.node_mut(addr) else {
            return Vec::new();
        };
        let previous = node.health;
        let health = node.record_failure(failure_threshold, now);
        let failures = node.consecutive_failures;

        match (previous, health) {
            (NodeHealth::Down, _) => Vec::new(),
            (_, NodeHealth::Down) => {
                warn!("Node {} marked down after {} consecutive failures", addr, failures);
                self.connections.remove(addr).unwrap_or_default()
            }
            (NodeHealth::Up, NodeHealth::Suspect) => {
                warn!("Node {} is suspect after a failure", addr);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn record_success(&mut self, addr: &str) {
        if let Some(node) = self.balancer.node_mut(addr) {
            if node.is_up() && node.consecutive_failures == 0 {
                return;
            }
            if node.record_success() != NodeHealth::Up {
                info!("Node {} is back up", addr);
            }
        }
    }
}

pub(crate) struct PoolShared {
    config: PoolConfig,
    connection_config: ConnectionConfig,
    inner: Mutex<PoolInner>,
    released: Notify,
    closed: AtomicBool,
}

impl PoolShared {
    async fn report_success(&self, addr: &str) {
        self.inner.lock().await.record_success(addr);
    }

    async fn report_timeout(&self, addr: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(node) = inner.balancer.node_mut(addr) {
            node.record_soft_failure(Instant::now());
            debug!(
                "Request to {} timed out ({} consecutive failures)",
                addr, node.consecutive_failures
            );
        }
    }

    async fn report_broken(&self, connection: &Arc<Connection>, error: &CqlError) {
        let addr = connection.node().to_string();
        let to_close = {
            let mut inner = self.inner.lock().await;
            let position = inner
                .connections
                .get(&addr)
                .and_then(|list| list.iter().position(|c| Arc::ptr_eq(c, connection)));
            match position {
                // only the first request to see the breakage counts it
                Some(index) => {
                    if let Some(list) = inner.connections.get_mut(&addr) {
                        list.remove(index);
                    }
                    inner.record_failure(&addr, self.config.failure_threshold, Instant::now())
                }
                None => Vec::new(),
            }
        };
        warn!(
            "Connection {} to {} broken: {}",
            connection.id(),
            addr,
            error
        );
        connection.close().await;
        close_all(to_close).await;
        self.released.notify_waiters();
    }

    /// Opens a connection for a slot reserved by `choose` and adds it to the
    /// pool unleased.
    async fn open_connection(self: Arc<Self>, addr: String) -> Result<Arc<Connection>> {
        let result = Connection::open(&addr, &self.connection_config).await;

        let mut inner = self.inner.lock().await;
        inner.opening_done(&addr);
        let outcome = match result {
            Ok(connection) => {
                let connection = Arc::new(connection);
                if self.closed.load(Ordering::Acquire) {
                    drop(inner);
                    connection.close().await;
                    return Err(CqlError::NoAvailableConnection("pool is closed".to_string()));
                }
                inner.record_success(&addr);
                inner
                    .connections
                    .entry(addr.clone())
                    .or_default()
                    .push(connection.clone());
                debug!(connection = connection.id(), node = %addr, "Connection added to pool");
                Ok(connection)
            }
            Err(e) => {
                let to_close = if e.is_transport() {
                    inner.record_failure(&addr, self.config.failure_threshold, Instant::now())
                } else {
                    Vec::new()
                };
                drop(inner);
                close_all(to_close).await;
                Err(e)
            }
        };
        self.released.notify_waiters();
        outcome
    }
}

async fn close_all(connections: Vec<Arc<Connection>>) {
    for connection in connections {
        connection.close().await;
    }
}

/// Connection pool over every configured node.
///
/// Node health, connection lists and round-robin state live behind a
/// single async mutex; connection I/O never happens while it is held.
///
/// # Example
///
/// ```rust,no_run
/// use cqlwire_client::{ConnectionConfig, ConnectionPool, PoolConfig, RoutingHint};
/// use cqlwire_common::Request;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = ConnectionPool::new(
///     vec!["127.0.0.1:9042".to_string()],
///     PoolConfig::default(),
///     ConnectionConfig::default(),
/// );
///
/// let conn = pool.acquire(&RoutingHint::default()).await?;
/// let supported = conn.send_request(&Request::Options, Duration::from_secs(1)).await?;
/// println!("{:?}", supported.response);
///
/// // Return it to the pool
/// pool.release(conn);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.shared.config)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// A pool reference that does not keep the pool alive
#[derive(Clone)]
pub struct WeakConnectionPool {
    shared: Weak<PoolShared>,
}

impl WeakConnectionPool {
    pub fn upgrade(&self) -> Option<ConnectionPool> {
        self.shared.upgrade().map(|shared| ConnectionPool { shared })
    }
}

impl ConnectionPool {
    /// Creates a pool; no connection is opened until the first acquire.
    pub fn new(nodes: Vec<String>, config: PoolConfig, connection_config: ConnectionConfig) -> Self {
        let inner = PoolInner {
            balancer: LoadBalancer::new(nodes),
            connections: HashMap::new(),
            opening: HashMap::new(),
        };
        Self {
            shared: Arc::new(PoolShared {
                config,
                connection_config,
                inner: Mutex::new(inner),
                released: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakConnectionPool {
        WeakConnectionPool {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn tls_context(&self) -> Option<&TlsContext> {
        self.shared.connection_config.tls.as_ref()
    }

    /// Leases a connection to a routable node.
    ///
    /// Nodes whose connection attempt fails are skipped for the rest of this
    /// call. Waits up to `acquire_timeout_ms` when every candidate is at
    /// capacity.
    ///
    /// # Errors
    ///
    /// - the last connect error, if every routable node failed to connect
    /// - `Authentication`, `TlsHandshake`, `Protocol` or `Query` from the
    ///   connection handshake, immediately
    /// - `NoAvailableConnection` if no node is routable, the wait timed out
    ///   or the pool is closed
    pub async fn acquire(&self, hint: &RoutingHint) -> Result<PooledConnection> {
        let shared = &self.shared;
        let config = &shared.config;
        let deadline = Instant::now() + config.acquire_timeout();
        let mut failed: Vec<String> = Vec::new();
        let mut last_error: Option<CqlError> = None;

        loop {
            // registered before the state check so a release in between is not missed
            let released = shared.released.notified();

            let (choice, stale) = {
                let mut inner = shared.inner.lock().await;
                if shared.closed.load(Ordering::Acquire) {
                    return Err(CqlError::NoAvailableConnection("pool is closed".to_string()));
                }
                let now = Instant::now();
                let stale = inner.take_stale(config, now);
                let plan: Vec<String> = inner
                    .balancer
                    .plan(hint, &config.backoff, now)
                    .into_iter()
                    .filter(|addr| !failed.contains(addr))
                    .collect();
                (inner.choose(&plan, config), stale)
            };
            // nothing awaits until a leased connection is inside its guard
            if !stale.is_empty() {
                debug!("Closing {} stale connections", stale.len());
                tokio::spawn(close_all(stale));
            }

            match choice {
                Choice::Ready(connection) => {
                    return Ok(PooledConnection::new(connection, shared.clone()))
                }
                Choice::Open(addr) => {
                    // runs detached so the pool's bookkeeping completes even if
                    // this acquire is cancelled
                    let opened = tokio::spawn(shared.clone().open_connection(addr.clone()))
                        .await
                        .unwrap_or_else(|e| {
                            Err(CqlError::Connect(format!("connection task failed: {}", e)))
                        });
                    match opened {
                        Ok(connection) => {
                            connection.lease();
                            return Ok(PooledConnection::new(connection, shared.clone()));
                        }
                        Err(e) if e.is_transport() => {
                            warn!("Failed to connect to {}: {}", addr, e);
                            failed.push(addr);
                            last_error = Some(e);
                        }
                        Err(e) => return Err(e),
                    }
                }
                Choice::Wait => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(CqlError::NoAvailableConnection(format!(
                            "timed out after {}ms waiting for a free connection",
                            config.acquire_timeout_ms
                        )));
                    }
                    let _ = tokio::time::timeout(deadline - now, released).await;
                }
                Choice::NoRoute => {
                    return Err(last_error.unwrap_or_else(|| {
                        CqlError::NoAvailableConnection(
                            "no routable node: every node is down or backing off".to_string(),
                        )
                    }))
                }
            }
        }
    }

    /// Returns a connection to the pool.
    ///
    /// Equivalent to dropping the handle.
    pub fn release(&self, connection: PooledConnection) {
        drop(connection);
    }

    /// Counts a hard failure against `addr`, as if a connection to it broke.
    pub async fn report_failure(&self, addr: &str) {
        let to_close = {
            let mut inner = self.shared.inner.lock().await;
            inner.record_failure(addr, self.shared.config.failure_threshold, Instant::now())
        };
        close_all(to_close).await;
    }

    /// Closes connections that are broken or idle past the TTL.
    pub async fn evict_idle(&self) -> usize {
        let stale = {
            let mut inner = self.shared.inner.lock().await;
            inner.take_stale(&self.shared.config, Instant::now())
        };
        let evicted = stale.len();
        close_all(stale).await;
        evicted
    }

    /// Nodes that are not Up.
    pub(crate) async fn probe_targets(&self) -> Vec<String> {
        self.shared.inner.lock().await.balancer.unhealthy_nodes()
    }

    /// Applies a health probe outcome under the pool lock.
    pub(crate) async fn apply_probe_result(&self, addr: &str, result: &Result<()>) {
        let now = Instant::now();
        let to_close = {
            let mut inner = self.shared.inner.lock().await;
            if let Some(node) = inner.balancer.node_mut(addr) {
                node.last_probe = Some(now);
            }
            match result {
                Ok(()) => {
                    inner.record_success(addr);
                    Vec::new()
                }
                Err(e) => {
                    debug!("Health probe of {} failed: {}", addr, e);
                    inner.record_failure(addr, self.shared.config.failure_threshold, now)
                }
            }
        };
        close_all(to_close).await;
        if result.is_ok() {
            self.shared.released.notify_waiters();
        }
    }

    pub async fn node(&self, addr: &str) -> Option<Node> {
        self.shared.inner.lock().await.balancer.node(addr).cloned()
    }

    pub async fn stats(&self) -> PoolStats {
        let inner = self.shared.inner.lock().await;
        let nodes = inner
            .balancer
            .nodes()
            .iter()
            .map(|node| {
                let connections = inner.connections.get(&node.addr);
                NodeStats {
                    addr: node.addr.clone(),
                    health: node.health,
                    consecutive_failures: node.consecutive_failures,
                    connections: connections.map_or(0, Vec::len),
                    leases: connections.map_or(0, |c| c.iter().map(|c| c.leases()).sum()),
                }
            })
            .collect();
        PoolStats { nodes }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Closes every connection; later acquires fail.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let connections: Vec<Arc<Connection>> = {
            let mut inner = self.shared.inner.lock().await;
            inner.connections.drain().flat_map(|(_, c)| c).collect()
        };
        info!("Closing connection pool ({} connections)", connections.len());
        close_all(connections).await;
        self.shared.released.notify_waiters();
    }
}
