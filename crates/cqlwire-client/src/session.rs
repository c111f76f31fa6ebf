use std::time::{Duration, Instant};

use cqlwire_common::auth::AuthConfig;
use cqlwire_common::transport::ResponseFrame;
use cqlwire_common::{
    BoundValue, Consistency, CqlError, QueryRequest, Request, Response, Result,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ClusterConfig, RetryConfig};
use crate::connection::ConnectionConfig;
use crate::health_checker::HealthChecker;
use crate::load_balancer::RoutingHint;
use crate::pool::{ConnectionPool, PoolStats};
use crate::row::{FromRow, QueryResult};

/// A statement plus per-call overrides of the session defaults
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub text: String,
    pub consistency: Option<Consistency>,
    pub serial_consistency: Option<Consistency>,
    pub page_size: Option<i32>,
    /// Covers every page and retry of the call
    pub timeout: Option<Duration>,
    /// Write timestamp in microseconds since the epoch
    pub timestamp: Option<i64>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            consistency: None,
            serial_consistency: None,
            page_size: None,
            timeout: None,
            timestamp: None,
        }
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    pub fn with_serial_consistency(mut self, consistency: Consistency) -> Self {
        self.serial_consistency = Some(consistency);
        self
    }

    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Query::new(text)
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Query::new(text)
    }
}

/// Entry point: a validated cluster configuration.
///
/// # Example
///
/// ```rust,no_run
/// use cqlwire_client::{Cluster, ClusterConfig, Query};
/// use cqlwire_common::{values, Consistency};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let cluster = Cluster::new(ClusterConfig::new(["127.0.0.1:9042"]))?;
/// let session = cluster.connect(Some("system")).await?;
///
/// let result = session
///     .execute(
///         Query::new("SELECT role FROM roles WHERE role = ?").with_consistency(Consistency::One),
///         &values!["cassandra"],
///     )
///     .await?;
/// for row in result.iter() {
///     println!("{}", row.get::<String>("role")?);
/// }
///
/// session.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Cluster {
    config: ClusterConfig,
}

impl Cluster {
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration fails validation.
    pub fn new(config: ClusterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Opens a session, using `keyspace` or else the configured one.
    ///
    /// One connection is opened before this returns, so unreachable nodes,
    /// TLS failures and rejected credentials surface here rather than on
    /// the first query.
    pub async fn connect(&self, keyspace: Option<&str>) -> Result<Session> {
        let config = &self.config;
        let keyspace = keyspace
            .map(str::to_string)
            .or_else(|| config.keyspace.clone());
        if keyspace.as_deref() == Some("") {
            return Err(CqlError::InvalidConfig("keyspace must not be empty".to_string()));
        }

        let tls = config.tls.build_context()?;
        let tls_identity = tls.as_ref().is_some_and(|t| t.has_client_identity());
        let auth = AuthConfig::from_parts(config.credentials.clone(), tls_identity);
        info!(
            "Connecting to {} nodes (tls: {}, auth: {})",
            config.nodes.len(),
            tls.is_some(),
            auth
        );

        let connection_config = ConnectionConfig {
            tls,
            auth,
            keyspace: keyspace.clone(),
            connect_timeout: config.connect_timeout(),
            max_streams: config.pool.max_requests_per_connection,
        };
        let pool = ConnectionPool::new(config.nodes.clone(), config.pool.clone(), connection_config);

        match pool.acquire(&RoutingHint::default()).await {
            Ok(connection) => {
                debug!("Initial connection to {} established", connection.node());
                pool.release(connection);
            }
            Err(e) => {
                pool.close().await;
                return Err(e);
            }
        }

        let health_checker = config
            .health_check
            .enabled
            .then(|| HealthChecker::new(&pool, config.health_check.clone()).spawn());

        Ok(Session {
            pool,
            keyspace,
            default_consistency: config.default_consistency,
            request_timeout: config.request_timeout(),
            page_size: config.page_size,
            retry: config.retry.clone(),
            health_checker,
        })
    }
}

/// A connected session.
///
/// `execute` may be called concurrently from many tasks; share the session
/// behind an `Arc`.
#[derive(Debug)]
pub struct Session {
    pool: ConnectionPool,
    keyspace: Option<String>,
    default_consistency: Consistency,
    request_timeout: Duration,
    page_size: Option<i32>,
    retry: RetryConfig,
    health_checker: Option<JoinHandle<()>>,
}

impl Session {
    pub fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub async fn stats(&self) -> PoolStats {
        self.pool.stats().await
    }

    /// Runs a statement and returns every row it produces.
    ///
    /// All pages are fetched before returning, under one deadline. A failure
    /// on any page fails the whole call; partial results are never returned.
    ///
    /// # Errors
    ///
    /// - `Query` for errors reported by the server, never retried
    /// - `Timeout` when the deadline passes, never retried
    /// - transport errors after the configured retries on other nodes
    /// - `NoAvailableConnection` when no node can take the request
    pub async fn execute(&self, query: impl Into<Query>, values: &[BoundValue]) -> Result<QueryResult> {
        let query = query.into();
        let timeout = query.timeout.unwrap_or(self.request_timeout);
        let deadline = Instant::now() + timeout;

        let mut query_request = QueryRequest::new(query.text)
            .with_consistency(query.consistency.unwrap_or(self.default_consistency))
            .with_values(values)?
            .with_page_size(query.page_size.or(self.page_size))
            .with_serial_consistency(query.serial_consistency);
        query_request.params.default_timestamp = query.timestamp;
        let mut request = Request::Query(query_request);

        let mut columns = None;
        let mut rows = Vec::new();
        let mut warnings = Vec::new();
        let mut pages = 0usize;

        loop {
            let frame = self.execute_page(&request, deadline, timeout).await?;
            warnings.extend(frame.warnings);

            let page = match frame.response {
                Response::Rows(page) => page,
                Response::Void => return Ok(QueryResult::void().with_warnings(warnings)),
                Response::SetKeyspace(keyspace) => {
                    warn!(
                        "USE {} only affects one pooled connection; pass the keyspace to Cluster::connect instead",
                        keyspace
                    );
                    return Ok(QueryResult::void().with_warnings(warnings));
                }
                Response::SchemaChange(change) => {
                    info!(
                        "Schema change: {} {} {}",
                        change.change_type, change.target, change.keyspace
                    );
                    return Ok(QueryResult::void().with_warnings(warnings));
                }
                Response::Error(e) => return Err(e.into()),
                other => {
                    return Err(CqlError::protocol(format!(
                        "unexpected {} response to QUERY",
                        other.kind()
                    )))
                }
            };

            pages += 1;
            let paging_state = page.metadata.paging_state.clone();
            match &columns {
                None => columns = Some(page.metadata.columns),
                Some(first) if *first != page.metadata.columns => {
                    return Err(CqlError::protocol(format!(
                        "page {} column metadata differs from the first page",
                        pages
                    )));
                }
                Some(_) => {}
            }
            rows.extend(page.rows);

            match (paging_state, &mut request) {
                (Some(state), Request::Query(query_request)) => {
                    query_request.params.paging_state = Some(state);
                }
                _ => break,
            }
        }

        debug!(rows = rows.len(), pages, "Query complete");
        Ok(QueryResult::new(columns.unwrap_or_default(), rows).with_warnings(warnings))
    }

    /// Runs a statement and decodes every row as `T`.
    pub async fn query_typed<T: FromRow>(
        &self,
        query: impl Into<Query>,
        values: &[BoundValue],
    ) -> Result<Vec<T>> {
        self.execute(query, values).await?.rows_typed()
    }

    /// Sends one page request, retrying transport failures on other nodes.
    async fn execute_page(
        &self,
        request: &Request,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<ResponseFrame> {
        let timed_out = || CqlError::Timeout(timeout.as_millis() as u64);
        let mut attempt = 0u32;
        let mut avoid: Option<String> = None;
        let mut last_error: Option<CqlError> = None;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timed_out());
            }

            let hint = avoid.clone().map(RoutingHint::avoid).unwrap_or_default();
            let connection = match tokio::time::timeout(remaining, self.pool.acquire(&hint)).await {
                Ok(Ok(connection)) => connection,
                // nowhere left to retry: report what went wrong first
                Ok(Err(e)) => return Err(last_error.unwrap_or(e)),
                Err(_) => return Err(timed_out()),
            };

            match connection.send_request(request, remaining).await {
                Ok(frame) => return Ok(frame),
                Err(CqlError::Timeout(_)) => return Err(timed_out()),
                Err(e) if e.is_transport() && attempt < self.retry.max_retries => {
                    warn!(
                        "Request to {} failed ({}), retrying on another node",
                        connection.node(),
                        e
                    );
                    avoid = Some(connection.node().to_string());
                    last_error = Some(e);
                    attempt += 1;
                    drop(connection);

                    let backoff = Duration::from_millis(self.retry.backoff_ms);
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    tokio::time::sleep(backoff.min(remaining)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Closes every connection and stops the health checker.
    pub async fn close(&self) {
        if let Some(handle) = &self.health_checker {
            handle.abort();
        }
        self.pool.close().await;
        info!("Session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = &self.health_checker {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_builders() {
        let query = Query::new("SELECT * FROM system.local")
            .with_consistency(Consistency::One)
            .with_page_size(100)
            .with_timeout(Duration::from_millis(250))
            .with_timestamp(42);
        assert_eq!(query.consistency, Some(Consistency::One));
        assert_eq!(query.page_size, Some(100));
        assert_eq!(query.timeout, Some(Duration::from_millis(250)));
        assert_eq!(query.timestamp, Some(42));
        assert_eq!(Query::from("SELECT 1"), Query::new("SELECT 1".to_string()));
    }

    #[test]
    fn test_cluster_rejects_invalid_config() {
        assert!(matches!(
            Cluster::new(ClusterConfig::default()),
            Err(CqlError::InvalidConfig(_))
        ));
        assert!(Cluster::new(ClusterConfig::new(["127.0.0.1:9042"])).is_ok());
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_cluster_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let cluster = Cluster::new(ClusterConfig::new([addr])).unwrap();
        assert!(matches!(cluster.connect(None).await, Err(CqlError::Connect(_))));
    }

    #[tokio::test]
    async fn test_empty_keyspace_rejected() {
        let cluster = Cluster::new(ClusterConfig::new(["127.0.0.1:9042"])).unwrap();
        assert!(matches!(
            cluster.connect(Some("")).await,
            Err(CqlError::InvalidConfig(_))
        ));
    }
}
