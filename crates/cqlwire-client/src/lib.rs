//! cqlwire Client
//!
//! Cluster-aware session layer over the CQL native protocol.
//!
//! # Components
//!
//! - **[`Cluster`] / [`Session`]**: connect once, then `execute` statements
//!   concurrently; pages are followed and transport failures are retried on
//!   another node
//! - **[`ConnectionPool`]**: per-node connections, node health (Up, Suspect,
//!   Down), round-robin routing and idle eviction
//! - **[`Connection`]**: one multiplexed connection with a stream-id arena
//! - **[`HealthChecker`]**: background probing of unhealthy nodes
//! - **[`row`]**: decoding rows into typed records
//!
//! # Example
//!
//! ```rust,no_run
//! use cqlwire_client::{impl_from_row, Cluster, ClusterConfig, MaybeUnset};
//! use cqlwire_common::transport::TlsConfig;
//!
//! struct Role {
//!     role: String,
//!     can_login: bool,
//!     member_of: MaybeUnset<Vec<String>>,
//! }
//! impl_from_row!(Role { role, can_login, member_of });
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClusterConfig::new(["10.0.0.1:9042", "10.0.0.2:9042"])
//!     .with_tls(TlsConfig::peer("ca.pem"));
//! let session = Cluster::new(config)?.connect(Some("system")).await?;
//!
//! let roles: Vec<Role> = session.query_typed("SELECT * FROM roles", &[]).await?;
//! println!("{} roles", roles.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod health_checker;
pub mod load_balancer;
pub mod node;
pub mod pool;
pub mod row;
pub mod session;

pub use config::{ClusterConfig, HealthCheckConfig, PoolConfig, RetryConfig};
pub use connection::{Connection, ConnectionConfig};
pub use cqlwire_common::Result;
pub use health_checker::HealthChecker;
pub use load_balancer::{LoadBalancer, RoutingHint};
pub use node::{BackoffConfig, Node, NodeHealth};
pub use pool::{ConnectionPool, NodeStats, PoolStats, PooledConnection, WeakConnectionPool};
pub use row::{FromCqlValue, FromRow, MaybeUnset, QueryResult, RowView};
pub use session::{Cluster, Query, Session};
