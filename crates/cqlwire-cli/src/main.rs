//! # cqlwire CLI Entry Point
//!
//! Connects to a CQL cluster and runs one command against it. Rows are
//! written to stdout as one JSON object per line; logs and errors go to
//! stderr.
//!
//! ## Usage
//!
//! ```bash
//! # Run a query against a local node
//! cqlwire -n 127.0.0.1:9042 query "SELECT release_version FROM system.local"
//!
//! # List roles over mutual TLS
//! cqlwire -n 127.0.0.1:9142 --ca truststore.pem --cert cert.pem --key key.pem roles
//!
//! # Load settings from a file, then override the consistency
//! cqlwire --config cluster.json -c quorum clients
//!
//! # Check every node
//! cqlwire -n 10.0.0.1:9042 -n 10.0.0.2:9042 ping
//! ```
//!
//! Logging follows `RUST_LOG` and defaults to `warn`.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use argh::FromArgs;
use cqlwire_cli::output::row_to_json;
use cqlwire_cli::records::{ConnectedClient, Role, CLIENTS_QUERY, ROLES_QUERY};
use cqlwire_client::{Cluster, ClusterConfig, Connection, Query, Session};
use cqlwire_common::auth::Credentials;
use cqlwire_common::transport::VerifyMode;
use cqlwire_common::Consistency;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};


const DEFAULT_NODE: &str = "127.0.0.1:9042";

#[derive(FromArgs)]
/// cqlwire - talk to a CQL cluster
struct Cli {
    /// node address as host:port; repeat for several nodes
    ///
    /// Defaults to 127.0.0.1:9042 when neither this flag nor the config
    /// file names a node.
    #[argh(option, short = 'n', long = "node")]
    nodes: Vec<String>,

    /// keyspace to select on every connection
    #[argh(option, short = 'k')]
    keyspace: Option<String>,

    /// JSON configuration file; flags override its values
    #[argh(option)]
    config: Option<PathBuf>,

    /// enable TLS (implied by --ca, --cert and --verify)
    #[argh(switch)]
    tls: bool,

    /// client certificate chain (PEM) for mutual TLS
    #[argh(option)]
    cert: Option<PathBuf>,

    /// client private key (PEM) for mutual TLS
    #[argh(option)]
    key: Option<PathBuf>,

    /// trusted CA certificates (PEM)
    #[argh(option)]
    ca: Option<PathBuf>,

    /// server certificate verification: none or peer
    #[argh(option)]
    verify: Option<VerifyMode>,

    /// username for password authentication
    #[argh(option, short = 'u')]
    username: Option<String>,

    /// password for password authentication
    #[argh(option, short = 'p')]
    password: Option<String>,

    /// consistency level, e.g. one, quorum, local_quorum
    #[argh(option, short = 'c')]
    consistency: Option<Consistency>,

    /// per-request timeout in milliseconds
    #[argh(option, long = "timeout-ms")]
    timeout_ms: Option<u64>,

    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Query(QueryArgs),
    Roles(RolesArgs),
    Clients(ClientsArgs),
    Ping(PingArgs),
}

/// Runs a CQL statement and prints each result row as a JSON line.
///
/// ```bash
/// cqlwire query "SELECT keyspace_name FROM system_schema.keyspaces" | jq .keyspace_name
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "query")]
/// run a CQL statement and print rows as JSON lines
struct QueryArgs {
    /// the statement to run
    #[argh(positional)]
    cql: String,

    /// rows fetched per page
    #[argh(option, long = "page-size")]
    page_size: Option<i32>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "roles")]
/// list the roles in system.roles
struct RolesArgs {}

#[derive(FromArgs)]
#[argh(subcommand, name = "clients")]
/// list the connections in system.clients
struct ClientsArgs {}

#[derive(FromArgs)]
#[argh(subcommand, name = "ping")]
/// connect and report the health of every node
struct PingArgs {}

/// Builds the cluster configuration from the optional file and the flags.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if only one of
/// `--username` and `--password` is given.
fn build_config(cli: &Cli) -> Result<ClusterConfig> {
    let mut config = match &cli.config {
        Some(path) => ClusterConfig::from_json_file(path)?,
        None => ClusterConfig::default(),
    };

    if !cli.nodes.is_empty() {
        config.nodes = cli.nodes.clone();
    }
    if config.nodes.is_empty() {
        config.nodes.push(DEFAULT_NODE.to_string());
    }
    if let Some(keyspace) = &cli.keyspace {
        config.keyspace = Some(keyspace.clone());
    }

    if cli.tls || cli.ca.is_some() || cli.cert.is_some() || cli.verify.is_some() {
        config.tls.enabled = true;
    }
    if let Some(ca) = &cli.ca {
        config.tls.ca_path = Some(ca.clone());
    }
    match (&cli.cert, &cli.key) {
        (Some(cert), Some(key)) => {
            config.tls.certificate_path = Some(cert.clone());
            config.tls.private_key_path = Some(key.clone());
        }
        (None, None) => {}
        _ => bail!("--cert and --key must be given together"),
    }
    if let Some(verify) = cli.verify {
        config.tls.verify_mode = verify;
    }

    match (&cli.username, &cli.password) {
        (Some(username), Some(password)) => {
            config.credentials = Some(Credentials::new(username, password));
        }
        (None, None) => {}
        _ => bail!("--username and --password must be given together"),
    }

    if let Some(consistency) = cli.consistency {
        config.default_consistency = consistency;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.request_timeout_ms = timeout_ms;
    }
    // a one-shot command has no use for background probing
    config.health_check.enabled = false;

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Default to WARN so stdout stays clean for piping, RUST_LOG overrides
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(&cli)?;
    let cluster = Cluster::new(config).context("invalid cluster configuration")?;
    let session = cluster.connect(None).await.context("failed to connect")?;

    let result = run_command(cli.command, &cluster, &session).await;
    session.close().await;
    result
}

async fn run_command(command: Commands, cluster: &Cluster, session: &Session) -> Result<()> {
    match command {
        Commands::Query(args) => run_query(session, args).await,
        Commands::Roles(_) => {
            let roles: Vec<Role> = session.query_typed(ROLES_QUERY, &[]).await?;
            print_records(&roles)
        }
        Commands::Clients(_) => {
            let clients: Vec<ConnectedClient> = session.query_typed(CLIENTS_QUERY, &[]).await?;
            print_records(&clients)
        }
        Commands::Ping(_) => run_ping(cluster, session).await,
    }
}

/// Executes the `query` subcommand.
async fn run_query(session: &Session, args: QueryArgs) -> Result<()> {
    let mut query = Query::new(args.cql);
    if let Some(page_size) = args.page_size {
        query = query.with_page_size(page_size);
    }

    let result = session.execute(query, &[]).await?;
    for warning in result.warnings() {
        warn!("Server warning: {}", warning);
    }
    info!("{} rows", result.len());

    for row in result.iter() {
        println!("{}", serde_json::to_string(&row_to_json(&row))?);
    }
    Ok(())
}

fn print_records<T: Serialize>(records: &[T]) -> Result<()> {
    for record in records {
        println!("{}", serde_json::to_string(record)?);
    }
    Ok(())
}

/// Executes the `ping` subcommand.
///
/// Probes every configured node with an OPTIONS round trip, whether or not
/// the session holds a connection to it, and prints one line per node.
async fn run_ping(cluster: &Cluster, session: &Session) -> Result<()> {
    let timeout = Duration::from_millis(cluster.config().connect_timeout_ms);
    let tls = session.pool().tls_context();
    let stats = session.stats().await;

    for addr in &cluster.config().nodes {
        let started = Instant::now();
        let probe = Connection::probe(addr, tls, timeout).await;
        let connections = stats.node(addr).map(|node| node.connections).unwrap_or(0);
        let line = match probe {
            Ok(()) => json!({
                "node": addr,
                "health": "up",
                "latency_ms": started.elapsed().as_millis() as u64,
                "connections": connections,
            }),
            Err(e) => json!({
                "node": addr,
                "health": "down",
                "error": e.to_string(),
                "connections": connections,
            }),
        };
        println!("{}", line);
    }
    Ok(())
}
