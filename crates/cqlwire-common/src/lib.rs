//! cqlwire Common Types and Transport
//!
//! This crate provides the wire protocol definitions and the TCP/TLS
//! transport layer shared by the cqlwire driver and its tools.
//!
//! # Overview
//!
//! cqlwire speaks version 4 of the CQL native protocol to Cassandra-compatible
//! clusters. This crate contains everything below the connection pool:
//!
//! - **Protocol Layer**: frames, requests, responses, column types, cell values
//!   and the error taxonomy
//! - **Transport Layer**: TCP connections with optional TLS, a frame codec and
//!   a loopback frame server
//! - **Authentication**: SASL PLAIN tokens and TLS-identity handshakes
//!
//! # Architecture
//!
//! - **Transport**: TCP, optionally wrapped in TLS (rustls)
//! - **Message Format**: `[9-byte header] + [body]`, see [`protocol::frame`]
//! - **Max Body Size**: 256 MB
//! - **Multiplexing**: each request carries a stream id; responses echo it
//!
//! # Example
//!
//! ```
//! use cqlwire_common::{Consistency, QueryRequest, Request, values};
//! use cqlwire_common::transport::FrameCodec;
//!
//! let query = QueryRequest::new("SELECT role FROM system_auth.roles WHERE role = ?")
//!     .with_consistency(Consistency::One)
//!     .with_values(&values!["cassandra"])
//!     .unwrap();
//! let frame = FrameCodec::encode_request(1, &Request::Query(query)).unwrap();
//! assert_eq!(frame.stream, 1);
//! ```

pub mod auth;
pub mod protocol;
pub mod transport;

pub use protocol::*;
