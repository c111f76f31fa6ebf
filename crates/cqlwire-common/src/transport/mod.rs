//! Transport layer
//!
//! Moves whole frames between the driver and a node over TCP, optionally
//! wrapped in TLS.
//!
//! # Components
//!
//! - **[`FrameCodec`]**: maps [`Request`](crate::protocol::Request) and
//!   [`Response`](crate::protocol::Response) values onto frames
//! - **[`Transport`]**: client connection with connect, send, receive and close
//! - **[`TlsConfig`]** / **[`TlsContext`]**: certificate loading and verification
//! - **[`FrameServer`]**: async server used as a stand-in node
//!
//! # Wire Format
//!
//! ```text
//! [version u8][flags u8][stream i16][opcode u8][length i32][body]
//! ```
//!
//! Bodies larger than 256 MB are rejected before any allocation.

pub mod codec;
pub mod tcp;
pub mod tcp_server;
pub mod tls;

pub use codec::{FrameCodec, ResponseFrame};
pub use tcp::{host_of, read_frame, write_frame, Transport, DEFAULT_CONNECT_TIMEOUT};
pub use tcp_server::{FrameServer, Reply, RequestContext};
pub use tls::{server_acceptor, TlsConfig, TlsContext, VerifyMode};

#[cfg(test)]
mod tests;
