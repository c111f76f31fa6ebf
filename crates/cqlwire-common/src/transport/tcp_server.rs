use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

use crate::protocol::error::{CqlError, DbErrorCode, Result};
use crate::protocol::{Frame, Request, Response};
use crate::transport::codec::FrameCodec;
use crate::transport::tcp::{read_frame, write_frame};

/// Identifies the connection a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub connection_id: u64,
    pub peer: SocketAddr,
    pub stream: i16,
}

/// What the server does after handling a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Respond(Response),
    /// Respond with the warning flag set.
    RespondWithWarnings(Response, Vec<String>),
    /// Never answer this request.
    Ignore,
    /// Drop the connection without answering.
    Close,
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Reply::Respond(response)
    }
}

/// Async server speaking the native protocol frame format.
///
/// Every request is handled on its own task, so responses on one connection
/// can complete out of order; each carries the stream id of its request.
/// Used as a stand-in node in tests and local development.
pub struct FrameServer {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    next_connection_id: Arc<AtomicU64>,
}

impl FrameServer {
    /// Creates a new server bound to the specified address.
    ///
    /// # Arguments
    /// * `bind_addr` - The address to bind to (e.g., "127.0.0.1:0")
    pub async fn new(bind_addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            CqlError::Connect(format!("failed to bind to {}: {}", bind_addr, e))
        })?;

        Ok(Self {
            listener,
            tls: None,
            next_connection_id: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Requires a TLS handshake on every accepted connection.
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// Gets the actual bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the listener fails, handing every decoded
    /// request to `handler`.
    pub async fn run_with_handler<F, Fut>(&self, handler: F) -> Result<()>
    where
        F: Fn(RequestContext, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Reply> + Send + 'static,
    {
        let handler = Arc::new(handler);

        loop {
            let (stream, peer) = self.listener.accept().await?;
            let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
            debug!(connection_id, %peer, "Connection accepted");

            let handler = handler.clone();
            let tls = self.tls.clone();
            tokio::spawn(async move {
                let result = match tls {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            handle_connection(tls_stream, connection_id, peer, handler).await
                        }
                        Err(e) => {
                            warn!(connection_id, %peer, "TLS accept failed: {}", e);
                            return;
                        }
                    },
                    None => handle_connection(stream, connection_id, peer, handler).await,
                };
                match result {
                    Ok(()) => debug!(connection_id, "Connection finished"),
                    Err(e) => debug!(connection_id, "Connection ended: {}", e),
                }
            });
        }
    }
}

type SharedWriter<S> = Arc<Mutex<WriteHalf<S>>>;

/// Processes frames on one connection until the peer leaves or a handler
/// asks for the connection to be dropped.
async fn handle_connection<S, F, Fut>(
    stream: S,
    connection_id: u64,
    peer: SocketAddr,
    handler: Arc<F>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    F: Fn(RequestContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reply> + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let writer: SharedWriter<S> = Arc::new(Mutex::new(writer));
    let closing = Arc::new(Notify::new());

    loop {
        let frame = tokio::select! {
            frame = read_frame(&mut reader) => frame,
            _ = closing.notified() => return Ok(()),
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(CqlError::ConnectionClosed(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        let ctx = RequestContext {
            connection_id,
            peer,
            stream: frame.stream,
        };
        let request = match FrameCodec::decode_request(&frame) {
            Ok(request) => request,
            Err(e) => {
                warn!(connection_id, stream = frame.stream, "Bad request frame: {}", e);
                let reply = Response::error(DbErrorCode::ProtocolError, e.to_string());
                send(&writer, frame.stream, Reply::Respond(reply)).await?;
                continue;
            }
        };

        let handler = handler.clone();
        let writer = writer.clone();
        let closing = closing.clone();
        tokio::spawn(async move {
            let reply = handler(ctx, request).await;
            if matches!(reply, Reply::Close) {
                let _ = writer.lock().await.shutdown().await;
                closing.notify_one();
                return;
            }
            if let Err(e) = send(&writer, ctx.stream, reply).await {
                debug!(connection_id = ctx.connection_id, "Failed to send response: {}", e);
            }
        });
    }
}

async fn send<S: AsyncWrite>(writer: &SharedWriter<S>, stream: i16, reply: Reply) -> Result<()> {
    let frame: Frame = match reply {
        Reply::Respond(response) => FrameCodec::encode_response(stream, &response)?,
        Reply::RespondWithWarnings(response, warnings) => {
            FrameCodec::encode_response_with_warnings(stream, &response, &warnings)?
        }
        Reply::Ignore | Reply::Close => return Ok(()),
    };
    let mut writer = writer.lock().await;
    write_frame(&mut *writer, &frame).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_server_creation() {
        let server = FrameServer::new("127.0.0.1:0").await;
        assert!(server.is_ok());
    }

    #[tokio::test]
    async fn test_frame_server_local_addr() {
        let server = FrameServer::new("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_reply_from_response() {
        assert_eq!(Reply::from(Response::Ready), Reply::Respond(Response::Ready));
    }
}
