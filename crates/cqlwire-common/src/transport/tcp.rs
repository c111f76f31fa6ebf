use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf,
};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::protocol::error::{CqlError, Result};
use crate::protocol::frame::{Frame, FrameHeader, HEADER_LEN};
use crate::transport::tls::TlsContext;

/// Default timeout for establishing a connection (5 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A plain or TLS-wrapped TCP stream.
pub enum TransportStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for TransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TransportStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            TransportStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            TransportStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            TransportStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TransportStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            TransportStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TransportStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            TransportStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Byte-stream connection to a single node, carrying whole frames.
///
/// Reads and writes are guarded by separate locks so one task can wait for
/// the next frame while others send. Each [`send`](Transport::send) writes a
/// complete frame before releasing the write lock, so frames from concurrent
/// senders never interleave.
///
/// # Example
///
/// ```no_run
/// use cqlwire_common::transport::{Transport, FrameCodec, DEFAULT_CONNECT_TIMEOUT};
/// use cqlwire_common::protocol::Request;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = Transport::connect("127.0.0.1:9042", None, DEFAULT_CONNECT_TIMEOUT).await?;
/// transport.send(&FrameCodec::encode_request(0, &Request::Options)?).await?;
/// let frame = transport.receive().await?;
/// println!("{:?}", FrameCodec::decode_response(&frame)?.response);
/// transport.close().await;
/// # Ok(())
/// # }
/// ```
pub struct Transport {
    addr: String,
    tls: bool,
    reader: Mutex<ReadHalf<TransportStream>>,
    writer: Mutex<WriteHalf<TransportStream>>,
    closed: AtomicBool,
}

impl Transport {
    /// Connects to `addr` (`host:port`), performing a TLS handshake when a
    /// context is given.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if the address is not `host:port`
    /// - `Connect` if the node cannot be reached within `connect_timeout`
    /// - `TlsHandshake` if the handshake or certificate verification fails
    pub async fn connect(
        addr: &str,
        tls: Option<&TlsContext>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let host = host_of(addr)?;

        let tcp = tokio::time::timeout(connect_timeout, Self::connect_tcp(addr))
            .await
            .map_err(|_| {
                CqlError::Connect(format!(
                    "timed out connecting to {} after {}ms",
                    addr,
                    connect_timeout.as_millis()
                ))
            })??;
        tcp.set_nodelay(true)?;

        let stream = match tls {
            Some(context) => {
                let server_name = context.server_name_for(host)?;
                let handshake = context.connector().connect(server_name, tcp);
                let tls_stream = tokio::time::timeout(connect_timeout, handshake)
                    .await
                    .map_err(|_| {
                        CqlError::TlsHandshake(format!("handshake with {} timed out", addr))
                    })?
                    .map_err(|e| {
                        CqlError::TlsHandshake(format!("handshake with {} failed: {}", addr, e))
                    })?;
                TransportStream::Tls(Box::new(tls_stream))
            }
            None => TransportStream::Plain(tcp),
        };

        debug!(addr, tls = tls.is_some(), "Transport connected");

        let (reader, writer) = tokio::io::split(stream);
        Ok(Self {
            addr: addr.to_string(),
            tls: tls.is_some(),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        })
    }

    async fn connect_tcp(addr: &str) -> Result<TcpStream> {
        let socket_addrs = tokio::net::lookup_host(addr)
            .await
            .map_err(|e| CqlError::Connect(format!("failed to resolve '{}': {}", addr, e)))?;

        // Try each resolved address until one succeeds
        let mut last_err = None;
        for socket_addr in socket_addrs {
            match TcpStream::connect(socket_addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }

        Err(CqlError::Connect(format!(
            "failed to connect to {}: {}",
            addr,
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no addresses resolved".to_string())
        )))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Writes one frame.
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        if self.is_closed() {
            return Err(CqlError::ConnectionClosed(format!(
                "transport to {} is closed",
                self.addr
            )));
        }
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, frame).await
    }

    /// Waits for the next frame.
    pub async fn receive(&self) -> Result<Frame> {
        let mut reader = self.reader.lock().await;
        read_frame(&mut *reader).await
    }

    /// Shuts the write side down. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(addr = %self.addr, "Error shutting down transport: {}", e);
        }
        debug!(addr = %self.addr, "Transport closed");
    }
}

/// Splits `host:port`, accepting bracketed IPv6 literals.
pub fn host_of(addr: &str) -> Result<&str> {
    let invalid = || CqlError::InvalidConfig(format!("invalid node address '{}'", addr));
    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    port.parse::<u16>().map_err(|_| invalid())?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(invalid());
    }
    Ok(host)
}

/// Reads one frame from any byte stream.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame> {
    let mut header = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|e| map_io_error(e, "reading frame header"))?;
    let header = FrameHeader::parse(&header)?;

    let mut body = BytesMut::zeroed(header.length);
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| map_io_error(e, "reading frame body"))?;
    Frame::from_parts(header, body.freeze())
}

/// Writes and flushes one frame to any byte stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    let bytes = frame.to_bytes()?;
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| map_io_error(e, "writing frame"))?;
    writer
        .flush()
        .await
        .map_err(|e| map_io_error(e, "flushing stream"))?;
    Ok(())
}

/// Map IO errors to appropriate CqlError variants
///
/// - End of stream and reset/aborted connections -> `ConnectionClosed`
/// - Other IO errors -> `Io`
fn map_io_error(err: io::Error, context: &str) -> CqlError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected => {
            CqlError::ConnectionClosed(format!("{}: {}", context, err))
        }
        _ => CqlError::Io(err),
    }
}
