//! Multiplexed connection to a single node
//!
//! A [`Connection`] owns one [`Transport`] and a reader task. Requests are
//! tagged with a stream id taken from a fixed-size arena; the reader hands
//! each response frame to the waiter registered under its stream id, so
//! many requests can be in flight at once and complete in any order.
//!
//! A stream id returns to the arena only when the response for it has been
//! read. A caller that stops waiting (timeout, cancellation) leaves its slot
//! reserved until then. The exception is a request cancelled while its
//! frame is still being written: its slot is freed at once and the
//! connection is retired, since part of the frame may be on the wire.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cqlwire_common::auth::AuthConfig;
use cqlwire_common::transport::{FrameCodec, ResponseFrame, TlsContext, Transport};
use cqlwire_common::{CqlError, Frame, QueryRequest, Request, Response, Result};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Everything needed to open a connection, shared by all connections of a pool
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub tls: Option<TlsContext>,
    pub auth: AuthConfig,
    pub keyspace: Option<String>,
    /// Bounds the TCP connect, the TLS handshake and every setup round trip
    pub connect_timeout: Duration,
    pub max_streams: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            tls: None,
            auth: AuthConfig::disabled(),
            keyspace: None,
            connect_timeout: Duration::from_secs(5),
            max_streams: 1024,
        }
    }
}

type Waiter = oneshot::Sender<Result<Frame>>;

/// In-flight request slots indexed by stream id
struct StreamArena {
    slots: Vec<Option<Waiter>>,
    free: Vec<i16>,
}

impl StreamArena {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, i16::MAX as usize + 1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            // lowest ids are handed out first
            free: (0..capacity).rev().map(|i| i as i16).collect(),
        }
    }

    fn allocate(&mut self, waiter: Waiter) -> Option<i16> {
        let stream = self.free.pop()?;
        self.slots[stream as usize] = Some(waiter);
        Some(stream)
    }

    /// Frees `stream`, returning its waiter if one was registered.
    fn complete(&mut self, stream: i16) -> Option<Waiter> {
        let index = usize::try_from(stream).ok()?;
        let waiter = self.slots.get_mut(index)?.take()?;
        self.free.push(stream);
        Some(waiter)
    }

    fn in_flight(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn fail_all(&mut self, reason: &str) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(waiter) = slot.take() {
                let _ = waiter.send(Err(CqlError::ConnectionClosed(reason.to_string())));
                self.free.push(index as i16);
            }
        }
    }
}

/// A stream id held while its request frame is written.
///
/// Dropped before [`StreamWrite::written`], it frees the slot and marks the
/// connection broken.
struct StreamWrite {
    streams: Arc<Mutex<StreamArena>>,
    broken: Arc<AtomicBool>,
    stream: i16,
    armed: bool,
}

impl StreamWrite {
    fn new(streams: Arc<Mutex<StreamArena>>, broken: Arc<AtomicBool>, stream: i16) -> Self {
        Self {
            streams,
            broken,
            stream,
            armed: true,
        }
    }

    fn written(mut self) {
        self.armed = false;
    }
}

impl Drop for StreamWrite {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.broken.store(true, Ordering::Release);
        let stream = self.stream;
        match self.streams.try_lock() {
            Ok(mut arena) => {
                arena.complete(stream);
            }
            Err(_) => {
                let streams = self.streams.clone();
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    runtime.spawn(async move {
                        streams.lock().await.complete(stream);
                    });
                }
            }
        }
        debug!(stream, "Request dropped mid-write, stream released");
    }
}

/// An established, authenticated connection to one node.
pub struct Connection {
    id: u64,
    node: String,
    keyspace: Option<String>,
    transport: Arc<Transport>,
    streams: Arc<Mutex<StreamArena>>,
    broken: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    leases: AtomicUsize,
    created: Instant,
    last_used_ms: AtomicU64,
}

impl Connection {
    /// Opens a connection and runs the setup handshake.
    ///
    /// STARTUP, then AUTHENTICATE/AUTH_RESPONSE if the node asks for it,
    /// then `USE` when a keyspace is configured.
    ///
    /// # Errors
    ///
    /// - `Connect` / `TlsHandshake` from the transport, or if the node does
    ///   not answer a setup request within `connect_timeout`
    /// - `Authentication` if the node demands credentials that are missing
    ///   or rejected
    /// - `Query` if the keyspace cannot be selected
    pub async fn open(node: &str, config: &ConnectionConfig) -> Result<Self> {
        let transport = Transport::connect(node, config.tls.as_ref(), config.connect_timeout).await?;
        let mut connection = Self::from_transport(node, transport, config.max_streams);

        if let Err(e) = connection.handshake(config).await {
            connection.close().await;
            return Err(e);
        }
        connection.keyspace = config.keyspace.clone();
        debug!(
            connection = connection.id,
            node,
            tls = connection.transport.is_tls(),
            "Connection ready"
        );
        Ok(connection)
    }

    fn from_transport(node: &str, transport: Transport, max_streams: usize) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let transport = Arc::new(transport);
        let streams = Arc::new(Mutex::new(StreamArena::new(max_streams)));
        let broken = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_responses(
            id,
            transport.clone(),
            streams.clone(),
            broken.clone(),
        ));

        Self {
            id,
            node: node.to_string(),
            keyspace: None,
            transport,
            streams,
            broken,
            reader,
            leases: AtomicUsize::new(0),
            created: Instant::now(),
            last_used_ms: AtomicU64::new(0),
        }
    }

    async fn handshake(&self, config: &ConnectionConfig) -> Result<()> {
        let timeout = config.connect_timeout;
        match self.setup_request(&Request::startup(), timeout).await? {
            Response::Ready => {}
            Response::Authenticate(authenticator) => {
                self.authenticate(&authenticator, &config.auth, timeout).await?
            }
            Response::Error(e) => {
                return Err(CqlError::protocol(format!(
                    "{} rejected STARTUP: {}",
                    self.node, e.message
                )))
            }
            other => {
                return Err(CqlError::protocol(format!(
                    "unexpected {} response to STARTUP",
                    other.kind()
                )))
            }
        }

        if let Some(keyspace) = &config.keyspace {
            self.use_keyspace(keyspace, timeout).await?;
        }
        Ok(())
    }

    async fn authenticate(
        &self,
        authenticator: &str,
        auth: &AuthConfig,
        timeout: Duration,
    ) -> Result<()> {
        let token = auth.initial_response(authenticator)?;
        debug!(connection = self.id, authenticator, %auth, "Authenticating");

        match self
            .setup_request(&Request::AuthResponse(Some(token)), timeout)
            .await?
        {
            Response::AuthSuccess(_) => Ok(()),
            Response::AuthChallenge(_) => Err(CqlError::Authentication(format!(
                "{} sent an AUTH_CHALLENGE; multi-step authentication is not supported",
                authenticator
            ))),
            Response::Error(e) => Err(CqlError::Authentication(format!(
                "{} ({})",
                e.message, e.code
            ))),
            other => Err(CqlError::protocol(format!(
                "unexpected {} response to AUTH_RESPONSE",
                other.kind()
            ))),
        }
    }

    async fn use_keyspace(&self, keyspace: &str, timeout: Duration) -> Result<()> {
        let statement = format!("USE \"{}\"", keyspace.replace('"', "\"\""));
        match self
            .setup_request(&Request::Query(QueryRequest::new(statement)), timeout)
            .await?
        {
            Response::SetKeyspace(_) => Ok(()),
            Response::Error(e) => Err(e.into()),
            other => Err(CqlError::protocol(format!(
                "unexpected {} response to USE",
                other.kind()
            ))),
        }
    }

    /// Setup requests that time out count as a connect failure.
    async fn setup_request(&self, request: &Request, timeout: Duration) -> Result<Response> {
        match self.send_request(request, timeout).await {
            Ok(frame) => Ok(frame.response),
            Err(CqlError::Timeout(ms)) => Err(CqlError::Connect(format!(
                "{} did not answer {:?} within {}ms",
                self.node,
                request.opcode(),
                ms
            ))),
            Err(e) => Err(e),
        }
    }

    /// Sends one request and waits up to `timeout` for its response.
    ///
    /// Transport and protocol failures mark the connection broken; every
    /// other request waiting on it fails with `ConnectionClosed`.
    pub async fn send_request(&self, request: &Request, timeout: Duration) -> Result<ResponseFrame> {
        if self.is_broken() {
            return Err(CqlError::ConnectionClosed(format!(
                "connection {} to {} is broken",
                self.id, self.node
            )));
        }

        let mut frame = FrameCodec::encode_request(0, request)?;
        let (waiter, response) = oneshot::channel();
        let stream = self.streams.lock().await.allocate(waiter);
        let Some(stream) = stream else {
            // every slot is held by a request whose response never came
            self.broken.store(true, Ordering::Release);
            return Err(CqlError::NoAvailableConnection(format!(
                "all stream ids are in use on connection {} to {}",
                self.id, self.node
            )));
        };
        frame.stream = stream;
        self.touch();

        debug!(connection = self.id, stream, opcode = ?frame.opcode, "Sending request");
        let write = StreamWrite::new(self.streams.clone(), self.broken.clone(), stream);
        let sent = self.transport.send(&frame).await;
        write.written();
        if let Err(e) = sent {
            self.streams.lock().await.complete(stream);
            if e.is_connection_fatal() {
                self.fail().await;
            }
            return Err(e);
        }

        let frame = match tokio::time::timeout(timeout, response).await {
            Ok(Ok(frame)) => frame?,
            Ok(Err(_)) => {
                return Err(CqlError::ConnectionClosed(format!(
                    "connection {} to {} closed while waiting for stream {}",
                    self.id, self.node, stream
                )))
            }
            Err(_) => {
                debug!(connection = self.id, stream, "Request timed out, stream stays reserved");
                return Err(CqlError::Timeout(timeout.as_millis() as u64));
            }
        };

        match FrameCodec::decode_response(&frame) {
            Ok(decoded) => Ok(decoded),
            Err(e) => {
                warn!(connection = self.id, stream, "Undecodable response: {}", e);
                self.fail().await;
                Err(e)
            }
        }
    }

    /// Sends OPTIONS on a fresh transport and expects SUPPORTED.
    ///
    /// No STARTUP or authentication is needed, so this checks reachability
    /// only.
    pub async fn probe(node: &str, tls: Option<&TlsContext>, timeout: Duration) -> Result<()> {
        let transport = Transport::connect(node, tls, timeout).await?;
        let result: Result<()> = async {
            transport
                .send(&FrameCodec::encode_request(0, &Request::Options)?)
                .await?;
            let frame = tokio::time::timeout(timeout, transport.receive())
                .await
                .map_err(|_| CqlError::Timeout(timeout.as_millis() as u64))??;
            match FrameCodec::decode_response(&frame)?.response {
                Response::Supported(_) => Ok(()),
                Response::Error(e) => Err(e.into()),
                other => Err(CqlError::protocol(format!(
                    "unexpected {} response to OPTIONS",
                    other.kind()
                ))),
            }
        }
        .await;
        transport.close().await;
        result
    }

    async fn fail(&self) {
        self.broken.store(true, Ordering::Release);
        self.transport.close().await;
    }

    /// Closes the transport and fails every outstanding request.
    ///
    /// Safe to call more than once.
    pub async fn close(&self) {
        self.broken.store(true, Ordering::Release);
        self.reader.abort();
        self.transport.close().await;
        self.streams.lock().await.fail_all("connection closed");
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    pub fn is_tls(&self) -> bool {
        self.transport.is_tls()
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire) || self.transport.is_closed()
    }

    /// Requests currently holding a stream id, abandoned ones included
    pub async fn in_flight(&self) -> usize {
        self.streams.lock().await.in_flight()
    }

    pub(crate) fn leases(&self) -> usize {
        self.leases.load(Ordering::Acquire)
    }

    pub(crate) fn lease(&self) {
        self.leases.fetch_add(1, Ordering::AcqRel);
        self.touch();
    }

    pub(crate) fn release_lease(&self) {
        let _ = self
            .leases
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        self.touch();
    }

    /// How long the connection has been without a lease, if it has none.
    pub(crate) fn idle_for(&self, now: Instant) -> Option<Duration> {
        if self.leases() > 0 {
            return None;
        }
        let last_used = self.created + Duration::from_millis(self.last_used_ms.load(Ordering::Acquire));
        Some(now.saturating_duration_since(last_used))
    }

    fn touch(&self) {
        let elapsed = self.created.elapsed().as_millis() as u64;
        self.last_used_ms.fetch_max(elapsed, Ordering::AcqRel);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("leases", &self.leases())
            .field("broken", &self.is_broken())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Routes response frames to their waiters until the transport fails.
async fn read_responses(
    connection: u64,
    transport: Arc<Transport>,
    streams: Arc<Mutex<StreamArena>>,
    broken: Arc<AtomicBool>,
) {
    loop {
        let frame = match transport.receive().await {
            Ok(frame) => frame,
            Err(e) => {
                debug!(connection, "Reader stopped: {}", e);
                broken.store(true, Ordering::Release);
                transport.close().await;
                streams.lock().await.fail_all(&e.to_string());
                return;
            }
        };

        let stream = frame.stream;
        if stream < 0 {
            debug!(connection, stream, "Ignoring server-initiated frame");
            continue;
        }
        match streams.lock().await.complete(stream) {
            Some(waiter) => {
                if waiter.send(Ok(frame)).is_err() {
                    debug!(connection, stream, "Response arrived after caller gave up");
                }
            }
            None => warn!(connection, stream, "Response for a stream with no request"),
        }
    }
}
