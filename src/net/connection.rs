//! Per-connection relay state machine.
//!
//! # Responsibilities
//! - Own the client socket, the lazily created origin socket and the buffer
//! - Advance through the relay states as readiness events arrive
//! - Keep exactly one socket registered with the poller at a time
//! - Tear down both sockets on success, failure or idle expiry
//!
//! # States
//! ```text
//! AwaitRequest ─▶ Connecting ─▶ SendingRequest ─▶ AwaitResponse ─▶ SendingResponse ─▶ Closed
//!       │              │               │                 │                  │
//!       └──────────────┴───────────────┴─────────────────┴──────────────────┴──▶ Closed (abort)
//! ```
//!
//! # Design Decisions
//! - Handlers drain readiness fully (edge-triggered poller)
//! - One buffer, tagged with its direction and reset between legs
//! - Client and origin are separate fields; nothing is swapped mid-flight
//! - A failed origin candidate is replaced by the next resolved address

use std::fmt;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use crate::config::RelaySettings;
use crate::http::{self, ParseStatus, ProxyRequest};
use crate::net::buffer::{Direction, Fill, FillError, Flush, RelayBuffer};
use crate::net::error::RelayError;
use crate::net::upstream::{poll_connect, ConnectProgress, Upstream};
use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough: only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Poller token for one side of this connection.
    ///
    /// Tokens 0 and 1 belong to the listener and the waker.
    pub fn token(&self, side: Side) -> Token {
        let base = (self.0 as usize) * 2;
        match side {
            Side::Client => Token(base),
            Side::Origin => Token(base + 1),
        }
    }

    /// Inverse of [`ConnectionId::token`].
    pub fn from_token(token: Token) -> Option<(Self, Side)> {
        if token.0 < 2 {
            return None;
        }
        let side = if token.0 % 2 == 0 { Side::Client } else { Side::Origin };
        Some((Self((token.0 / 2) as u64), side))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Which socket of a connection an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Origin,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Origin => "origin",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relay state. Declaration order is the only forward order allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Reading the client's request header block.
    AwaitRequest,
    /// Waiting for a non-blocking connect to the origin.
    Connecting,
    /// Writing the rewritten request to the origin.
    SendingRequest,
    /// Reading the origin's response until EOF.
    AwaitResponse,
    /// Writing the buffered response to the client.
    SendingResponse,
    /// Both sockets released.
    Closed,
}

/// What the reactor should do with a connection after a handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Keep the connection; more readiness is expected.
    Continue,
    /// The connection reached `Closed`; drop it.
    Done,
}

/// Readiness reported for one socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

/// Borrowed reactor state handed to every handler.
pub struct Context<'a> {
    pub registry: &'a Registry,
    pub settings: &'a RelaySettings,
}

/// One proxied request/response exchange.
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    client: TcpStream,
    origin: Option<TcpStream>,
    upstream: Option<Upstream>,
    request: Option<ProxyRequest>,
    buffer: RelayBuffer,
    state: ConnectionState,
    client_registered: bool,
    origin_registered: bool,
    started: Instant,
    last_activity: Instant,
}

impl Connection {
    /// Wrap a freshly accepted client in state `AwaitRequest`.
    pub fn new(client: TcpStream, peer_addr: SocketAddr, buffer_capacity: usize) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            peer_addr,
            client,
            origin: None,
            upstream: None,
            request: None,
            buffer: RelayBuffer::new(buffer_capacity),
            state: ConnectionState::AwaitRequest,
            client_registered: false,
            origin_registered: false,
            started: now,
            last_activity: now,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Register the client for its first readable event.
    pub fn start(&mut self, registry: &Registry) -> std::io::Result<()> {
        registry.register(&mut self.client, self.id.token(Side::Client), Interest::READABLE)?;
        self.client_registered = true;
        Ok(())
    }

    /// Handle readiness on one side.
    pub fn on_ready(&mut self, side: Side, ready: Readiness, ctx: &Context<'_>) -> Progress {
        self.last_activity = Instant::now();
        let result = match (self.state, side) {
            (ConnectionState::AwaitRequest, Side::Client) if ready.readable => {
                self.read_request(ctx)
            }
            (ConnectionState::Connecting, Side::Origin) if ready.writable || ready.readable => {
                self.finish_connect(ctx)
            }
            (ConnectionState::SendingRequest, Side::Origin) if ready.writable => {
                self.send_request(ctx)
            }
            (ConnectionState::AwaitResponse, Side::Origin) if ready.readable => {
                self.read_response(ctx)
            }
            (ConnectionState::SendingResponse, Side::Client) if ready.writable => {
                self.send_response()
            }
            _ => Ok(Progress::Continue),
        };
        self.settle(result, ctx)
    }

    /// Handle an error condition reported by the poller for one side.
    ///
    /// During `Connecting` an origin error only disqualifies the current
    /// candidate; anywhere else the peer is gone.
    pub fn on_error(&mut self, side: Side, ctx: &Context<'_>) -> Progress {
        self.last_activity = Instant::now();
        let pending = match side {
            Side::Client => self.client.take_error().ok().flatten(),
            Side::Origin => self
                .origin
                .as_ref()
                .and_then(|origin| origin.take_error().ok().flatten()),
        };
        let error = pending.unwrap_or_else(|| std::io::ErrorKind::ConnectionReset.into());

        let result = match (self.state, side) {
            (ConnectionState::Connecting, Side::Origin) => self.candidate_failed(error, ctx),
            (_, Side::Client) => Err(RelayError::client_io(error)),
            (_, Side::Origin) => Err(RelayError::origin_io(error)),
        };
        self.settle(result, ctx)
    }

    /// Abort a connection that has been idle for too long.
    pub fn expire(&mut self, idle: Duration, ctx: &Context<'_>) -> Progress {
        self.fail(RelayError::Timeout(idle.as_secs()), ctx);
        Progress::Done
    }

    /// Release both sockets.
    pub fn close(&mut self, registry: &Registry) {
        if self.client_registered {
            let _ = registry.deregister(&mut self.client);
            self.client_registered = false;
        }
        self.drop_origin(registry);
        self.upstream = None;
        self.transition(ConnectionState::Closed);
    }

    fn settle(&mut self, result: Result<Progress, RelayError>, ctx: &Context<'_>) -> Progress {
        match result {
            Ok(Progress::Done) => {
                self.close(ctx.registry);
                Progress::Done
            }
            Ok(Progress::Continue) => Progress::Continue,
            Err(error) => {
                self.fail(error, ctx);
                Progress::Done
            }
        }
    }

    fn fail(&mut self, error: RelayError, ctx: &Context<'_>) {
        let origin = self.request.as_ref().map(ProxyRequest::authority);
        match &error {
            RelayError::Resolution { .. } | RelayError::Connect { .. } | RelayError::Timeout(_) => {
                tracing::warn!(
                    connection_id = %self.id,
                    peer_addr = %self.peer_addr,
                    origin = ?origin,
                    state = ?self.state,
                    error = %error,
                    "Relay failed"
                );
            }
            _ => {
                tracing::debug!(
                    connection_id = %self.id,
                    peer_addr = %self.peer_addr,
                    origin = ?origin,
                    state = ?self.state,
                    error = %error,
                    "Relay aborted"
                );
            }
        }

        // Nothing from the origin has reached the client before SendingResponse.
        let owed = match (&error, self.state) {
            (_, state) if state >= ConnectionState::SendingResponse => None,
            (RelayError::Timeout(_), ConnectionState::AwaitRequest) => None,
            _ => error.error_response(),
        };
        if ctx.settings.error_responses {
            if let Some(response) = owed {
                let _ = self.client.write(&response.to_bytes());
            }
        }

        metrics::record_outcome(error.kind(), self.started);
        self.close(ctx.registry);
    }

    fn transition(&mut self, next: ConnectionState) {
        debug_assert!(next >= self.state, "{:?} -> {:?}", self.state, next);
        tracing::trace!(connection_id = %self.id, from = ?self.state, to = ?next, "State change");
        self.state = next;
    }

    fn read_request(&mut self, ctx: &Context<'_>) -> Result<Progress, RelayError> {
        let fill = self
            .buffer
            .fill_from(&mut self.client, http::request::is_complete)
            .map_err(|e| fill_error(e, Side::Client, &self.buffer))?;

        match fill {
            Fill::Drained => return Ok(Progress::Continue),
            Fill::Eof => {
                return Err(RelayError::PeerClosed {
                    side: Side::Client,
                    direction: Direction::Request,
                });
            }
            Fill::Stopped => {}
        }

        let request = match http::parse(self.buffer.as_slice()).map_err(RelayError::Parse)? {
            ParseStatus::Complete(request) => request,
            ParseStatus::Incomplete => return Ok(Progress::Continue),
        };

        tracing::info!(
            connection_id = %self.id,
            peer_addr = %self.peer_addr,
            origin = %request.authority(),
            path = %request.path,
            "Proxying request"
        );

        let forward = request.forward_bytes(&ctx.settings.user_agent);
        self.buffer
            .load(Direction::Request, &forward)
            .map_err(|e| fill_error(e, Side::Client, &self.buffer))?;

        // The client stays idle until the response is ready.
        ctx.registry
            .deregister(&mut self.client)
            .map_err(RelayError::client_io)?;
        self.client_registered = false;

        self.upstream = Some(Upstream::resolve(&request)?);
        self.request = Some(request);
        self.connect_next(ctx)
    }

    fn connect_next(&mut self, ctx: &Context<'_>) -> Result<Progress, RelayError> {
        self.drop_origin(ctx.registry);

        let upstream = match self.upstream.as_mut() {
            Some(upstream) => upstream,
            None => return Ok(Progress::Done),
        };
        let (addr, mut origin) = upstream.connect_next()?;

        ctx.registry
            .register(&mut origin, self.id.token(Side::Origin), Interest::WRITABLE)
            .map_err(RelayError::origin_io)?;
        self.origin = Some(origin);
        self.origin_registered = true;

        tracing::debug!(connection_id = %self.id, address = %addr, "Connecting to origin");
        self.transition(ConnectionState::Connecting);
        Ok(Progress::Continue)
    }

    fn candidate_failed(
        &mut self,
        error: std::io::Error,
        ctx: &Context<'_>,
    ) -> Result<Progress, RelayError> {
        if let Some(upstream) = self.upstream.as_mut() {
            tracing::debug!(
                connection_id = %self.id,
                origin = upstream.origin(),
                remaining = upstream.remaining(),
                error = %error,
                "Origin candidate failed"
            );
            upstream.record_failure(error);
        }
        self.connect_next(ctx)
    }

    fn finish_connect(&mut self, ctx: &Context<'_>) -> Result<Progress, RelayError> {
        let progress = match self.origin.as_ref() {
            Some(origin) => poll_connect(origin),
            None => return Ok(Progress::Done),
        };

        match progress {
            Ok(ConnectProgress::InProgress) => Ok(Progress::Continue),
            Ok(ConnectProgress::Connected) => {
                self.transition(ConnectionState::SendingRequest);
                // The writable edge that completed the connect is consumed here.
                self.send_request(ctx)
            }
            Err(error) => self.candidate_failed(error, ctx),
        }
    }

    fn send_request(&mut self, ctx: &Context<'_>) -> Result<Progress, RelayError> {
        let origin = match self.origin.as_mut() {
            Some(origin) => origin,
            None => return Ok(Progress::Done),
        };

        match self.buffer.flush_into(origin).map_err(RelayError::origin_io)? {
            Flush::Pending => Ok(Progress::Continue),
            Flush::Done => {
                self.buffer.reset(Direction::Response);
                ctx.registry
                    .reregister(origin, self.id.token(Side::Origin), Interest::READABLE)
                    .map_err(RelayError::origin_io)?;
                self.transition(ConnectionState::AwaitResponse);
                self.read_response(ctx)
            }
        }
    }

    fn read_response(&mut self, ctx: &Context<'_>) -> Result<Progress, RelayError> {
        let origin = match self.origin.as_mut() {
            Some(origin) => origin,
            None => return Ok(Progress::Done),
        };

        let fill = self
            .buffer
            .fill_from(origin, |_| false)
            .map_err(|e| fill_error(e, Side::Origin, &self.buffer))?;

        match fill {
            Fill::Drained | Fill::Stopped => Ok(Progress::Continue),
            Fill::Eof => {
                tracing::debug!(
                    connection_id = %self.id,
                    bytes = self.buffer.len(),
                    "Origin response complete"
                );
                self.drop_origin(ctx.registry);
                ctx.registry
                    .register(&mut self.client, self.id.token(Side::Client), Interest::WRITABLE)
                    .map_err(RelayError::client_io)?;
                self.client_registered = true;
                self.transition(ConnectionState::SendingResponse);
                self.send_response()
            }
        }
    }

    fn send_response(&mut self) -> Result<Progress, RelayError> {
        match self.buffer.flush_into(&mut self.client).map_err(RelayError::client_io)? {
            Flush::Pending => Ok(Progress::Continue),
            Flush::Done => {
                let bytes = self.buffer.len();
                tracing::info!(
                    connection_id = %self.id,
                    peer_addr = %self.peer_addr,
                    bytes,
                    elapsed_ms = self.started.elapsed().as_millis() as u64,
                    "Relay complete"
                );
                metrics::record_bytes(bytes);
                metrics::record_outcome("success", self.started);
                Ok(Progress::Done)
            }
        }
    }

    fn drop_origin(&mut self, registry: &Registry) {
        if let Some(mut origin) = self.origin.take() {
            if self.origin_registered {
                let _ = registry.deregister(&mut origin);
            }
        }
        self.origin_registered = false;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

fn fill_error(error: FillError, side: Side, buffer: &RelayBuffer) -> RelayError {
    match error {
        FillError::Full => RelayError::Capacity {
            direction: buffer.direction(),
            capacity: buffer.capacity(),
        },
        FillError::Io(source) => RelayError::Io { side, source },
    }
}
