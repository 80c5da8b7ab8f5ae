//! Single-threaded readiness reactor.
//!
//! # Data Flow
//! ```text
//! Poll::poll (edge-triggered, blocks until ready or next idle deadline)
//!     → LISTENER token → net::listener::accept_all
//!     → WAKER token    → shutdown check
//!     → connection token (id, side)
//!         → error condition?  Connection::on_error
//!         → otherwise         Connection::on_ready
//!         → Progress::Done    remove from table (sockets dropped)
//!     → idle.rs expiry sweep
//! ```
//!
//! # Design Decisions
//! - The reactor routes events; connection progress lives in net::connection
//! - Tokens encode (connection id, side); ids are never reused, so events
//!   for a connection that already closed are ignored
//! - Poller creation and listener/waker registration failures are fatal;
//!   everything per-connection stays per-connection

pub mod idle;

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use mio::event::Event;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use thiserror::Error;

use crate::config::{RelayConfig, RelaySettings};
use crate::lifecycle::Shutdown;
use crate::net::connection::{Connection, ConnectionId, Context, Progress, Readiness};
use crate::net::listener::{self, AcceptLimits, ListenerError};
use crate::observability::metrics;

use self::idle::IdlePolicy;

/// Token of the listening socket.
pub const LISTENER: Token = Token(0);
/// Token of the shutdown waker.
pub const WAKER: Token = Token(1);

/// Errors that stop the reactor.
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("failed to create poller: {0}")]
    Poller(#[source] io::Error),

    #[error("failed to register listener: {0}")]
    RegisterListener(#[source] io::Error),

    #[error("failed to create waker: {0}")]
    Waker(#[source] io::Error),

    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// The event loop: one poller, one listener, every live connection.
pub struct Reactor {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    connections: HashMap<ConnectionId, Connection>,
    settings: RelaySettings,
    limits: AcceptLimits,
    idle: IdlePolicy,
    shutdown: Shutdown,
}

impl Reactor {
    /// Register an already-bound listener and prepare the loop.
    pub fn new(mut listener: TcpListener, config: &RelayConfig) -> Result<Self, ReactorError> {
        let poll = Poll::new().map_err(ReactorError::Poller)?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(ReactorError::RegisterListener)?;
        let waker = Waker::new(poll.registry(), WAKER).map_err(ReactorError::Waker)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(config.relay.max_events),
            listener,
            connections: HashMap::new(),
            settings: config.relay.clone(),
            limits: AcceptLimits {
                max_connections: config.listener.max_connections,
                buffer_capacity: config.relay.buffer_capacity,
            },
            idle: IdlePolicy::from_secs(config.timeouts.idle_secs),
            shutdown: Shutdown::new(Arc::new(waker)),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle that stops `run` from another thread.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run until shutdown is triggered or a fatal error occurs.
    pub fn run(&mut self) -> Result<(), ReactorError> {
        if let Ok(addr) = self.local_addr() {
            tracing::info!(
                address = %addr,
                buffer_capacity = self.settings.buffer_capacity,
                idle_timeout_secs = self.idle.timeout().map(|t| t.as_secs()),
                "Reactor running"
            );
        }

        loop {
            if self.shutdown.is_triggered() {
                tracing::info!(
                    open_connections = self.connection_count(),
                    "Shutdown requested"
                );
                self.close_all();
                tracing::info!("Reactor stopped");
                return Ok(());
            }

            let timeout = self.idle.poll_timeout(
                self.connections.values().map(Connection::last_activity),
                Instant::now(),
            );

            if let Err(e) = self.poll.poll(&mut self.events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ReactorError::Poll(e));
            }

            self.dispatch()?;
            self.expire_idle();
            metrics::set_active_connections(self.connections.len());
        }
    }

    fn dispatch(&mut self) -> Result<(), ReactorError> {
        let Self {
            poll,
            events,
            listener,
            connections,
            settings,
            limits,
            ..
        } = self;
        let ctx = Context {
            registry: poll.registry(),
            settings,
        };

        for event in events.iter() {
            match event.token() {
                LISTENER => {
                    listener::accept_all(listener, ctx.registry, connections, *limits)?;
                }
                WAKER => {}
                token => dispatch_connection(event, token, connections, &ctx),
            }
        }

        Ok(())
    }

    fn expire_idle(&mut self) {
        if self.idle.timeout().is_none() {
            return;
        }

        let now = Instant::now();
        let expired: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, conn)| self.idle.is_expired(conn.last_activity(), now))
            .map(|(id, _)| *id)
            .collect();

        if expired.is_empty() {
            return;
        }

        let ctx = Context {
            registry: self.poll.registry(),
            settings: &self.settings,
        };
        for id in expired {
            if let Some(mut conn) = self.connections.remove(&id) {
                if let Some(idle) = self.idle.timeout() {
                    conn.expire(idle, &ctx);
                }
            }
        }
    }

    fn close_all(&mut self) {
        let registry = self.poll.registry();
        for (_, mut conn) in self.connections.drain() {
            conn.close(registry);
        }
        metrics::set_active_connections(0);
    }
}

fn dispatch_connection(
    event: &Event,
    token: Token,
    connections: &mut HashMap<ConnectionId, Connection>,
    ctx: &Context<'_>,
) {
    let Some((id, side)) = ConnectionId::from_token(token) else {
        return;
    };
    let Some(conn) = connections.get_mut(&id) else {
        tracing::trace!(connection_id = %id, side = side.as_str(), "Event for closed connection");
        return;
    };

    let progress = if event.is_error() {
        conn.on_error(side, ctx)
    } else {
        let ready = Readiness {
            readable: event.is_readable() || event.is_read_closed(),
            writable: event.is_writable() || event.is_write_closed(),
        };
        conn.on_ready(side, ready, ctx)
    };

    if progress == Progress::Done {
        connections.remove(&id);
    }
}
