//! Listening socket and accept handling.
//!
//! # Responsibilities
//! - Bind the listening socket (non-blocking, ready to poll)
//! - Accept every pending client on each readable event
//! - Enforce max_connections by closing clients beyond the cap
//!
//! # Design Decisions
//! - Accept runs until WouldBlock: one edge may stand for many clients
//! - Accept errors end the current pass only; the listener stays armed
//! - A client that cannot be registered with the poller is fatal

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;

use mio::net::TcpListener;
use mio::Registry;
use thiserror::Error;

use crate::net::connection::{Connection, ConnectionId};
use crate::observability::metrics;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// Failed to register an accepted client with the poller.
    #[error("Failed to register client: {0}")]
    Register(#[source] io::Error),
}

/// Bind a non-blocking listening socket.
pub fn bind(addr: SocketAddr) -> Result<TcpListener, ListenerError> {
    let listener =
        TcpListener::bind(addr).map_err(|source| ListenerError::Bind { addr, source })?;

    if let Ok(local_addr) = listener.local_addr() {
        tracing::info!(address = %local_addr, "Listener bound");
    }

    Ok(listener)
}

/// Accept policy applied to each new client.
#[derive(Debug, Clone, Copy)]
pub struct AcceptLimits {
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Buffer capacity for each new connection.
    pub buffer_capacity: usize,
}

/// Accept all pending clients, registering each in state `AwaitRequest`.
///
/// Returns the number of connections added.
pub fn accept_all(
    listener: &TcpListener,
    registry: &Registry,
    connections: &mut HashMap<ConnectionId, Connection>,
    limits: AcceptLimits,
) -> Result<usize, ListenerError> {
    let mut added = 0;

    loop {
        let (stream, peer_addr) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                break;
            }
        };

        if connections.len() >= limits.max_connections {
            tracing::warn!(
                peer_addr = %peer_addr,
                max_connections = limits.max_connections,
                "Connection limit reached, closing client"
            );
            metrics::record_rejected();
            drop(stream);
            continue;
        }

        let mut connection = Connection::new(stream, peer_addr, limits.buffer_capacity);
        connection.start(registry).map_err(ListenerError::Register)?;

        tracing::debug!(
            connection_id = %connection.id(),
            peer_addr = %peer_addr,
            "Connection accepted"
        );
        metrics::record_accepted();

        connections.insert(connection.id(), connection);
        added += 1;
    }

    Ok(added)
}
