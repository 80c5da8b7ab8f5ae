//! Per-connection failure taxonomy.
//!
//! Every variant is local to one connection: it is logged, counted and the
//! connection is torn down. Nothing here reaches the reactor.

use std::io;

use thiserror::Error;

use crate::http::{ErrorResponse, Malformed};
use crate::net::buffer::Direction;
use crate::net::connection::Side;

/// Why a relay was aborted.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("malformed request: {0}")]
    Parse(Malformed),

    #[error("could not resolve {host}: {source}")]
    Resolution {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("no route to origin {origin}")]
    Connect {
        origin: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("i/o error on {side} socket: {source}")]
    Io {
        side: Side,
        #[source]
        source: io::Error,
    },

    #[error("{direction} exceeds buffer capacity of {capacity} bytes")]
    Capacity {
        direction: Direction,
        capacity: usize,
    },

    #[error("{side} closed the connection before the {direction} was complete")]
    PeerClosed { side: Side, direction: Direction },

    #[error("no activity for {0} seconds")]
    Timeout(u64),
}

impl RelayError {
    pub fn client_io(source: io::Error) -> Self {
        RelayError::Io {
            side: Side::Client,
            source,
        }
    }

    pub fn origin_io(source: io::Error) -> Self {
        RelayError::Io {
            side: Side::Origin,
            source,
        }
    }

    /// Short label used as the `outcome` metric dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Parse(_) => "parse_error",
            RelayError::Resolution { .. } => "resolution_error",
            RelayError::Connect { .. } => "connect_error",
            RelayError::Io { .. } => "io_error",
            RelayError::Capacity { .. } => "capacity_error",
            RelayError::PeerClosed { .. } => "peer_closed",
            RelayError::Timeout(_) => "timeout",
        }
    }

    /// Status line owed to the client for this failure, if any.
    ///
    /// Client-side failures get nothing: the client is gone or misbehaving
    /// at the transport level.
    pub fn error_response(&self) -> Option<ErrorResponse> {
        match self {
            RelayError::Parse(_) => Some(ErrorResponse::BadRequest),
            RelayError::Capacity {
                direction: Direction::Request,
                ..
            } => Some(ErrorResponse::BadRequest),
            RelayError::Capacity {
                direction: Direction::Response,
                ..
            } => Some(ErrorResponse::BadGateway),
            RelayError::Resolution { .. } | RelayError::Connect { .. } => {
                Some(ErrorResponse::BadGateway)
            }
            RelayError::Io {
                side: Side::Origin,
                ..
            }
            | RelayError::PeerClosed {
                side: Side::Origin,
                ..
            } => Some(ErrorResponse::BadGateway),
            RelayError::Io {
                side: Side::Client,
                ..
            }
            | RelayError::PeerClosed {
                side: Side::Client,
                ..
            } => None,
            RelayError::Timeout(_) => Some(ErrorResponse::GatewayTimeout),
        }
    }
}
