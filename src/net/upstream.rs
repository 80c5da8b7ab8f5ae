//! Origin connection establishment.
//!
//! # Responsibilities
//! - Resolve the requested host/port into candidate addresses
//! - Start non-blocking connects, one candidate at a time, in resolution order
//! - Decide when an in-progress connect has completed or failed
//!
//! # Design Decisions
//! - Resolution uses the system resolver synchronously; it runs inside the
//!   read-request step, as the relay has no resolver of its own
//! - The first candidate whose connect completes wins
//! - A candidate that fails is dropped and the next one started, so only one
//!   origin socket exists per connection at any time

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use mio::net::TcpStream;

use crate::http::ProxyRequest;
use crate::net::error::RelayError;

/// Result of polling an in-flight connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectProgress {
    Connected,
    InProgress,
}

/// Remaining candidate addresses for one origin.
#[derive(Debug)]
pub struct Upstream {
    origin: String,
    candidates: VecDeque<SocketAddr>,
    last_error: Option<io::Error>,
}

impl Upstream {
    /// Resolve the origin named by `request`.
    pub fn resolve(request: &ProxyRequest) -> Result<Self, RelayError> {
        let origin = request.authority();
        let candidates: VecDeque<SocketAddr> = (request.host.as_str(), request.port)
            .to_socket_addrs()
            .map_err(|source| RelayError::Resolution {
                host: request.host.clone(),
                source,
            })?
            .collect();

        if candidates.is_empty() {
            return Err(RelayError::Resolution {
                host: request.host.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses"),
            });
        }

        tracing::trace!(origin = %origin, candidates = candidates.len(), "Origin resolved");

        Ok(Self::from_candidates(origin, candidates))
    }

    /// Build from addresses that are already known, tried in iteration order.
    pub fn from_candidates(
        origin: impl Into<String>,
        candidates: impl IntoIterator<Item = SocketAddr>,
    ) -> Self {
        Self {
            origin: origin.into(),
            candidates: candidates.into_iter().collect(),
            last_error: None,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn remaining(&self) -> usize {
        self.candidates.len()
    }

    /// Start a connect to the next candidate that accepts one.
    ///
    /// The returned stream may still be connecting; register it for writable
    /// readiness and call [`poll_connect`] when it fires.
    pub fn connect_next(&mut self) -> Result<(SocketAddr, TcpStream), RelayError> {
        while let Some(addr) = self.candidates.pop_front() {
            match TcpStream::connect(addr) {
                Ok(stream) => return Ok((addr, stream)),
                Err(e) => {
                    tracing::debug!(
                        origin = %self.origin,
                        address = %addr,
                        error = %e,
                        "Connect attempt failed"
                    );
                    self.last_error = Some(e);
                }
            }
        }

        Err(RelayError::Connect {
            origin: self.origin.clone(),
            source: self.last_error.take(),
        })
    }

    /// Record why the current candidate failed before moving on.
    pub fn record_failure(&mut self, error: io::Error) {
        self.last_error = Some(error);
    }
}

/// Check whether a non-blocking connect has finished.
///
/// Must be called after the stream reported writable (or an error).
pub fn poll_connect(stream: &TcpStream) -> io::Result<ConnectProgress> {
    if let Some(err) = stream.take_error()? {
        return Err(err);
    }

    match stream.peer_addr() {
        Ok(_) => Ok(ConnectProgress::Connected),
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(ConnectProgress::InProgress),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ConnectProgress::InProgress),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(host: &str, port: u16) -> ProxyRequest {
        ProxyRequest {
            method: "GET".into(),
            host: host.into(),
            port,
            path: String::new(),
        }
    }

    #[test]
    fn resolves_literal_addresses() {
        let upstream = Upstream::resolve(&request("127.0.0.1", 8080)).unwrap();
        assert_eq!(upstream.origin(), "127.0.0.1:8080");
        assert_eq!(upstream.remaining(), 1);

        let upstream = Upstream::resolve(&request("::1", 80)).unwrap();
        assert_eq!(upstream.origin(), "[::1]:80");
    }

    #[test]
    fn unresolvable_host_is_resolution_error() {
        let err = Upstream::resolve(&request("relay-test.invalid", 80)).unwrap_err();
        assert!(matches!(err, RelayError::Resolution { .. }));
        assert_eq!(err.kind(), "resolution_error");
    }

    #[test]
    fn exhausted_candidates_are_connect_error() {
        let mut upstream = Upstream::from_candidates("127.0.0.1:9", Vec::new());
        upstream.record_failure(io::ErrorKind::ConnectionRefused.into());

        match upstream.connect_next() {
            Err(RelayError::Connect { origin, source }) => {
                assert_eq!(origin, "127.0.0.1:9");
                assert_eq!(source.unwrap().kind(), io::ErrorKind::ConnectionRefused);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn connect_to_listening_origin_completes() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut upstream = Upstream::resolve(&request("127.0.0.1", port)).unwrap();
        let (addr, stream) = upstream.connect_next().unwrap();
        assert_eq!(addr.port(), port);

        let _accepted = listener.accept().unwrap();
        let mut progress = poll_connect(&stream).unwrap();
        for _ in 0..100 {
            if progress == ConnectProgress::Connected {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
            progress = poll_connect(&stream).unwrap();
        }
        assert_eq!(progress, ConnectProgress::Connected);
    }

    #[test]
    fn candidates_are_tried_in_order() {
        let first = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let second = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addrs = [first.local_addr().unwrap(), second.local_addr().unwrap()];

        let mut upstream = Upstream::from_candidates("origin.test:80", addrs);
        assert_eq!(upstream.origin(), "origin.test:80");
        assert_eq!(upstream.remaining(), 2);

        let (addr, _stream) = upstream.connect_next().unwrap();
        assert_eq!(addr, addrs[0]);
        assert_eq!(upstream.remaining(), 1);

        upstream.record_failure(io::ErrorKind::ConnectionRefused.into());
        let (addr, _stream) = upstream.connect_next().unwrap();
        assert_eq!(addr, addrs[1]);
        assert_eq!(upstream.remaining(), 0);
    }
}
