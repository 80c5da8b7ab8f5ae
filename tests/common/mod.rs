//! Shared utilities for relay integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use relay::config::RelayConfig;
use relay::net;
use relay::{Reactor, ReactorError, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// A reactor running on its own thread.
pub struct RelayHandle {
    pub addr: SocketAddr,
    shutdown: Shutdown,
    thread: Option<JoinHandle<Result<(), ReactorError>>>,
}

impl RelayHandle {
    /// Stop the reactor and wait for `run` to return.
    pub fn stop(mut self) -> Result<(), ReactorError> {
        self.shutdown.trigger();
        self.thread
            .take()
            .expect("reactor thread already joined")
            .join()
            .expect("reactor thread panicked")
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.shutdown.trigger();
            let _ = thread.join();
        }
    }
}

/// Start a relay on an ephemeral loopback port.
pub fn spawn_relay(config: RelayConfig) -> RelayHandle {
    let listener = net::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let mut reactor = Reactor::new(listener, &config).unwrap();
    let addr = reactor.local_addr().unwrap();
    let shutdown = reactor.shutdown_handle();

    let thread = std::thread::spawn(move || reactor.run());

    RelayHandle {
        addr,
        shutdown,
        thread: Some(thread),
    }
}

/// An origin that records every request head and answers with fixed bytes.
pub struct MockOrigin {
    pub addr: SocketAddr,
    pub requests: mpsc::UnboundedReceiver<Vec<u8>>,
    pub accepted: Arc<AtomicUsize>,
}

impl MockOrigin {
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// Start an origin that reads one request head per connection, replies with
/// `response` and closes.
pub async fn start_mock_origin(response: Vec<u8>) -> MockOrigin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    let response = Arc::new(response);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let tx = tx.clone();
                    let response = response.clone();
                    tokio::spawn(async move {
                        let head = read_head(&mut socket).await;
                        let _ = tx.send(head);
                        let _ = socket.write_all(&response).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockOrigin {
        addr,
        requests: rx,
        accepted,
    }
}

/// An origin that reads each request and never answers.
pub struct SilentOrigin {
    pub addr: SocketAddr,
    /// One message per origin connection the relay closed.
    pub closed: mpsc::UnboundedReceiver<()>,
}

pub async fn start_silent_origin() -> SilentOrigin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                read_head(&mut socket).await;
                let mut rest = [0u8; 256];
                while let Ok(n) = socket.read(&mut rest).await {
                    if n == 0 {
                        break;
                    }
                }
                let _ = tx.send(());
            });
        }
    });

    SilentOrigin { addr, closed: rx }
}

/// An origin that resets each connection as soon as request bytes arrive.
///
/// Closing a socket with unread data makes the kernel send RST instead of FIN.
pub async fn start_resetting_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = socket.readable().await;
                drop(socket);
            });
        }
    });

    addr
}

/// A canned HTTP/1.1 response with a body.
pub fn http_response(body: &[u8]) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}

/// Read until an empty line (or EOF).
pub async fn read_head(socket: &mut TcpStream) -> Vec<u8> {
    let mut head = Vec::new();
    let mut chunk = [0u8; 1024];
    while !head.ends_with(b"\r\n\r\n") {
        match tokio::time::timeout(IO_TIMEOUT, socket.read(&mut chunk)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => head.extend_from_slice(&chunk[..n]),
        }
    }
    head
}

/// Send `request` through the relay and collect everything until EOF.
///
/// A connection reset ends the read like EOF does.
pub async fn exchange(relay: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(relay).await.unwrap();
    stream.write_all(request).await.unwrap();
    read_to_eof(&mut stream).await
}

pub async fn read_to_eof(stream: &mut TcpStream) -> Vec<u8> {
    let mut response = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match tokio::time::timeout(IO_TIMEOUT, stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Ok(Err(_)) => break,
            Ok(Ok(n)) => response.extend_from_slice(&chunk[..n]),
            Err(_) => panic!("relay did not close the connection within {IO_TIMEOUT:?}"),
        }
    }
    response
}

/// A loopback port with nothing listening on it.
pub fn refused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// The exact request the relay forwards for `path`.
pub fn forwarded(path: &str) -> Vec<u8> {
    format!(
        "GET /{}\r\nUser-Agent: {}\r\nConnection: close\r\nProxy-Connection: close\r\n\r\n",
        path,
        relay::config::schema::DEFAULT_USER_AGENT
    )
    .into_bytes()
}
