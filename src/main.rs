//! Forwarding HTTP relay.
//!
//! Accepts `GET http://host[:port]/path` requests, fetches each from its
//! origin with a rewritten non-persistent request and relays the response
//! bytes back verbatim, all on one event-loop thread.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::listener ──▶ net::connection ──▶ http::request (parse + rewrite)
//!                     ▲                  │
//!                     │                  ▼
//!                  reactor ◀──── net::upstream ──▶ Origin server
//!              (mio, one thread)
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;

use relay::config::{load_config, RelayConfig};
use relay::net;
use relay::observability::{logging, metrics};
use relay::Reactor;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Single-threaded forwarding HTTP relay", long_about = None)]
struct Cli {
    /// Port to listen on.
    port: u16,

    /// Optional TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind instead of the configured one.
    #[arg(short, long)]
    bind: Option<IpAddr>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RelayConfig::default(),
    };

    logging::init(&config.observability.log_level);
    tracing::info!("relay v{} starting", env!("CARGO_PKG_VERSION"));

    let configured: SocketAddr = config.listener.bind_address.parse()?;
    let bind_addr = SocketAddr::new(cli.bind.unwrap_or(configured.ip()), cli.port);
    config.listener.bind_address = bind_addr.to_string();

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        buffer_capacity = config.relay.buffer_capacity,
        idle_timeout_secs = config.timeouts.idle_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = net::bind(bind_addr)?;
    let mut reactor = Reactor::new(listener, &config)?;
    reactor.run()?;

    tracing::info!("Shutdown complete");
    Ok(())
}
