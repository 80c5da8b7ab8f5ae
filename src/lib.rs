//! Single-reactor forwarding HTTP relay library.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod reactor;

pub use config::RelayConfig;
pub use lifecycle::Shutdown;
pub use reactor::{Reactor, ReactorError};
