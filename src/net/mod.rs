//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection cap)
//!     → connection.rs (state machine, one per client)
//!         → buffer.rs (bounded request/response bytes)
//!         → upstream.rs (resolve + non-blocking connect to origin)
//!     → Closed (both sockets dropped)
//!
//! Connection States:
//!     AwaitRequest → Connecting → SendingRequest → AwaitResponse → SendingResponse → Closed
//! ```
//!
//! # Design Decisions
//! - Every socket is non-blocking and owned by exactly one Connection
//! - Failures are local to a connection (error.rs) and end in teardown
//! - The listener is the only socket that outlives a connection

pub mod buffer;
pub mod connection;
pub mod error;
pub mod listener;
pub mod upstream;

pub use connection::{Connection, ConnectionId, ConnectionState, Side};
pub use error::RelayError;
pub use listener::{bind, ListenerError};
