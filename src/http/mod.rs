//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! bytes read from the client
//!     → request.rs (completion test, request line parse)
//!     → ProxyRequest (host, port, path)
//!     → request.rs (rewrite into the fixed forwarding request)
//!     → [net layer relays the origin response verbatim]
//!     → response.rs (only on failure: 400 / 502 / 504 status line)
//! ```

pub mod request;
pub mod response;

pub use request::{parse, Malformed, ParseStatus, ProxyRequest, DEFAULT_HTTP_PORT};
pub use response::ErrorResponse;
