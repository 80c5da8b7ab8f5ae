//! Status lines written to the client when a relay fails.
//!
//! # Responsibilities
//! - Map relay failures to `400` / `502` / `504`
//! - Render a minimal HTTP/1.0 response with no body framing beyond EOF
//!
//! # Design Decisions
//! - Only sent while nothing from the origin has reached the client yet
//! - Best effort: a single non-blocking write, failures ignored by callers

/// Failure responses the relay can emit on its own behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorResponse {
    BadRequest,
    BadGateway,
    GatewayTimeout,
}

impl ErrorResponse {
    pub fn status(self) -> u16 {
        match self {
            ErrorResponse::BadRequest => 400,
            ErrorResponse::BadGateway => 502,
            ErrorResponse::GatewayTimeout => 504,
        }
    }

    fn reason(self) -> &'static str {
        match self {
            ErrorResponse::BadRequest => "Bad Request",
            ErrorResponse::BadGateway => "Bad Gateway",
            ErrorResponse::GatewayTimeout => "Gateway Timeout",
        }
    }

    /// Wire bytes for this response.
    pub fn to_bytes(self) -> Vec<u8> {
        format!(
            "HTTP/1.0 {} {}\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
            self.status(),
            self.reason()
        )
        .into_bytes()
    }
}
