//! Proxy request parsing and rewriting.
//!
//! # Responsibilities
//! - Detect when the client's header block is complete (trailing CRLFCRLF)
//! - Extract method, host, port and path from an absolute-form request line
//! - Build the fixed, non-persistent request forwarded to the origin
//!
//! # Design Decisions
//! - Parsing is a pure function over the accumulated bytes, re-run after each
//!   read, so fragmentation boundaries never matter
//! - Only `GET http://…` is accepted; everything else is malformed
//! - Headers sent by the client are not forwarded

use std::fmt;

use url::{Host, Url};

/// Port assumed when the request target omits one.
pub const DEFAULT_HTTP_PORT: u16 = 80;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Outcome of parsing the bytes received so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseStatus {
    /// The header block has not been terminated yet.
    Incomplete,
    /// A full request arrived.
    Complete(ProxyRequest),
}

/// Why a complete request could not be relayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Malformed {
    /// Request line is not valid UTF-8 or is missing a target.
    RequestLine,
    /// Method other than GET.
    Method(String),
    /// Target is not an `http://host[:port]/path` URL.
    Target(String),
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Malformed::RequestLine => write!(f, "unreadable request line"),
            Malformed::Method(m) => write!(f, "unsupported method {m:?}"),
            Malformed::Target(t) => write!(f, "unsupported request target {t:?}"),
        }
    }
}

/// A parsed proxy request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    pub method: String,
    pub host: String,
    pub port: u16,
    /// Path after the authority, without the leading slash. Query is kept.
    pub path: String,
}

impl ProxyRequest {
    /// `host:port` for logging.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Build the request sent to the origin.
    ///
    /// The origin is always asked to close the connection, so the response
    /// ends at EOF and needs no framing.
    pub fn forward_bytes(&self, user_agent: &str) -> Vec<u8> {
        format!(
            "{} /{}\r\nUser-Agent: {}\r\nConnection: close\r\nProxy-Connection: close\r\n\r\n",
            self.method, self.path, user_agent
        )
        .into_bytes()
    }
}

/// True once the accumulated bytes end with an empty line.
pub fn is_complete(buf: &[u8]) -> bool {
    buf.ends_with(HEADER_TERMINATOR)
}

/// Parse the bytes received from a client so far.
pub fn parse(buf: &[u8]) -> Result<ParseStatus, Malformed> {
    if !is_complete(buf) {
        return Ok(ParseStatus::Incomplete);
    }

    let line_end = buf
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(buf.len());
    let line = std::str::from_utf8(&buf[..line_end]).map_err(|_| Malformed::RequestLine)?;

    let mut parts = line.split_ascii_whitespace();
    let method = parts.next().ok_or(Malformed::RequestLine)?;
    let target = parts.next().ok_or(Malformed::RequestLine)?;

    if method != "GET" {
        return Err(Malformed::Method(method.to_string()));
    }

    let (host, port, path) = parse_target(target)?;

    Ok(ParseStatus::Complete(ProxyRequest {
        method: method.to_string(),
        host,
        port,
        path,
    }))
}

fn parse_target(target: &str) -> Result<(String, u16, String), Malformed> {
    let malformed = || Malformed::Target(target.to_string());

    let url = Url::parse(target).map_err(|_| malformed())?;
    if url.scheme() != "http" || url.cannot_be_a_base() {
        return Err(malformed());
    }

    let host = match url.host().ok_or_else(malformed)? {
        Host::Domain(domain) => domain.to_string(),
        Host::Ipv4(addr) => addr.to_string(),
        Host::Ipv6(addr) => addr.to_string(),
    };
    let port = url.port().unwrap_or(DEFAULT_HTTP_PORT);

    // Keep the client's own spelling of the path; the URL crate would
    // normalize dot segments and percent-encoding.
    let after_scheme = &target[target.find("://").ok_or_else(malformed)? + 3..];
    let path = match after_scheme.find('/') {
        Some(slash) => after_scheme[slash + 1..].to_string(),
        None => String::new(),
    };

    Ok((host, port, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(raw: &str) -> ProxyRequest {
        match parse(raw.as_bytes()).unwrap() {
            ParseStatus::Complete(req) => req,
            ParseStatus::Incomplete => panic!("expected complete request"),
        }
    }

    #[test]
    fn default_port() {
        let req = complete("GET http://example.com/index.html HTTP/1.0\r\n\r\n");
        assert_eq!(req.host, "example.com");
        assert_eq!(req.port, 80);
        assert_eq!(req.path, "index.html");
    }

    #[test]
    fn explicit_port() {
        let req = complete("GET http://example.com:8080/a/b HTTP/1.0\r\n\r\n");
        assert_eq!(req.host, "example.com");
        assert_eq!(req.port, 8080);
        assert_eq!(req.path, "a/b");
    }

    #[test]
    fn request_without_version_or_path() {
        let req = complete("GET http://example.com\r\n\r\n");
        assert_eq!(req.path, "");
        assert_eq!(req.port, 80);
    }

    #[test]
    fn query_and_headers_are_tolerated() {
        let req = complete(
            "GET http://127.0.0.1:9000/search?q=rust HTTP/1.1\r\nHost: 127.0.0.1\r\nAccept: */*\r\n\r\n",
        );
        assert_eq!(req.host, "127.0.0.1");
        assert_eq!(req.port, 9000);
        assert_eq!(req.path, "search?q=rust");
    }

    #[test]
    fn ipv6_host_is_unbracketed() {
        let req = complete("GET http://[::1]:8081/x HTTP/1.0\r\n\r\n");
        assert_eq!(req.host, "::1");
        assert_eq!(req.authority(), "[::1]:8081");
    }

    #[test]
    fn incomplete_until_blank_line() {
        assert_eq!(parse(b"").unwrap(), ParseStatus::Incomplete);
        assert_eq!(
            parse(b"GET http://example.com/ HTTP/1.0\r\n").unwrap(),
            ParseStatus::Incomplete
        );
        assert_eq!(
            parse(b"GET http://example.com/ HTTP/1.0\r\nHost: x\r\n\r").unwrap(),
            ParseStatus::Incomplete
        );
    }

    #[test]
    fn completion_is_independent_of_fragmentation() {
        let raw = b"GET http://example.com:8080/a/b HTTP/1.0\r\nAccept: */*\r\n\r\n";
        for chunk in 1..=raw.len() {
            let mut acc = Vec::new();
            let mut seen_complete = None;
            for (i, piece) in raw.chunks(chunk).enumerate() {
                acc.extend_from_slice(piece);
                if is_complete(&acc) && seen_complete.is_none() {
                    seen_complete = Some(i);
                }
            }
            let last = (raw.len() + chunk - 1) / chunk - 1;
            assert_eq!(seen_complete, Some(last), "chunk size {chunk}");
        }
    }

    #[test]
    fn rejects_other_methods() {
        let err = parse(b"POST http://example.com/ HTTP/1.0\r\n\r\n").unwrap_err();
        assert_eq!(err, Malformed::Method("POST".into()));
    }

    #[test]
    fn rejects_non_http_targets() {
        for raw in [
            "GET https://example.com/ HTTP/1.0\r\n\r\n",
            "GET /relative HTTP/1.0\r\n\r\n",
            "GET http://example.com:99999/ HTTP/1.0\r\n\r\n",
            "GET http://:8080/nohost HTTP/1.0\r\n\r\n",
        ] {
            assert!(
                matches!(parse(raw.as_bytes()), Err(Malformed::Target(_))),
                "{raw:?}"
            );
        }
    }

    #[test]
    fn rejects_empty_request_line() {
        assert_eq!(parse(b"\r\n\r\n").unwrap_err(), Malformed::RequestLine);
    }

    #[test]
    fn forwarded_request_is_fixed() {
        let req = complete("GET http://example.com/index.html HTTP/1.0\r\nCookie: a=b\r\n\r\n");
        let bytes = req.forward_bytes("test-agent");
        assert_eq!(
            bytes,
            b"GET /index.html\r\nUser-Agent: test-agent\r\nConnection: close\r\nProxy-Connection: close\r\n\r\n"
        );
    }
}
