//! WebSocket handshake implementation (RFC 6455).
//!
//! This module handles the HTTP Upgrade mechanism for establishing WebSocket
//! connections: building and parsing the client request and server response,
//! and running either side of the exchange over a [`Transport`].

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};
use url::Url;

use crate::config::{Config, Limits};
use crate::error::{Error, Result};
use crate::protocol::mask::fill_random;
use crate::transport::Transport;

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `User-Agent` sent by clients unless overridden.
pub const USER_AGENT: &str = concat!("wsync/", env!("CARGO_PKG_VERSION"));

/// Headers that must not appear twice in a client request.
const SECURITY_HEADERS: [&str; 5] = [
    "host",
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-version",
];

/// Parse HTTP header lines, preserving order and the original name casing.
///
/// Parsing stops at the first empty line. Lines without a colon are skipped.
///
/// # Errors
/// Returns `Error::InvalidHandshake` if a header named in `security_headers`
/// appears more than once.
fn parse_headers<'a, I>(lines: I, security_headers: &[&str]) -> Result<Vec<(String, String)>>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers: Vec<(String, String)> = Vec::new();

    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let lower = name.to_ascii_lowercase();

            if security_headers.contains(&lower.as_str())
                && headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
            {
                return Err(Error::InvalidHandshake(format!(
                    "Duplicate header: {name}"
                )));
            }

            headers.push((name.to_string(), value.trim().to_string()));
        }
    }

    Ok(headers)
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Validate that a header value does not contain CR or LF characters.
///
/// # Errors
/// Returns `Error::InvalidHeaderValue` if the value contains `\r` or `\n`.
fn validate_header_value(header_name: &str, value: &str) -> Result<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(Error::InvalidHeaderValue {
            header: header_name.to_string(),
            reason: "contains CR or LF characters".to_string(),
        });
    }
    Ok(())
}

fn write_headers(buf: &mut Vec<u8>, headers: &[(String, String)]) -> Result<()> {
    for (name, value) in headers {
        validate_header_value(name, name)?;
        validate_header_value(name, value)?;
        buf.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    buf.extend_from_slice(b"\r\n");
    Ok(())
}

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wsync::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    BASE64.encode(hash)
}

/// A fresh `Sec-WebSocket-Key`: 16 random bytes, base64 encoded.
#[must_use]
pub fn generate_key() -> String {
    let mut nonce = [0u8; 16];
    fill_random(&mut nonce);
    BASE64.encode(nonce)
}

/// Validate the Origin header against a list of allowed origins.
///
/// # Arguments
/// * `origin` - The Origin header value from the request (may be None)
/// * `allowed` - List of allowed origin values
///
/// # Errors
/// Returns `Error::OriginNotAllowed` if:
/// - `allowed` is not empty and `origin` doesn't match any value
/// - `allowed` is not empty and `origin` is None
///
/// If `allowed` is empty, any origin (or no origin) is accepted.
pub fn validate_origin(origin: Option<&str>, allowed: &[String]) -> Result<()> {
    if allowed.is_empty() {
        return Ok(());
    }

    match origin {
        Some(o) if allowed.iter().any(|a| a == o) => Ok(()),
        Some(o) => Err(Error::OriginNotAllowed {
            origin: o.to_string(),
        }),
        None => Err(Error::OriginNotAllowed {
            origin: "(none)".to_string(),
        }),
    }
}

/// Read an HTTP head up to and including the blank line that ends it.
///
/// # Errors
///
/// Returns `Error::HandshakeTooLarge` once more than `max` bytes have been
/// read without finding the end of the head, plus any transport error.
pub fn read_http_head<T: Transport + ?Sized>(io: &mut T, max: usize) -> Result<Vec<u8>> {
    let mut head = Vec::new();
    loop {
        let room = max.saturating_sub(head.len());
        if room == 0 {
            return Err(Error::HandshakeTooLarge {
                size: head.len(),
                max,
            });
        }

        let line = match io.read_line(room) {
            Ok(line) => line,
            Err(Error::HandshakeTooLarge { size, .. }) => {
                return Err(Error::HandshakeTooLarge {
                    size: head.len() + size,
                    max,
                });
            }
            Err(e) => return Err(e),
        };

        let blank = line == b"\r\n" || line == b"\n";
        head.extend_from_slice(&line);
        if blank {
            return Ok(head);
        }
    }
}

/// WebSocket upgrade request, as sent by a client or parsed by a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Request target: path plus optional query (e.g. "/chat?room=1").
    pub target: String,
    /// Headers in wire order.
    pub headers: Vec<(String, String)>,
}

impl HandshakeRequest {
    /// Build the request a client sends to `uri`.
    ///
    /// Default headers come first in a fixed order, then basic auth from the
    /// URI user info and the configured origin. Configured headers replace a
    /// default of the same name (case-insensitively) or are appended.
    ///
    /// # Errors
    ///
    /// Returns `Error::BadUri` if `uri` has no host.
    pub fn for_uri(uri: &Url, key: &str, config: &Config) -> Result<Self> {
        let host = uri
            .host_str()
            .ok_or_else(|| Error::BadUri(format!("Invalid url '{uri}' provided.")))?;
        let port = uri
            .port_or_known_default()
            .ok_or_else(|| Error::BadUri(format!("No port for url '{uri}'.")))?;

        let mut target = uri.path().to_string();
        if target.is_empty() {
            target.push('/');
        }
        if let Some(query) = uri.query().filter(|q| !q.is_empty()) {
            target.push('?');
            target.push_str(query);
        }

        let mut headers: Vec<(String, String)> = vec![
            ("Host".into(), format!("{host}:{port}")),
            ("User-Agent".into(), USER_AGENT.into()),
            ("Connection".into(), "Upgrade".into()),
            ("Upgrade".into(), "websocket".into()),
            ("Sec-WebSocket-Key".into(), key.into()),
            ("Sec-WebSocket-Version".into(), "13".into()),
        ];

        let user = uri.username();
        let pass = uri.password().unwrap_or("");
        if !user.is_empty() || !pass.is_empty() {
            let credentials = BASE64.encode(format!("{user}:{pass}"));
            headers.push(("Authorization".into(), format!("Basic {credentials}")));
        }

        if let Some(origin) = &config.origin {
            headers.push(("Origin".into(), origin.clone()));
        }

        let mut request = Self { target, headers };
        for (name, value) in &config.headers {
            request.set_header(name, value);
        }
        Ok(request)
    }

    /// Replace a header case-insensitively, or append it.
    pub fn set_header(&mut self, name: &str, value: &str) {
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some(slot) => *slot = (name.to_string(), value.to_string()),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    /// Look up a header case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// The Sec-WebSocket-Key value.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.header("Sec-WebSocket-Key")
    }

    /// Target without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }

    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }

    /// The request as text lines: request line first, then headers.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        std::iter::once(format!("GET {} HTTP/1.1", self.target))
            .chain(self.headers.iter().map(|(n, v)| format!("{n}: {v}")))
            .collect()
    }

    /// Write the HTTP request to a buffer.
    ///
    /// # Errors
    /// Returns `Error::InvalidHeaderValue` if the target or any header
    /// contains CR/LF.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        validate_header_value("request target", &self.target)?;
        buf.extend_from_slice(format!("GET {} HTTP/1.1\r\n", self.target).as_bytes());
        write_headers(buf, &self.headers)
    }

    /// Parse a WebSocket handshake request from raw HTTP data.
    ///
    /// Only the request line shape and duplicate security headers are
    /// checked here; see [`HandshakeRequest::validate`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - The data is not valid UTF-8.
    /// - The request line is not `GET <target> HTTP/1.x`.
    /// - A security-critical header is duplicated.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;

        let mut lines = text.lines();

        let request_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty request".into()))?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 || parts[0] != "GET" || !parts[2].starts_with("HTTP/1.") {
            return Err(Error::InvalidHandshake(format!(
                "No GET in request: {request_line}"
            )));
        }

        let headers = parse_headers(lines, &SECURITY_HEADERS)?;

        Ok(Self {
            target: parts[1].to_string(),
            headers,
        })
    }

    /// Validate the handshake request according to RFC 6455.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - The `Sec-WebSocket-Key` is missing.
    /// - The `Sec-WebSocket-Key` is not valid Base64 of exactly 16 bytes.
    /// - A `Sec-WebSocket-Version` is present and is not 13.
    pub fn validate(&self) -> Result<()> {
        let key = self.key().ok_or_else(|| {
            Error::InvalidHandshake("Client had no Key in upgrade request".into())
        })?;

        match BASE64.decode(key) {
            Ok(decoded) if decoded.len() == 16 => {}
            Ok(decoded) => {
                return Err(Error::InvalidHandshake(format!(
                    "Sec-WebSocket-Key must be 16 bytes, got {}",
                    decoded.len()
                )));
            }
            Err(_) => {
                return Err(Error::InvalidHandshake(
                    "Invalid Sec-WebSocket-Key: not valid Base64".into(),
                ));
            }
        }

        if let Some(version) = self.header("Sec-WebSocket-Version") {
            if version != "13" {
                return Err(Error::InvalidHandshake(format!(
                    "Unsupported WebSocket version: {version} (expected 13)"
                )));
            }
        }

        Ok(())
    }
}

/// WebSocket handshake response from server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Status line without the line terminator.
    pub status_line: String,
    /// Headers in wire order.
    pub headers: Vec<(String, String)>,
    /// The Sec-WebSocket-Accept value.
    pub accept: String,
}

impl HandshakeResponse {
    /// Create the 101 response for a validated request.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHandshake` if the request carries no key.
    pub fn for_request(req: &HandshakeRequest) -> Result<Self> {
        let key = req
            .key()
            .ok_or_else(|| Error::InvalidHandshake("Client had no Key in upgrade request".into()))?;
        let accept = compute_accept_key(key);

        Ok(Self {
            status_line: "HTTP/1.1 101 Switching Protocols".into(),
            headers: vec![
                ("Upgrade".into(), "websocket".into()),
                ("Connection".into(), "Upgrade".into()),
                ("Sec-WebSocket-Accept".into(), accept.clone()),
            ],
            accept,
        })
    }

    /// Look up a header case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Write the HTTP response to a buffer.
    ///
    /// # Errors
    /// Returns `Error::InvalidHeaderValue` if any header contains CR/LF.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(self.status_line.as_bytes());
        buf.extend_from_slice(b"\r\n");
        write_headers(buf, &self.headers)
    }

    /// Parse a WebSocket handshake response from raw HTTP data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - The data is not valid UTF-8.
    /// - The response is empty or the status line is missing.
    /// - The status code is not `101 Switching Protocols`.
    /// - Any required headers are missing: `Upgrade`, `Connection`, `Sec-WebSocket-Accept`.
    /// - The `Upgrade` header is not `websocket`.
    /// - The `Connection` header does not contain `upgrade`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;

        let mut lines = text.lines();

        // Parse status line: "HTTP/1.1 101 Switching Protocols"
        let status_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty response".into()))?;

        if !status_line.starts_with("HTTP/1.1 101") {
            return Err(Error::InvalidHandshake(format!(
                "Expected 101 status, got: {status_line}"
            )));
        }

        let headers = parse_headers(lines, &[])?;

        let upgrade = find_header(&headers, "upgrade")
            .ok_or_else(|| Error::InvalidHandshake("Missing Upgrade header in response".into()))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Upgrade header: {upgrade}"
            )));
        }

        let connection = find_header(&headers, "connection").ok_or_else(|| {
            Error::InvalidHandshake("Missing Connection header in response".into())
        })?;
        if !connection.to_ascii_lowercase().contains("upgrade") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Connection header: {connection}"
            )));
        }

        let accept = find_header(&headers, "sec-websocket-accept")
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Accept header".into()))?
            .to_string();

        Ok(Self {
            status_line: status_line.to_string(),
            headers,
            accept,
        })
    }

    /// Check the accept value against the key the client sent.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHandshake` on mismatch.
    pub fn verify(&self, key: &str) -> Result<()> {
        if self.accept != compute_accept_key(key) {
            return Err(Error::InvalidHandshake(
                "Server sent bad upgrade response".into(),
            ));
        }
        Ok(())
    }
}

/// Both halves of a completed opening handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    pub request: HandshakeRequest,
    pub response: HandshakeResponse,
}

/// Run the client side: send `request`, read and verify the response.
///
/// # Errors
///
/// Transport failures, `HandshakeTooLarge`, and `InvalidHandshake` for a
/// malformed response or a bad accept key.
pub fn negotiate_client<T: Transport + ?Sized>(
    io: &mut T,
    request: HandshakeRequest,
    limits: &Limits,
) -> Result<HandshakeResult> {
    let key = request
        .key()
        .ok_or_else(|| Error::InvalidHandshake("Request has no Sec-WebSocket-Key".into()))?
        .to_string();

    let mut buf = Vec::new();
    request.write(&mut buf)?;
    io.write(&buf)?;

    let head = read_http_head(io, limits.max_handshake_size)?;
    let response = HandshakeResponse::parse(&head)?;
    response.verify(&key)?;

    log::debug!("Handshake completed on {}", request.target);
    Ok(HandshakeResult { request, response })
}

/// Run the server side: read and validate a request, answer with 101.
///
/// # Errors
///
/// Transport failures, `HandshakeTooLarge`, `InvalidHandshake` for a
/// malformed request, and `OriginNotAllowed` when an allow-list is set.
pub fn negotiate_server<T: Transport + ?Sized>(
    io: &mut T,
    config: &Config,
) -> Result<HandshakeResult> {
    let head = read_http_head(io, config.limits.max_handshake_size)?;
    let request = HandshakeRequest::parse(&head)?;
    request.validate()?;

    if let Some(allowed) = &config.allowed_origins {
        validate_origin(request.header("Origin"), allowed)?;
    }

    let response = HandshakeResponse::for_request(&request)?;
    let mut buf = Vec::new();
    response.write(&mut buf)?;
    io.write(&buf)?;

    log::debug!("Handshake on {}", request.target);
    Ok(HandshakeResult { request, response })
}
