//! Error types for the WebSocket protocol implementation.
//!
//! Every fallible operation in the crate returns [`Error`]. The variants fall
//! into four classes: bad opcodes, bad URIs, timeouts, and connection or
//! transport failures (which include failed handshakes). Protocol violations
//! detected while decoding are reported with their own variants and, like
//! transport failures, leave the connection disconnected.

use std::fmt;

use thiserror::Error;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Diagnostic snapshot of a transport at the time an error was raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamMeta {
    /// The last read or write hit the configured timeout.
    pub timed_out: bool,
    /// The peer closed its end of the stream.
    pub eof: bool,
    /// Local socket name, if known.
    pub local: Option<String>,
    /// Remote socket name, if known.
    pub remote: Option<String>,
}

impl fmt::Display for StreamMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{timed_out: {}, eof: {}, local: {}, remote: {}}}",
            self.timed_out,
            self.eof,
            self.local.as_deref().unwrap_or("-"),
            self.remote.as_deref().unwrap_or("-"),
        )
    }
}

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Unsupported opcode requested by the caller.
    #[error("Bad opcode: {0}")]
    BadOpcode(String),

    /// Unrecognized opcode value found on the wire.
    #[error("Bad opcode in websocket frame: {0}")]
    UnknownOpcode(u8),

    /// Malformed or non-ws/wss URI.
    #[error("Invalid URI: {0}")]
    BadUri(String),

    /// A read or write did not complete before the configured timeout.
    #[error("Connection timed out; stream state: {meta}")]
    Timeout {
        /// Stream state when the timeout was detected.
        meta: StreamMeta,
    },

    /// The peer closed the stream before any of the expected bytes arrived.
    #[error("Empty read; connection dead? Stream state: {meta}")]
    ConnectionClosed {
        /// Stream state when the empty read was detected.
        meta: StreamMeta,
    },

    /// The stream ended in the middle of a read.
    #[error("Broken frame, read {read} of stated {expected} bytes. Stream state: {meta}")]
    BrokenFrame {
        /// Bytes received before the stream ended.
        read: usize,
        /// Bytes the caller asked for.
        expected: usize,
        /// Stream state when the short read was detected.
        meta: StreamMeta,
    },

    /// The transport accepted fewer bytes than were handed to it.
    #[error("Could only write {written} out of {expected} bytes")]
    PartialWrite {
        /// Bytes actually written.
        written: usize,
        /// Bytes that should have been written.
        expected: usize,
    },

    /// The operation needs an open connection.
    #[error("Not connected")]
    NotConnected,

    /// Invalid WebSocket handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Handshake head exceeds configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes read so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Origin rejected by the server's allow-list.
    #[error("Origin not allowed: {origin}")]
    OriginNotAllowed {
        /// The offending origin value.
        origin: String,
    },

    /// Header value that would break the HTTP framing.
    #[error("Invalid value for header {header}: {reason}")]
    InvalidHeaderValue {
        /// Header name.
        header: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Reserved bits set in a frame header.
    #[error("Reserved bits should be zero")]
    ReservedBitsSet,

    /// Control frame arrived with FIN=0.
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared frame size.
        size: u64,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Too many fragments in a single message.
    #[error("Too many fragments: {count} (max: {max})")]
    TooManyFragments {
        /// Actual fragment count.
        count: usize,
        /// Maximum allowed fragments.
        max: usize,
    },

    /// Incomplete frame data in an in-memory buffer.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// TLS setup or session failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// A [`Error::BadOpcode`] for an opcode name that cannot be sent.
    #[must_use]
    pub fn bad_opcode(name: impl fmt::Display) -> Self {
        Error::BadOpcode(format!("'{name}'. Try 'text' or 'binary'."))
    }

    /// Returns `true` for both flavours of bad opcode.
    #[must_use]
    pub fn is_bad_opcode(&self) -> bool {
        matches!(self, Error::BadOpcode(_) | Error::UnknownOpcode(_))
    }

    /// Returns `true` if a read or write timed out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Returns `true` for transport and handshake failures.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::ConnectionClosed { .. }
                | Error::BrokenFrame { .. }
                | Error::PartialWrite { .. }
                | Error::NotConnected
                | Error::InvalidHandshake(_)
                | Error::HandshakeTooLarge { .. }
                | Error::OriginNotAllowed { .. }
                | Error::Tls(_)
                | Error::Io(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => Error::Timeout {
                meta: StreamMeta {
                    timed_out: true,
                    ..StreamMeta::default()
                },
            },
            ErrorKind::UnexpectedEof => Error::ConnectionClosed {
                meta: StreamMeta {
                    eof: true,
                    ..StreamMeta::default()
                },
            },
            _ => Error::Io(err.to_string()),
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::BadUri(err.to_string())
    }
}
