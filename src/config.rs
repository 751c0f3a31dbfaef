//! Configuration and limits for WebSocket connections.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::protocol::OpCode;

/// Configuration limits for WebSocket connections.
///
/// These limits prevent resource exhaustion attacks and ensure
/// bounded memory usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of a single frame in bytes.
    ///
    /// The declared length of an incoming frame is checked against this
    /// value before any receive buffer is allocated.
    ///
    /// Default: 16 MB (16 * 1024 * 1024)
    pub max_frame_size: usize,

    /// Maximum size of a complete message in bytes.
    ///
    /// This applies to the total size after reassembling all fragments.
    ///
    /// Default: 64 MB (64 * 1024 * 1024)
    pub max_message_size: usize,

    /// Maximum number of fragments in a single message.
    ///
    /// Default: 1024
    pub max_fragment_count: usize,

    /// Maximum size of handshake data in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,   // 16 MB
            max_message_size: 64 * 1024 * 1024, // 64 MB
            max_fragment_count: 1024,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_fragment_count: usize,
        max_handshake_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_fragment_count,
            max_handshake_size,
        }
    }

    /// Create limits suitable for small embedded systems.
    ///
    /// - Max frame: 64 KB
    /// - Max message: 256 KB
    /// - Max fragments: 16
    /// - Max handshake: 4 KB
    #[must_use]
    pub const fn embedded() -> Self {
        Self {
            max_frame_size: 64 * 1024,
            max_message_size: 256 * 1024,
            max_fragment_count: 16,
            max_handshake_size: 4096,
        }
    }

    /// Validate that message size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`](crate::Error::MessageTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_message_size {
            Err(crate::Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate a declared frame length taken from the wire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`](crate::Error::FrameTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: u64) -> Result<(), crate::Error> {
        if size > self.max_frame_size as u64 {
            Err(crate::Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that fragment count is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyFragments`](crate::Error::TooManyFragments) if `count` exceeds the configured maximum.
    pub const fn check_fragment_count(&self, count: usize) -> Result<(), crate::Error> {
        if count > self.max_fragment_count {
            Err(crate::Error::TooManyFragments {
                count,
                max: self.max_fragment_count,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that handshake size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`](crate::Error::HandshakeTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_handshake_size {
            Err(crate::Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// WebSocket client, server and connection configuration.
///
/// Built once and handed to [`Client`](crate::Client),
/// [`Server`](crate::Server) or [`Connection`](crate::Connection); none of
/// them mutate it afterwards except through their explicit setters.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Fragment size for outgoing messages (in bytes).
    ///
    /// Messages larger than this will be split into multiple frames.
    ///
    /// Default: 4096
    pub fragment_size: usize,

    /// Timeout for connect, accept, reads and writes.
    ///
    /// `None` blocks indefinitely.
    /// Default: 5 seconds for clients, `None` for servers
    pub timeout: Option<Duration>,

    /// Opcodes delivered by `receive`.
    ///
    /// Close messages are always delivered regardless of this filter.
    /// Default: text and binary
    pub filter: Vec<OpCode>,

    /// Mask frames when sending.
    ///
    /// `None` follows the connection role: clients mask, servers do not.
    /// Default: None
    pub mask_frames: Option<bool>,

    /// Extra request headers (client only).
    ///
    /// A header with the same name as a default header replaces it.
    /// Default: empty
    pub headers: Vec<(String, String)>,

    /// `Origin` header to send (client only).
    ///
    /// Default: None
    pub origin: Option<String>,

    /// Keep the upgraded transport across `disconnect`/`connect` cycles
    /// (client only).
    ///
    /// Default: false
    pub persistent: bool,

    /// First port the server tries to bind.
    ///
    /// Default: 8000
    pub port: u16,

    /// Last port the server tries before giving up.
    ///
    /// Default: 10000
    pub max_port: u16,

    /// Address the server binds to.
    ///
    /// Default: 0.0.0.0
    pub bind_address: IpAddr,

    /// Upper bound on one readiness wait in the server listen loop.
    ///
    /// Default: 50 ms
    pub poll_interval: Duration,

    /// Deadline for a peer's upgrade request in the server listen loop.
    ///
    /// Peers that have not completed the handshake in time are dropped.
    /// Default: 5 seconds
    pub handshake_timeout: Duration,

    /// Allowed origins for CSWSH protection (server only).
    ///
    /// If `Some`, only connections from these origins are allowed.
    /// If `None`, origin validation is disabled.
    /// Default: None
    pub allowed_origins: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            fragment_size: 4096,
            timeout: None,
            filter: vec![OpCode::Text, OpCode::Binary],
            mask_frames: None,
            headers: Vec::new(),
            origin: None,
            persistent: false,
            port: 8000,
            max_port: 10000,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            poll_interval: Duration::from_millis(50),
            handshake_timeout: Duration::from_secs(5),
            allowed_origins: None,
        }
    }
}

impl Config {
    /// Create a new configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults for the client role (5 second timeout).
    #[must_use]
    pub fn client() -> Self {
        Self {
            timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        }
    }

    /// Defaults for the server role (no timeout).
    #[must_use]
    pub fn server() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set fragment size for outgoing messages.
    #[must_use]
    pub const fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size;
        self
    }

    /// Set the I/O timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the opcodes `receive` delivers.
    #[must_use]
    pub fn with_filter(mut self, filter: impl IntoIterator<Item = OpCode>) -> Self {
        self.filter = filter.into_iter().collect();
        self
    }

    /// Force masking on or off regardless of role.
    #[must_use]
    pub const fn with_mask_frames(mut self, mask: bool) -> Self {
        self.mask_frames = Some(mask);
        self
    }

    /// Add or override a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the `Origin` header sent by clients.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Enable transport reuse across reconnects.
    #[must_use]
    pub const fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Set the first port the server tries to bind.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the last port the server tries before giving up.
    #[must_use]
    pub const fn with_max_port(mut self, port: u16) -> Self {
        self.max_port = port;
        self
    }

    /// Set the server bind address.
    #[must_use]
    pub const fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    /// Set the listen loop's readiness wait bound.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the listen loop's handshake deadline.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set allowed origins for CSWSH protection.
    ///
    /// Only connections with an Origin header matching one of these values
    /// will be accepted. Pass an empty vector to accept any value.
    #[must_use]
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = Some(origins);
        self
    }

    /// Returns `true` if `receive` should deliver messages with `opcode`.
    #[must_use]
    pub fn accepts(&self, opcode: OpCode) -> bool {
        opcode == OpCode::Close || self.filter.contains(&opcode)
    }
}
