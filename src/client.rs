//! Blocking WebSocket client.
//!
//! A [`Client`] owns one [`Connection`] to a `ws://` or `wss://` URI. The
//! connection is opened lazily by the first send or receive, and reopened
//! the same way after it closes.
//!
//! ```rust,no_run
//! use wsync::{Client, Config};
//!
//! # fn main() -> wsync::Result<()> {
//! let mut client = Client::new("ws://localhost:8000/echo", Config::client())?;
//! client.text("Hello")?;
//! if let Some(reply) = client.receive()? {
//!     println!("{}", reply.as_text().unwrap_or_default());
//! }
//! client.close(1000, "ttfn")?;
//! # Ok(())
//! # }
//! ```

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use url::Url;

use crate::config::Config;
use crate::connection::{Connection, Role};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::protocol::{HandshakeRequest, HandshakeResult, OpCode, generate_key, negotiate_client};
use crate::transport::{StreamTransport, Transport};

type BoxedTransport = Box<dyn Transport + Send>;

/// WebSocket client for a single URI.
pub struct Client {
    uri: Url,
    config: Config,
    connection: Option<Connection<BoxedTransport>>,
    parked: Option<BoxedTransport>,
    handshake: Option<HandshakeResult>,
    #[cfg(feature = "tls-rustls")]
    tls: crate::tls::TlsConnector,
}

impl Client {
    /// Create a client for `uri`. No I/O happens until the first use.
    ///
    /// # Errors
    ///
    /// Returns `Error::BadUri` if `uri` does not parse, has a scheme other
    /// than `ws`/`wss`, or has no host. `wss` needs the `tls-rustls` feature.
    pub fn new(uri: &str, config: Config) -> Result<Self> {
        let parsed = Url::parse(uri).map_err(|_| Error::BadUri(format!("Invalid url '{uri}' provided.")))?;

        match parsed.scheme() {
            "ws" => {}
            "wss" if cfg!(feature = "tls-rustls") => {}
            "wss" => {
                return Err(Error::BadUri(format!(
                    "Url '{uri}' needs TLS; enable the tls-rustls feature."
                )));
            }
            scheme => {
                return Err(Error::BadUri(format!(
                    "Url should have scheme ws or wss, not '{scheme}' from URI '{uri}'."
                )));
            }
        }
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(Error::BadUri(format!("Invalid url '{uri}' provided.")));
        }

        Ok(Self {
            uri: parsed,
            config,
            connection: None,
            parked: None,
            handshake: None,
            #[cfg(feature = "tls-rustls")]
            tls: crate::tls::TlsConnector::default(),
        })
    }

    /// Use a custom TLS configuration for `wss://` connections.
    #[cfg(feature = "tls-rustls")]
    #[must_use]
    pub fn with_tls(mut self, connector: crate::tls::TlsConnector) -> Self {
        self.tls = connector;
        self
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open the connection and run the opening handshake.
    ///
    /// Does nothing if already connected. A transport parked by a persistent
    /// [`disconnect`](Self::disconnect) is resumed without a new handshake.
    ///
    /// # Errors
    ///
    /// Socket, TLS and handshake failures.
    pub fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.connection = None;

        if let Some(transport) = self.parked.take() {
            if transport.is_connected() {
                log::debug!("Resuming persistent connection to {}", self.uri);
                self.connection = Some(Connection::new(transport, Role::Client, &self.config));
                return Ok(());
            }
        }

        let mut transport = self.open_transport()?;
        transport.set_timeout(self.config.timeout)?;

        let key = generate_key();
        let request = HandshakeRequest::for_uri(&self.uri, &key, &self.config)?;
        let handshake = negotiate_client(&mut *transport, request, &self.config.limits)
            .inspect_err(|err| log::error!("Connection to '{}' failed: {err}", self.uri))?;

        self.handshake = Some(handshake);
        self.connection = Some(Connection::new(transport, Role::Client, &self.config));
        log::info!("Client connected to {}", self.uri);
        Ok(())
    }

    fn open_transport(&self) -> Result<BoxedTransport> {
        let host = self
            .uri
            .host_str()
            .ok_or_else(|| Error::BadUri(format!("Invalid url '{}' provided.", self.uri)))?;
        let port = self
            .uri
            .port_or_known_default()
            .ok_or_else(|| Error::BadUri(format!("No port for url '{}'.", self.uri)))?;

        let stream = connect_tcp(host, port, self.config.timeout)?;
        stream.set_read_timeout(self.config.timeout.filter(|t| !t.is_zero()))?;

        if self.uri.scheme() == "wss" {
            #[cfg(feature = "tls-rustls")]
            return Ok(Box::new(self.tls.connect(host, stream)?));
        }
        Ok(Box::new(StreamTransport::new(stream)))
    }

    fn connection(&mut self) -> Result<&mut Connection<BoxedTransport>> {
        self.connect()?;
        self.connection.as_mut().ok_or(Error::NotConnected)
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// Connection and transport errors.
    pub fn text(&mut self, payload: &str) -> Result<()> {
        self.send(payload, OpCode::Text)
    }

    /// Send a binary message.
    ///
    /// # Errors
    ///
    /// Connection and transport errors.
    pub fn binary(&mut self, payload: &[u8]) -> Result<()> {
        self.send(payload, OpCode::Binary)
    }

    /// Send a ping.
    ///
    /// # Errors
    ///
    /// Connection and transport errors.
    pub fn ping(&mut self, payload: &[u8]) -> Result<()> {
        self.send(payload, OpCode::Ping)
    }

    /// Send an unsolicited pong.
    ///
    /// # Errors
    ///
    /// Connection and transport errors.
    pub fn pong(&mut self, payload: &[u8]) -> Result<()> {
        self.send(payload, OpCode::Pong)
    }

    /// Send a message with any opcode except continuation.
    ///
    /// # Errors
    ///
    /// `Error::BadOpcode` before any I/O for a continuation opcode, otherwise
    /// connection and transport errors.
    pub fn send(&mut self, payload: impl AsRef<[u8]>, opcode: OpCode) -> Result<()> {
        if opcode == OpCode::Continuation {
            return Err(Error::bad_opcode(opcode));
        }
        self.connection()?.send(payload, opcode)
    }

    /// Send a prepared message.
    ///
    /// # Errors
    ///
    /// Connection and transport errors.
    pub fn push_message(&mut self, message: &Message) -> Result<()> {
        self.connection()?.push_message(message)
    }

    /// Receive the next message that passes the filter.
    ///
    /// # Errors
    ///
    /// Connection, transport and protocol errors.
    pub fn receive(&mut self) -> Result<Option<Message>> {
        self.connection()?.receive()
    }

    /// Run the close handshake. Returns `None` if not connected.
    ///
    /// # Errors
    ///
    /// Transport and protocol errors.
    pub fn close(&mut self, status: u16, reason: &str) -> Result<Option<Message>> {
        match self.connection.as_mut() {
            Some(connection) => connection.close(status, reason),
            None => Ok(None),
        }
    }

    /// Drop the connection without a close handshake.
    ///
    /// With [`Config::persistent`] set, an open transport is kept for the
    /// next [`connect`](Self::connect) instead of being closed.
    pub fn disconnect(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        if self.config.persistent && connection.is_connected() {
            log::debug!("Parking persistent connection to {}", self.uri);
            self.parked = Some(connection.into_transport());
        } else {
            connection.disconnect();
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_connected)
    }

    /// Both halves of the last opening handshake.
    pub fn handshake(&self) -> Option<&HandshakeResult> {
        self.handshake.as_ref()
    }

    pub fn name(&self) -> Option<String> {
        self.connection.as_ref().and_then(Connection::name)
    }

    pub fn remote_name(&self) -> Option<String> {
        self.connection.as_ref().and_then(Connection::remote_name)
    }

    pub fn last_opcode(&self) -> Option<OpCode> {
        self.connection.as_ref().and_then(Connection::last_opcode)
    }

    pub fn close_status(&self) -> Option<u16> {
        self.connection.as_ref().and_then(Connection::close_status)
    }

    pub fn fragment_size(&self) -> usize {
        self.config.fragment_size
    }

    /// Change the fragment size, for this and later connections.
    pub fn set_fragment_size(&mut self, size: usize) {
        self.config.fragment_size = size.max(1);
        if let Some(connection) = self.connection.as_mut() {
            connection.set_fragment_size(size);
        }
    }

    /// Change the read/write timeout, for this and later connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the open transport rejects the timeout.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.config.timeout = timeout;
        match self.connection.as_mut() {
            Some(connection) => connection.set_timeout(timeout),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("uri", &self.uri.as_str())
            .field("connected", &self.is_connected())
            .field("parked", &self.parked.is_some())
            .finish_non_exhaustive()
    }
}

/// Connect to the first reachable address for `host:port`.
fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> Result<TcpStream> {
    let timeout = timeout.filter(|t| !t.is_zero());
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::Io(format!("Could not resolve \"{host}:{port}\": {e}")))?;

    let mut last_error = None;
    for addr in addrs {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_error = Some(err),
        }
    }

    let reason = last_error.map_or_else(|| "no addresses".to_string(), |e| e.to_string());
    let error = format!("Could not open socket to \"{host}:{port}\": {reason}");
    log::error!("{error}");
    Err(Error::Io(error))
}
