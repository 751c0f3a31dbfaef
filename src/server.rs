//! Blocking WebSocket server.
//!
//! A [`Server`] binds a TCP listener and either serves one peer at a time
//! through [`accept`](Server::accept) and the opcode wrappers, or many peers
//! at once through the single-threaded [`listen`](Server::listen) loop.
//!
//! ```rust,no_run
//! use wsync::{Config, Server};
//!
//! # fn main() -> wsync::Result<()> {
//! let mut server = Server::bind(Config::server().with_port(8000))?;
//! server.listen(|_, conn, msg| conn.send(msg.content(), msg.opcode()))?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use polling::{Event, Poller};

use crate::config::Config;
use crate::connection::{Connection, Role};
use crate::error::{Error, Result, StreamMeta};
use crate::message::Message;
use crate::protocol::{HandshakeResult, OpCode, negotiate_server};
use crate::transport::{TcpTransport, Transport};

const LISTENER_KEY: usize = 0;

/// Cooperative stop flag for [`Server::listen`].
///
/// The loop checks the flag once per iteration, so a stop takes effect
/// within one poll interval. A stopped handle stays stopped.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// WebSocket server bound to one TCP port.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Config,
    connection: Option<Connection<TcpTransport>>,
    handshake: Option<HandshakeResult>,
    stop: StopHandle,
}

impl Server {
    /// Bind to `config.bind_address`, starting at `config.port`.
    ///
    /// A port that is taken is skipped for the next one, up to
    /// `config.max_port`. Port 0 lets the OS choose.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if no port in the range could be bound.
    pub fn bind(config: Config) -> Result<Self> {
        let mut port = config.port;
        let listener = loop {
            match TcpListener::bind((config.bind_address, port)) {
                Ok(listener) => break listener,
                Err(err) if port != 0 && port < config.max_port => {
                    log::debug!("Port {port} unavailable: {err}");
                    port += 1;
                }
                Err(err) => {
                    let error = format!("Could not open listening socket: {err}");
                    log::error!("{error}");
                    return Err(Error::Io(error));
                }
            }
        };

        let local_addr = listener.local_addr()?;
        log::info!("Server listening to port {}", local_addr.port());

        Ok(Self {
            listener,
            local_addr,
            config,
            connection: None,
            handshake: None,
            stop: StopHandle::default(),
        })
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle that stops a running [`listen`](Self::listen) loop.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Wait for a peer and run the opening handshake.
    ///
    /// Replaces the current connection, if any. Waits at most
    /// `config.timeout` for a peer to connect.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` when no peer arrives in time, otherwise socket and
    /// handshake failures.
    pub fn accept(&mut self) -> Result<()> {
        self.disconnect();
        self.handshake = None;

        if let Some(timeout) = self.config.timeout.filter(|t| !t.is_zero()) {
            self.wait_for_peer(timeout)?;
        }

        let (stream, peer) = self.listener.accept()?;
        log::info!("Client {peer} has connected to port {}", self.port());

        let (connection, handshake) = upgrade(stream, &self.config, self.config.timeout)?;
        self.connection = Some(connection);
        self.handshake = Some(handshake);
        Ok(())
    }

    fn wait_for_peer(&self, timeout: Duration) -> Result<()> {
        let poller = Poller::new()?;
        poller.add(&self.listener, Event::readable(LISTENER_KEY))?;
        let mut events = Vec::new();
        let waited = poller.wait(&mut events, Some(timeout));
        poller.delete(&self.listener)?;

        if waited? == 0 {
            return Err(Error::Timeout {
                meta: StreamMeta {
                    timed_out: true,
                    local: Some(self.local_addr.to_string()),
                    ..StreamMeta::default()
                },
            });
        }
        Ok(())
    }

    fn connection(&mut self) -> Result<&mut Connection<TcpTransport>> {
        if !self.is_connected() {
            self.accept()?;
        }
        self.connection.as_mut().ok_or(Error::NotConnected)
    }

    /// Request path of the current peer's handshake.
    pub fn path(&self) -> Option<&str> {
        self.handshake.as_ref().map(|h| h.request.path())
    }

    /// The current peer's request line and headers.
    pub fn request(&self) -> Vec<String> {
        self.handshake
            .as_ref()
            .map(|h| h.request.lines())
            .unwrap_or_default()
    }

    /// A request header of the current peer, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.handshake.as_ref()?.request.header(name)
    }

    pub fn handshake(&self) -> Option<&HandshakeResult> {
        self.handshake.as_ref()
    }

    /// Send a text message, accepting a peer first if none is connected.
    ///
    /// # Errors
    ///
    /// Connection and transport errors.
    pub fn text(&mut self, payload: &str) -> Result<()> {
        self.send(payload, OpCode::Text)
    }

    /// # Errors
    ///
    /// Connection and transport errors.
    pub fn binary(&mut self, payload: &[u8]) -> Result<()> {
        self.send(payload, OpCode::Binary)
    }

    /// # Errors
    ///
    /// Connection and transport errors.
    pub fn ping(&mut self, payload: &[u8]) -> Result<()> {
        self.send(payload, OpCode::Ping)
    }

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

    /// # Errors
    ///
    /// Connection and transport errors.
    pub fn push_message(&mut self, message: &Message) -> Result<()> {
        self.connection()?.push_message(message)
    }

    /// Receive the next message that passes the filter, accepting a peer
    /// first if none is connected.
    ///
    /// # Errors
    ///
    /// Connection, transport and protocol errors.
    pub fn receive(&mut self) -> Result<Option<Message>> {
        self.connection()?.receive()
    }

    /// Run the close handshake with the current peer, if any.
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

    /// Drop the current peer without a close handshake.
    pub fn disconnect(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.disconnect();
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_connected)
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

    /// Change the fragment size, for this and later peers.
    pub fn set_fragment_size(&mut self, size: usize) {
        self.config.fragment_size = size.max(1);
        if let Some(connection) = self.connection.as_mut() {
            connection.set_fragment_size(size);
        }
    }

    /// Change the read/write timeout, for this and later peers.
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

    /// Serve many peers from this thread until stopped.
    ///
    /// Each iteration waits up to `config.poll_interval` for the listener or
    /// any peer to become readable. New peers are accepted at once and
    /// upgraded when their request becomes readable; peers that stay silent
    /// past `config.handshake_timeout` are dropped. Each readable peer gets one [`Connection::pull_message`] call and
    /// messages passing the filter go to `handler` with the peer's id.
    /// Peers that close, fail, or whose handler call fails are dropped.
    ///
    /// # Errors
    ///
    /// Only failures of the listener or the poller end the loop.
    pub fn listen<F>(&mut self, mut handler: F) -> Result<()>
    where
        F: FnMut(usize, &mut Connection<TcpTransport>, Message) -> Result<()>,
    {
        let poller = Poller::new()?;
        self.listener.set_nonblocking(true)?;
        poller.add(&self.listener, Event::readable(LISTENER_KEY))?;
        log::info!("Listening for peers on port {}", self.port());

        let mut peers = Peers::default();
        let result = self.serve(&poller, &mut peers, &mut handler);

        for (_, pending) in peers.pending.drain() {
            let _ = poller.delete(&pending.stream);
        }
        for (_, mut connection) in peers.connections.drain() {
            let _ = poller.delete(connection.transport().get_ref());
            connection.disconnect();
        }
        let _ = poller.delete(&self.listener);
        self.listener.set_nonblocking(false)?;

        log::info!("Stopped listening on port {}", self.port());
        result
    }

    fn serve<F>(&self, poller: &Poller, peers: &mut Peers, handler: &mut F) -> Result<()>
    where
        F: FnMut(usize, &mut Connection<TcpTransport>, Message) -> Result<()>,
    {
        let mut events = Vec::new();
        while !self.stop.is_stopped() {
            // Bytes already pulled into a read buffer never wake the poller.
            let mut ready = peers.buffered();
            let timeout = if ready.is_empty() {
                self.config.poll_interval
            } else {
                Duration::ZERO
            };

            events.clear();
            match poller.wait(&mut events, Some(timeout)) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }

            for event in &events {
                if event.key == LISTENER_KEY {
                    self.accept_peers(poller, peers)?;
                    poller.modify(&self.listener, Event::readable(LISTENER_KEY))?;
                } else if peers.pending.contains_key(&event.key) {
                    peers.upgrade(poller, event.key, &self.config)?;
                } else if !ready.contains(&event.key) {
                    ready.push(event.key);
                }
            }
            peers.expire(poller, self.config.handshake_timeout);

            for key in ready {
                peers.service(poller, key, handler)?;
            }
        }
        Ok(())
    }

    fn accept_peers(&self, poller: &Poller, peers: &mut Peers) -> Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::warn!("Accept failed: {err}");
                    return Ok(());
                }
            };
            log::info!("Client {peer} has connected to port {}", self.port());

            if let Err(err) = stream.set_nonblocking(false) {
                log::warn!("Dropping {peer}: {err}");
                continue;
            }
            // The upgrade runs once the request bytes are readable.
            let key = peers.next_key();
            poller.add(&stream, Event::readable(key))?;
            peers.pending.insert(
                key,
                PendingPeer {
                    stream,
                    peer,
                    since: Instant::now(),
                },
            );
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// A TCP peer of the listen loop that has not sent its upgrade request yet.
struct PendingPeer {
    stream: TcpStream,
    peer: SocketAddr,
    since: Instant,
}

/// Peers of a listen loop, keyed by poller key.
#[derive(Default)]
struct Peers {
    pending: HashMap<usize, PendingPeer>,
    connections: HashMap<usize, Connection<TcpTransport>>,
    last_key: usize,
}

impl Peers {
    fn next_key(&mut self) -> usize {
        self.last_key += 1;
        LISTENER_KEY + self.last_key
    }

    /// Run the handshake of a pending peer whose request has arrived.
    ///
    /// The handshake is bounded by `handshake_timeout`; a failed peer is
    /// dropped and the loop carries on.
    fn upgrade(&mut self, poller: &Poller, key: usize, config: &Config) -> Result<()> {
        let Some(pending) = self.pending.remove(&key) else {
            return Ok(());
        };
        let PendingPeer { stream, peer, .. } = pending;

        match upgrade(stream, config, Some(config.handshake_timeout)) {
            Ok((connection, handshake)) => {
                log::debug!("Peer {key} ({peer}) upgraded on {}", handshake.request.target);
                poller.modify(connection.transport().get_ref(), Event::readable(key))?;
                self.connections.insert(key, connection);
            }
            // Closing the dropped stream also removes it from the poller.
            Err(err) => log::warn!("Dropping {peer}: {err}"),
        }
        Ok(())
    }

    /// Drop pending peers that have been silent for longer than `timeout`.
    fn expire(&mut self, poller: &Poller, timeout: Duration) {
        let expired: Vec<usize> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.since.elapsed() >= timeout)
            .map(|(key, _)| *key)
            .collect();

        for key in expired {
            if let Some(pending) = self.pending.remove(&key) {
                log::warn!("Dropping {}: no upgrade request within {timeout:?}", pending.peer);
                let _ = poller.delete(&pending.stream);
            }
        }
    }

    fn buffered(&self) -> Vec<usize> {
        self.connections
            .iter()
            .filter(|(_, connection)| connection.has_buffered())
            .map(|(key, _)| *key)
            .collect()
    }

    /// Pull one message from a ready peer and hand it to `handler`.
    fn service<F>(&mut self, poller: &Poller, key: usize, handler: &mut F) -> Result<()>
    where
        F: FnMut(usize, &mut Connection<TcpTransport>, Message) -> Result<()>,
    {
        let Some(connection) = self.connections.get_mut(&key) else {
            return Ok(());
        };

        let outcome = connection.pull_message().and_then(|message| {
            if connection.accepts(message.opcode()) {
                handler(key, connection, message)
            } else {
                Ok(())
            }
        });

        match outcome {
            Ok(()) if connection.is_connected() => {
                poller.modify(connection.transport().get_ref(), Event::readable(key))?;
            }
            Ok(()) => {
                log::debug!("Peer {key} closed");
                self.remove(poller, key);
            }
            Err(err) => {
                log::warn!("Dropping peer {key}: {err}");
                self.remove(poller, key);
            }
        }
        Ok(())
    }

    fn remove(&mut self, poller: &Poller, key: usize) {
        if let Some(mut connection) = self.connections.remove(&key) {
            let _ = poller.delete(connection.transport().get_ref());
            connection.disconnect();
        }
    }
}

/// Run the server handshake on a freshly accepted stream.
///
/// The handshake runs under `handshake_timeout`; the connection then uses
/// `config.timeout`.
fn upgrade(
    stream: TcpStream,
    config: &Config,
    handshake_timeout: Option<Duration>,
) -> Result<(Connection<TcpTransport>, HandshakeResult)> {
    let mut transport = TcpTransport::new(stream);
    transport.set_timeout(handshake_timeout)?;

    let handshake = negotiate_server(&mut transport, config)
        .inspect_err(|err| log::error!("Server handshake failed: {err}"))?;
    transport.set_timeout(config.timeout)?;
    Ok((Connection::new(transport, Role::Server, config), handshake))
}
