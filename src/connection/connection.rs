use std::time::Duration;

use crate::codec::WebSocketCodec;
use crate::config::Config;
use crate::connection::fragmenter::MessageFragmenter;
use crate::connection::{ConnectionState, Role};
use crate::error::{Error, Result};
use crate::message::{CloseFrame, Message};
use crate::protocol::{ControlAction, ControlResponder, Frame, MessageAssembler, OpCode};
use crate::transport::Transport;

/// A WebSocket connection over a blocking transport.
///
/// `Connection` provides message-based communication on top of a transport
/// that has already completed the opening handshake. It handles frame
/// parsing/serialization, message fragmentation, automatic pong replies and
/// the close handshake.
///
/// ## Type Parameters
///
/// - `T`: The underlying transport (e.g. [`TcpTransport`](crate::TcpTransport))
///
/// ## Example
///
/// ```rust,ignore
/// use wsync::{Connection, Config, OpCode, Role};
///
/// let mut conn = Connection::new(transport, Role::Server, &Config::server());
///
/// while let Some(msg) = conn.receive()? {
///     conn.send(msg.content(), msg.opcode())?;
/// }
/// ```
pub struct Connection<T> {
    codec: WebSocketCodec<T>,
    state: ConnectionState,
    assembler: MessageAssembler,
    responder: ControlResponder,
    role: Role,
    mask_frames: bool,
    fragment_size: usize,
    filter: Vec<OpCode>,
    close_status: Option<u16>,
    last_opcode: Option<OpCode>,
}

impl<T> Connection<T> {
    /// Create a new WebSocket connection.
    ///
    /// This does not perform the HTTP upgrade handshake. Use this with a
    /// transport on which the handshake has already been negotiated.
    ///
    /// ## Arguments
    ///
    /// - `io`: The underlying transport
    /// - `role`: The connection role (Client or Server)
    /// - `config`: Connection configuration
    pub fn new(io: T, role: Role, config: &Config) -> Self {
        Self {
            codec: WebSocketCodec::new(io, config.limits),
            state: ConnectionState::Open,
            assembler: MessageAssembler::new(config.limits),
            responder: ControlResponder::new(),
            role,
            mask_frames: role.masks_with(config),
            fragment_size: config.fragment_size.max(1),
            filter: config.filter.clone(),
            close_status: None,
            last_opcode: None,
        }
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Get the connection role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether outgoing frames are masked unless overridden per call.
    #[must_use]
    pub fn mask_frames(&self) -> bool {
        self.mask_frames
    }

    /// Status code of the last close frame seen, sent or received.
    #[must_use]
    pub fn close_status(&self) -> Option<u16> {
        self.close_status
    }

    /// Opcode of the last non-continuation frame received.
    #[must_use]
    pub fn last_opcode(&self) -> Option<OpCode> {
        self.last_opcode
    }

    #[must_use]
    pub fn fragment_size(&self) -> usize {
        self.fragment_size
    }

    /// Change the fragment size for subsequent sends. Zero is treated as one.
    pub fn set_fragment_size(&mut self, size: usize) {
        self.fragment_size = size.max(1);
    }

    /// Returns `true` if `receive` delivers messages with this opcode.
    ///
    /// Close messages are always delivered.
    #[must_use]
    pub fn accepts(&self, opcode: OpCode) -> bool {
        opcode == OpCode::Close || self.filter.contains(&opcode)
    }

    /// Get a reference to the underlying transport.
    pub fn transport(&self) -> &T {
        self.codec.get_ref()
    }

    /// Get a mutable reference to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        self.codec.get_mut()
    }

    /// Consume the connection and return the transport, open or not.
    pub fn into_transport(self) -> T {
        self.codec.into_inner()
    }
}

impl<T: Transport> Connection<T> {
    /// Returns `true` while the close handshake has not completed and the
    /// transport is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.is_active() && self.codec.get_ref().is_connected()
    }

    /// Local address of the transport.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.codec.get_ref().local_name()
    }

    /// Peer address of the transport.
    #[must_use]
    pub fn remote_name(&self) -> Option<String> {
        self.codec.get_ref().remote_name()
    }

    /// Set the read/write timeout of the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the timeout.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.codec.get_mut().set_timeout(timeout)
    }

    /// Returns `true` if bytes are already buffered for the next read.
    #[must_use]
    pub fn has_buffered(&self) -> bool {
        self.codec.get_ref().has_buffered()
    }

    /// Send a payload as one message, fragmented by the configured size.
    ///
    /// # Errors
    ///
    /// - `Error::BadOpcode` for [`OpCode::Continuation`]; the connection
    ///   stays usable
    /// - `Error::NotConnected` once a close has started
    /// - Transport errors, after which the connection is disconnected
    pub fn send(&mut self, payload: impl AsRef<[u8]>, opcode: OpCode) -> Result<()> {
        self.send_with_mask(payload, opcode, self.mask_frames)
    }

    /// Like [`send`](Self::send) with an explicit masking choice.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub fn send_with_mask(
        &mut self,
        payload: impl AsRef<[u8]>,
        opcode: OpCode,
        masked: bool,
    ) -> Result<()> {
        if opcode == OpCode::Continuation {
            return Err(Error::bad_opcode(opcode));
        }
        self.ensure_sendable()?;

        let payload = payload.as_ref();
        let frames = MessageFragmenter::new(payload, opcode, self.fragment_size);
        log::trace!(
            "Sending {opcode} message, {} bytes, fragmented: {}",
            payload.len(),
            frames.needs_fragmentation()
        );
        for frame in frames {
            self.write_frame(&frame, masked)?;
        }
        Ok(())
    }

    /// Send a prepared message.
    ///
    /// Data messages are fragmented by the configured size; control messages
    /// always go out as a single frame.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub fn push_message(&mut self, message: &Message) -> Result<()> {
        self.ensure_sendable()?;
        for frame in message.frames(self.fragment_size) {
            self.write_frame(&frame, self.mask_frames)?;
        }
        Ok(())
    }

    /// Read frames until one complete message is available.
    ///
    /// Pings are answered with a pong before the ping itself is returned. A
    /// close frame ends the connection and is returned as a close message.
    /// Unlike [`receive`](Self::receive) nothing is filtered.
    ///
    /// # Errors
    ///
    /// Transport, framing and protocol errors. The connection is
    /// disconnected before any of them is returned.
    pub fn pull_message(&mut self) -> Result<Message> {
        loop {
            let frame = match self.codec.read_frame() {
                Ok(frame) => frame,
                Err(err) => return Err(self.fail(err)),
            };

            if frame.opcode != OpCode::Continuation {
                self.last_opcode = Some(frame.opcode);
            }

            let is_closing = self.state == ConnectionState::Closing;
            let action = match self.responder.inspect(&frame, is_closing) {
                Ok(action) => action,
                Err(err) => return Err(self.fail(err)),
            };

            match action {
                ControlAction::Pass => {}
                ControlAction::Consumed => {
                    log::trace!("Dropping {} frame while closing", frame.opcode);
                    continue;
                }
                ControlAction::Pong(payload) => {
                    self.write_frame(&Frame::pong(payload), self.mask_frames)?;
                }
                ControlAction::Close {
                    status,
                    reason,
                    acknowledge,
                } => {
                    let reason = String::from_utf8_lossy(&reason);
                    if status.is_some() {
                        self.close_status = status;
                    }
                    if acknowledge {
                        let ack = self.responder.acknowledgement(status);
                        if let Err(err) = self.codec.write_frame(&ack, self.mask_frames) {
                            log::warn!("Failed to acknowledge close: {err}");
                        }
                        log::debug!("Peer closed connection with status {status:?}: {reason}");
                    } else {
                        log::debug!("Close handshake completed with status {status:?}: {reason}");
                    }
                    self.disconnect();
                }
            }

            match self.assembler.push(frame) {
                Ok(Some(message)) => return Ok(message),
                Ok(None) => {}
                Err(err) => return Err(self.fail(err)),
            }
        }
    }

    /// Receive the next message whose opcode passes the filter.
    ///
    /// Returns `Ok(None)` once the connection is closed. Close messages are
    /// always returned.
    ///
    /// # Errors
    ///
    /// Same as [`pull_message`](Self::pull_message).
    pub fn receive(&mut self) -> Result<Option<Message>> {
        if !self.state.can_receive() || !self.codec.get_ref().is_connected() {
            return Ok(None);
        }
        loop {
            let message = self.pull_message()?;
            if self.accepts(message.opcode()) {
                return Ok(Some(message));
            }
        }
    }

    /// Run the close handshake.
    ///
    /// Sends a close frame, then reads until the peer's close frame arrives.
    /// Data frames received in the meantime are discarded. Returns the
    /// peer's close message, or `None` if the connection was already closed.
    ///
    /// # Errors
    ///
    /// Transport and protocol errors, including `Error::Timeout` if the
    /// peer never answers.
    pub fn close(&mut self, status: u16, reason: &str) -> Result<Option<Message>> {
        if !self.is_connected() {
            return Ok(None);
        }

        let payload = CloseFrame::new(status, reason).encode();
        self.write_frame(&Frame::new(true, OpCode::Close, payload), self.mask_frames)?;
        self.close_status = Some(status);
        self.state = ConnectionState::Closing;
        log::debug!("Closing connection with status {status}");

        loop {
            let message = self.pull_message()?;
            if message.opcode() == OpCode::Close {
                return Ok(Some(message));
            }
        }
    }

    /// Close the transport without a close handshake.
    pub fn disconnect(&mut self) {
        self.codec.get_mut().close();
        self.state = ConnectionState::Closed;
        self.assembler.reset();
    }

    /// Application data may only go out while the connection is open.
    fn ensure_sendable(&self) -> Result<()> {
        if self.state.can_send() && self.codec.get_ref().is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn write_frame(&mut self, frame: &Frame, masked: bool) -> Result<()> {
        match self.codec.write_frame(frame, masked) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        log::debug!("Disconnecting after error: {err}");
        self.disconnect();
        err
    }
}

impl<T> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("role", &self.role)
            .field("close_status", &self.close_status)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use crate::protocol::Frame;
    use crate::transport::testing::MemoryTransport;

    fn server_conn() -> Connection<MemoryTransport> {
        Connection::new(MemoryTransport::new(), Role::Server, &Config::server())
    }

    fn frames(mut bytes: &[u8]) -> Vec<Frame> {
        let mut out = Vec::new();
        while !bytes.is_empty() {
            let (frame, used) = Frame::parse(bytes).unwrap();
            out.push(frame);
            bytes = &bytes[used..];
        }
        out
    }

    #[test]
    fn test_connection_initial_state() {
        let conn = server_conn();
        assert_eq!(conn.state(), ConnectionState::Open);
        assert_eq!(conn.role(), Role::Server);
        assert!(conn.is_connected());
        assert!(!conn.mask_frames());
        assert_eq!(conn.close_status(), None);
        assert_eq!(conn.name().as_deref(), Some("memory:local"));
    }

    #[test]
    fn test_send_text_unmasked() {
        let mut conn = server_conn();
        conn.send("Hello", OpCode::Text).unwrap();

        let written = conn.transport().take_written();
        assert_eq!(written, b"\x81\x05Hello");
    }

    #[test]
    fn test_client_masks_by_default() {
        let mut conn = Connection::new(MemoryTransport::new(), Role::Client, &Config::client());
        conn.send("Hello", OpCode::Text).unwrap();

        let written = conn.transport().take_written();
        assert_eq!(written[1] & 0x80, 0x80);
        let sent = frames(&written);
        assert_eq!(sent[0].payload(), b"Hello");
    }

    #[test]
    fn test_send_with_mask_override() {
        let mut conn = server_conn();
        conn.send_with_mask("x", OpCode::Binary, true).unwrap();

        let written = conn.transport().take_written();
        assert_eq!(written.len(), 2 + 4 + 1);
        assert_eq!(written[1], 0x80 | 1);
    }

    #[test]
    fn test_send_continuation_is_bad_opcode() {
        let mut conn = server_conn();
        let err = conn.send("x", OpCode::Continuation).unwrap_err();
        assert!(err.is_bad_opcode());
        assert!(conn.is_connected());

        conn.send("still ok", OpCode::Text).unwrap();
    }

    #[test]
    fn test_send_fragments() {
        let config = Config::server().with_fragment_size(8);
        let mut conn = Connection::new(MemoryTransport::new(), Role::Server, &config);
        conn.send("Multi fragment test", OpCode::Text).unwrap();

        let sent = frames(&conn.transport().take_written());
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].opcode, OpCode::Text);
        assert!(!sent[0].fin);
        assert_eq!(sent[1].opcode, OpCode::Continuation);
        assert!(!sent[1].fin);
        assert_eq!(sent[2].opcode, OpCode::Continuation);
        assert!(sent[2].fin);
        assert_eq!(sent[2].payload(), b"est");
    }

    #[test]
    fn test_push_message_control_not_fragmented() {
        let config = Config::server().with_fragment_size(2);
        let mut conn = Connection::new(MemoryTransport::new(), Role::Server, &config);
        conn.push_message(&Message::ping("longer than two")).unwrap();

        let sent = frames(&conn.transport().take_written());
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].opcode, OpCode::Ping);
    }

    #[test]
    fn test_push_message_fragments_data() {
        let config = Config::server().with_fragment_size(8);
        let mut conn = Connection::new(MemoryTransport::new(), Role::Server, &config);
        let message = Message::text("Multi fragment test");
        conn.push_message(&message).unwrap();

        let sent = frames(&conn.transport().take_written());
        assert_eq!(sent, message.frames(8));
        assert_eq!(sent.len(), 3);
    }

    #[test]
    fn test_send_refused_while_closing() {
        let mut conn = server_conn();
        conn.state = ConnectionState::Closing;

        assert!(matches!(conn.send("x", OpCode::Text), Err(Error::NotConnected)));
        assert!(matches!(
            conn.push_message(&Message::text("x")),
            Err(Error::NotConnected)
        ));
        assert!(conn.transport().take_written().is_empty());

        // The peer's close frame is still read.
        conn.transport()
            .feed(&Frame::close(Some(1000), b"bye").encode(None));
        let msg = conn.receive().unwrap().unwrap();
        assert_eq!(msg.opcode(), OpCode::Close);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_close_payload_is_status_then_reason() {
        let mut conn = server_conn();
        conn.transport().feed(&Frame::close(Some(4001), b"").encode(None));
        conn.close(4001, "custom").unwrap();

        let sent = frames(&conn.transport().take_written());
        assert_eq!(
            CloseFrame::parse(sent[0].payload()),
            Some(CloseFrame::new(4001, "custom"))
        );
    }

    #[test]
    fn test_receive_masked_text() {
        let mut conn = server_conn();
        conn.transport()
            .feed(&Frame::text("Hello").encode(Some([0x37, 0xfa, 0x21, 0x3d])));

        let msg = conn.receive().unwrap().unwrap();
        assert_eq!(msg.opcode(), OpCode::Text);
        assert_eq!(msg.content(), b"Hello");
        assert_eq!(conn.last_opcode(), Some(OpCode::Text));
    }

    #[test]
    fn test_receive_fragmented_message() {
        let mut conn = server_conn();
        conn.transport()
            .feed(&Frame::new(false, OpCode::Binary, vec![1, 2]).encode(None));
        conn.transport()
            .feed(&Frame::new(true, OpCode::Continuation, vec![3]).encode(None));

        let msg = conn.receive().unwrap().unwrap();
        assert_eq!(msg.opcode(), OpCode::Binary);
        assert_eq!(msg.content(), &[1, 2, 3]);
        assert_eq!(conn.last_opcode(), Some(OpCode::Binary));
    }

    #[test]
    fn test_ping_answered_before_delivery() {
        let mut conn = server_conn();
        conn.transport().feed(&Frame::ping("hi").encode(None));
        conn.transport().feed(&Frame::text("after").encode(None));

        // Pings are filtered out by default.
        let msg = conn.receive().unwrap().unwrap();
        assert_eq!(msg.content(), b"after");

        let sent = frames(&conn.transport().take_written());
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].opcode, OpCode::Pong);
        assert_eq!(sent[0].payload(), b"hi");
    }

    #[test]
    fn test_filter_delivers_ping() {
        let config = Config::server().with_filter([OpCode::Text, OpCode::Ping]);
        let mut conn = Connection::new(MemoryTransport::new(), Role::Server, &config);
        conn.transport().feed(&Frame::ping("hi").encode(None));

        let msg = conn.receive().unwrap().unwrap();
        assert_eq!(msg.opcode(), OpCode::Ping);
        assert_eq!(msg.content(), b"hi");
        assert_eq!(conn.transport().take_written(), b"\x8a\x02hi");
    }

    #[test]
    fn test_pull_message_ignores_filter() {
        let mut conn = server_conn();
        conn.transport().feed(&Frame::pong("p").encode(None));

        let msg = conn.pull_message().unwrap();
        assert_eq!(msg.opcode(), OpCode::Pong);
    }

    #[test]
    fn test_local_close_handshake() {
        let mut conn = server_conn();
        conn.transport()
            .feed(&Frame::close(Some(1000), b"ttfn").encode(None));

        let msg = conn.close(1000, "ttfn").unwrap().unwrap();
        assert_eq!(msg.opcode(), OpCode::Close);
        assert_eq!(msg.content(), b"ttfn");
        assert!(!conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.close_status(), Some(1000));

        // Only our close frame went out, no acknowledgement.
        let sent = frames(&conn.transport().take_written());
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload(), b"\x03\xe8ttfn");
    }

    #[test]
    fn test_close_discards_data_frames() {
        let mut conn = server_conn();
        conn.transport().feed(&Frame::text("late").encode(None));
        conn.transport().feed(&Frame::close(Some(1000), b"").encode(None));

        let msg = conn.close(1000, "bye").unwrap().unwrap();
        assert_eq!(msg.opcode(), OpCode::Close);
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_close_when_closed() {
        let mut conn = server_conn();
        conn.disconnect();
        assert_eq!(conn.close(1000, "").unwrap(), None);
    }

    #[test]
    fn test_remote_close_acknowledged() {
        let mut conn = server_conn();
        conn.transport()
            .feed(&Frame::close(Some(4000), b"going").encode(None));

        let msg = conn.receive().unwrap().unwrap();
        assert_eq!(msg.opcode(), OpCode::Close);
        assert_eq!(msg.content(), b"going");
        assert_eq!(conn.close_status(), Some(4000));
        assert!(!conn.is_connected());

        let sent = frames(&conn.transport().take_written());
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].opcode, OpCode::Close);
        assert_eq!(&sent[0].payload()[2..], b"Close acknowledged: 4000");

        assert_eq!(conn.receive().unwrap(), None);
        assert!(matches!(
            conn.send("x", OpCode::Text),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn test_remote_close_without_status() {
        let mut conn = server_conn();
        conn.transport().feed(&Frame::close(None, b"").encode(None));

        let msg = conn.receive().unwrap().unwrap();
        assert!(msg.is_empty());
        assert_eq!(conn.close_status(), None);
        assert_eq!(conn.transport().take_written(), b"\x88\x00");
    }

    #[test]
    fn test_unknown_opcode_disconnects() {
        let mut conn = server_conn();
        conn.transport().feed(&[0x8c, 0x00]);

        assert_eq!(conn.receive(), Err(Error::UnknownOpcode(12)));
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_peer_hangup_disconnects() {
        let mut conn = server_conn();
        let err = conn.receive().unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let limits = Limits::new(16, 1024, 8, 4096);
        let config = Config::server().with_limits(limits);
        let mut conn = Connection::new(MemoryTransport::new(), Role::Server, &config);
        conn.transport().feed(&Frame::binary(vec![0; 17]).encode(None));

        assert!(matches!(
            conn.receive(),
            Err(Error::FrameTooLarge { size: 17, max: 16 })
        ));
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_pair_roundtrip() {
        let (a, b) = MemoryTransport::pair();
        let mut client = Connection::new(a, Role::Client, &Config::client().with_fragment_size(3));
        let mut server = Connection::new(b, Role::Server, &Config::server());

        client.send("fragmented hello", OpCode::Text).unwrap();
        let msg = server.receive().unwrap().unwrap();
        assert_eq!(msg.as_text(), Some("fragmented hello"));

        server.send(msg.content(), msg.opcode()).unwrap();
        let echo = client.receive().unwrap().unwrap();
        assert_eq!(echo, msg);
    }

    #[test]
    fn test_set_fragment_size_clamps_zero() {
        let mut conn = server_conn();
        conn.set_fragment_size(0);
        assert_eq!(conn.fragment_size(), 1);
    }

    #[test]
    fn test_into_transport() {
        let mut conn = server_conn();
        conn.send("x", OpCode::Text).unwrap();
        let io = conn.into_transport();
        assert_eq!(io.take_written(), b"\x81\x01x");
        assert!(io.is_connected());
    }
}
