//! Application-level WebSocket messages and close payloads.

use std::time::SystemTime;

use bytes::BufMut;

use crate::connection::MessageFragmenter;
use crate::error::{Error, Result};
use crate::protocol::{Frame, OpCode};

/// Close status code and reason carried in a close frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The close status code.
    pub code: u16,
    /// Human-readable reason for closing.
    pub reason: String,
}

impl CloseFrame {
    /// Create a new close payload with the given code and reason.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Split a close frame payload into status code and reason.
    ///
    /// Returns `None` for payloads too short to carry a status. Invalid UTF-8
    /// in the reason is replaced rather than rejected.
    #[must_use]
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let (status, reason) = payload.split_first_chunk::<2>()?;
        Some(Self {
            code: u16::from_be_bytes(*status),
            reason: String::from_utf8_lossy(reason).into_owned(),
        })
    }

    /// Encode as a close frame payload: big-endian status then reason.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(2 + self.reason.len());
        payload.put_u16(self.code);
        payload.put_slice(self.reason.as_bytes());
        payload
    }
}

/// One complete WebSocket message.
///
/// The opcode is never [`OpCode::Continuation`]. For close messages the
/// content is the reason text with the two-byte status stripped.
#[derive(Debug, Clone)]
pub struct Message {
    opcode: OpCode,
    content: Vec<u8>,
    timestamp: SystemTime,
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.opcode == other.opcode && self.content == other.content
    }
}

impl Eq for Message {}

impl Message {
    /// Create a message with any opcode except continuation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadOpcode`] for [`OpCode::Continuation`].
    pub fn new(opcode: OpCode, content: impl Into<Vec<u8>>) -> Result<Self> {
        if opcode == OpCode::Continuation {
            return Err(Error::bad_opcode(opcode));
        }
        Ok(Self::with_opcode(opcode, content.into()))
    }

    fn with_opcode(opcode: OpCode, content: Vec<u8>) -> Self {
        Self {
            opcode,
            content,
            timestamp: SystemTime::now(),
        }
    }

    /// Create a text message.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::with_opcode(OpCode::Text, s.into().into_bytes())
    }

    /// Create a binary message.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::with_opcode(OpCode::Binary, data.into())
    }

    /// Create a ping message.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::with_opcode(OpCode::Ping, data.into())
    }

    /// Create a pong message.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::with_opcode(OpCode::Pong, data.into())
    }

    /// Create a close message carrying only the reason text.
    #[must_use]
    pub fn close(reason: impl Into<Vec<u8>>) -> Self {
        Self::with_opcode(OpCode::Close, reason.into())
    }

    #[must_use]
    pub const fn opcode(&self) -> OpCode {
        self.opcode
    }

    #[must_use]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    #[must_use]
    pub fn into_content(self) -> Vec<u8> {
        self.content
    }

    /// Content length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.content.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Returns `true` if the message carries any content.
    #[must_use]
    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }

    /// When this message object was created.
    #[must_use]
    pub const fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Borrow the content as UTF-8 text, if it is valid.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }

    /// Returns `true` if this is a data message (text or binary).
    #[must_use]
    pub const fn is_data(&self) -> bool {
        self.opcode.is_data()
    }

    /// Returns `true` if this is a control message (ping, pong, or close).
    #[must_use]
    pub const fn is_control(&self) -> bool {
        self.opcode.is_control()
    }

    /// Split into wire frames of at most `fragment_size` payload bytes.
    ///
    /// Control messages always produce a single frame.
    #[must_use]
    pub fn frames(&self, fragment_size: usize) -> Vec<Frame> {
        MessageFragmenter::new(&self.content, self.opcode, fragment_size).collect()
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} message, {} bytes", self.opcode, self.content.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_text_creation() {
        let msg = Message::text("hello");
        assert_eq!(msg.opcode(), OpCode::Text);
        assert_eq!(msg.as_text(), Some("hello"));

        let msg = Message::text(String::from("world"));
        assert_eq!(msg.content(), b"world");
    }

    #[test]
    fn test_message_binary_creation() {
        let msg = Message::binary(vec![1, 2, 3]);
        assert_eq!(msg.opcode(), OpCode::Binary);
        assert_eq!(msg.content(), &[1, 2, 3]);

        let msg = Message::binary([4, 5, 6]);
        assert_eq!(msg.into_content(), vec![4, 5, 6]);
    }

    #[test]
    fn test_message_new_rejects_continuation() {
        let err = Message::new(OpCode::Continuation, b"x".to_vec()).unwrap_err();
        assert!(matches!(err, Error::BadOpcode(ref msg) if msg.contains("continuation")));

        let msg = Message::new(OpCode::Pong, b"ok".to_vec()).unwrap();
        assert_eq!(msg.opcode(), OpCode::Pong);
    }

    #[test]
    fn test_message_is_data() {
        assert!(Message::text("hello").is_data());
        assert!(Message::binary(vec![1]).is_data());
        assert!(!Message::ping(vec![]).is_data());
        assert!(!Message::pong(vec![]).is_data());
        assert!(!Message::close("").is_data());
    }

    #[test]
    fn test_message_is_control() {
        assert!(!Message::text("hello").is_control());
        assert!(Message::ping(vec![]).is_control());
        assert!(Message::close("bye").is_control());
    }

    #[test]
    fn test_message_len_and_content() {
        let msg = Message::text("four");
        assert_eq!(msg.len(), 4);
        assert!(msg.has_content());

        let empty = Message::ping(Vec::new());
        assert!(empty.is_empty());
        assert!(!empty.has_content());
    }

    #[test]
    fn test_message_equality_ignores_timestamp() {
        let a = Message::text("same");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = Message::text("same");
        assert_ne!(a.timestamp(), b.timestamp());
        assert_eq!(a, b);
        assert_ne!(a, Message::binary("same"));
    }

    #[test]
    fn test_message_as_text_invalid_utf8() {
        let msg = Message::binary(vec![0xff, 0xfe]);
        assert_eq!(msg.as_text(), None);
    }

    #[test]
    fn test_message_frames() {
        let msg = Message::text("Multi fragment test");
        let frames = msg.frames(8);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].opcode, OpCode::Text);
        assert!(!frames[0].fin);
        assert_eq!(frames[1].opcode, OpCode::Continuation);
        assert!(frames[2].fin);

        let ping = Message::ping(vec![0; 64]);
        assert_eq!(ping.frames(8).len(), 1);
    }

    #[test]
    fn test_message_display() {
        assert_eq!(Message::text("hey").to_string(), "text message, 3 bytes");
    }

    #[test]
    fn test_close_frame_parse() {
        let frame = CloseFrame::parse(&[0x03, 0xe8, b'b', b'y', b'e']).unwrap();
        assert_eq!(frame.code, 1000);
        assert_eq!(frame.reason, "bye");

        assert_eq!(CloseFrame::parse(&[0x0f]), None);
        assert_eq!(CloseFrame::parse(&[]), None);
    }

    #[test]
    fn test_close_frame_encode() {
        let frame = CloseFrame::new(4000, "custom");
        let payload = frame.encode();
        assert_eq!(&payload[..2], &[0x0f, 0xa0]);
        assert_eq!(CloseFrame::parse(&payload), Some(frame));
    }
}
