//! Message fragmentation and reassembly for WebSocket (RFC 6455).

use bytes::BytesMut;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::protocol::{Frame, OpCode};

/// Reassembles fragmented WebSocket messages.
///
/// Control frames are complete on their own and may arrive between the
/// fragments of a data message without disturbing the buffer.
pub struct MessageAssembler {
    buffer: BytesMut,
    fragment_count: usize,
    opcode: Option<OpCode>,
    limits: Limits,
}

impl MessageAssembler {
    pub fn new(limits: Limits) -> Self {
        Self {
            buffer: BytesMut::new(),
            fragment_count: 0,
            opcode: None,
            limits,
        }
    }

    /// Add a frame to the message being assembled.
    /// Returns Some(complete_message) when FIN=1, None otherwise.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` for a continuation with nothing to
    ///   continue, or a new data frame while a message is still open
    /// - `Error::MessageTooLarge` / `Error::TooManyFragments` past the limits
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        if frame.opcode.is_control() {
            return control_message(frame).map(Some);
        }

        if frame.opcode == OpCode::Continuation {
            if self.opcode.is_none() {
                return Err(Error::ProtocolViolation(
                    "Unexpected continuation frame".into(),
                ));
            }
        } else {
            if self.opcode.is_some() {
                return Err(Error::ProtocolViolation(
                    "Expected continuation frame".into(),
                ));
            }
            if frame.fin {
                self.limits.check_message_size(frame.payload().len())?;
                let opcode = frame.opcode;
                return Message::new(opcode, frame.into_payload()).map(Some);
            }
            self.opcode = Some(frame.opcode);
        }

        self.limits.check_fragment_count(self.fragment_count + 1)?;
        self.limits
            .check_message_size(self.buffer.len() + frame.payload().len())?;

        self.buffer.extend_from_slice(frame.payload());
        self.fragment_count += 1;

        if !frame.fin {
            return Ok(None);
        }

        let payload = self.buffer.split().to_vec();
        self.fragment_count = 0;
        match self.opcode.take() {
            Some(opcode) => Message::new(opcode, payload).map(Some),
            None => Err(Error::ProtocolViolation(
                "Unexpected continuation frame".into(),
            )),
        }
    }

    pub fn is_assembling(&self) -> bool {
        self.opcode.is_some()
    }

    /// Frames buffered for the open message.
    pub fn fragment_count(&self) -> usize {
        self.fragment_count
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.fragment_count = 0;
        self.opcode = None;
    }
}

/// A control frame as a message. Close payloads lose their status bytes.
fn control_message(frame: Frame) -> Result<Message> {
    let opcode = frame.opcode;
    let mut payload = frame.into_payload();
    if opcode == OpCode::Close {
        payload.drain(..payload.len().min(2));
    }
    Message::new(opcode, payload)
}
