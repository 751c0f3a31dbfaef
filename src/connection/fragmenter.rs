//! Message fragmentation for outgoing WebSocket messages (RFC 6455).

use crate::protocol::{Frame, OpCode};

/// Iterator that produces frames from a message payload.
///
/// Splits large payloads into multiple frames according to the configured
/// fragment size. First frame uses the original opcode, continuation frames
/// use `OpCode::Continuation`. Control payloads are never split.
pub struct MessageFragmenter<'a> {
    payload: &'a [u8],
    opcode: OpCode,
    fragment_size: usize,
    masked: bool,
    offset: usize,
    is_first: bool,
}

impl<'a> MessageFragmenter<'a> {
    /// Create a new fragmenter for the given payload.
    #[inline]
    #[must_use]
    pub fn new(payload: &'a [u8], opcode: OpCode, fragment_size: usize) -> Self {
        let fragment_size = if opcode.is_control() {
            usize::MAX
        } else {
            fragment_size.max(1)
        };
        Self {
            payload,
            opcode,
            fragment_size,
            masked: false,
            offset: 0,
            is_first: true,
        }
    }

    /// Mark every produced frame as masked.
    #[must_use]
    pub fn with_masked(mut self, masked: bool) -> Self {
        self.masked = masked;
        self
    }

    /// Check if fragmentation is needed (payload exceeds fragment_size).
    #[inline]
    #[must_use]
    pub fn needs_fragmentation(&self) -> bool {
        self.payload.len() > self.fragment_size
    }

    /// Get remaining bytes to send.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.payload.len().saturating_sub(self.offset)
    }
}

impl<'a> Iterator for MessageFragmenter<'a> {
    type Item = Frame;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.payload.len() {
            // Handle empty payload case
            if self.is_first && self.payload.is_empty() {
                self.is_first = false;
                let frame = Frame::new(true, self.opcode, Vec::new());
                return Some(frame.with_masked(self.masked));
            }
            return None;
        }

        let remaining = self.payload.len() - self.offset;
        let chunk_size = remaining.min(self.fragment_size);
        let is_final = self.offset + chunk_size >= self.payload.len();

        let chunk = self.payload[self.offset..self.offset + chunk_size].to_vec();
        self.offset += chunk_size;

        let opcode = if self.is_first {
            self.is_first = false;
            self.opcode
        } else {
            OpCode::Continuation
        };

        Some(Frame::new(is_final, opcode, chunk).with_masked(self.masked))
    }
}
