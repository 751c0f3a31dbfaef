//! Protocol-mandated replies to control frames.
//!
//! [`ControlResponder::inspect`] looks at each decoded frame before it is
//! handed to the assembler and tells the connection what, if anything, the
//! protocol requires it to do. It performs no I/O itself.

use crate::error::Result;
use crate::message::CloseFrame;
use crate::protocol::{Frame, OpCode};

/// What the connection must do with a decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    /// Hand the frame to the assembler unchanged.
    Pass,
    /// Send a pong with this payload, then hand the ping to the assembler.
    Pong(Vec<u8>),
    /// Drop the frame without delivering it.
    Consumed,
    /// The peer closed the connection.
    Close {
        /// Status carried by the close frame, if any.
        status: Option<u16>,
        /// Reason text carried after the status.
        reason: Vec<u8>,
        /// The peer started the close, so an acknowledgement is owed.
        acknowledge: bool,
    },
}

/// Stateless control frame policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlResponder;

impl ControlResponder {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decide how to handle `frame`.
    ///
    /// `is_closing` is set when a local close has been sent and the
    /// connection is waiting for the peer's close frame. Data frames arriving
    /// in that window are consumed.
    ///
    /// # Errors
    ///
    /// Returns `Error::FragmentedControlFrame` for a control frame with FIN=0.
    pub fn inspect(&self, frame: &Frame, is_closing: bool) -> Result<ControlAction> {
        frame.validate()?;

        let action = match frame.opcode {
            OpCode::Ping => ControlAction::Pong(frame.payload().to_vec()),
            OpCode::Pong => ControlAction::Pass,
            OpCode::Close => {
                let payload = frame.payload();
                let (status, reason) = match CloseFrame::parse(payload) {
                    Some(close) => (Some(close.code), payload[2..].to_vec()),
                    None => (None, Vec::new()),
                };
                ControlAction::Close {
                    status,
                    reason,
                    acknowledge: !is_closing,
                }
            }
            OpCode::Continuation | OpCode::Text | OpCode::Binary if is_closing => {
                ControlAction::Consumed
            }
            OpCode::Continuation | OpCode::Text | OpCode::Binary => ControlAction::Pass,
        };

        Ok(action)
    }

    /// The close frame sent back to a peer that initiated the close.
    ///
    /// Echoes the peer's status with a fixed reason, or is empty if the peer
    /// sent no status.
    #[must_use]
    pub fn acknowledgement(&self, status: Option<u16>) -> Frame {
        match status {
            Some(status) => {
                let reason = format!("Close acknowledged: {status}");
                Frame::close(Some(status), reason.as_bytes())
            }
            None => Frame::close(None, b""),
        }
    }
}
