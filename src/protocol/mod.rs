//! WebSocket protocol core implementation (RFC 6455).
//!
//! Everything here is independent of how bytes move: frames, masking, the
//! opening handshake, reassembly and the control frame policy.

pub mod assembler;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;
pub mod responder;

pub use assembler::MessageAssembler;
pub use frame::{Frame, MAX_CONTROL_FRAME_PAYLOAD};
pub use handshake::{
    HandshakeRequest, HandshakeResponse, HandshakeResult, WS_GUID, compute_accept_key,
    generate_key, negotiate_client, negotiate_server,
};
pub use mask::{apply_mask, apply_mask_fast};
pub use opcode::OpCode;
pub use responder::{ControlAction, ControlResponder};
