//! WebSocket codec for blocking transports.
//!
//! This module provides frame-level encoding/decoding over a [`Transport`](crate::Transport).

mod framed;

pub use framed::WebSocketCodec;
