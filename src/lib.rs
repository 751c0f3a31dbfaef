//! # wsync - Blocking WebSocket Protocol Implementation
//!
//! `wsync` is an RFC 6455 WebSocket library built on blocking sockets.
//!
//! ## Features
//!
//! - **Frame codec** with strict header validation and size limits checked
//!   before allocation
//! - **Message layer** with fragmentation, reassembly and automatic pongs
//! - **Close handshake** state machine for both local and remote closes
//! - **Client and server** over plain TCP, plus `wss://` with the
//!   `tls-rustls` feature
//! - **Listen loop** serving many peers from one thread with readiness polling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wsync::{Client, Config};
//!
//! # fn main() -> wsync::Result<()> {
//! let mut client = Client::new("ws://localhost:8000/", Config::client())?;
//! client.text("Hello")?;
//! let reply = client.receive()?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;
pub mod server;
pub mod transport;

#[cfg(feature = "tls-rustls")]
pub mod tls;

pub use client::Client;
pub use codec::WebSocketCodec;
pub use config::{Config, Limits};
pub use connection::{Connection, ConnectionState, Role};
pub use error::{Error, Result, StreamMeta};
pub use message::{CloseFrame, Message};
pub use protocol::{
    Frame, HandshakeRequest, HandshakeResponse, HandshakeResult, OpCode, WS_GUID,
    compute_accept_key,
};
pub use server::{Server, StopHandle};
pub use transport::{Socket, StreamTransport, TcpTransport, Transport};
