//! WebSocket connection management and state machine.
//!
//! This module provides the core `Connection` type for managing WebSocket
//! connections, including message sending/receiving, state management, and
//! the close handshake.
//!
//! ## Connection Lifecycle
//!
//! 1. **Open** - Initial state after successful handshake
//! 2. **Closing** - Close frame sent, waiting for peer close
//! 3. **Closed** - Transport disconnected
//!
//! ## Example
//!
//! ```rust,no_run
//! use wsync::{Config, Connection, OpCode, Role, TcpTransport};
//!
//! # fn main() -> wsync::Result<()> {
//! let stream = std::net::TcpStream::connect("127.0.0.1:8000")?;
//! // ... opening handshake done elsewhere ...
//! let mut conn = Connection::new(TcpTransport::new(stream), Role::Client, &Config::client());
//!
//! conn.send("Hello", OpCode::Text)?;
//! if let Some(msg) = conn.receive()? {
//!     println!("Received: {msg}");
//! }
//! conn.close(1000, "done")?;
//! # Ok(())
//! # }
//! ```

mod fragmenter;
mod role;
mod state;

#[allow(clippy::module_inception)]
mod connection;

pub use connection::Connection;
pub use fragmenter::MessageFragmenter;
pub use role::Role;
pub use state::ConnectionState;
