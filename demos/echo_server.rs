//! WebSocket echo server serving many peers from one thread.
//!
//! Run with: cargo run --example echo_server
//! Then connect with: cargo run --example send -- "hello"

use std::error::Error;

use wsync::{Config, OpCode, Server};

fn main() -> Result<(), Box<dyn Error>> {
    let mut server = Server::bind(Config::server().with_port(9001))?;
    println!("WebSocket Echo Server listening on {}", server.local_addr());

    server.listen(|id, conn, msg| {
        match msg.opcode() {
            OpCode::Close => println!("  Peer {id} closed"),
            opcode => {
                println!("  Peer {id}: {msg}");
                conn.send(msg.content(), opcode)?;
            }
        }
        Ok(())
    })?;

    Ok(())
}
