//! Send one message and print the reply.
//!
//! Run with: cargo run --example send -- [message] [uri]

use std::error::Error;

use wsync::{Client, Config, OpCode};

fn main() -> Result<(), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    let text = args.next().unwrap_or_else(|| "Hello".to_string());
    let uri = args.next().unwrap_or_else(|| "ws://127.0.0.1:9001/".to_string());

    let mut client = Client::new(&uri, Config::client())?;
    client.text(&text)?;
    println!("Sent: {text}");

    if let Some(reply) = client.receive()? {
        match reply.opcode() {
            OpCode::Text => println!("Received: {}", reply.as_text().unwrap_or_default()),
            _ => println!("Received: {reply}"),
        }
    }

    client.close(1000, "ttfn")?;
    Ok(())
}
