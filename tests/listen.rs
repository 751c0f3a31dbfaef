//! The single-threaded listen loop serving several clients.

use std::collections::HashSet;
use std::io::Read;
use std::net::{Ipv4Addr, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use wsync::{Client, Config, OpCode, Server};

fn listening_server() -> Server {
    let config = Config::server()
        .with_bind_address(Ipv4Addr::LOCALHOST.into())
        .with_port(0)
        .with_poll_interval(Duration::from_millis(10));
    Server::bind(config).unwrap()
}

#[test]
fn test_listen_serves_many_clients() {
    let mut server = listening_server();
    let port = server.port();
    let stop = server.stop_handle();

    let delivered = Arc::new(AtomicUsize::new(0));
    let peers = Arc::new(Mutex::new(HashSet::new()));

    let loop_thread = {
        let delivered = Arc::clone(&delivered);
        let peers = Arc::clone(&peers);
        thread::spawn(move || {
            server.listen(|id, conn, msg| {
                delivered.fetch_add(1, Ordering::SeqCst);
                peers.lock().unwrap().insert(id);
                if msg.opcode() == OpCode::Close {
                    return Ok(());
                }
                conn.send(msg.content(), msg.opcode())
            })
        })
    };

    let clients: Vec<_> = (0..3)
        .map(|n| {
            thread::spawn(move || {
                let mut client =
                    Client::new(&format!("ws://127.0.0.1:{port}/"), Config::client()).unwrap();
                for i in 0..5 {
                    let text = format!("client {n} message {i}");
                    client.text(&text).unwrap();
                    let reply = client.receive().unwrap().unwrap();
                    assert_eq!(reply.as_text(), Some(text.as_str()));
                }
                let ack = client.close(1000, "done").unwrap().unwrap();
                assert_eq!(ack.as_text(), Some("Close acknowledged: 1000"));
            })
        })
        .collect();

    for client in clients {
        client.join().unwrap();
    }

    stop.stop();
    loop_thread.join().unwrap().unwrap();

    // Five echoes and one close per client.
    assert_eq!(delivered.load(Ordering::SeqCst), 18);
    assert_eq!(peers.lock().unwrap().len(), 3);
}

#[test]
fn test_listen_drops_failed_peer_and_keeps_serving() {
    let mut server = listening_server();
    let port = server.port();
    let stop = server.stop_handle();

    let loop_thread = thread::spawn(move || {
        server.listen(|_, conn, msg| {
            if msg.as_text() == Some("fail") {
                return Err(wsync::Error::ProtocolViolation("handler refused".into()));
            }
            conn.send(msg.content(), msg.opcode())
        })
    });

    let uri = format!("ws://127.0.0.1:{port}/");

    let mut doomed = Client::new(&uri, Config::client().with_timeout(Some(Duration::from_secs(2)))).unwrap();
    doomed.text("fail").unwrap();
    // The server drops the peer without a close frame.
    assert!(doomed.receive().is_err());

    let mut client = Client::new(&uri, Config::client()).unwrap();
    client.text("still here").unwrap();
    assert_eq!(client.receive().unwrap().unwrap().as_text(), Some("still here"));
    client.close(1000, "ttfn").unwrap();

    stop.stop();
    loop_thread.join().unwrap().unwrap();
}

#[test]
fn test_listen_answers_pings() {
    let mut server = listening_server();
    let port = server.port();
    let stop = server.stop_handle();

    let loop_thread = thread::spawn(move || server.listen(|_, _, _| Ok(())));

    let config = Config::client().with_filter([OpCode::Pong]);
    let mut client = Client::new(&format!("ws://127.0.0.1:{port}/"), config).unwrap();
    client.ping(b"are you there").unwrap();
    let pong = client.receive().unwrap().unwrap();
    assert_eq!(pong.opcode(), OpCode::Pong);
    assert_eq!(pong.content(), b"are you there");
    client.close(1000, "ttfn").unwrap();

    stop.stop();
    loop_thread.join().unwrap().unwrap();
}

#[test]
fn test_stop_before_any_peer() {
    let mut server = listening_server();
    let stop = server.stop_handle();

    let loop_thread = thread::spawn(move || {
        let result = server.listen(|_, _, _| Ok(()));
        (result, server)
    });

    thread::sleep(Duration::from_millis(50));
    stop.stop();

    let (result, server) = loop_thread.join().unwrap();
    assert!(result.is_ok());
    assert!(!server.is_connected());
}

#[test]
fn test_silent_peer_does_not_block_others() {
    let mut server = listening_server();
    let port = server.port();
    let stop = server.stop_handle();

    let loop_thread = thread::spawn(move || {
        server.listen(|_, conn, msg| conn.send(msg.content(), msg.opcode()))
    });

    // Connects but never sends an upgrade request.
    let _silent = TcpStream::connect(("127.0.0.1", port)).unwrap();
    thread::sleep(Duration::from_millis(50));

    let config = Config::client().with_timeout(Some(Duration::from_secs(2)));
    let mut client = Client::new(&format!("ws://127.0.0.1:{port}/"), config).unwrap();
    client.text("hello").unwrap();
    assert_eq!(client.receive().unwrap().unwrap().as_text(), Some("hello"));
    client.close(1000, "ttfn").unwrap();

    stop.stop();
    loop_thread.join().unwrap().unwrap();
}

#[test]
fn test_silent_peer_dropped_after_handshake_timeout() {
    let config = Config::server()
        .with_bind_address(Ipv4Addr::LOCALHOST.into())
        .with_port(0)
        .with_poll_interval(Duration::from_millis(10))
        .with_handshake_timeout(Duration::from_millis(100));
    let mut server = Server::bind(config).unwrap();
    let port = server.port();
    let stop = server.stop_handle();

    let loop_thread = thread::spawn(move || server.listen(|_, _, _| Ok(())));

    let mut silent = TcpStream::connect(("127.0.0.1", port)).unwrap();
    silent
        .set_read_timeout(Some(Duration::from_secs(3)))
        .unwrap();
    let started = Instant::now();
    let mut buf = [0u8; 16];
    // The server hangs up without sending anything.
    let read = silent.read(&mut buf).unwrap_or(0);
    assert_eq!(read, 0);
    assert!(started.elapsed() < Duration::from_secs(3));

    stop.stop();
    loop_thread.join().unwrap().unwrap();
}
