//! TLS support for secure WebSocket (`wss://`) client connections.
//!
//! Backed by **rustls** (feature `tls-rustls`) with the Mozilla root store
//! from `webpki-roots`. The TLS session wraps a blocking [`TcpStream`] and
//! plugs into [`StreamTransport`] like a plain socket.

use std::io;
use std::net::TcpStream;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, StreamOwned};

use crate::error::{Error, Result, StreamMeta};
use crate::transport::{Socket, StreamTransport};

/// A client TLS session over TCP.
pub type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// Transport for `wss://` connections.
pub type TlsTransport = StreamTransport<TlsStream>;

impl Socket for TlsStream {
    fn tcp(&self) -> &TcpStream {
        &self.sock
    }
}

/// Client configuration trusting the bundled web PKI roots.
#[must_use]
pub fn client_config_with_native_roots() -> Arc<ClientConfig> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Arc::new(config)
}

/// Establishes client TLS sessions on connected TCP streams.
#[derive(Clone)]
pub struct TlsConnector {
    config: Arc<ClientConfig>,
}

impl TlsConnector {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self { config }
    }

    /// Run the TLS handshake for `domain` and wrap the session as a transport.
    ///
    /// The handshake completes before this returns, so certificate problems
    /// surface here rather than on the first WebSocket read.
    ///
    /// # Errors
    ///
    /// Returns `Error::Timeout` if the peer stalls past the stream's read
    /// timeout, otherwise `Error::Tls` for an invalid server name or a failed
    /// handshake.
    pub fn connect(&self, domain: &str, mut stream: TcpStream) -> Result<TlsTransport> {
        let server_name = ServerName::try_from(domain.to_owned())
            .map_err(|_| Error::Tls(format!("invalid DNS name: {domain}")))?;

        let mut session = ClientConnection::new(self.config.clone(), server_name)
            .map_err(|e| Error::Tls(e.to_string()))?;

        while session.is_handshaking() {
            session
                .complete_io(&mut stream)
                .map_err(|e| handshake_error(domain, &stream, e))?;
        }
        log::debug!("TLS session established with {domain}");

        Ok(StreamTransport::new(StreamOwned::new(session, stream)))
    }
}

fn handshake_error(domain: &str, stream: &TcpStream, err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout {
            meta: StreamMeta {
                timed_out: true,
                eof: false,
                local: stream.local_addr().ok().map(|a| a.to_string()),
                remote: stream.peer_addr().ok().map(|a| a.to_string()),
            },
        },
        _ => Error::Tls(format!("handshake with {domain} failed: {err}")),
    }
}

impl Default for TlsConnector {
    fn default() -> Self {
        Self::new(client_config_with_native_roots())
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_shared() {
        let connector = TlsConnector::default();
        let clone = connector.clone();
        assert!(Arc::ptr_eq(&connector.config, &clone.config));
    }

    #[test]
    fn test_invalid_domain_rejected() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();

        let err = TlsConnector::default()
            .connect("not a domain!", stream)
            .unwrap_err();
        assert!(matches!(err, Error::Tls(msg) if msg.contains("invalid DNS name")));
    }

    #[test]
    fn test_handshake_failure_is_tls_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = std::thread::spawn(move || {
            // Not a TLS server: answer the ClientHello with garbage.
            let (mut sock, _) = listener.accept().unwrap();
            let _ = std::io::Write::write_all(&mut sock, b"HTTP/1.1 400 Bad Request\r\n\r\n");
        });

        let stream = TcpStream::connect(addr).unwrap();
        let err = TlsConnector::default().connect("localhost", stream).unwrap_err();
        assert!(matches!(err, Error::Tls(_)));
        peer.join().unwrap();
    }

    #[test]
    fn test_stalled_handshake_is_timeout() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = std::thread::spawn(move || {
            // Accept and never answer the ClientHello.
            let (sock, _) = listener.accept().unwrap();
            std::thread::sleep(std::time::Duration::from_millis(500));
            drop(sock);
        });

        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(std::time::Duration::from_millis(100)))
            .unwrap();
        let err = TlsConnector::default().connect("localhost", stream).unwrap_err();
        assert!(err.is_timeout(), "{err:?}");
        peer.join().unwrap();
    }
}
