//! Blocking byte-stream transports.
//!
//! The protocol layer only talks to the network through [`Transport`]. The
//! crate ships [`StreamTransport`], which wraps any [`Socket`] (a plain
//! [`TcpStream`], or a rustls client stream with the `tls-rustls` feature)
//! behind a read buffer.

use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use crate::error::{Error, Result, StreamMeta};

/// A blocking duplex byte stream.
///
/// Reads are all-or-error: a stream that ends before `buf` is full reports
/// [`Error::ConnectionClosed`] if nothing arrived and [`Error::BrokenFrame`]
/// otherwise. A read or write that hits the configured timeout reports
/// [`Error::Timeout`].
pub trait Transport {
    /// Fill `buf` completely.
    ///
    /// # Errors
    ///
    /// Fails on timeout, end of stream or any other I/O error.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Read one line, terminator included, of at most `max` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`] if no terminator appears within
    /// `max` bytes, plus everything [`Transport::read_exact`] can return.
    fn read_line(&mut self, max: usize) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            self.read_exact(&mut byte)?;
            line.push(byte[0]);
            if byte[0] == b'\n' {
                return Ok(line);
            }
            if line.len() >= max {
                return Err(Error::HandshakeTooLarge {
                    size: line.len(),
                    max,
                });
            }
        }
    }

    /// Write all of `data`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PartialWrite`] if the stream stops accepting bytes.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Shut the stream down. Idempotent.
    fn close(&mut self);

    /// Apply a read and write timeout. `None` blocks indefinitely.
    ///
    /// # Errors
    ///
    /// Fails if the underlying socket rejects the option.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;

    fn is_connected(&self) -> bool;

    fn local_name(&self) -> Option<String>;

    fn remote_name(&self) -> Option<String>;

    /// Snapshot of the stream state for error reports.
    fn meta(&self) -> StreamMeta;

    /// Returns `true` if bytes are already waiting in a userspace buffer.
    fn has_buffered(&self) -> bool {
        false
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact(buf)
    }

    fn read_line(&mut self, max: usize) -> Result<Vec<u8>> {
        (**self).read_line(max)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        (**self).write(data)
    }

    fn close(&mut self) {
        (**self).close();
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        (**self).set_timeout(timeout)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn local_name(&self) -> Option<String> {
        (**self).local_name()
    }

    fn remote_name(&self) -> Option<String> {
        (**self).remote_name()
    }

    fn meta(&self) -> StreamMeta {
        (**self).meta()
    }

    fn has_buffered(&self) -> bool {
        (**self).has_buffered()
    }
}

/// A readable and writable stream backed by a TCP socket.
pub trait Socket: Read + Write {
    /// The underlying TCP socket, used for timeouts, addresses and shutdown.
    fn tcp(&self) -> &TcpStream;
}

impl Socket for TcpStream {
    fn tcp(&self) -> &TcpStream {
        self
    }
}

/// [`Transport`] over a buffered [`Socket`].
#[derive(Debug)]
pub struct StreamTransport<S: Socket> {
    inner: BufReader<S>,
    connected: bool,
    timed_out: bool,
    eof: bool,
}

/// Plain TCP transport.
pub type TcpTransport = StreamTransport<TcpStream>;

impl<S: Socket> StreamTransport<S> {
    #[must_use]
    pub fn new(socket: S) -> Self {
        Self {
            inner: BufReader::new(socket),
            connected: true,
            timed_out: false,
            eof: false,
        }
    }

    /// The wrapped socket.
    #[must_use]
    pub fn get_ref(&self) -> &S {
        self.inner.get_ref()
    }

    fn record(&mut self, err: &io::Error) {
        match err.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => self.timed_out = true,
            ErrorKind::UnexpectedEof => self.eof = true,
            _ => {}
        }
    }

    fn io_error(&mut self, err: io::Error) -> Error {
        self.record(&err);
        match err.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => Error::Timeout { meta: self.meta() },
            ErrorKind::UnexpectedEof => Error::ConnectionClosed { meta: self.meta() },
            _ => Error::Io(err.to_string()),
        }
    }

    fn short_read(&mut self, read: usize, expected: usize) -> Error {
        self.eof = true;
        if read == 0 {
            Error::ConnectionClosed { meta: self.meta() }
        } else {
            Error::BrokenFrame {
                read,
                expected,
                meta: self.meta(),
            }
        }
    }
}

impl<S: Socket> Transport for StreamTransport<S> {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.timed_out = false;

        let expected = buf.len();
        let mut read = 0;
        while read < expected {
            match self.inner.read(&mut buf[read..]) {
                Ok(0) => return Err(self.short_read(read, expected)),
                Ok(n) => read += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(self.io_error(e)),
            }
        }
        Ok(())
    }

    fn read_line(&mut self, max: usize) -> Result<Vec<u8>> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.timed_out = false;

        let mut line = Vec::new();
        loop {
            let available = match self.inner.fill_buf() {
                Ok(available) => available,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.io_error(e)),
            };
            if available.is_empty() {
                let read = line.len();
                return Err(self.short_read(read, read + 1));
            }

            let room = max.saturating_sub(line.len());
            let (taken, done) = match available.iter().position(|&b| b == b'\n') {
                Some(pos) if pos < room => (pos + 1, true),
                _ => (available.len().min(room), false),
            };
            line.extend_from_slice(&available[..taken]);
            self.inner.consume(taken);

            if done {
                return Ok(line);
            }
            if line.len() >= max {
                return Err(Error::HandshakeTooLarge {
                    size: line.len(),
                    max,
                });
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.timed_out = false;

        let mut written = 0;
        while written < data.len() {
            match self.inner.get_mut().write(&data[written..]) {
                Ok(0) => {
                    return Err(Error::PartialWrite {
                        written,
                        expected: data.len(),
                    });
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(self.io_error(e)),
            }
        }

        match self.inner.get_mut().flush() {
            Ok(()) => Ok(written),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn close(&mut self) {
        if self.connected {
            self.connected = false;
            let _ = self.inner.get_ref().tcp().shutdown(Shutdown::Both);
        }
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        // A zero duration is rejected by the socket API; treat it as "none".
        let timeout = timeout.filter(|t| !t.is_zero());
        let tcp = self.inner.get_ref().tcp();
        tcp.set_read_timeout(timeout)?;
        tcp.set_write_timeout(timeout)?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn local_name(&self) -> Option<String> {
        self.inner
            .get_ref()
            .tcp()
            .local_addr()
            .ok()
            .map(|a| a.to_string())
    }

    fn remote_name(&self) -> Option<String> {
        self.inner
            .get_ref()
            .tcp()
            .peer_addr()
            .ok()
            .map(|a| a.to_string())
    }

    fn meta(&self) -> StreamMeta {
        StreamMeta {
            timed_out: self.timed_out,
            eof: self.eof,
            local: self.local_name(),
            remote: self.remote_name(),
        }
    }

    fn has_buffered(&self) -> bool {
        !self.inner.buffer().is_empty()
    }
}
