//! Byte transports under a connection.
//!
//! A [`Connection`](crate::connection::Connection) never touches a socket directly: it
//! talks to a [`Transport`], which is either the plain socket ([`PlainTransport`]), a TLS
//! session over it ([`tls::TlsTransport`], feature `tls`) or an in-memory pipe used by
//! tests and benchmarks ([`MemoryTransport`]).
//!
//! Every call is non-blocking from the connection's point of view: nothing to transfer
//! is reported as [`TransportError::Again`] and the connection asks its event loop for
//! readiness.

use std::fs::File;
use std::io;
use std::io::{IoSlice, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;

use crate::protocol::TransportError;

mod memory;
mod plain;
#[cfg(feature = "tls")]
pub mod tls;

pub use memory::{MemoryPeer, MemoryTransport, memory_pair};
pub use plain::PlainTransport;

/// Capability set of a connection transport.
pub trait Transport: Send {
    /// Drives the handshake, `Ok(true)` once it is complete.
    fn handshake(&mut self) -> Result<bool, TransportError> {
        Ok(true)
    }

    /// Encoded bytes wait to be written before anything else can progress.
    fn wants_write(&self) -> bool {
        false
    }

    /// Receives into `buf`, `Ok(0)` when the peer closed its side.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    fn send(&mut self, buf: &[u8]) -> Result<usize, TransportError>;

    /// Sends several buffers at once, by default only the first non-empty one.
    fn send_vectored(&mut self, bufs: &[IoSlice<'_>]) -> Result<usize, TransportError> {
        match bufs.iter().find(|b| !b.is_empty()) {
            Some(buf) => self.send(buf),
            None => Ok(0),
        }
    }

    /// Sends up to `len` bytes of `file` starting at `offset` without copying them through
    /// user space, [`TransportError::Unsupported`] asks for the buffered fallback.
    fn send_file(&mut self, _file: &File, _offset: u64, _len: usize) -> Result<usize, TransportError> {
        Err(TransportError::Unsupported)
    }

    /// Received bytes are buffered inside the transport and can be read without waiting
    /// for the socket.
    fn has_pending(&self) -> bool {
        false
    }

    /// Writes out bytes the transport buffered itself.
    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Ends the sending side.
    fn shutdown(&mut self) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn handshake(&mut self) -> Result<bool, TransportError> {
        (**self).handshake()
    }

    fn wants_write(&self) -> bool {
        (**self).wants_write()
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).recv(buf)
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        (**self).send(buf)
    }

    fn send_vectored(&mut self, bufs: &[IoSlice<'_>]) -> Result<usize, TransportError> {
        (**self).send_vectored(bufs)
    }

    fn send_file(&mut self, file: &File, offset: u64, len: usize) -> Result<usize, TransportError> {
        (**self).send_file(file, offset, len)
    }

    fn has_pending(&self) -> bool {
        (**self).has_pending()
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        (**self).flush()
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        (**self).shutdown()
    }
}

/// A non-blocking stream socket.
pub trait Socket: Read + Write + Send {
    /// Kernel-side file transfer to this socket.
    fn sendfile(&mut self, _file: &File, _offset: u64, _len: usize) -> io::Result<usize> {
        Err(io::ErrorKind::Unsupported.into())
    }

    fn shutdown_write(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Socket for TcpStream {
    fn sendfile(&mut self, file: &File, offset: u64, len: usize) -> io::Result<usize> {
        sendfile_fd(self.as_raw_fd(), file, offset, len)
    }

    fn shutdown_write(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

/// A tokio socket used through its non-blocking `try_*` calls.
///
/// The driver keeps another handle to await readiness, the connection only reads and
/// writes when the readiness it asked for was reported.
#[derive(Debug, Clone)]
pub struct TokioSocket(Arc<tokio::net::TcpStream>);

impl TokioSocket {
    pub fn new(stream: Arc<tokio::net::TcpStream>) -> Self {
        Self(stream)
    }
}

impl Read for TokioSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.try_read(buf)
    }
}

impl Write for TokioSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.try_write(buf)
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        self.0.try_write_vectored(bufs)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Socket for TokioSocket {
    fn sendfile(&mut self, file: &File, offset: u64, len: usize) -> io::Result<usize> {
        let fd = self.0.as_raw_fd();
        // try_io clears the write readiness on WouldBlock
        self.0.try_io(tokio::io::Interest::WRITABLE, || sendfile_fd(fd, file, offset, len))
    }

    fn shutdown_write(&mut self) -> io::Result<()> {
        socket2::SockRef::from(self.0.as_ref()).shutdown(Shutdown::Write)
    }
}

#[cfg(target_os = "linux")]
fn sendfile_fd(socket: RawFd, file: &File, offset: u64, len: usize) -> io::Result<usize> {
    let mut offset = libc::off64_t::try_from(offset).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: both descriptors stay open for the duration of the call and `offset` outlives it
    let sent = unsafe { libc::sendfile64(socket, file.as_raw_fd(), &raw mut offset, len) };
    usize::try_from(sent).map_err(|_negative| io::Error::last_os_error())
}

#[cfg(not(target_os = "linux"))]
fn sendfile_fd(_socket: RawFd, _file: &File, _offset: u64, _len: usize) -> io::Result<usize> {
    Err(io::ErrorKind::Unsupported.into())
}
