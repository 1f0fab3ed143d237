//! Transport over a plain socket.

use std::fs::File;
use std::io::IoSlice;

use tracing::trace;

use crate::protocol::TransportError;
use crate::transport::{Socket, Transport};

#[derive(Debug)]
pub struct PlainTransport<S> {
    socket: S,
}

impl<S: Socket> PlainTransport<S> {
    pub fn new(socket: S) -> Self {
        Self { socket }
    }

    pub fn into_inner(self) -> S {
        self.socket
    }
}

impl<S: Socket> Transport for PlainTransport<S> {
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.socket.read(buf).map_err(TransportError::from_io)
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        self.socket.write(buf).map_err(TransportError::from_io)
    }

    fn send_vectored(&mut self, bufs: &[IoSlice<'_>]) -> Result<usize, TransportError> {
        self.socket.write_vectored(bufs).map_err(TransportError::from_io)
    }

    fn send_file(&mut self, file: &File, offset: u64, len: usize) -> Result<usize, TransportError> {
        match self.socket.sendfile(file, offset, len) {
            Ok(sent) => Ok(sent),
            Err(e) if matches!(e.raw_os_error(), Some(libc::EINVAL | libc::EOPNOTSUPP | libc::ENOSYS)) => {
                trace!(cause = %e, "sendfile not usable, falling back to buffered reads");
                Err(TransportError::Unsupported)
            }
            Err(e) if e.kind() == std::io::ErrorKind::Unsupported => Err(TransportError::Unsupported),
            Err(e) => Err(TransportError::from_io(e)),
        }
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        self.socket.shutdown_write().map_err(TransportError::from_io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};

    #[test]
    fn tcp_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let mut transport = PlainTransport::new(server);

        let mut buf = [0u8; 16];
        assert!(matches!(transport.recv(&mut buf), Err(TransportError::Again)));

        client.write_all(b"ping").unwrap();
        client.flush().unwrap();
        let mut received = 0;
        while received == 0 {
            match transport.recv(&mut buf) {
                Ok(n) => received = n,
                Err(TransportError::Again) => std::thread::yield_now(),
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        assert_eq!(&buf[..received], b"ping");

        assert_eq!(transport.send(b"pong").unwrap(), 4);
        transport.shutdown().unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).unwrap();
        assert_eq!(reply, b"pong");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn sendfile_to_socket() {
        use std::io::Seek;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        let mut transport = PlainTransport::new(server);

        let path = std::env::temp_dir().join(format!("micro-httpd-sendfile-{}", std::process::id()));
        let mut file = std::fs::OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&path).unwrap();
        file.write_all(b"0123456789").unwrap();
        file.rewind().unwrap();

        let sent = transport.send_file(&file, 2, 5).unwrap();
        assert_eq!(sent, 5);
        transport.shutdown().unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).unwrap();
        assert_eq!(reply, b"23456");
        std::fs::remove_file(path).unwrap();
    }
}
