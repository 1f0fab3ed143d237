//! Listen socket setup.

use std::io;
use std::net::{SocketAddr, TcpListener};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use crate::config::{DaemonOptions, FastOpenMethod};
use crate::protocol::DaemonError;

/// Binds a non-blocking listener on `addr` configured from `options`.
pub fn bind(addr: SocketAddr, options: &DaemonOptions) -> Result<TcpListener, DaemonError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)).map_err(DaemonError::io)?;
    socket.set_reuse_address(true).map_err(DaemonError::io)?;
    socket.set_nonblocking(true).map_err(DaemonError::io)?;
    configure_fast_open(&socket, options.fast_open_method)?;
    socket.bind(&addr.into()).map_err(DaemonError::io)?;
    let backlog = i32::try_from(options.listen_backlog).unwrap_or(i32::MAX);
    socket.listen(backlog).map_err(DaemonError::io)?;
    debug!(%addr, backlog, "listen socket bound");
    Ok(socket.into())
}

fn configure_fast_open(socket: &Socket, method: FastOpenMethod) -> Result<(), DaemonError> {
    match method {
        FastOpenMethod::Off => Ok(()),
        FastOpenMethod::Auto => {
            if let Err(e) = enable_fast_open(socket) {
                warn!(cause = %e, "tcp fast open unavailable");
            }
            Ok(())
        }
        FastOpenMethod::Require => enable_fast_open(socket).map_err(DaemonError::io),
    }
}

#[cfg(target_os = "linux")]
fn enable_fast_open(socket: &Socket) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    // pending fast-open handshakes
    let queue: libc::c_int = 16;
    #[allow(clippy::cast_possible_truncation, reason = "size of a c_int")]
    let len = size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: the descriptor is owned by `socket` and `queue` outlives the call
    let rc = unsafe {
        libc::setsockopt(socket.as_raw_fd(), libc::IPPROTO_TCP, libc::TCP_FASTOPEN, (&raw const queue).cast(), len)
    };
    if rc == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}

#[cfg(not(target_os = "linux"))]
fn enable_fast_open(_socket: &Socket) -> io::Result<()> {
    Err(io::ErrorKind::Unsupported.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_ephemeral_port() {
        let options = DaemonOptions::default();
        let listener = bind("127.0.0.1:0".parse().unwrap(), &options).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        // non-blocking: nothing pending
        assert_eq!(listener.accept().unwrap_err().kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn auto_fast_open_never_fails_bind() {
        let options = DaemonOptions::builder().fast_open_method(FastOpenMethod::Auto).build().unwrap();
        assert!(bind("127.0.0.1:0".parse().unwrap(), &options).is_ok());
    }
}
