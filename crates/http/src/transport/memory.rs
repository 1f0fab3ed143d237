//! In-memory transport: the connection on one end, the test or benchmark on the other.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::protocol::TransportError;
use crate::transport::Transport;

#[derive(Debug, Default)]
struct Pipe {
    input: VecDeque<u8>,
    output: Vec<u8>,
    /// The peer will not send anything more.
    peer_closed: bool,
    reset: bool,
    /// The connection shut its sending side down.
    shut_down: bool,
    /// Upper bound of bytes accepted per `send`, `None` for unlimited.
    send_limit: Option<usize>,
}

fn lock(pipe: &Mutex<Pipe>) -> MutexGuard<'_, Pipe> {
    pipe.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The connection side of an in-memory pipe.
#[derive(Debug)]
pub struct MemoryTransport {
    pipe: Arc<Mutex<Pipe>>,
}

/// The client side of an in-memory pipe.
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    pipe: Arc<Mutex<Pipe>>,
}

pub fn memory_pair() -> (MemoryTransport, MemoryPeer) {
    let pipe = Arc::new(Mutex::new(Pipe::default()));
    (MemoryTransport { pipe: Arc::clone(&pipe) }, MemoryPeer { pipe })
}

impl MemoryPeer {
    /// Queues bytes for the connection to receive.
    pub fn send(&self, bytes: &[u8]) {
        lock(&self.pipe).input.extend(bytes);
    }

    /// Closes the client's sending side, the connection receives end-of-stream.
    pub fn close(&self) {
        lock(&self.pipe).peer_closed = true;
    }

    /// Every further transport call fails with a reset.
    pub fn reset(&self) {
        lock(&self.pipe).reset = true;
    }

    /// Takes everything the connection sent so far.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut lock(&self.pipe).output)
    }

    pub fn unread_input(&self) -> usize {
        lock(&self.pipe).input.len()
    }

    /// Limits how many bytes one `send` call accepts, `Some(0)` makes sends block.
    pub fn set_send_limit(&self, limit: Option<usize>) {
        lock(&self.pipe).send_limit = limit;
    }

    /// The connection shut its sending side down.
    pub fn is_shut_down(&self) -> bool {
        lock(&self.pipe).shut_down
    }
}

impl Transport for MemoryTransport {
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut pipe = lock(&self.pipe);
        if pipe.reset {
            return Err(TransportError::ConnReset);
        }
        if pipe.input.is_empty() {
            return if pipe.peer_closed { Ok(0) } else { Err(TransportError::Again) };
        }
        let n = buf.len().min(pipe.input.len());
        for (dst, src) in buf.iter_mut().zip(pipe.input.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let mut pipe = lock(&self.pipe);
        if pipe.reset || pipe.shut_down {
            return Err(TransportError::ConnReset);
        }
        let n = pipe.send_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        if n == 0 && !buf.is_empty() {
            return Err(TransportError::Again);
        }
        pipe.output.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn has_pending(&self) -> bool {
        !lock(&self.pipe).input.is_empty()
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        lock(&self.pipe).shut_down = true;
        Ok(())
    }
}
