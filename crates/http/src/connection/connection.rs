use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::config::Strictness;
use crate::connection::receive::Receiver;
use crate::connection::reply::Replier;
use crate::connection::state::{ConnReuse, InterestInput, event_interest};
use crate::connection::{EventInterest, Itc, State, SuspendState};
use crate::daemon::DaemonContext;
use crate::pool::{MemoryPool, PoolSlice};
use crate::protocol::request::Request;
use crate::protocol::{CloseReason, TransportError};
use crate::transport::Transport;

/// Retry delay for a content reader that had nothing ready.
pub(super) const NOT_READY_RETRY: Duration = Duration::from_millis(10);

/// Observer of state transitions, see [`Connection::set_state_observer`].
pub type StateObserver = Box<dyn FnMut(State) + Send>;

/// One client connection and its protocol state.
///
/// The read buffer and, once the request is received, the write buffer are the last
/// front allocation of the connection pool. Request strings stay in the consumed part
/// of the read buffer (`..held`) or at the end of the pool until the reply was sent.
pub struct Connection<T: Transport> {
    /// `None` once handed to an upgrade handler.
    pub(super) transport: Option<T>,
    pub(super) context: Arc<DaemonContext>,
    pub(super) pool: MemoryPool,
    pub(super) state: State,
    pub(super) request: Request,
    pub(super) read_buf: PoolSlice,
    /// Bytes at the start of the read buffer that belong to the current request.
    pub(super) held: usize,
    /// Valid bytes in the read buffer, `held..read_len` are not processed yet.
    pub(super) read_len: usize,
    pub(super) receiver: Receiver,
    pub(super) replier: Replier,
    pub(super) read_closed: bool,
    pub(super) write_closed: bool,
    /// The rest of the request content is not read, the connection cannot be reused.
    pub(super) discard_request: bool,
    /// The reply is an error page, the connection closes after it.
    pub(super) stop_with_error: bool,
    pub(super) conn_reuse: ConnReuse,
    pub(super) suspend: Arc<SuspendState>,
    pub(super) last_activity: Instant,
    /// Seen suspended by the last `on_idle`.
    parked: bool,
    handshake_done: bool,
    close_reason: Option<CloseReason>,
    observer: Option<StateObserver>,
}

impl<T: Transport> Connection<T> {
    /// Ends the connection, the handler learns the `reason` exactly once.
    pub(crate) fn close(&mut self, reason: CloseReason) {
        if self.state == State::Closed {
            return;
        }
        if reason.is_error() {
            debug!(?reason, state = ?self.state, "closing connection");
        } else {
            trace!(?reason, "closing connection");
        }
        if reason != CloseReason::TransportReset {
            if let Some(transport) = self.transport.as_mut() {
                if let Err(e) = transport.shutdown() {
                    trace!(cause = %e, "transport shutdown failed");
                }
            }
        }
        self.receiver.release(&self.context);
        self.replier.response = None;
        self.write_closed = true;
        self.set_state(State::Closed);
        self.close_reason = Some(reason);
        self.context.handler.on_connection_closed(reason);
    }

    pub(super) fn set_state(&mut self, state: State) {
        trace!(from = ?self.state, to = ?state, "state transition");
        self.state = state;
        if let Some(observer) = self.observer.as_mut() {
            observer(state);
        }
    }
}

impl<T: Transport + 'static> Connection<T> {
    pub(crate) fn new(transport: T, context: Arc<DaemonContext>, itc: Option<Arc<dyn Itc>>) -> Self {
        let mut pool = MemoryPool::new(context.options.connection_memory_limit);
        let read_buf = pool.allocate(pool.size() / 2, false).unwrap_or_default();
        Self {
            transport: Some(transport),
            context,
            pool,
            state: State::Init,
            request: Request::default(),
            read_buf,
            held: 0,
            read_len: 0,
            receiver: Receiver::default(),
            replier: Replier::default(),
            read_closed: false,
            write_closed: false,
            discard_request: false,
            stop_with_error: false,
            conn_reuse: ConnReuse::MayReuse,
            suspend: Arc::new(SuspendState::new(itc)),
            last_activity: Instant::now(),
            parked: false,
            handshake_done: false,
            close_reason: None,
            observer: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Why the connection closed, `None` while it is open.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    /// Calls `observer` with every state the connection enters.
    pub fn set_state_observer(&mut self, observer: impl FnMut(State) + Send + 'static) {
        self.observer = Some(Box::new(observer));
    }

    /// Closes the connection because its daemon stops.
    pub fn shutdown(&mut self) {
        self.close(CloseReason::DaemonShutdown);
    }

    pub(super) fn strictness(&self) -> Strictness {
        self.context.options.strictness_level
    }

    pub(super) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// The transport became readable.
    pub fn on_readable(&mut self) {
        if self.state == State::Closed || !self.drive_handshake() {
            return;
        }
        if !self.state.is_receiving() || self.read_closed {
            return;
        }
        let fast_track = self.state == State::Init && self.read_len == self.held;
        if !self.fill_read_buffer(false) {
            return;
        }

        if fast_track {
            // a request that arrived in one read is answered without another poll
            self.on_idle();
            if self.state.is_sending() {
                trace!("fast track reply");
                self.on_writable();
            }
        }
    }

    /// The transport became writable.
    pub fn on_writable(&mut self) {
        if self.state == State::Closed || !self.drive_handshake() {
            return;
        }
        if let Some(transport) = self.transport.as_mut() {
            if transport.wants_write() {
                match transport.flush() {
                    Ok(()) => {}
                    Err(TransportError::Again) => return,
                    Err(e) => {
                        self.close_on_send_error(e);
                        return;
                    }
                }
            }
        }
        match self.state {
            State::ContinueSending => self.send_continue(),
            State::HeadersSending | State::ChunkedBodyReady | State::FootersSending => self.send_write_buffer(),
            State::UnchunkedBodyReady => self.send_body_piece(),
            _ => {}
        }
    }

    /// Runs every transition that needs no I/O, until blocked.
    pub fn on_idle(&mut self) {
        loop {
            if self.state == State::Closed {
                return;
            }
            if self.suspend.is_suspended() {
                self.parked = true;
                return;
            }
            if std::mem::take(&mut self.parked) {
                // the idle timeout restarts once resumed
                self.touch();
            }
            if let Some(at) = self.replier.retry_at {
                if Instant::now() < at {
                    return;
                }
                self.replier.retry_at = None;
            }
            if self.timed_out() {
                debug!(idle = ?self.last_activity.elapsed(), "idle timeout");
                self.close(CloseReason::Timeout);
                return;
            }
            if !self.handshake_done {
                return;
            }

            let progressed = match self.state {
                State::Init => self.start_request(),
                State::ReqLineReceiving => self.receive_request_line(),
                State::ReqLineReceived => {
                    self.set_state(State::ReqHeadersReceiving);
                    true
                }
                State::ReqHeadersReceiving => self.receive_fields(false),
                State::HeadersReceived => self.process_headers(),
                State::HeadersProcessed => self.call_application(),
                State::ContinueSent => {
                    self.set_state(State::BodyReceiving);
                    true
                }
                State::BodyReceiving => self.receive_body(),
                State::BodyReceived => self.body_received(),
                State::FootersReceiving => self.receive_fields(true),
                State::FootersReceived => {
                    self.set_state(State::FullReqReceived);
                    true
                }
                State::FullReqReceived => self.finish_upload(),
                State::ReqRecvFinished => self.request_finished(),
                State::StartReply => self.start_reply(),
                State::HeadersSent => self.headers_sent(),
                State::UnchunkedBodyUnready => self.prepare_unchunked(),
                State::ChunkedBodyUnready => self.prepare_chunk(),
                State::ChunkedBodySent => self.prepare_last_chunk(),
                State::FullReplySent => self.finish_reply(),
                State::ContinueSending
                | State::HeadersSending
                | State::UnchunkedBodyReady
                | State::ChunkedBodyReady
                | State::FootersSending
                | State::Closed => false,
            };
            if !progressed {
                return;
            }
        }
    }

    /// What the event loop should wait for.
    pub fn event_interest(&self) -> EventInterest {
        let transport_wants_write = self.transport.as_ref().is_some_and(Transport::wants_write);
        if !self.handshake_done && self.state != State::Closed {
            return if transport_wants_write { EventInterest::Write } else { EventInterest::Read };
        }
        event_interest(InterestInput {
            state: self.state,
            read_closed: self.read_closed,
            write_closed: self.write_closed,
            blocked: self.suspend.is_suspended() || self.replier.retry_at.is_some(),
            read_space: self.read_len < self.read_buf.len() || self.pool.get_free() > 0,
            transport_wants_write,
        })
    }

    /// When [`on_idle`](Self::on_idle) must run even without I/O readiness.
    pub fn deadline(&self) -> Option<Instant> {
        if self.state == State::Closed {
            return None;
        }
        if let Some(at) = self.replier.retry_at {
            return Some(at);
        }
        if self.suspend.is_suspended() {
            return None;
        }
        self.context.options.idle_timeout().map(|timeout| self.last_activity + timeout)
    }

    fn timed_out(&self) -> bool {
        self.context.options.idle_timeout().is_some_and(|timeout| self.last_activity.elapsed() >= timeout)
    }

    /// `true` once the transport handshake is complete.
    fn drive_handshake(&mut self) -> bool {
        if self.handshake_done {
            return true;
        }
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };
        match transport.handshake() {
            Ok(true) => {
                self.handshake_done = true;
                self.touch();
                true
            }
            Ok(false) => false,
            Err(TransportError::ConnReset) => {
                self.close(CloseReason::TransportReset);
                false
            }
            Err(e) => {
                warn!(cause = %e, "handshake failed");
                self.close(CloseReason::TransportError);
                false
            }
        }
    }

    pub(super) fn close_on_send_error(&mut self, e: TransportError) {
        match e {
            TransportError::ConnReset => self.close(CloseReason::TransportReset),
            e => {
                warn!(cause = %e, "send failed");
                self.close(CloseReason::TransportError);
            }
        }
    }

    /// Makes room for at least one more byte in the read buffer.
    pub(super) fn grow_read_buffer(&mut self) -> bool {
        if self.read_len < self.read_buf.len() {
            return true;
        }
        let free = self.pool.get_free();
        if free == 0 || !self.pool.is_resizable_in_place(&self.read_buf) {
            return false;
        }
        let step = self.context.options.connection_memory_increment.max(1);
        let grown = if step < free { self.pool.reallocate(self.read_buf, self.read_buf.len() + step) } else { None };
        match grown.or_else(|| self.pool.reallocate(self.read_buf, self.read_buf.len() + free)) {
            Some(read_buf) => {
                trace!(len = read_buf.len(), "grew read buffer");
                self.read_buf = read_buf;
                true
            }
            None => false,
        }
    }

    /// Receives into the free part of the read buffer without growing it.
    ///
    /// With `pending_only` nothing is received unless the transport already holds input.
    /// Returns `false` once the connection closed.
    pub(super) fn fill_read_buffer(&mut self, pending_only: bool) -> bool {
        let mut more = !pending_only || self.transport.as_ref().is_some_and(Transport::has_pending);
        while more && self.read_len < self.read_buf.len() {
            let Some(transport) = self.transport.as_mut() else {
                return false;
            };
            let buf = &mut self.pool.bytes_mut(self.read_buf)[self.read_len..];
            match transport.recv(buf) {
                Ok(0) => {
                    debug!("client closed its sending side");
                    self.read_closed = true;
                    break;
                }
                Ok(n) => {
                    trace!(len = n, "received");
                    self.read_len += n;
                    self.touch();
                }
                Err(TransportError::Again) => break,
                Err(TransportError::ConnReset) => {
                    self.close(CloseReason::TransportReset);
                    return false;
                }
                Err(e) => {
                    warn!(cause = %e, "receive failed");
                    self.close(CloseReason::TransportError);
                    return false;
                }
            }
            more = self.transport.as_ref().is_some_and(Transport::has_pending);
        }
        true
    }

    /// Receives input the transport already holds, once the parser made room for it.
    ///
    /// Such input signals no readiness, `true` when parsing can go on right away.
    pub(super) fn read_held_input(&mut self) -> bool {
        let before = self.read_len;
        self.fill_read_buffer(true) && (self.read_len > before || self.read_closed)
    }

    /// Absolute pool slice for `range` of the read buffer.
    pub(super) fn read_slice(&self, start: usize, end: usize) -> PoolSlice {
        self.read_buf.slice(start..end)
    }

    /// Removes `n` unprocessed bytes at `held`, moving the rest down.
    pub(super) fn drop_input(&mut self, n: usize) {
        debug_assert!(self.held + n <= self.read_len);
        let base = self.read_buf.offset();
        if self.held + n < self.read_len {
            self.pool.copy_within(base + self.held + n..base + self.read_len, base + self.held);
        }
        self.read_len -= n;
    }
}

impl<T: Transport> Drop for Connection<T> {
    fn drop(&mut self) {
        if self.state != State::Closed {
            self.close(CloseReason::DaemonShutdown);
        }
    }
}

impl<T: Transport> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("read_buf", &self.read_buf)
            .field("held", &self.held)
            .field("read_len", &self.read_len)
            .field("read_closed", &self.read_closed)
            .field("conn_reuse", &self.conn_reuse)
            .field("close_reason", &self.close_reason)
            .finish_non_exhaustive()
    }
}
