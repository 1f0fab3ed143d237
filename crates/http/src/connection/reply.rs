//! Sending side of a connection: the response head and the content, then reuse,
//! upgrade or close.

use std::io::IoSlice;
use std::time::Instant;

use bytes::Bytes;
use http::StatusCode;
use tracing::{debug, trace, warn};

use crate::codec::body::chunked_encoder::{CHUNK_SUFFIX_LEN, chunk_prefix_len, encode_last_chunk, frame_chunk};
use crate::codec::header::header_encoder::{BodyMode, HeadContext, encode_head};
use crate::connection::State;
use crate::connection::connection::{Connection, NOT_READY_RETRY};
use crate::connection::receive::Receiver;
use crate::connection::state::ConnReuse;
use crate::date::http_date;
use crate::pool::PoolSlice;
use crate::protocol::request::Request;
use crate::protocol::{CloseReason, Content, ContentRead, Method, SharedResponse, TransportError, Upgraded};
use crate::transport::Transport;

/// Upper bound of buffers handed to one vectored send.
const MAX_IOV: usize = 16;

/// What the next writable event sends while in `UnchunkedBodyReady`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Piece {
    /// `send_pos..append_pos` of the write buffer.
    #[default]
    Buffered,
    /// Straight from an in-memory content source.
    Direct,
    /// A file region through `sendfile`.
    File,
}

/// Scratch state of the response being sent.
#[derive(Debug)]
pub(super) struct Replier {
    pub response: Option<SharedResponse>,
    /// A content reader had nothing ready, poll it again at this instant.
    pub retry_at: Option<Instant>,
    write_buf: PoolSlice,
    send_pos: usize,
    append_pos: usize,
    body: BodyMode,
    /// Content bytes sent or framed so far.
    content_pos: u64,
    piece: Piece,
    /// `sendfile` is not available on this transport.
    file_fallback: bool,
}

impl Default for Replier {
    fn default() -> Self {
        Self {
            response: None,
            retry_at: None,
            write_buf: PoolSlice::EMPTY,
            send_pos: 0,
            append_pos: 0,
            body: BodyMode::None,
            content_pos: 0,
            piece: Piece::Buffered,
            file_fallback: false,
        }
    }
}

/// Buffers of `parts` from content position `pos` on.
fn io_slices(parts: &[Bytes], pos: u64) -> Vec<IoSlice<'_>> {
    let mut skip = pos;
    let mut slices = Vec::with_capacity(parts.len().min(MAX_IOV));
    for part in parts {
        let len = part.len() as u64;
        if skip >= len {
            skip -= len;
            continue;
        }
        // skip < len, so it fits a usize
        slices.push(IoSlice::new(&part[skip as usize..]));
        skip = 0;
        if slices.len() == MAX_IOV {
            break;
        }
    }
    slices
}

impl<T: Transport + 'static> Connection<T> {
    pub(super) fn start_reply(&mut self) -> bool {
        let Some(response) = self.replier.response.clone() else {
            self.close(CloseReason::AppGenError);
            return false;
        };
        let upgrade = response.status() == StatusCode::SWITCHING_PROTOCOLS;
        if upgrade {
            self.conn_reuse = ConnReuse::MustUpgrade;
        }

        // the read buffer keeps the request strings and pipelined bytes, the rest is for writing
        if let Some(read_buf) = self.pool.reallocate(self.read_buf, self.read_len) {
            self.read_buf = read_buf;
        }
        let write_buf = self.pool.allocate(self.pool.get_free(), false).unwrap_or_default();

        let options = &self.context.options;
        let ctx = HeadContext {
            version: self.request.version,
            head_request: self.request.method == Method::Head,
            keep_alive: self.conn_reuse == ConnReuse::MayReuse && !self.discard_request && !self.read_closed,
            upgrade,
            date: (!options.suppress_date).then(http_date),
            default_content_type: options.default_content_type.as_deref(),
        };
        let head = match encode_head(&response, &ctx, self.pool.bytes_mut(write_buf)) {
            Ok(head) => head,
            Err(e) => {
                warn!(cause = %e, free = write_buf.len(), "response head does not fit the connection pool");
                self.close(CloseReason::OutOfMemory);
                return false;
            }
        };
        if !head.keep_alive && self.conn_reuse == ConnReuse::MayReuse {
            self.conn_reuse = ConnReuse::MustClose;
        }

        let replier = &mut self.replier;
        replier.write_buf = write_buf;
        replier.send_pos = 0;
        replier.append_pos = head.len;
        replier.body = head.body;
        replier.content_pos = 0;
        replier.piece = Piece::Buffered;
        replier.file_fallback = false;

        // small buffers go out with the head
        if let (BodyMode::Length(n), Content::Buffer(bytes)) = (head.body, response.content()) {
            let end = head.len + bytes.len();
            if end <= write_buf.len() {
                self.pool.bytes_mut(write_buf)[head.len..end].copy_from_slice(bytes);
                replier.append_pos = end;
                replier.content_pos = n;
            }
        }
        debug!(status = response.status().as_u16(), body = ?head.body, keep_alive = head.keep_alive, "sending response");
        self.set_state(State::HeadersSending);
        true
    }

    /// Drains `send_pos..append_pos` of the write buffer.
    pub(super) fn send_write_buffer(&mut self) {
        while self.replier.send_pos < self.replier.append_pos {
            let Some(transport) = self.transport.as_mut() else {
                return;
            };
            let buf = &self.pool.bytes(self.replier.write_buf)[self.replier.send_pos..self.replier.append_pos];
            match transport.send(buf) {
                Ok(0) | Err(TransportError::Again) => return,
                Ok(n) => {
                    trace!(len = n, "sent");
                    self.replier.send_pos += n;
                    self.touch();
                }
                Err(e) => {
                    self.close_on_send_error(e);
                    return;
                }
            }
        }
        self.replier.send_pos = 0;
        self.replier.append_pos = 0;
        let next = match self.state {
            State::HeadersSending => State::HeadersSent,
            State::ChunkedBodyReady => State::ChunkedBodyUnready,
            State::FootersSending => State::FullReplySent,
            other => other,
        };
        self.set_state(next);
    }

    pub(super) fn headers_sent(&mut self) -> bool {
        let next = match self.replier.body {
            BodyMode::None => State::FullReplySent,
            BodyMode::Length(n) if self.replier.content_pos >= n => State::FullReplySent,
            BodyMode::Length(_) | BodyMode::UntilClose => State::UnchunkedBodyUnready,
            BodyMode::Chunked => State::ChunkedBodyUnready,
        };
        self.set_state(next);
        true
    }

    /// Chooses how the next piece of unchunked content is sent, reading it into the
    /// write buffer when no zero-copy path applies.
    pub(super) fn prepare_unchunked(&mut self) -> bool {
        let Some(response) = self.replier.response.clone() else {
            self.close(CloseReason::AppGenError);
            return false;
        };
        if let BodyMode::Length(n) = self.replier.body {
            if self.replier.content_pos >= n {
                self.set_state(State::FullReplySent);
                return true;
            }
        }

        let piece = match response.content() {
            Content::Buffer(_) | Content::Iovec(_) => Piece::Direct,
            Content::File { .. } if !self.replier.file_fallback => Piece::File,
            _ => Piece::Buffered,
        };
        if piece == Piece::Buffered {
            let buf = self.pool.bytes_mut(self.replier.write_buf);
            match response.content().read_at(self.replier.content_pos, buf) {
                ContentRead::Data(0) | ContentRead::NotReady => {
                    self.retry_later();
                    return false;
                }
                ContentRead::Data(n) => {
                    self.replier.send_pos = 0;
                    self.replier.append_pos = n;
                }
                ContentRead::EndOfStream => return self.content_ended(),
                ContentRead::Error => {
                    warn!(sent = self.replier.content_pos, "content reader failed");
                    self.close(CloseReason::AppGenError);
                    return false;
                }
            }
        }
        self.replier.piece = piece;
        self.set_state(State::UnchunkedBodyReady);
        true
    }

    /// Sends unchunked content until the transport is full or a piece is drained.
    pub(super) fn send_body_piece(&mut self) {
        let Some(response) = self.replier.response.clone() else {
            return;
        };
        let chunk_size = self.context.options.file_chunk_size();
        loop {
            let Some(transport) = self.transport.as_mut() else {
                return;
            };
            let replier = &mut self.replier;
            let pos = replier.content_pos;
            let sent = match (replier.piece, response.content()) {
                (Piece::Buffered, _) => {
                    if replier.send_pos == replier.append_pos {
                        self.set_state(State::UnchunkedBodyUnready);
                        return;
                    }
                    transport.send(&self.pool.bytes(replier.write_buf)[replier.send_pos..replier.append_pos])
                }
                (Piece::Direct, Content::Buffer(bytes)) => transport.send(&bytes[usize::try_from(pos).unwrap_or(bytes.len())..]),
                (Piece::Direct, Content::Iovec(parts)) => transport.send_vectored(&io_slices(parts, pos)),
                (Piece::File, Content::File { file, offset, size }) => {
                    let len = usize::try_from(size - pos).map_or(chunk_size, |left| left.min(chunk_size));
                    transport.send_file(file, offset + pos, len)
                }
                (piece, content) => {
                    warn!(?piece, ?content, "content source changed while sending");
                    self.close(CloseReason::AppGenError);
                    return;
                }
            };

            match sent {
                Ok(0) if replier.piece == Piece::File => {
                    warn!(sent = pos, "file ended before the announced size");
                    self.close(CloseReason::AppGenError);
                    return;
                }
                Ok(0) | Err(TransportError::Again) => return,
                Ok(n) => {
                    if replier.piece == Piece::Buffered {
                        replier.send_pos += n;
                    }
                    replier.content_pos += n as u64;
                    trace!(len = n, total = replier.content_pos, "sent content");
                    self.touch();
                }
                Err(TransportError::Unsupported) if replier.piece == Piece::File => {
                    debug!("sendfile not available, reading the file instead");
                    replier.file_fallback = true;
                    self.set_state(State::UnchunkedBodyUnready);
                    return;
                }
                Err(e) => {
                    self.close_on_send_error(e);
                    return;
                }
            }

            if let BodyMode::Length(n) = self.replier.body {
                if self.replier.content_pos >= n {
                    self.set_state(State::FullReplySent);
                    return;
                }
            }
        }
    }

    /// Reads the next chunk payload and frames it in place.
    pub(super) fn prepare_chunk(&mut self) -> bool {
        let Some(response) = self.replier.response.clone() else {
            self.close(CloseReason::AppGenError);
            return false;
        };
        let capacity = self.replier.write_buf.len();
        let prefix = chunk_prefix_len(capacity);
        let Some(max_payload) = capacity.checked_sub(prefix + CHUNK_SUFFIX_LEN).filter(|max| *max > 0) else {
            warn!(capacity, "no room for a chunk in the connection pool");
            self.close(CloseReason::OutOfMemory);
            return false;
        };

        let buf = self.pool.bytes_mut(self.replier.write_buf);
        match response.content().read_at(self.replier.content_pos, &mut buf[prefix..prefix + max_payload]) {
            ContentRead::Data(0) | ContentRead::NotReady => {
                self.retry_later();
                false
            }
            ContentRead::Data(n) => {
                let range = frame_chunk(buf, prefix, n);
                self.replier.send_pos = range.start;
                self.replier.append_pos = range.end;
                self.replier.content_pos += n as u64;
                self.set_state(State::ChunkedBodyReady);
                true
            }
            ContentRead::EndOfStream => {
                let size = response.content().size();
                if size.is_some_and(|size| self.replier.content_pos < size) {
                    warn!(sent = self.replier.content_pos, ?size, "content ended before its announced size");
                    self.close(CloseReason::AppGenError);
                    return false;
                }
                self.set_state(State::ChunkedBodySent);
                true
            }
            ContentRead::Error => {
                warn!(sent = self.replier.content_pos, "content reader failed");
                self.close(CloseReason::AppGenError);
                false
            }
        }
    }

    /// Writes the last chunk and the footers.
    pub(super) fn prepare_last_chunk(&mut self) -> bool {
        let Some(response) = self.replier.response.clone() else {
            self.close(CloseReason::AppGenError);
            return false;
        };
        match encode_last_chunk(response.footers(), self.pool.bytes_mut(self.replier.write_buf)) {
            Ok(n) => {
                self.replier.send_pos = 0;
                self.replier.append_pos = n;
                self.set_state(State::FootersSending);
                true
            }
            Err(e) => {
                warn!(cause = %e, "footers do not fit the connection pool");
                self.close(CloseReason::OutOfMemory);
                false
            }
        }
    }

    pub(super) fn finish_reply(&mut self) -> bool {
        debug!(content = self.replier.content_pos, reuse = ?self.conn_reuse, "response sent");
        if self.stop_with_error {
            self.close(CloseReason::ProtocolError);
            return false;
        }
        match self.conn_reuse {
            ConnReuse::MustUpgrade => {
                self.hand_over();
                false
            }
            ConnReuse::MayReuse if !self.read_closed && !self.discard_request => {
                self.prepare_next_request();
                true
            }
            ConnReuse::MayReuse | ConnReuse::MustClose => {
                self.close(CloseReason::Completed);
                false
            }
        }
    }

    /// Wipes the pool for the next request, keeping pipelined bytes.
    fn prepare_next_request(&mut self) {
        let pipelined = self.read_len - self.held;
        let preserve = self.read_buf.slice(self.held..self.read_len);
        self.read_buf = self.pool.reset(preserve, pipelined, self.pool.size() / 2);
        self.held = 0;
        self.read_len = pipelined;
        self.request = Request::default();
        self.receiver = Receiver::default();
        self.replier = Replier::default();
        self.suspend.clear();
        trace!(pipelined, "ready for the next request");
        self.set_state(State::Init);
    }

    /// Gives the transport to the upgrade handler of the response.
    fn hand_over(&mut self) {
        let response = self.replier.response.take();
        let transport = self.transport.take();
        let read_ahead = Bytes::copy_from_slice(&self.pool.bytes(self.read_buf)[self.held..self.read_len]);
        match (response, transport) {
            (Some(response), Some(transport)) => match response.upgrade_handler() {
                Some(handler) => {
                    debug!(read_ahead = read_ahead.len(), "handing the connection to its upgrade handler");
                    handler(Upgraded { transport: Box::new(transport), read_ahead });
                }
                None => warn!("switching protocols without an upgrade handler"),
            },
            _ => warn!("nothing to hand over after switching protocols"),
        }
        self.close(CloseReason::Completed);
    }

    fn retry_later(&mut self) {
        trace!("content not ready, polling again later");
        self.replier.retry_at = Some(Instant::now() + NOT_READY_RETRY);
    }

    fn content_ended(&mut self) -> bool {
        if let BodyMode::Length(n) = self.replier.body {
            if self.replier.content_pos < n {
                warn!(sent = self.replier.content_pos, size = n, "content ended before its announced size");
                self.close(CloseReason::AppGenError);
                return false;
            }
        }
        self.set_state(State::FullReplySent);
        true
    }
}
