//! Receiving side of a connection: the request head, the application call and the
//! request content.

use http::StatusCode;
use tracing::{debug, trace, warn};

use crate::codec::body::chunked_decoder::{ChunkEvent, ChunkedDecoder};
use crate::codec::header::header_decoder::{FieldLine, FieldScanner, parse_field};
use crate::codec::header::special::process_special_fields;
use crate::codec::line::scan_line;
use crate::codec::no_space::{ElementSizes, Stage, select_status};
use crate::codec::request_line::parse_request_line;
use crate::codec::url::{encode_whitespace, pct_decode_in_place, split_query_args};
use crate::connection::State;
use crate::connection::connection::Connection;
use crate::connection::state::ConnReuse;
use crate::daemon::DaemonContext;
use crate::handler::{Action, Upload, UploadAction};
use crate::pool::{LargeBuffer, PoolSlice};
use crate::protocol::field::FIELD_RECORD_SIZE;
use crate::protocol::request::Request;
use crate::protocol::{
    BodyFraming, CloseReason, FieldKind, HttpVersion, RequestError, RequestView, Response, SharedResponse, TransportError,
};
use crate::transport::Transport;
use crate::utils::is_ows;

pub(super) const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Empty lines tolerated before a request line at the default levels.
const SEVERAL_EMPTY_LINES: usize = 4;

/// Scratch state of the request being received.
#[derive(Debug, Default)]
pub(super) struct Receiver {
    line_pos: usize,
    empty_lines: usize,
    scanner: FieldScanner,
    /// A field line of the current section was seen.
    seen_field: bool,
    /// Bytes of the current field section consumed so far.
    section_size: usize,
    chunked: ChunkedDecoder,
    body_remaining: u64,
    continue_sent: usize,
    upload: Option<UploadState>,
}

impl Receiver {
    /// Drops the upload, giving its large buffer back to the daemon budget.
    pub fn release(&mut self, context: &DaemonContext) {
        if let Some(UploadState { sink: Sink::Large(mut buffer), .. }) = self.upload.take() {
            buffer.release(&context.large);
        }
    }
}

#[derive(Debug)]
struct UploadState {
    upload: Upload,
    sink: Sink,
}

/// Where content for a full upload callback is collected.
#[derive(Debug)]
enum Sink {
    /// In the read buffer, `len` bytes from `start`.
    Pool { start: usize, len: usize },
    Large(LargeBuffer),
    /// Handed to the incremental callback as it arrives.
    Incremental,
}

/// What became of content handed to [`Connection::deliver`].
enum Stored {
    Kept,
    Copied,
    Overflow { too_large: bool, copied: bool },
    Incremental,
}

impl<T: Transport + 'static> Connection<T> {
    pub(super) fn start_request(&mut self) -> bool {
        // a pipelined request may still wait inside the transport
        if self.read_len == self.held && !self.fill_read_buffer(true) {
            return false;
        }
        if self.read_len > self.held {
            self.set_state(State::ReqLineReceiving);
            return true;
        }
        if self.read_closed {
            self.close(CloseReason::ClientShutdown);
        }
        false
    }

    pub(super) fn receive_request_line(&mut self) -> bool {
        let strictness = self.strictness();
        loop {
            let buf = &mut self.pool.bytes_mut(self.read_buf)[self.held..self.read_len];
            let line = match scan_line(buf, &mut self.receiver.line_pos, strictness) {
                Ok(Some(line)) => line,
                Ok(None) => return self.need_more(Stage::RequestLine),
                Err(e) => {
                    self.fail(e);
                    return true;
                }
            };
            self.receiver.line_pos = 0;

            if line.is_empty() {
                if !self.skip_empty_line(line.next) {
                    return true;
                }
                continue;
            }

            let parsed = match parse_request_line(&buf[..line.end], strictness) {
                Ok(parsed) => parsed,
                Err(e) => {
                    self.fail(e);
                    return true;
                }
            };
            if parsed.ws_in_target && !strictness.surface_uri_ws() {
                let location = encode_whitespace(&buf[parsed.target.clone()]);
                self.fail(RequestError::WhitespaceInTarget { location });
                return true;
            }

            let base = self.held;
            self.request.method = parsed.method;
            self.request.version = parsed.version;
            self.request.method_raw = self.read_slice(base + parsed.method_range.start, base + parsed.method_range.end);
            self.request.target = self.read_slice(base + parsed.target.start, base + parsed.target.end);
            self.held += line.next;
            if let Err(e) = self.decode_target() {
                self.fail(e);
                return true;
            }
            trace!(
                method = %String::from_utf8_lossy(self.pool.bytes(self.request.method_raw)),
                target = %String::from_utf8_lossy(self.pool.bytes(self.request.target)),
                version = ?self.request.version,
                "received request line"
            );
            self.set_state(State::ReqLineReceived);
            return true;
        }
    }

    /// Drops an empty line before the request line, `false` once too many were seen.
    fn skip_empty_line(&mut self, len: usize) -> bool {
        let strictness = self.strictness();
        let limit = if strictness.skip_unlimited_empty_lines() {
            usize::MAX
        } else if strictness.skip_several_empty_lines() {
            SEVERAL_EMPTY_LINES
        } else {
            1
        };
        self.receiver.empty_lines += 1;
        if self.receiver.empty_lines > limit {
            self.fail(RequestError::malformed("empty lines before the request line"));
            return false;
        }
        self.drop_input(len);
        true
    }

    /// Decodes a copy of the target into the path and the query arguments.
    fn decode_target(&mut self) -> Result<(), RequestError> {
        let target = self.request.target;
        let copy = self.pool.try_allocate(target.len()).map_err(|_| RequestError::UriTooLong)?;
        self.pool.copy_within(target.range(), copy.offset());

        let query_offset = self.pool.bytes(copy).iter().position(|b| *b == b'?');
        let path_end = query_offset.unwrap_or(copy.len());
        let decoded = pct_decode_in_place(&mut self.pool.bytes_mut(copy)[..path_end]);
        self.request.url = copy.slice(0..decoded);
        self.request.query_offset = query_offset;

        if let Some(q) = query_offset {
            let query = copy.slice(q + 1..copy.len());
            for arg in split_query_args(self.pool.bytes_mut(query)) {
                self.pool.allocate(FIELD_RECORD_SIZE, true).ok_or(RequestError::UriTooLong)?;
                let value = arg.value.map(|value| query.slice(value));
                self.request.push_field(FieldKind::GetArgument, query.slice(arg.name), value);
            }
        }
        Ok(())
    }

    /// Receives the header section, or the trailer section of chunked content.
    pub(super) fn receive_fields(&mut self, footers: bool) -> bool {
        let strictness = self.strictness();
        let (kind, stage) = if footers { (FieldKind::Footer, Stage::Footers) } else { (FieldKind::Header, Stage::Headers) };
        loop {
            let base = self.held;
            let buf = &mut self.pool.bytes_mut(self.read_buf)[base..self.read_len];
            let line = match self.receiver.scanner.next_line(buf, strictness) {
                Ok(Some(line)) => line,
                Ok(None) => return self.need_more(stage),
                Err(e) => {
                    self.fail(e);
                    return true;
                }
            };

            let (end, next, folded) = match line {
                FieldLine::End { next } => {
                    self.held += next;
                    self.receiver.section_size = 0;
                    self.receiver.seen_field = false;
                    self.set_state(if footers { State::FootersReceived } else { State::HeadersReceived });
                    return true;
                }
                FieldLine::Field { end, next, folded } => (end, next, folded),
            };

            let first = !std::mem::replace(&mut self.receiver.seen_field, true);
            if first && !footers && is_ows(buf[0]) {
                if !strictness.first_header_ws() {
                    self.fail(RequestError::malformed("whitespace before the first header"));
                    return true;
                }
                warn!("skipping a header line that starts with whitespace");
            } else {
                let parsed = match parse_field(&mut buf[..end], folded, strictness) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        self.fail(e);
                        return true;
                    }
                };
                if let Some(field) = parsed {
                    if self.pool.allocate(FIELD_RECORD_SIZE, true).is_none() {
                        let error = select_status(stage, self.element_sizes(stage));
                        self.fail(error);
                        return true;
                    }
                    let name = self.read_slice(base + field.name.start, base + field.name.end);
                    let value = self.read_slice(base + field.value.start, base + field.value.end);
                    self.request.push_field(kind, name, Some(value));
                }
            }
            self.held += next;
            self.receiver.section_size += next;
        }
    }

    pub(super) fn process_headers(&mut self) -> bool {
        let strictness = self.strictness();
        if let Err(e) = process_special_fields(&mut self.request, &mut self.pool, strictness) {
            self.fail(e);
            return true;
        }

        let request = &self.request;
        let persistent = match request.version {
            HttpVersion::Http11 => !request.must_close,
            _ => request.keep_alive && !request.must_close,
        };
        if !persistent {
            self.conn_reuse = ConnReuse::MustClose;
        }
        if let BodyFraming::Fixed(n) = request.framing {
            self.receiver.body_remaining = n;
        }
        debug!(
            method = %String::from_utf8_lossy(self.pool.bytes(request.method_raw)),
            path = %String::from_utf8_lossy(self.pool.bytes(request.url)),
            version = ?request.version,
            framing = ?request.framing,
            "request head received"
        );
        self.set_state(State::HeadersProcessed);
        true
    }

    pub(super) fn call_application(&mut self) -> bool {
        let action = {
            let view = RequestView::new(&self.request, &self.pool, &self.context, &self.suspend);
            self.context.handler.on_request(&view)
        };
        trace!(?action, "application answered");
        match action {
            Action::Response(response) => {
                self.respond_early(response);
                true
            }
            Action::Upload(upload) => self.begin_upload(upload),
            Action::Suspend => self.suspend_application(),
            Action::Abort => {
                self.close(CloseReason::AppAbort);
                false
            }
        }
    }

    /// Takes the application's response, whatever content is still unread gets dropped.
    fn respond_early(&mut self, response: SharedResponse) {
        let unread = match self.request.framing {
            BodyFraming::None => false,
            BodyFraming::Fixed(_) => self.receiver.body_remaining > 0,
            BodyFraming::Chunked => self.state != State::FullReqReceived,
        };
        if unread {
            debug!("answering before the request content was read");
            self.discard_request = true;
            self.conn_reuse = ConnReuse::MustClose;
        }
        self.receiver.release(&self.context);
        self.replier.response = Some(response);
        // a request without content is complete once its head is processed
        let next = if self.state == State::HeadersProcessed && !unread { State::FullReqReceived } else { State::ReqRecvFinished };
        self.set_state(next);
    }

    fn suspend_application(&mut self) -> bool {
        if !self.context.options.allow_suspend_resume {
            warn!("application suspended a connection of a daemon without suspend support");
            self.fail(RequestError::internal("suspend is not enabled"));
            return true;
        }
        if self.suspend.suspend() {
            debug!(state = ?self.state, "connection suspended");
            return false;
        }
        true
    }

    fn begin_upload(&mut self, upload: Upload) -> bool {
        let framing = self.request.framing;
        let sink = if upload.full.is_none() {
            Sink::Incremental
        } else {
            match framing {
                BodyFraming::Fixed(n) if n > upload.max_full_size as u64 => {
                    if upload.incremental.is_none() {
                        self.fail(RequestError::content_too_large("content exceeds the upload limit"));
                        return true;
                    }
                    debug!(size = n, "content too large for the full callback");
                    Sink::Incremental
                }
                BodyFraming::Fixed(n) => {
                    let size = usize::try_from(n).unwrap_or(usize::MAX);
                    let room = self.read_buf.len() - self.held + self.pool.get_free();
                    let mut buffer = LargeBuffer::default();
                    if size <= room {
                        Sink::Pool { start: self.held, len: 0 }
                    } else if buffer.ensure_capacity(&self.context.large, size, upload.max_full_size) {
                        Sink::Large(buffer)
                    } else if upload.incremental.is_some() {
                        Sink::Incremental
                    } else {
                        warn!(size, "no memory for the request content");
                        self.close(CloseReason::OutOfMemory);
                        return false;
                    }
                }
                BodyFraming::None | BodyFraming::Chunked => Sink::Pool { start: self.held, len: 0 },
            }
        };
        self.receiver.upload = Some(UploadState { upload, sink });

        if self.request.expect_continue && self.read_len == self.held && framing != BodyFraming::None {
            self.set_state(State::ContinueSending);
            return true;
        }
        self.set_state(State::BodyReceiving);
        true
    }

    pub(super) fn send_continue(&mut self) {
        while self.receiver.continue_sent < CONTINUE.len() {
            let Some(transport) = self.transport.as_mut() else {
                return;
            };
            match transport.send(&CONTINUE[self.receiver.continue_sent..]) {
                Ok(0) | Err(TransportError::Again) => return,
                Ok(n) => {
                    self.receiver.continue_sent += n;
                    self.touch();
                }
                Err(e) => {
                    self.close_on_send_error(e);
                    return;
                }
            }
        }
        trace!("sent 100 continue");
        self.set_state(State::ContinueSent);
    }

    pub(super) fn receive_body(&mut self) -> bool {
        let strictness = self.strictness();
        loop {
            match self.request.framing {
                BodyFraming::None => {
                    self.set_state(State::BodyReceived);
                    return true;
                }
                BodyFraming::Fixed(_) => {
                    if self.receiver.body_remaining == 0 {
                        self.set_state(State::BodyReceived);
                        return true;
                    }
                    let pending = self.read_len - self.held;
                    if pending == 0 {
                        return self.need_more_body();
                    }
                    let n = usize::try_from(self.receiver.body_remaining).map_or(pending, |r| r.min(pending));
                    self.receiver.body_remaining -= n as u64;
                    self.deliver(n);
                }
                BodyFraming::Chunked => {
                    let buf = &mut self.pool.bytes_mut(self.read_buf)[self.held..self.read_len];
                    match self.receiver.chunked.decode(buf, strictness) {
                        Ok(Some((ChunkEvent::Framing, consumed))) => self.drop_input(consumed),
                        Ok(Some((ChunkEvent::Data(n), _))) => self.deliver(n),
                        Ok(Some((ChunkEvent::LastChunk, consumed))) => {
                            self.drop_input(consumed);
                            self.set_state(State::BodyReceived);
                            return true;
                        }
                        Ok(None) => return self.need_more_body(),
                        Err(e) => {
                            self.fail(e);
                            return true;
                        }
                    }
                }
            }
            if self.state != State::BodyReceiving || self.suspend.is_suspended() {
                return true;
            }
        }
    }

    pub(super) fn body_received(&mut self) -> bool {
        let next = if self.request.framing == BodyFraming::Chunked { State::FootersReceiving } else { State::FullReqReceived };
        self.set_state(next);
        true
    }

    /// Hands `n` content bytes at `held` to the upload.
    fn deliver(&mut self, n: usize) {
        self.request.body_received += n as u64;
        let Some(mut state) = self.receiver.upload.take() else {
            self.drop_input(n);
            return;
        };
        let max = state.upload.max_full_size;
        let stored = match &mut state.sink {
            Sink::Pool { len, .. } => {
                *len += n;
                self.held += n;
                if *len > max { Stored::Overflow { too_large: true, copied: false } } else { Stored::Kept }
            }
            Sink::Large(buffer) => {
                let fits = buffer.ensure_capacity(&self.context.large, n, max);
                let too_large = buffer.data.len() + n > max;
                // on overflow the bytes ride along to the incremental callback, unreserved
                buffer.data.extend_from_slice(&self.pool.bytes(self.read_buf)[self.held..self.held + n]);
                if fits { Stored::Copied } else { Stored::Overflow { too_large, copied: true } }
            }
            Sink::Incremental => Stored::Incremental,
        };
        self.receiver.upload = Some(state);

        match stored {
            Stored::Kept => {}
            Stored::Copied => self.drop_input(n),
            Stored::Overflow { too_large, copied } => {
                if copied {
                    self.drop_input(n);
                }
                self.upload_overflow(too_large);
            }
            Stored::Incremental => self.deliver_incremental(n),
        }
    }

    fn deliver_incremental(&mut self, n: usize) {
        let Some(mut state) = self.receiver.upload.take() else {
            self.drop_input(n);
            return;
        };
        let action = match state.upload.incremental.as_mut() {
            Some(callback) => {
                let view = RequestView::new(&self.request, &self.pool, &self.context, &self.suspend);
                callback(&view, &self.pool.bytes(self.read_buf)[self.held..self.held + n])
            }
            None => UploadAction::Continue,
        };
        self.receiver.upload = Some(state);
        self.drop_input(n);
        self.upload_answered(action, false);
    }

    fn upload_answered(&mut self, action: UploadAction, final_call: bool) -> bool {
        match action {
            UploadAction::Continue if final_call => {
                warn!("upload callback asked for more content on its final call");
                self.fail(RequestError::internal("continue on the final upload call"));
                true
            }
            UploadAction::Continue => true,
            UploadAction::Response(response) => {
                self.respond_early(response);
                true
            }
            UploadAction::Suspend => self.suspend_application(),
            UploadAction::Abort => {
                self.close(CloseReason::AppAbort);
                false
            }
        }
    }

    fn need_more_body(&mut self) -> bool {
        if self.read_closed {
            debug!(received = self.request.body_received, "client closed inside the request content");
            self.close(CloseReason::ClientShutdown);
            return false;
        }
        if self.grow_read_buffer() {
            return self.read_held_input();
        }
        if matches!(self.receiver.upload, Some(UploadState { sink: Sink::Pool { .. }, .. })) {
            return self.spill_upload();
        }
        if self.request.framing == BodyFraming::Chunked && self.receiver.chunked.pending_line_len() > 0 {
            let error = select_status(Stage::ChunkLine, self.element_sizes(Stage::ChunkLine));
            self.fail(error);
            return true;
        }
        warn!("read buffer exhausted while receiving content");
        self.close(CloseReason::OutOfMemory);
        false
    }

    /// Moves content collected in the read buffer to a large buffer.
    fn spill_upload(&mut self) -> bool {
        let Some(mut state) = self.receiver.upload.take() else {
            return false;
        };
        let Sink::Pool { start, len } = state.sink else {
            self.receiver.upload = Some(state);
            return false;
        };
        let max = state.upload.max_full_size;
        let mut buffer = LargeBuffer::default();
        if !buffer.ensure_capacity(&self.context.large, len, max) {
            self.receiver.upload = Some(state);
            return self.upload_overflow(len > max);
        }
        buffer.data.extend_from_slice(&self.pool.bytes(self.read_buf)[start..start + len]);
        self.remove_held(start, len);
        debug!(len, budget_used = self.context.large.used(), "moved upload content out of the connection pool");
        state.sink = Sink::Large(buffer);
        self.receiver.upload = Some(state);
        true
    }

    /// Content for the full callback does not fit: downgrade to the incremental callback or give up.
    fn upload_overflow(&mut self, too_large: bool) -> bool {
        if self.downgrade_upload() {
            return true;
        }
        if too_large {
            self.fail(RequestError::content_too_large("content exceeds the upload limit"));
            return true;
        }
        warn!("no memory left for the request content");
        self.close(CloseReason::OutOfMemory);
        false
    }

    /// Hands the collected content to the incremental callback and keeps using it.
    fn downgrade_upload(&mut self) -> bool {
        let Some(mut state) = self.receiver.upload.take() else {
            return false;
        };
        let Some(callback) = state.upload.incremental.as_mut() else {
            self.receiver.upload = Some(state);
            return false;
        };
        debug!("switching upload to the incremental callback");
        let sink = std::mem::replace(&mut state.sink, Sink::Incremental);
        let collected = match &sink {
            Sink::Pool { start, len } => &self.pool.bytes(self.read_buf)[*start..*start + *len],
            Sink::Large(buffer) => buffer.data.as_slice(),
            Sink::Incremental => &[],
        };
        let action = if collected.is_empty() {
            UploadAction::Continue
        } else {
            let view = RequestView::new(&self.request, &self.pool, &self.context, &self.suspend);
            callback(&view, collected)
        };
        match sink {
            Sink::Pool { start, len } => self.remove_held(start, len),
            Sink::Large(mut buffer) => buffer.release(&self.context.large),
            Sink::Incremental => {}
        }
        state.upload.full = None;
        self.receiver.upload = Some(state);
        self.upload_answered(action, false);
        true
    }

    /// Removes `len` consumed bytes at `start` of the read buffer.
    fn remove_held(&mut self, start: usize, len: usize) {
        let base = self.read_buf.offset();
        self.pool.copy_within(base + start + len..base + self.read_len, base + start);
        self.held -= len;
        self.read_len -= len;
    }

    /// Calls the final upload callback once the whole request was received.
    pub(super) fn finish_upload(&mut self) -> bool {
        let Some(mut state) = self.receiver.upload.take() else {
            self.set_state(State::ReqRecvFinished);
            return true;
        };
        let action = {
            let view = RequestView::new(&self.request, &self.pool, &self.context, &self.suspend);
            let UploadState { upload, sink } = &mut state;
            match (sink, upload.full.as_mut(), upload.incremental.as_mut()) {
                (Sink::Pool { start, len }, Some(full), _) => {
                    full(&view, &self.pool.bytes(self.read_buf)[*start..*start + *len])
                }
                (Sink::Large(buffer), Some(full), _) => full(&view, &buffer.data),
                (_, _, Some(incremental)) => incremental(&view, &[]),
                _ => UploadAction::Continue,
            }
        };
        if !matches!(action, UploadAction::Suspend) {
            if let Sink::Pool { start, len } = state.sink {
                // answered content gives its room to the reply, unless footers follow it
                if len > 0 && start + len == self.held {
                    self.remove_held(start, len);
                    state.sink = Sink::Pool { start, len: 0 };
                }
            }
        }
        self.receiver.upload = Some(state);
        debug!(received = self.request.body_received, "request content complete");
        self.upload_answered(action, true)
    }

    pub(super) fn request_finished(&mut self) -> bool {
        let Some(status) = self.replier.response.as_ref().map(|response| response.status()) else {
            self.fail(RequestError::internal("request finished without a response"));
            return true;
        };
        if status == StatusCode::SWITCHING_PROTOCOLS && !(self.context.options.allow_upgrade && self.request.upgrade) {
            warn!(allowed = self.context.options.allow_upgrade, "cannot switch protocols for this request");
            self.fail(RequestError::internal("upgrade is not possible"));
            return true;
        }
        self.receiver.release(&self.context);
        self.set_state(State::StartReply);
        true
    }

    /// More request bytes are needed. Fails the request when they cannot fit.
    fn need_more(&mut self, stage: Stage) -> bool {
        if self.read_closed {
            debug!(?stage, "client closed inside a request");
            self.close(CloseReason::ClientShutdown);
            return false;
        }
        if self.grow_read_buffer() {
            return self.read_held_input();
        }
        let error = select_status(stage, self.element_sizes(stage));
        self.fail(error);
        true
    }

    fn element_sizes(&self, stage: Stage) -> ElementSizes {
        let pending = self.read_len - self.held;
        match stage {
            Stage::RequestLine => {
                let line = &self.pool.bytes(self.read_buf)[self.held..self.read_len];
                let method = line.iter().position(|b| *b == b' ').unwrap_or(line.len());
                ElementSizes { method, uri: line.len() - method, ..ElementSizes::default() }
            }
            Stage::Headers | Stage::Footers => ElementSizes {
                method: self.request.method_raw.len(),
                uri: self.request.target.len(),
                headers: self.receiver.section_size + pending,
                chunk_line: 0,
            },
            Stage::ChunkLine => ElementSizes { chunk_line: self.receiver.chunked.pending_line_len(), ..ElementSizes::default() },
        }
    }

    /// Answers the request with the error page for `error` and closes afterwards.
    pub(super) fn fail(&mut self, error: RequestError) {
        let status = error.status();
        warn!(status = status.as_u16(), cause = %error, "rejecting request");
        if self.state.is_replying() || self.stop_with_error {
            self.close(CloseReason::ProtocolError);
            return;
        }
        let mut response = Response::error_page(status);
        if let RequestError::WhitespaceInTarget { location } = &error {
            response = response.with_location(location);
        }

        // request strings are not needed for an error page
        self.receiver.release(&self.context);
        self.receiver = Receiver::default();
        self.read_buf = self.pool.reset(PoolSlice::EMPTY, 0, 0);
        self.held = 0;
        self.read_len = 0;
        let (method, version) = (self.request.method, self.request.version);
        self.request = Request { method, version, ..Request::default() };

        self.discard_request = true;
        self.stop_with_error = true;
        self.conn_reuse = ConnReuse::MustClose;
        self.replier.response = Some(response.shared());
        self.set_state(State::StartReply);
    }
}
