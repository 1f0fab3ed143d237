//! Response head serialization.
//!
//! The status line and the application headers are written in order, then the headers
//! the connection owns are appended: `Date`, the framing header (`Content-Length` or
//! `Transfer-Encoding: chunked`), `Connection` and a default `Content-Type`.
//!
//! The head is written straight into the write buffer of the connection pool through
//! [`SliceWriter`], a bounded [`Write`] adapter.

use std::io;
use std::io::Write;

use bytes::Bytes;
use http::StatusCode;
use http::header::{CONTENT_TYPE, DATE};
use tracing::trace;

use crate::protocol::{HttpVersion, Response};

/// How the content follows the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyMode {
    /// Nothing follows the head.
    None,
    /// Exactly `n` bytes.
    Length(u64),
    /// Chunked transfer coding.
    Chunked,
    /// Raw bytes delimited by closing the connection, HTTP/1.0 only.
    UntilClose,
}

/// Request side facts the head depends on.
#[derive(Debug, Clone)]
pub(crate) struct HeadContext<'a> {
    pub version: HttpVersion,
    pub head_request: bool,
    /// The request allows the connection to be reused.
    pub keep_alive: bool,
    /// `101` accepted as an upgrade.
    pub upgrade: bool,
    /// `None` when the `Date` header is suppressed.
    pub date: Option<Bytes>,
    pub default_content_type: Option<&'a str>,
}

/// Result of [`encode_head`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EncodedHead {
    pub len: usize,
    pub body: BodyMode,
    pub keep_alive: bool,
}

/// Bounded writer over a byte slice, fails with [`io::ErrorKind::WriteZero`] once full.
#[derive(Debug)]
pub(crate) struct SliceWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> SliceWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn put(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)
    }
}

impl Write for SliceWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(self.buf.len() - self.len);
        self.buf[self.len..self.len + n].copy_from_slice(&buf[..n]);
        self.len += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Status codes that never carry content.
fn forbids_content(status: StatusCode) -> bool {
    status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED
}

/// Serializes the head of `response` into `dst`.
///
/// Fails with [`io::ErrorKind::WriteZero`] when `dst` is too small.
pub(crate) fn encode_head(response: &Response, ctx: &HeadContext<'_>, dst: &mut [u8]) -> io::Result<EncodedHead> {
    let status = response.status();
    let mut writer = SliceWriter::new(dst);

    write!(writer, "HTTP/1.1 {} {}\r\n", status.as_str(), status.canonical_reason().unwrap_or("Unknown"))?;

    for (name, value) in response.headers() {
        writer.put(name.as_ref())?;
        writer.put(b": ")?;
        writer.put(value.as_bytes())?;
        writer.put(b"\r\n")?;
    }

    if let Some(date) = &ctx.date {
        if response.header(&DATE).is_none() {
            writer.put(b"Date: ")?;
            writer.put(date)?;
            writer.put(b"\r\n")?;
        }
    }

    let size = response.content().size();
    let mut keep_alive = ctx.keep_alive && !response.close_after();
    let framing = if forbids_content(status) {
        BodyMode::None
    } else if response.is_chunked() || size.is_none() {
        if ctx.version.is_http11() {
            writer.put(b"Transfer-Encoding: chunked\r\n")?;
            BodyMode::Chunked
        } else {
            keep_alive = false;
            BodyMode::UntilClose
        }
    } else {
        let n = size.unwrap_or_default();
        write!(writer, "Content-Length: {n}\r\n")?;
        BodyMode::Length(n)
    };

    if ctx.upgrade {
        writer.put(b"Connection: Upgrade\r\n")?;
        keep_alive = false;
    } else if !keep_alive {
        writer.put(b"Connection: close\r\n")?;
    } else if ctx.version == HttpVersion::Http10 {
        writer.put(b"Connection: Keep-Alive\r\n")?;
    }

    if let Some(content_type) = ctx.default_content_type {
        let has_content = !forbids_content(status) && size != Some(0);
        if has_content && response.header(&CONTENT_TYPE).is_none() {
            writer.put(b"Content-Type: ")?;
            writer.put(content_type.as_bytes())?;
            writer.put(b"\r\n")?;
        }
    }

    writer.put(b"\r\n")?;

    let body = if ctx.head_request || (size == Some(0) && framing != BodyMode::Chunked) {
        BodyMode::None
    } else {
        framing
    };
    trace!(len = writer.len(), status = status.as_u16(), ?body, keep_alive, "encoded response head");
    Ok(EncodedHead { len: writer.len(), body, keep_alive })
}
