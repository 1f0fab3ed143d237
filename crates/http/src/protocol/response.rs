//! Application responses.
//!
//! A [`Response`] is built once and may be queued on any number of connections through
//! [`SharedResponse`]; its content source is released when the last connection drops it.
//!
//! # Content sources
//!
//! - [`Content::Buffer`]: one in-memory buffer, sent together with the headers when it fits
//! - [`Content::Iovec`]: a scatter/gather list sent with vectored writes
//! - [`Content::File`]: a file region sent with `sendfile` where the transport allows it
//! - [`Content::Callback`]: a pull-style [`ContentReader`] producing bytes on demand

use std::fmt;
use std::fs::File;
use std::os::unix::fs::FileExt;

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, TRANSFER_ENCODING, WWW_AUTHENTICATE};
use http::{HeaderName, HeaderValue, StatusCode};
use tracing::warn;

use crate::protocol::ResponseError;
use crate::transport::Transport;

/// A response shared between connections, its use count is the reference count.
pub type SharedResponse = triomphe::Arc<Response>;

/// Outcome of one [`ContentReader::read`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentRead {
    /// `n` bytes were written to the start of the buffer.
    Data(usize),
    /// Nothing available yet, the connection asks again shortly.
    NotReady,
    EndOfStream,
    /// The content cannot be produced, the connection is aborted mid-body.
    Error,
}

/// Pull-style content producer.
///
/// `pos` is the number of content bytes produced so far.
pub trait ContentReader: Send + Sync {
    fn read(&self, pos: u64, buf: &mut [u8]) -> ContentRead;
}

impl<F> ContentReader for F
where
    F: Fn(u64, &mut [u8]) -> ContentRead + Send + Sync,
{
    fn read(&self, pos: u64, buf: &mut [u8]) -> ContentRead {
        (self)(pos, buf)
    }
}

/// The body of a response.
pub enum Content {
    Empty,
    Buffer(Bytes),
    Iovec(Vec<Bytes>),
    File { file: File, offset: u64, size: u64 },
    Callback { size: Option<u64>, reader: Box<dyn ContentReader> },
}

impl Content {
    /// Total size, `None` when only the reader knows where the content ends.
    pub fn size(&self) -> Option<u64> {
        match self {
            Content::Empty => Some(0),
            Content::Buffer(bytes) => Some(bytes.len() as u64),
            Content::Iovec(parts) => Some(parts.iter().map(|b| b.len() as u64).sum()),
            Content::File { size, .. } => Some(*size),
            Content::Callback { size, .. } => *size,
        }
    }

    /// Copies content starting at `pos` into `buf`.
    ///
    /// Every source can be read this way, the writer uses it for chunked framing and
    /// whenever a zero-copy path is not available.
    pub(crate) fn read_at(&self, pos: u64, buf: &mut [u8]) -> ContentRead {
        match self {
            Content::Empty => ContentRead::EndOfStream,
            Content::Buffer(bytes) => copy_from_parts(std::slice::from_ref(bytes), pos, buf),
            Content::Iovec(parts) => copy_from_parts(parts, pos, buf),
            Content::File { file, offset, size } => {
                if pos >= *size {
                    return ContentRead::EndOfStream;
                }
                let want = buf.len().min(usize::try_from(size - pos).unwrap_or(usize::MAX));
                match file.read_at(&mut buf[..want], offset + pos) {
                    Ok(0) => {
                        warn!(pos, size, "file ended before the announced size");
                        ContentRead::Error
                    }
                    Ok(n) => ContentRead::Data(n),
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => ContentRead::NotReady,
                    Err(e) => {
                        warn!(cause = %e, "failed to read response file");
                        ContentRead::Error
                    }
                }
            }
            Content::Callback { size, reader } => {
                if size.is_some_and(|size| pos >= size) {
                    return ContentRead::EndOfStream;
                }
                let limit = size.map_or(buf.len(), |size| buf.len().min(usize::try_from(size - pos).unwrap_or(usize::MAX)));
                match reader.read(pos, &mut buf[..limit]) {
                    ContentRead::Data(n) if n > limit => ContentRead::Error,
                    ContentRead::Data(0) if size.is_none() => ContentRead::NotReady,
                    result => result,
                }
            }
        }
    }
}

fn copy_from_parts(parts: &[Bytes], pos: u64, buf: &mut [u8]) -> ContentRead {
    let mut skip = pos;
    let mut written = 0;
    for part in parts {
        let len = part.len() as u64;
        if skip >= len {
            skip -= len;
            continue;
        }
        // skip < len, so it fits a usize
        let start = skip as usize;
        skip = 0;
        let n = (part.len() - start).min(buf.len() - written);
        buf[written..written + n].copy_from_slice(&part[start..start + n]);
        written += n;
        if written == buf.len() {
            break;
        }
    }
    if written == 0 { ContentRead::EndOfStream } else { ContentRead::Data(written) }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Empty => f.write_str("Empty"),
            Content::Buffer(bytes) => f.debug_tuple("Buffer").field(&bytes.len()).finish(),
            Content::Iovec(parts) => f.debug_tuple("Iovec").field(&parts.len()).finish(),
            Content::File { offset, size, .. } => {
                f.debug_struct("File").field("offset", offset).field("size", size).finish()
            }
            Content::Callback { size, .. } => f.debug_struct("Callback").field("size", size).finish(),
        }
    }
}

/// A connection taken over after `101 Switching Protocols`.
pub struct Upgraded {
    pub transport: Box<dyn Transport>,
    /// Bytes the client sent after the upgrade request that were already read.
    pub read_ahead: Bytes,
}

impl fmt::Debug for Upgraded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upgraded").field("read_ahead", &self.read_ahead.len()).finish_non_exhaustive()
    }
}

/// Receives the connection once the `101` headers were sent.
pub type UpgradeHandler = Box<dyn Fn(Upgraded) + Send + Sync>;

pub struct Response {
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    footers: Vec<(HeaderName, HeaderValue)>,
    content: Content,
    chunked: bool,
    close_after: bool,
    upgrade: Option<UpgradeHandler>,
}

impl Response {
    pub fn builder(status: StatusCode) -> ResponseBuilder {
        ResponseBuilder::new(status)
    }

    /// A response with an in-memory body.
    pub fn from_buffer(status: StatusCode, body: impl Into<Bytes>) -> Response {
        Response { content: Content::Buffer(body.into()), ..Response::bare(status) }
    }

    pub fn empty(status: StatusCode) -> Response {
        Response::bare(status)
    }

    fn bare(status: StatusCode) -> Response {
        Response {
            status,
            headers: Vec::new(),
            footers: Vec::new(),
            content: Content::Empty,
            chunked: false,
            close_after: false,
            upgrade: None,
        }
    }

    /// The HTML page the engine answers protocol errors with.
    pub(crate) fn error_page(status: StatusCode) -> Response {
        let reason = status.canonical_reason().unwrap_or("Error");
        let body = format!(
            "<html><head><title>{reason}</title></head><body>{} {reason}</body></html>",
            status.as_u16()
        );
        let mut response = Response::from_buffer(status, body);
        response.headers.push((CONTENT_TYPE, HeaderValue::from_static("text/html")));
        response.close_after = true;
        response
    }

    /// Adds `Location`, left out when `location` is not a valid header value.
    pub(crate) fn with_location(mut self, location: &str) -> Response {
        match HeaderValue::from_str(location) {
            Ok(value) => self.headers.push((LOCATION, value)),
            Err(e) => warn!(cause = %e, "dropping invalid redirect location"),
        }
        self
    }

    /// `401` asking for Basic credentials.
    pub fn basic_auth_required(realm: &str) -> Result<Response, ResponseError> {
        let challenge = format!("Basic realm=\"{}\", charset=\"UTF-8\"", realm.replace(['\\', '"'], ""));
        Response::builder(StatusCode::UNAUTHORIZED).header(WWW_AUTHENTICATE, challenge).build()
    }

    pub fn shared(self) -> SharedResponse {
        triomphe::Arc::new(self)
    }

    /// Number of holders of a shared response.
    pub fn use_count(this: &SharedResponse) -> usize {
        triomphe::Arc::count(this)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    pub fn header(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn footers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.footers
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    /// Chunked encoding was requested explicitly.
    pub fn is_chunked(&self) -> bool {
        self.chunked || !self.footers.is_empty()
    }

    pub fn close_after(&self) -> bool {
        self.close_after
    }

    pub(crate) fn upgrade_handler(&self) -> Option<&UpgradeHandler> {
        self.upgrade.as_ref()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("footers", &self.footers)
            .field("content", &self.content)
            .field("chunked", &self.chunked)
            .field("close_after", &self.close_after)
            .field("upgrade", &self.upgrade.is_some())
            .finish()
    }
}

/// Builder for [`Response`], errors surface from [`build`](ResponseBuilder::build).
#[derive(Debug)]
pub struct ResponseBuilder {
    inner: Result<Response, ResponseError>,
}

impl ResponseBuilder {
    fn new(status: StatusCode) -> Self {
        Self { inner: Ok(Response::bare(status)) }
    }

    fn and_then<F>(self, f: F) -> Self
    where
        F: FnOnce(Response) -> Result<Response, ResponseError>,
    {
        Self { inner: self.inner.and_then(f) }
    }

    /// Appends a header, `Content-Length` and `Transfer-Encoding` are managed by the engine.
    pub fn header<K, V>(self, key: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        self.and_then(move |mut response| {
            let name = HeaderName::try_from(key).map_err(Into::into)?;
            let value = HeaderValue::try_from(value).map_err(Into::into)?;
            if name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
                return Err(ResponseError::invalid(format!("{name} is set by the connection")));
            }
            if name == CONNECTION {
                if value.as_bytes().split(|b| *b == b',').any(|t| t.trim_ascii().eq_ignore_ascii_case(b"close")) {
                    response.close_after = true;
                }
                return Ok(response);
            }
            response.headers.push((name, value));
            Ok(response)
        })
    }

    /// Appends a trailer field, which forces chunked encoding.
    pub fn footer<K, V>(self, key: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        self.and_then(move |mut response| {
            let name = HeaderName::try_from(key).map_err(Into::into)?;
            let value = HeaderValue::try_from(value).map_err(Into::into)?;
            response.footers.push((name, value));
            Ok(response)
        })
    }

    pub fn body(self, content: Content) -> Self {
        self.and_then(move |mut response| {
            response.content = content;
            Ok(response)
        })
    }

    pub fn buffer(self, body: impl Into<Bytes>) -> Self {
        self.body(Content::Buffer(body.into()))
    }

    pub fn iovec(self, parts: Vec<Bytes>) -> Self {
        self.body(Content::Iovec(parts))
    }

    pub fn file(self, file: File, offset: u64, size: u64) -> Self {
        self.body(Content::File { file, offset, size })
    }

    /// Content produced by `reader`; with `size == None` the response is chunked on HTTP/1.1.
    pub fn callback<R>(self, size: Option<u64>, reader: R) -> Self
    where
        R: ContentReader + 'static,
    {
        self.body(Content::Callback { size, reader: Box::new(reader) })
    }

    /// Forces chunked encoding even when the size is known.
    pub fn chunked(self) -> Self {
        self.and_then(|mut response| {
            response.chunked = true;
            Ok(response)
        })
    }

    /// Closes the connection after this response.
    pub fn close_after(self) -> Self {
        self.and_then(|mut response| {
            response.close_after = true;
            Ok(response)
        })
    }

    /// Hands the connection to `handler` after a `101 Switching Protocols`.
    pub fn upgrade<F>(self, handler: F) -> Self
    where
        F: Fn(Upgraded) + Send + Sync + 'static,
    {
        self.and_then(move |mut response| {
            response.upgrade = Some(Box::new(handler));
            Ok(response)
        })
    }

    pub fn build(self) -> Result<Response, ResponseError> {
        let response = self.inner?;
        let switching = response.status == StatusCode::SWITCHING_PROTOCOLS;
        if switching != response.upgrade.is_some() {
            return Err(ResponseError::invalid("101 responses and upgrade handlers go together"));
        }
        if response.status.is_informational() && !switching {
            return Err(ResponseError::invalid("informational status codes are sent by the connection"));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_headers_in_order() {
        let response = Response::builder(StatusCode::OK)
            .header("x-b", "2")
            .header("x-a", "1")
            .header("x-b", "3")
            .buffer("hello")
            .build()
            .unwrap();
        let names: Vec<&str> = response.headers().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["x-b", "x-a", "x-b"]);
        assert_eq!(response.content().size(), Some(5));
    }

    #[test]
    fn builder_rejects_managed_headers() {
        assert!(Response::builder(StatusCode::OK).header("content-length", "3").build().is_err());
        assert!(Response::builder(StatusCode::OK).header("x-bad", "a\r\nb").build().is_err());
        assert!(Response::builder(StatusCode::SWITCHING_PROTOCOLS).build().is_err());
    }

    #[test]
    fn connection_close_header_sets_flag() {
        let response = Response::builder(StatusCode::OK).header("connection", "Close").build().unwrap();
        assert!(response.close_after());
        assert!(response.headers().is_empty());
    }

    #[test]
    fn footers_force_chunked() {
        let response = Response::builder(StatusCode::OK).footer("x-checksum", "abc").build().unwrap();
        assert!(response.is_chunked());
    }

    #[test]
    fn iovec_reads_across_parts() {
        let content = Content::Iovec(vec![Bytes::from_static(b"abc"), Bytes::from_static(b""), Bytes::from_static(b"defg")]);
        let mut buf = [0u8; 4];
        assert_eq!(content.read_at(2, &mut buf), ContentRead::Data(4));
        assert_eq!(&buf, b"cdef");
        assert_eq!(content.read_at(6, &mut buf), ContentRead::Data(1));
        assert_eq!(content.read_at(7, &mut buf), ContentRead::EndOfStream);
    }

    #[test]
    fn callback_is_bounded_by_size() {
        let content = Content::Callback {
            size: Some(3),
            reader: Box::new(|_pos: u64, buf: &mut [u8]| {
                buf.fill(b'x');
                ContentRead::Data(buf.len())
            }),
        };
        let mut buf = [0u8; 16];
        assert_eq!(content.read_at(0, &mut buf), ContentRead::Data(3));
        assert_eq!(content.read_at(3, &mut buf), ContentRead::EndOfStream);
    }

    #[test]
    fn shared_use_count() {
        let shared = Response::empty(StatusCode::NO_CONTENT).shared();
        assert_eq!(Response::use_count(&shared), 1);
        let other = shared.clone();
        assert_eq!(Response::use_count(&other), 2);
        drop(shared);
        assert_eq!(Response::use_count(&other), 1);
    }
}
