//! Parsed request and the view the application gets of it.
//!
//! A [`Request`] only stores [`PoolSlice`] handles, the bytes themselves live in the
//! connection pool. [`RequestView`] pairs the request with that pool so handlers can
//! read method, path, fields and body size without any copy.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::connection::{ResumeHandle, SuspendState};
use crate::daemon::DaemonContext;
use crate::pool::{MemoryPool, PoolSlice};
use crate::protocol::field::Field;
use crate::protocol::{FieldKind, HttpVersion, Method};

/// How the request content is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyFraming {
    /// No content.
    #[default]
    None,
    /// `Content-Length: n`.
    Fixed(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
}

#[derive(Debug)]
pub(crate) struct Request {
    pub method: Method,
    pub method_raw: PoolSlice,
    pub version: HttpVersion,
    /// Request-target exactly as received.
    pub target: PoolSlice,
    /// Percent-decoded path, without the query string.
    pub url: PoolSlice,
    /// Offset of `?` inside `target`.
    pub query_offset: Option<usize>,
    pub fields: Vec<Field>,
    pub framing: BodyFraming,
    pub expect_continue: bool,
    /// `Connection: close`, or framing that cannot be trusted for a following request.
    pub must_close: bool,
    pub keep_alive: bool,
    pub upgrade: bool,
    /// Content bytes delivered to the application so far.
    pub body_received: u64,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: Method::Other,
            method_raw: PoolSlice::EMPTY,
            version: HttpVersion::Invalid,
            target: PoolSlice::EMPTY,
            url: PoolSlice::EMPTY,
            query_offset: None,
            fields: Vec::new(),
            framing: BodyFraming::None,
            expect_continue: false,
            must_close: false,
            keep_alive: false,
            upgrade: false,
            body_received: 0,
        }
    }
}

impl Request {
    pub fn push_field(&mut self, kind: FieldKind, name: PoolSlice, value: Option<PoolSlice>) {
        self.fields.push(Field::new(kind, name, value));
    }

    /// Iterates over fields of one kind, in arrival order.
    pub fn fields_of<'a>(&'a self, pool: &'a MemoryPool, kind: FieldKind) -> impl Iterator<Item = (&'a [u8], Option<&'a [u8]>)> {
        self.fields
            .iter()
            .filter(move |field| field.kind == kind)
            .map(move |field| (pool.bytes(field.name), field.value.map(|v| pool.bytes(v))))
    }

    /// First value of field `name`, compared case-insensitively.
    pub fn find<'a>(&'a self, pool: &'a MemoryPool, kind: FieldKind, name: &str) -> Option<&'a [u8]> {
        self.fields_of(pool, kind)
            .find(|(field, _)| field.eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, value)| value.unwrap_or_default())
    }
}

/// Read access to a request while the application handles it.
pub struct RequestView<'a> {
    pub(crate) request: &'a Request,
    pub(crate) pool: &'a MemoryPool,
    pub(crate) context: &'a DaemonContext,
    pub(crate) suspend: &'a Arc<SuspendState>,
}

impl<'a> RequestView<'a> {
    pub(crate) fn new(
        request: &'a Request,
        pool: &'a MemoryPool,
        context: &'a DaemonContext,
        suspend: &'a Arc<SuspendState>,
    ) -> Self {
        Self { request, pool, context, suspend }
    }

    pub fn method(&self) -> Method {
        self.request.method
    }

    /// The method token as sent, useful for [`Method::Other`].
    pub fn method_str(&self) -> &'a str {
        std::str::from_utf8(self.pool.bytes(self.request.method_raw)).unwrap_or_default()
    }

    pub fn version(&self) -> HttpVersion {
        self.request.version
    }

    /// Percent-decoded path without the query string.
    pub fn path(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.path_bytes())
    }

    pub fn path_bytes(&self) -> &'a [u8] {
        self.pool.bytes(self.request.url)
    }

    /// The request-target exactly as received.
    pub fn target(&self) -> &'a [u8] {
        self.pool.bytes(self.request.target)
    }

    /// The raw query string, without `?`.
    pub fn query(&self) -> Option<&'a [u8]> {
        let target = self.target();
        self.request.query_offset.map(|q| &target[q + 1..])
    }

    /// Content length if known, `None` for chunked content, `Some(0)` without content.
    pub fn body_size_hint(&self) -> Option<u64> {
        match self.request.framing {
            BodyFraming::None => Some(0),
            BodyFraming::Fixed(n) => Some(n),
            BodyFraming::Chunked => None,
        }
    }

    /// First header `name`, if its value is valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.header_bytes(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn header_bytes(&self, name: &str) -> Option<&'a [u8]> {
        self.request.find(self.pool, FieldKind::Header, name)
    }

    /// All headers in arrival order, duplicates included.
    pub fn headers(&self) -> impl Iterator<Item = (&'a [u8], &'a [u8])> {
        self.request.fields_of(self.pool, FieldKind::Header).map(|(name, value)| (name, value.unwrap_or_default()))
    }

    /// All fields of one kind in arrival order.
    pub fn fields(&self, kind: FieldKind) -> impl Iterator<Item = (&'a [u8], Option<&'a [u8]>)> {
        self.request.fields_of(self.pool, kind)
    }

    pub fn footer(&self, name: &str) -> Option<&'a str> {
        self.request.find(self.pool, FieldKind::Footer, name).and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn cookie(&self, name: &str) -> Option<&'a str> {
        self.fields(FieldKind::Cookie)
            .find(|(n, _)| *n == name.as_bytes())
            .and_then(|(_, v)| std::str::from_utf8(v.unwrap_or_default()).ok())
    }

    /// Decoded query argument, `Some("")` for an argument without `=`.
    pub fn get_argument(&self, name: &str) -> Option<&'a str> {
        self.fields(FieldKind::GetArgument)
            .find(|(n, _)| *n == name.as_bytes())
            .and_then(|(_, v)| std::str::from_utf8(v.unwrap_or_default()).ok())
    }

    /// Handle to resume this connection after answering with `Suspend`.
    pub fn resume_handle(&self) -> ResumeHandle {
        ResumeHandle::new(Arc::clone(self.suspend))
    }
}

impl fmt::Debug for RequestView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestView")
            .field("method", &self.method_str())
            .field("target", &String::from_utf8_lossy(self.target()))
            .field("version", &self.request.version)
            .field("fields", &self.request.fields.len())
            .finish()
    }
}
