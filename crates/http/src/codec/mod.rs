//! The HTTP/1.x wire format, on raw bytes held by the connection pool.
//!
//! Every function here is sans-IO: it looks at bytes already received, or writes into a
//! buffer the caller provides, and reports how far it got. Tolerance for malformed input
//! is decided by the [`Strictness`](crate::config::Strictness) level passed in.
//!
//! # Components
//!
//! - Request side:
//!   - [`line`]: line scanning with bare CR / bare LF handling
//!   - [`request_line`]: `METHOD SP TARGET SP VERSION`
//!   - [`url`]: in-place percent-decoding and query splitting
//!   - [`header`]: field sections, special headers and the response head
//!   - [`cookie`]: the `Cookie` header grammar
//!   - [`body`]: chunked content
//!   - [`no_space`]: status selection when the pool is exhausted
//!
//! - Response side:
//!   - [`header`]: status line and headers
//!   - [`body`]: chunk framing

pub(crate) mod body;
pub(crate) mod cookie;
pub(crate) mod header;
pub(crate) mod line;
pub(crate) mod no_space;
pub(crate) mod request_line;
pub(crate) mod url;
