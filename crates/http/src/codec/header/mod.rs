//! Field sections of the request and the head of the response.
//!
//! # Components
//!
//! - [`header_decoder`]: field line scanning with obsolete folding, and name/value splitting
//! - [`special`]: `Host`, `Content-Length`, `Transfer-Encoding`, `Connection`, `Expect`
//!   and `Cookie` handling once the section is complete
//! - [`header_encoder`]: status line and response headers into the write buffer

pub(crate) mod header_decoder;
pub(crate) mod header_encoder;
pub(crate) mod special;
