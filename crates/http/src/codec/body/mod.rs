//! Request and response content framing.
//!
//! # Components
//!
//! - [`chunked_decoder`]: chunk size lines, payload and CRLF of chunked request content
//! - [`chunked_encoder`]: in-place chunk framing of response content and the last chunk
//!
//! Fixed-length content needs no decoder: the connection counts bytes against the
//! declared `Content-Length`.

pub(crate) mod chunked_decoder;
pub(crate) mod chunked_encoder;
