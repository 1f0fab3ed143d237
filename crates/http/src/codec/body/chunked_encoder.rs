//! Chunked framing of response content.
//!
//! The size line of a chunk is only known once the content source filled the payload,
//! so the writer reserves room for the widest possible size line in front of the
//! payload and [`frame_chunk`] fills it in afterwards, right aligned. The framed chunk
//! is then one contiguous range of the write buffer.

use std::io;
use std::ops::Range;

use http::{HeaderName, HeaderValue};

use crate::codec::header::header_encoder::SliceWriter;
use crate::utils::hex_width;

/// Bytes following the payload of every chunk.
pub(crate) const CHUNK_SUFFIX_LEN: usize = 2;

/// Bytes to reserve in front of a payload of at most `max_payload` bytes.
pub(crate) fn chunk_prefix_len(max_payload: usize) -> usize {
    hex_width(max_payload) + 2
}

/// Frames the `payload_len` bytes placed at `buf[prefix..]` and returns the range to send.
///
/// `buf` must hold `prefix + payload_len + CHUNK_SUFFIX_LEN` bytes.
pub(crate) fn frame_chunk(buf: &mut [u8], prefix: usize, payload_len: usize) -> Range<usize> {
    debug_assert!(payload_len > 0, "an empty chunk would end the content");
    let width = hex_width(payload_len);
    let start = prefix - 2 - width;

    let mut value = payload_len;
    for digit in buf[start..prefix - 2].iter_mut().rev() {
        *digit = b"0123456789ABCDEF"[value & 0xF];
        value >>= 4;
    }
    buf[prefix - 2..prefix].copy_from_slice(b"\r\n");
    let end = prefix + payload_len;
    buf[end..end + CHUNK_SUFFIX_LEN].copy_from_slice(b"\r\n");
    start..end + CHUNK_SUFFIX_LEN
}

/// Writes the last chunk, the trailer section and the final CRLF.
pub(crate) fn encode_last_chunk(footers: &[(HeaderName, HeaderValue)], dst: &mut [u8]) -> io::Result<usize> {
    let mut writer = SliceWriter::new(dst);
    writer.put(b"0\r\n")?;
    for (name, value) in footers {
        writer.put(name.as_ref())?;
        writer.put(b": ")?;
        writer.put(value.as_bytes())?;
        writer.put(b"\r\n")?;
    }
    writer.put(b"\r\n")?;
    Ok(writer.len())
}
