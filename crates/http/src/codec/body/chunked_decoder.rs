//! Decoder for the chunked transfer coding of request content.
//!
//! See [RFC 9112 §7.1](https://www.rfc-editor.org/rfc/rfc9112#section-7.1). Every chunk is
//! a hex size line with optional extensions, the payload and a CRLF; a zero size ends the
//! content. The trailer section that may follow the last chunk is a field section and is
//! decoded by the connection with the same scanner as the header section.
//!
//! The decoder never copies payload: it reports how many bytes at the start of the input
//! belong to the payload and the caller decides where they go.

use tracing::trace;

use crate::codec::line::scan_line;
use crate::config::Strictness;
use crate::protocol::RequestError;
use crate::utils::{ensure, is_ows};
use ChunkedState::*;

/// One step of progress through the chunked content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkEvent {
    /// Framing bytes were consumed.
    Framing,
    /// The first `n` input bytes are payload.
    Data(usize),
    /// The last chunk was consumed, the trailer section follows.
    LastChunk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Read the chunk size line
    Size,
    /// Read chunk payload
    Data,
    /// Read the CRLF after the payload
    DataCrlf,
    /// The last chunk was read
    End,
}

/// Incremental decoder of chunk framing.
#[derive(Debug, Clone)]
pub(crate) struct ChunkedDecoder {
    state: ChunkedState,
    remaining_size: u64,
    /// Scan position inside a size line that is not complete yet.
    line_pos: usize,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: Size, remaining_size: 0, line_pos: 0 }
    }

    /// Bytes of a size line received so far without its terminator.
    pub fn pending_line_len(&self) -> usize {
        if self.state == Size { self.line_pos } else { 0 }
    }

    /// Decodes from the start of `src`.
    ///
    /// Returns the event and the number of input bytes it consumed, `Ok(None)` when
    /// more input is needed.
    pub fn decode(&mut self, src: &mut [u8], strictness: Strictness) -> Result<Option<(ChunkEvent, usize)>, RequestError> {
        if src.is_empty() || self.state == End {
            return Ok(None);
        }
        let step = self.state.step(src, strictness, &mut self.remaining_size, &mut self.line_pos)?;
        if let Some((next, event, consumed)) = step {
            trace!(?event, consumed, "chunked decoder step");
            self.state = next;
            return Ok(Some((event, consumed)));
        }
        Ok(None)
    }
}

type Step = Option<(ChunkedState, ChunkEvent, usize)>;

impl ChunkedState {
    fn step(
        self,
        src: &mut [u8],
        strictness: Strictness,
        remaining_size: &mut u64,
        line_pos: &mut usize,
    ) -> Result<Step, RequestError> {
        match self {
            Size => ChunkedState::read_size(src, strictness, remaining_size, line_pos),
            Data => Ok(ChunkedState::read_data(src, remaining_size)),
            DataCrlf => ChunkedState::read_data_crlf(src, strictness),
            End => Ok(None),
        }
    }

    /// Reads `HEXDIG+ [BWS] [; ext] CRLF`.
    fn read_size(
        src: &mut [u8],
        strictness: Strictness,
        remaining_size: &mut u64,
        line_pos: &mut usize,
    ) -> Result<Step, RequestError> {
        let Some(line) = scan_line(src, line_pos, strictness)? else {
            return Ok(None);
        };
        *line_pos = 0;

        let size = parse_chunk_size(&src[..line.end])?;
        *remaining_size = size;
        if size == 0 {
            trace!("read last chunk");
            return Ok(Some((End, ChunkEvent::LastChunk, line.next)));
        }
        Ok(Some((Data, ChunkEvent::Framing, line.next)))
    }

    fn read_data(src: &[u8], remaining_size: &mut u64) -> Step {
        let len = usize::try_from(*remaining_size).map_or(src.len(), |r| r.min(src.len()));
        *remaining_size -= len as u64;
        let next = if *remaining_size == 0 { DataCrlf } else { Data };
        Some((next, ChunkEvent::Data(len), len))
    }

    fn read_data_crlf(src: &[u8], strictness: Strictness) -> Result<Step, RequestError> {
        match src {
            [b'\r', b'\n', ..] => Ok(Some((Size, ChunkEvent::Framing, 2))),
            [b'\n', ..] if strictness.bare_lf_as_crlf() => Ok(Some((Size, ChunkEvent::Framing, 1))),
            [b'\r'] => Ok(None),
            _ => Err(RequestError::malformed("chunk data not followed by CRLF")),
        }
    }
}

/// Parses the size of a chunk size line without its terminator.
fn parse_chunk_size(line: &[u8]) -> Result<u64, RequestError> {
    let digits = line.iter().take_while(|b| b.is_ascii_hexdigit()).count();
    ensure!(digits > 0, RequestError::malformed("invalid chunk size"));

    let mut size: u64 = 0;
    for &b in &line[..digits] {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            _ => b - b'A' + 10,
        };
        size = size
            .checked_mul(16)
            .and_then(|s| s.checked_add(u64::from(digit)))
            .ok_or_else(|| RequestError::content_too_large("chunk size overflow"))?;
    }

    let mut rest = &line[digits..];
    while let [first, tail @ ..] = rest {
        if !is_ows(*first) {
            break;
        }
        rest = tail;
    }
    // chunk extensions carry nothing we act upon
    ensure!(rest.is_empty() || rest[0] == b';', RequestError::malformed("invalid chunk size line"));
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(input: &[u8], level: i8) -> Result<(Vec<u8>, Vec<usize>, bool), RequestError> {
        let mut buf = input.to_vec();
        let mut decoder = ChunkedDecoder::new();
        let mut start = 0;
        let mut data = Vec::new();
        let mut chunks = Vec::new();
        let mut done = false;
        while let Some((event, consumed)) = decoder.decode(&mut buf[start..], Strictness::new(level))? {
            match event {
                ChunkEvent::Data(n) => {
                    data.extend_from_slice(&buf[start..start + n]);
                    chunks.push(n);
                }
                ChunkEvent::LastChunk => done = true,
                ChunkEvent::Framing => {}
            }
            start += consumed;
            if done {
                break;
            }
        }
        Ok((data, chunks, done))
    }

    #[test]
    fn two_chunks() {
        let (data, chunks, done) = collect(b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n", 0).unwrap();
        assert_eq!(data, b"hello world");
        assert_eq!(chunks, vec![5, 6]);
        assert!(done);
    }

    #[test]
    fn extensions_and_hex_sizes() {
        let mut payload = b"1A ; name=value\r\n".to_vec();
        payload.extend_from_slice(&[b'x'; 26]);
        payload.extend_from_slice(b"\r\n0;last\r\n");
        let (data, _, done) = collect(&payload, 3).unwrap();
        assert_eq!(data.len(), 26);
        assert!(done);
    }

    #[test]
    fn partial_input_waits() {
        let mut decoder = ChunkedDecoder::new();
        let mut buf = b"1".to_vec();
        assert_eq!(decoder.decode(&mut buf, Strictness::DEFAULT).unwrap(), None);
        assert_eq!(decoder.pending_line_len(), 1);

        let mut buf = b"10\r\nabc".to_vec();
        let mut decoder = ChunkedDecoder::new();
        assert_eq!(decoder.decode(&mut buf, Strictness::DEFAULT).unwrap(), Some((ChunkEvent::Framing, 4)));
        assert_eq!(decoder.decode(&mut buf[4..], Strictness::DEFAULT).unwrap(), Some((ChunkEvent::Data(3), 3)));
        // the rest of the chunk, not a byte more
        let mut rest = vec![b'y'; 20];
        assert_eq!(decoder.decode(&mut rest, Strictness::DEFAULT).unwrap(), Some((ChunkEvent::Data(13), 13)));
    }

    #[test]
    fn bare_lf_after_data() {
        assert!(collect(b"1\na\n0\n", 0).unwrap().2);
        assert!(collect(b"1\r\na\n0\r\n", 1).is_err());
    }

    #[test]
    fn invalid_sizes() {
        assert!(matches!(collect(b"x\r\n", 0), Err(RequestError::Malformed { .. })));
        assert!(matches!(collect(b"5 x\r\n", 0), Err(RequestError::Malformed { .. })));
        assert!(matches!(
            collect(b"10000000000000000\r\n", 0),
            Err(RequestError::ContentTooLarge { .. })
        ));
        assert!(matches!(collect(b"1\r\nab\r\n", 0), Err(RequestError::Malformed { .. })));
    }
}
