//! Line scanning shared by the request line, field lines and chunk size lines.

use crate::config::Strictness;
use crate::protocol::RequestError;
use crate::utils::ensure;

/// A complete line found at the start of the scanned buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Line {
    /// End of the line content, exclusive.
    pub end: usize,
    /// Start of the following line.
    pub next: usize,
}

impl Line {
    pub fn is_empty(&self) -> bool {
        self.end == 0
    }
}

/// Scans `buf` from `*pos` for the end of the line that starts at `buf[0]`.
///
/// `pos` is scratch kept by the caller between reads, so bytes are inspected once.
/// Bare CR is rewritten to SP in place when tolerated.
pub(crate) fn scan_line(buf: &mut [u8], pos: &mut usize, strictness: Strictness) -> Result<Option<Line>, RequestError> {
    while let Some(found) = buf[*pos..].iter().position(|b| *b == b'\r' || *b == b'\n') {
        let i = *pos + found;
        if buf[i] == b'\n' {
            ensure!(strictness.bare_lf_as_crlf(), RequestError::malformed("bare LF"));
            *pos = i + 1;
            return Ok(Some(Line { end: i, next: i + 1 }));
        }

        match buf.get(i + 1) {
            None => {
                // CR is the last byte, decide once the next one arrives
                *pos = i;
                return Ok(None);
            }
            Some(b'\n') => {
                *pos = i + 2;
                return Ok(Some(Line { end: i, next: i + 2 }));
            }
            Some(_) if strictness.bare_cr_literal() => {}
            Some(_) if strictness.bare_cr_as_space() => buf[i] = b' ',
            Some(_) => return Err(RequestError::malformed("bare CR")),
        }
        *pos = i + 1;
    }
    *pos = buf.len();
    Ok(None)
}
