//! Field line decoding for the header and the trailer section.
//!
//! A field line is only complete once the first byte of the following line is known:
//! a following SP or HTAB continues the field (obsolete line folding). Folded lines are
//! joined in place, then [`parse_field`] splits the logical line into name and value.

use std::ops::Range;

use tracing::{trace, warn};

use crate::codec::line::{Line, scan_line};
use crate::config::Strictness;
use crate::protocol::RequestError;
use crate::utils::{ensure, is_ows, is_tchar};

/// Scratch state of the field line scanner, kept between reads.
#[derive(Debug, Default, Clone)]
pub(crate) struct FieldScanner {
    pos: usize,
    pending: Option<Line>,
    folded: bool,
}

/// A complete logical line at the start of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldLine {
    /// A field line ending at `end`, continuation lines already joined.
    Field { end: usize, next: usize, folded: bool },
    /// The empty line closing the section.
    End { next: usize },
}

impl FieldScanner {
    /// Finds the next logical line, `Ok(None)` when more bytes are needed.
    pub fn next_line(&mut self, buf: &mut [u8], strictness: Strictness) -> Result<Option<FieldLine>, RequestError> {
        loop {
            let line = match self.pending.take() {
                Some(line) => line,
                None => match scan_line(buf, &mut self.pos, strictness)? {
                    Some(line) => line,
                    None => return Ok(None),
                },
            };

            if line.is_empty() && !self.folded {
                self.reset();
                return Ok(Some(FieldLine::End { next: line.next }));
            }

            let Some(&first) = buf.get(line.next) else {
                self.pending = Some(line);
                return Ok(None);
            };

            if is_ows(first) {
                ensure!(strictness.folded_headers(), RequestError::malformed("obsolete line folding"));
                trace!(at = line.end, "joining folded field line");
                buf[line.end..line.next].fill(b' ');
                self.folded = true;
                continue;
            }

            let folded = self.folded;
            self.reset();
            return Ok(Some(FieldLine::Field { end: line.end, next: line.next, folded }));
        }
    }

    fn reset(&mut self) {
        self.pos = 0;
        self.pending = None;
        self.folded = false;
    }
}

/// Name and value of a field line, relative to the line start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedField {
    pub name: Range<usize>,
    pub value: Range<usize>,
}

/// Splits the logical line `line` into name and value.
///
/// Returns `Ok(None)` for a line without colon that the strictness level lets us skip.
/// Whitespace runs of a folded value are collapsed to one SP in place.
pub(crate) fn parse_field(line: &mut [u8], folded: bool, strictness: Strictness) -> Result<Option<ParsedField>, RequestError> {
    let Some(colon) = line.iter().position(|b| *b == b':') else {
        ensure!(strictness.line_without_colon(), RequestError::malformed("field line without colon"));
        warn!(len = line.len(), "skipping field line without colon");
        return Ok(None);
    };

    let mut name_end = colon;
    if name_end > 0 && is_ows(line[name_end - 1]) {
        ensure!(strictness.ws_before_colon(), RequestError::malformed("whitespace before colon"));
        while name_end > 0 && is_ows(line[name_end - 1]) {
            name_end -= 1;
        }
    }

    let name = &line[..name_end];
    ensure!(!name.is_empty() || strictness.empty_field_name(), RequestError::malformed("empty field name"));
    for &b in name {
        if is_ows(b) {
            ensure!(strictness.ws_in_field_name(), RequestError::malformed("whitespace in field name"));
        } else {
            ensure!(is_tchar(b), RequestError::malformed("invalid character in field name"));
        }
    }

    let mut value_start = colon + 1;
    while value_start < line.len() && is_ows(line[value_start]) {
        value_start += 1;
    }
    let mut value_end = line.len();
    while value_end > value_start && is_ows(line[value_end - 1]) {
        value_end -= 1;
    }

    for &b in &line[value_start..value_end] {
        ensure!(b != 0, RequestError::malformed("NUL in field value"));
        ensure!(
            b >= 0x20 || b == b'\t' || (b == b'\r' && strictness.bare_cr_literal()) || strictness.ctl_in_field_value(),
            RequestError::malformed("control character in field value")
        );
    }

    if folded {
        value_end = value_start + collapse_whitespace(&mut line[value_start..value_end]);
    }

    Ok(Some(ParsedField { name: 0..name_end, value: value_start..value_end }))
}

/// Replaces every run of SP / HTAB with a single SP, returns the new length.
fn collapse_whitespace(value: &mut [u8]) -> usize {
    let mut write = 0;
    let mut in_ws = false;
    for read in 0..value.len() {
        let b = value[read];
        if is_ows(b) {
            if in_ws {
                continue;
            }
            in_ws = true;
            value[write] = b' ';
        } else {
            in_ws = false;
            value[write] = b;
        }
        write += 1;
    }
    write
}
