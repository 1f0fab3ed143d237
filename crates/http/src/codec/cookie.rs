//! `Cookie` header parsing (RFC 6265 §4.2.1) with strictness-gated tolerances.
//!
//! | Tolerance                                          | Level |
//! |----------------------------------------------------|-------|
//! | whitespace around `=` and `;`, empty elements      | ≤ 0   |
//! | quoted values with whitespace or `\` escapes        | ≤ 1   |
//! | missing SP after `;`, trailing `;`                  | ≤ 1   |
//!
//! Quoted values are unquoted and unescaped in place, so the parser works on a
//! private copy of the header value.

use std::ops::Range;

use crate::config::Strictness;
use crate::utils::{is_ows, is_tchar};

/// Outcome of parsing one header value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct Cookies {
    /// `(name, value)` ranges into the parsed buffer.
    pub pairs: Vec<(Range<usize>, Range<usize>)>,
    /// `false` when the parser stopped at malformed input.
    pub complete: bool,
}

/// RFC 6265 `cookie-octet`.
#[inline]
fn is_cookie_octet(b: u8) -> bool {
    matches!(b, 0x21 | 0x23..=0x2B | 0x2D..=0x3A | 0x3C..=0x5B | 0x5D..=0x7E)
}

struct CookieParser<'a> {
    buf: &'a mut [u8],
    pos: usize,
    lenient: bool,
    very_lenient: bool,
}

impl CookieParser<'_> {
    fn skip_ws(&mut self) {
        if self.very_lenient {
            while self.pos < self.buf.len() && is_ows(self.buf[self.pos]) {
                self.pos += 1;
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn name(&mut self) -> Option<Range<usize>> {
        let start = self.pos;
        while self.peek().is_some_and(is_tchar) {
            self.pos += 1;
        }
        (self.pos > start).then_some(start..self.pos)
    }

    fn value(&mut self) -> Option<Range<usize>> {
        if self.peek() != Some(b'"') {
            let start = self.pos;
            while self.peek().is_some_and(is_cookie_octet) {
                self.pos += 1;
            }
            return Some(start..self.pos);
        }

        self.pos += 1;
        let start = self.pos;
        let mut write = start;
        loop {
            let b = self.peek()?;
            self.pos += 1;
            match b {
                b'"' => return Some(start..write),
                b'\\' if self.lenient => {
                    let escaped = self.peek()?;
                    self.pos += 1;
                    self.buf[write] = escaped;
                }
                b' ' | b'\t' if self.lenient => self.buf[write] = b,
                b if is_cookie_octet(b) => self.buf[write] = b,
                _ => return None,
            }
            write += 1;
        }
    }

    /// Parses `; ` between pairs, returns `false` at the end of input.
    fn separator(&mut self) -> Result<bool, ()> {
        self.skip_ws();
        let Some(b';') = self.peek() else {
            return if self.peek().is_none() { Ok(false) } else { Err(()) };
        };
        self.pos += 1;
        if self.very_lenient {
            while self.peek().is_some_and(|b| is_ows(b) || b == b';') {
                self.pos += 1;
            }
        } else if self.peek() == Some(b' ') {
            self.pos += 1;
        } else if !self.lenient {
            return Err(());
        }
        if self.peek().is_none() {
            return if self.lenient { Ok(false) } else { Err(()) };
        }
        Ok(true)
    }
}

/// Parses the value of one `Cookie` header in place.
pub(crate) fn parse_cookies(buf: &mut [u8], strictness: Strictness) -> Cookies {
    let mut parser = CookieParser {
        buf,
        pos: 0,
        lenient: !strictness.rfc_cookies(),
        very_lenient: strictness.level() <= 0,
    };
    let mut cookies = Cookies::default();

    if parser.very_lenient {
        while parser.peek().is_some_and(|b| is_ows(b) || b == b';') {
            parser.pos += 1;
        }
    }
    if parser.peek().is_none() {
        cookies.complete = true;
        return cookies;
    }

    loop {
        let Some(name) = parser.name() else {
            return cookies;
        };
        parser.skip_ws();
        if parser.peek() != Some(b'=') {
            return cookies;
        }
        parser.pos += 1;
        parser.skip_ws();
        let Some(value) = parser.value() else {
            return cookies;
        };
        cookies.pairs.push((name, value));

        match parser.separator() {
            Ok(true) => {}
            Ok(false) => {
                cookies.complete = true;
                return cookies;
            }
            Err(()) => return cookies,
        }
    }
}
