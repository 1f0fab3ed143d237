//! Request line parsing: `METHOD SP TARGET SP HTTP-VERSION`.
//!
//! The line handed in is complete and stripped of its terminator. Which whitespace
//! separates the elements, how many blanks may form one separator and whether the
//! target may contain whitespace all depend on the [`Strictness`] level.

use std::ops::Range;

use crate::config::Strictness;
use crate::protocol::{HttpVersion, Method, RequestError};
use crate::utils::{ensure, is_tchar};

/// Element boundaries of a parsed request line, relative to the line start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestLine {
    pub method: Method,
    pub method_range: Range<usize>,
    pub target: Range<usize>,
    pub version: HttpVersion,
    /// The target contains whitespace, which only lower strictness levels accept.
    pub ws_in_target: bool,
}

#[inline]
fn is_line_ws(b: u8, strictness: Strictness) -> bool {
    match b {
        b' ' => true,
        b'\t' => strictness.tab_as_line_ws(),
        0x0B | 0x0C => strictness.vt_ff_as_ws(),
        _ => false,
    }
}

pub(crate) fn parse_request_line(line: &[u8], strictness: Strictness) -> Result<RequestLine, RequestError> {
    let ws = |b: u8| is_line_ws(b, strictness);

    let mut start = 0;
    while start < line.len() && ws(line[start]) {
        start += 1;
    }
    let mut end = line.len();
    while end > start && ws(line[end - 1]) {
        end -= 1;
    }
    ensure!(
        (start == 0 && end == line.len()) || strictness.ws_blocks(),
        RequestError::malformed("whitespace around the request line")
    );

    let method_end = line[start..end]
        .iter()
        .position(|b| ws(*b))
        .map(|p| start + p)
        .ok_or_else(|| RequestError::malformed("request line without target"))?;
    let method_token = &line[start..method_end];
    ensure!(method_token.iter().all(|b| is_tchar(*b)), RequestError::malformed("invalid method"));

    let mut target_start = method_end;
    while ws(line[target_start]) {
        target_start += 1;
    }
    ensure!(
        target_start - method_end == 1 || strictness.ws_blocks(),
        RequestError::malformed("several blanks after method")
    );

    // an HTTP/0.9 request line has no version element
    let version_sep = line[target_start..end]
        .iter()
        .rposition(|b| ws(*b))
        .map(|p| target_start + p)
        .ok_or(RequestError::UnsupportedVersion)?;
    let mut target_end = version_sep + 1;
    while target_end > target_start && ws(line[target_end - 1]) {
        target_end -= 1;
    }
    ensure!(
        version_sep + 1 - target_end == 1 || strictness.ws_blocks(),
        RequestError::malformed("several blanks before version")
    );
    ensure!(target_end > target_start, RequestError::malformed("empty request target"));

    let target = &line[target_start..target_end];
    let mut ws_in_target = false;
    for &b in target {
        if ws(b) {
            ws_in_target = true;
        } else {
            ensure!(b > 0x20 && b != 0x7F, RequestError::malformed("invalid character in request target"));
        }
    }
    ensure!(!ws_in_target || strictness.ws_in_uri(), RequestError::malformed("whitespace in request target"));

    let version = parse_version(&line[version_sep + 1..end])?;

    Ok(RequestLine {
        method: Method::from_bytes(method_token),
        method_range: start..method_end,
        target: target_start..target_end,
        version,
        ws_in_target,
    })
}

/// `HTTP/1.0` and `HTTP/1.1` are served, a higher `1.x` is answered as `1.1`, other majors get 505.
pub(crate) fn parse_version(token: &[u8]) -> Result<HttpVersion, RequestError> {
    match token {
        [b'H', b'T', b'T', b'P', b'/', major, b'.', minor] if major.is_ascii_digit() && minor.is_ascii_digit() => {
            match (*major, *minor) {
                (b'1', b'0') => Ok(HttpVersion::Http10),
                (b'1', _) => Ok(HttpVersion::Http11),
                _ => Err(RequestError::UnsupportedVersion),
            }
        }
        _ => Err(RequestError::malformed("invalid http version")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str, level: i8) -> Result<RequestLine, RequestError> {
        parse_request_line(line.as_bytes(), Strictness::new(level))
    }

    #[test]
    fn simple_line() {
        let line = "GET /index.html?a=1 HTTP/1.1";
        let parsed = parse(line, 3).unwrap();
        assert_eq!(parsed.method, Method::Get);
        assert_eq!(&line[parsed.target.clone()], "/index.html?a=1");
        assert_eq!(parsed.version, HttpVersion::Http11);
        assert!(!parsed.ws_in_target);
    }

    #[test]
    fn versions() {
        assert_eq!(parse("GET / HTTP/1.0", 0).unwrap().version, HttpVersion::Http10);
        assert_eq!(parse("GET / HTTP/1.7", 0).unwrap().version, HttpVersion::Http11);
        assert_eq!(parse("GET / HTTP/2.0", 0), Err(RequestError::UnsupportedVersion));
        assert_eq!(parse("GET / HTTP/0.9", 0), Err(RequestError::UnsupportedVersion));
        assert_eq!(parse("GET /", 0), Err(RequestError::UnsupportedVersion));
        assert!(matches!(parse("GET / http/1.1", 0), Err(RequestError::Malformed { .. })));
    }

    #[test]
    fn unknown_method_keeps_token() {
        let line = "PURGE /cache HTTP/1.1";
        let parsed = parse(line, 0).unwrap();
        assert_eq!(parsed.method, Method::Other);
        assert_eq!(&line[parsed.method_range], "PURGE");
    }

    #[test]
    fn whitespace_blocks() {
        assert!(parse("GET  / HTTP/1.1", 0).is_err());
        assert!(parse("GET /  HTTP/1.1", 0).is_err());
        assert!(parse(" GET / HTTP/1.1", 0).is_err());

        let line = "GET  /  HTTP/1.1 ";
        let parsed = parse(line, -1).unwrap();
        assert_eq!(&line[parsed.target], "/");
    }

    #[test]
    fn tab_separators() {
        assert!(parse("GET\t/\tHTTP/1.1", 0).is_ok());
        assert!(parse("GET\t/\tHTTP/1.1", 1).is_err());
        assert!(parse("GET\x0B/ HTTP/1.1", 0).is_err());
        assert!(parse("GET\x0B/ HTTP/1.1", -1).is_ok());
    }

    #[test]
    fn whitespace_in_target() {
        let line = "GET /a b HTTP/1.1";
        assert!(parse(line, 1).is_err());
        let parsed = parse(line, 0).unwrap();
        assert!(parsed.ws_in_target);
        assert_eq!(&line[parsed.target], "/a b");
    }

    #[test]
    fn rejects_bad_tokens() {
        assert!(parse("G(T / HTTP/1.1", 0).is_err());
        assert!(parse("GET /\x01 HTTP/1.1", 0).is_err());
        assert!(parse("GET", -3).is_err());
    }
}
