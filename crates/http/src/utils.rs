//! Utility macros and byte helpers shared by the parser and the writer.
//!
//! Everything here works on raw bytes: request data lives in the connection
//! pool and is only turned into `&str` at the application boundary.

/// A macro for early returns with an error if a condition is not met.
///
/// This is similar to the `assert!` macro, but returns an error instead of panicking.
///
/// # Example
///
/// ```ignore
/// ensure!(digits > 0, RequestError::malformed("empty chunk size"));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

/// SP or HTAB.
#[inline]
pub(crate) fn is_ows(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

/// `tchar` from RFC 9110 §5.6.2.
#[inline]
pub(crate) fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'^' | b'_' | b'`' | b'|' | b'~' | b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z')
}

/// Strips leading and trailing SP / HTAB.
pub(crate) fn trim_ows(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !is_ows(*b)).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !is_ows(*b)).map_or(start, |p| p + 1);
    &bytes[start..end]
}

/// Iterates over the trimmed, non-empty elements of a comma separated header list.
pub(crate) fn list_tokens(value: &[u8]) -> impl Iterator<Item = &[u8]> {
    value.split(|b| *b == b',').map(trim_ows).filter(|token| !token.is_empty())
}

/// Number of hex digits needed to print `value`.
pub(crate) fn hex_width(value: usize) -> usize {
    let bits = usize::BITS - value.leading_zeros();
    (bits as usize).div_ceil(4).max(1)
}
