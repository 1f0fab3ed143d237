//! Percent-decoding of the request target and splitting of the query string.
//!
//! All decoding happens in place: a decoded string is never longer than its encoding,
//! so the result is a prefix of the original range.

use std::ops::Range;

#[inline]
fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decodes `%XX` sequences in place and returns the decoded length.
///
/// Malformed sequences are kept literally.
pub(crate) fn pct_decode_in_place(buf: &mut [u8]) -> usize {
    let mut read = 0;
    let mut write = 0;
    while read < buf.len() {
        let b = buf[read];
        if b == b'%' && read + 2 < buf.len() {
            if let (Some(hi), Some(lo)) = (hex_value(buf[read + 1]), hex_value(buf[read + 2])) {
                buf[write] = (hi << 4) | lo;
                read += 3;
                write += 1;
                continue;
            }
        }
        buf[write] = b;
        read += 1;
        write += 1;
    }
    write
}

/// One `name[=value]` pair of a query string, ranges relative to the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueryArg {
    pub name: Range<usize>,
    pub value: Option<Range<usize>>,
}

/// Splits `query` (without `?`) at `&` and `=`, decoding `+` and `%XX` in place.
///
/// Empty elements such as in `a&&b` are skipped.
pub(crate) fn split_query_args(query: &mut [u8]) -> Vec<QueryArg> {
    let mut args = Vec::new();
    let mut start = 0;
    while start < query.len() {
        let end = query[start..].iter().position(|b| *b == b'&').map_or(query.len(), |p| start + p);
        if end > start {
            let eq = query[start..end].iter().position(|b| *b == b'=').map(|p| start + p);
            let name_end = eq.unwrap_or(end);
            let name = decode_component(query, start..name_end);
            let value = eq.map(|eq| decode_component(query, eq + 1..end));
            args.push(QueryArg { name, value });
        }
        start = end + 1;
    }
    args
}

fn decode_component(buf: &mut [u8], range: Range<usize>) -> Range<usize> {
    let part = &mut buf[range.clone()];
    for b in part.iter_mut() {
        if *b == b'+' {
            *b = b' ';
        }
    }
    let len = pct_decode_in_place(part);
    range.start..range.start + len
}

/// Percent-encodes the whitespace of a request target for a redirect `Location`.
pub(crate) fn encode_whitespace(target: &[u8]) -> String {
    let mut location = String::with_capacity(target.len() + 8);
    for &b in target {
        match b {
            b' ' => location.push_str("%20"),
            b'\t' => location.push_str("%09"),
            0x0B => location.push_str("%0B"),
            0x0C => location.push_str("%0C"),
            b'\r' => location.push_str("%0D"),
            b if b.is_ascii() => location.push(b as char),
            b => location.push_str(&format!("%{b:02X}")),
        }
    }
    location
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(input: &str) -> String {
        let mut buf = input.as_bytes().to_vec();
        let len = pct_decode_in_place(&mut buf);
        String::from_utf8(buf[..len].to_vec()).unwrap()
    }

    #[test]
    fn pct_decoding() {
        assert_eq!(decode("/a%20b"), "/a b");
        assert_eq!(decode("/%e4%bd%a0"), "/你");
        assert_eq!(decode("/100%"), "/100%");
        assert_eq!(decode("/%zz%4"), "/%zz%4");
        assert_eq!(decode("%41"), "A");
    }

    #[test]
    fn query_splitting() {
        let mut query = b"a=1&b=x+y%21&&flag&=v".to_vec();
        let args = split_query_args(&mut query);
        let strings: Vec<(String, Option<String>)> = args
            .iter()
            .map(|arg| {
                (
                    String::from_utf8_lossy(&query[arg.name.clone()]).into_owned(),
                    arg.value.clone().map(|v| String::from_utf8_lossy(&query[v]).into_owned()),
                )
            })
            .collect();
        assert_eq!(
            strings,
            vec![
                ("a".into(), Some("1".into())),
                ("b".into(), Some("x y!".into())),
                ("flag".into(), None),
                ("".into(), Some("v".into())),
            ]
        );
    }

    #[test]
    fn whitespace_location() {
        assert_eq!(encode_whitespace(b"/a b\tc"), "/a%20b%09c");
    }
}
