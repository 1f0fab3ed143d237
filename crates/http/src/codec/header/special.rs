//! Headers with protocol meaning: `Host`, `Content-Length`, `Transfer-Encoding`,
//! `Connection`, `Expect` and `Cookie`.
//!
//! Runs once the header section is complete and decides the request framing and the
//! connection reuse hints.

use tracing::{debug, warn};

use crate::codec::cookie::parse_cookies;
use crate::config::Strictness;
use crate::pool::{MemoryPool, PoolSlice};
use crate::protocol::field::FIELD_RECORD_SIZE;
use crate::protocol::request::Request;
use crate::protocol::{BodyFraming, FieldKind, HttpVersion, RequestError};
use crate::utils::{ensure, list_tokens};

/// Parses a `Content-Length` value, `413` on overflow.
pub(crate) fn parse_content_length(value: &[u8]) -> Result<u64, RequestError> {
    ensure!(!value.is_empty(), RequestError::malformed("empty content-length"));
    let mut length: u64 = 0;
    for &b in value {
        ensure!(b.is_ascii_digit(), RequestError::malformed("invalid content-length"));
        length = length
            .checked_mul(10)
            .and_then(|l| l.checked_add(u64::from(b - b'0')))
            .ok_or_else(|| RequestError::content_too_large("content-length overflow"))?;
    }
    Ok(length)
}

/// Applies the special headers of a complete header section to `request`.
pub(crate) fn process_special_fields(
    request: &mut Request,
    pool: &mut MemoryPool,
    strictness: Strictness,
) -> Result<(), RequestError> {
    let mut hosts = 0usize;
    let mut content_length: Option<u64> = None;
    let mut chunked = false;
    let mut cookie_values: Vec<PoolSlice> = Vec::new();

    for field in request.fields.iter().filter(|f| f.kind == FieldKind::Header) {
        let name = pool.bytes(field.name);
        let value_slice = field.value.unwrap_or_default();
        let value = pool.bytes(value_slice);

        if name.eq_ignore_ascii_case(b"host") {
            hosts += 1;
            ensure!(hosts == 1 || strictness.duplicate_host(), RequestError::malformed("duplicate host header"));
        } else if name.eq_ignore_ascii_case(b"content-length") {
            let length = parse_content_length(value)?;
            if let Some(previous) = content_length {
                ensure!(previous == length, RequestError::malformed("conflicting content-length headers"));
                ensure!(strictness.duplicate_content_length(), RequestError::malformed("duplicate content-length header"));
            }
            content_length = Some(length);
        } else if name.eq_ignore_ascii_case(b"transfer-encoding") {
            ensure!(value.eq_ignore_ascii_case(b"chunked"), RequestError::malformed("unsupported transfer-encoding"));
            chunked = true;
        } else if name.eq_ignore_ascii_case(b"connection") {
            for token in list_tokens(value) {
                if token.eq_ignore_ascii_case(b"close") {
                    request.must_close = true;
                } else if token.eq_ignore_ascii_case(b"keep-alive") {
                    request.keep_alive = true;
                } else if token.eq_ignore_ascii_case(b"upgrade") {
                    request.upgrade = true;
                }
            }
        } else if name.eq_ignore_ascii_case(b"expect") {
            if request.version == HttpVersion::Http11 && value.eq_ignore_ascii_case(b"100-continue") {
                request.expect_continue = true;
            }
        } else if name.eq_ignore_ascii_case(b"cookie") {
            cookie_values.push(value_slice);
        }
    }

    if request.version == HttpVersion::Http11 {
        ensure!(hosts > 0, RequestError::MissingHost);
    }

    request.framing = match (chunked, content_length) {
        (true, Some(_)) => {
            ensure!(!strictness.reject_conflicting_framing(), RequestError::ConflictingFraming);
            warn!("request with both transfer-encoding and content-length, ignoring content-length");
            request.must_close = true;
            BodyFraming::Chunked
        }
        (true, None) => BodyFraming::Chunked,
        (false, Some(0)) | (false, None) => BodyFraming::None,
        (false, Some(n)) => BodyFraming::Fixed(n),
    };

    if strictness.require_length_for_upload() && request.method.expects_content() {
        ensure!(chunked || content_length.is_some(), RequestError::ContentLengthRequired);
    }

    for value in cookie_values {
        parse_cookie_field(request, pool, value, strictness)?;
    }

    debug!(framing = ?request.framing, must_close = request.must_close, "processed request headers");
    Ok(())
}

/// Parses one `Cookie` value from a private pool copy and records the pairs.
fn parse_cookie_field(
    request: &mut Request,
    pool: &mut MemoryPool,
    value: PoolSlice,
    strictness: Strictness,
) -> Result<(), RequestError> {
    if value.is_empty() {
        return Ok(());
    }
    let copy = pool.try_allocate(value.len()).map_err(|_| RequestError::HeaderTooLarge)?;
    pool.copy_within(value.range(), copy.offset());

    let cookies = parse_cookies(pool.bytes_mut(copy), strictness);
    if !cookies.complete {
        if strictness.strict_cookies() {
            warn!(len = value.len(), "ignoring malformed cookie header");
            return Ok(());
        }
        warn!(parsed = cookies.pairs.len(), "cookie header parsed partially");
    }

    for (name, cookie_value) in cookies.pairs {
        pool.allocate(FIELD_RECORD_SIZE, true).ok_or(RequestError::HeaderTooLarge)?;
        request.push_field(
            FieldKind::Cookie,
            copy.slice(name),
            Some(copy.slice(cookie_value)),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_length_values() {
        assert_eq!(parse_content_length(b"0").unwrap(), 0);
        assert_eq!(parse_content_length(b"12345").unwrap(), 12345);
        assert_eq!(parse_content_length(b"18446744073709551615").unwrap(), u64::MAX);
        assert!(matches!(
            parse_content_length(b"18446744073709551616"),
            Err(RequestError::ContentTooLarge { .. })
        ));
        assert!(matches!(parse_content_length(b"12a"), Err(RequestError::Malformed { .. })));
        assert!(matches!(parse_content_length(b"-1"), Err(RequestError::Malformed { .. })));
        assert!(matches!(parse_content_length(b""), Err(RequestError::Malformed { .. })));
    }
}
