//! Cached `Date` header value.
//!
//! Formatting an HTTP date for every response is wasteful when hundreds of responses go
//! out per second. The formatted value is kept in an [`ArcSwap`] and replaced by the
//! first caller that notices the wall clock moved to another second, so no background
//! task is needed and the cache works the same under every threading mode.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::HeaderValue;
use once_cell::sync::Lazy;

struct CachedDate {
    second: u64,
    value: Bytes,
}

static CURRENT: Lazy<ArcSwap<CachedDate>> = Lazy::new(|| ArcSwap::from_pointee(format_now(unix_second())));

fn unix_second() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

fn format_now(second: u64) -> CachedDate {
    let mut buf = faf_http_date::get_date_buff_no_key();
    faf_http_date::get_date_no_key(&mut buf);
    CachedDate { second, value: Bytes::from_owner(buf) }
}

/// The current date in IMF-fixdate format, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub(crate) fn http_date() -> Bytes {
    let now = unix_second();
    let current = CURRENT.load();
    if current.second == now {
        return current.value.clone();
    }
    let fresh = Arc::new(format_now(now));
    let value = fresh.value.clone();
    CURRENT.store(fresh);
    value
}

/// [`http_date`] as a header value.
pub fn http_date_header() -> HeaderValue {
    // SAFETY: faf_http_date only produces visible ASCII characters and spaces
    unsafe { HeaderValue::from_maybe_shared_unchecked(http_date()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imf_fixdate_shape() {
        let date = http_date();
        assert_eq!(date.len(), 29);
        assert!(date.ends_with(b" GMT"));
        assert_eq!(date[3], b',');
        assert!(http_date_header().to_str().is_ok());
    }
}
