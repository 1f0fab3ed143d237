//! Status selection when the read buffer cannot grow any further.
//!
//! The element that contributes most to the exhaustion is blamed, so the client learns
//! what to shorten. Each element is first scored against a "reasonable" size, then
//! against a minimal one, and finally the stage that ran out of space decides.

use crate::protocol::RequestError;

const REASONABLE_HEADERS: usize = 6 * 1024;
const REASONABLE_URI: usize = 8000;
const REASONABLE_METHOD: usize = 40;
const REASONABLE_CHUNK_LINE: usize = 16;

const MIN_HEADERS: usize = 26;
const MIN_URI: usize = 40;
const MIN_METHOD: usize = 16;
const MIN_CHUNK_LINE: usize = 4;

/// What was being received when the pool ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    RequestLine,
    Headers,
    Footers,
    ChunkLine,
}

/// Sizes of the elements received so far.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ElementSizes {
    pub method: usize,
    pub uri: usize,
    pub headers: usize,
    pub chunk_line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Element {
    Method,
    Uri,
    Headers,
    ChunkLine,
}

impl Element {
    fn error(self) -> RequestError {
        match self {
            Element::Method => RequestError::MethodNotImplemented,
            Element::Uri => RequestError::UriTooLong,
            Element::Headers => RequestError::HeaderTooLarge,
            Element::ChunkLine => RequestError::content_too_large("chunk size line too long"),
        }
    }
}

/// Picks the element with the highest `size / base` ratio among those at or above `base`.
fn pick(candidates: &[(Element, usize, usize)], strictly_above: bool) -> Option<Element> {
    let mut best: Option<(Element, usize, usize)> = None;
    for &(element, size, base) in candidates {
        let qualifies = if strictly_above { size > base } else { size >= base };
        if !qualifies {
            continue;
        }
        // size / base > best_size / best_base without floating point
        let better = best.is_none_or(|(_, best_size, best_base)| {
            (size as u128) * (best_base as u128) > (best_size as u128) * (base as u128)
        });
        if better {
            best = Some((element, size, base));
        }
    }
    best.map(|(element, ..)| element)
}

/// The error response for a request that exhausted the pool during `stage`.
pub(crate) fn select_status(stage: Stage, sizes: ElementSizes) -> RequestError {
    let reasonable = [
        (Element::Method, sizes.method, REASONABLE_METHOD),
        (Element::Uri, sizes.uri, REASONABLE_URI),
        (Element::Headers, sizes.headers, REASONABLE_HEADERS),
        (Element::ChunkLine, sizes.chunk_line, REASONABLE_CHUNK_LINE),
    ];
    if let Some(element) = pick(&reasonable, true) {
        return element.error();
    }

    let minimum = [
        (Element::Method, sizes.method, MIN_METHOD),
        (Element::Uri, sizes.uri, MIN_URI),
        (Element::Headers, sizes.headers, MIN_HEADERS),
        (Element::ChunkLine, sizes.chunk_line, MIN_CHUNK_LINE),
    ];
    if let Some(element) = pick(&minimum, false) {
        return element.error();
    }

    match stage {
        Stage::RequestLine => RequestError::UriTooLong,
        Stage::Headers | Stage::Footers => RequestError::HeaderTooLarge,
        Stage::ChunkLine => Element::ChunkLine.error(),
    }
}
