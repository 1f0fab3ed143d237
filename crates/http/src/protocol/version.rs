/// HTTP version of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HttpVersion {
    Http10,
    Http11,
    /// Not parsed yet, or not a supported version.
    #[default]
    Invalid,
}

impl HttpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
            HttpVersion::Invalid => "HTTP/?",
        }
    }

    pub fn is_http11(&self) -> bool {
        matches!(self, HttpVersion::Http11)
    }
}

impl From<HttpVersion> for http::Version {
    fn from(version: HttpVersion) -> Self {
        match version {
            HttpVersion::Http10 => http::Version::HTTP_10,
            _ => http::Version::HTTP_11,
        }
    }
}
