/// Request method as recognized by the engine.
///
/// Unknown methods map to [`Method::Other`], the raw token stays available from the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    /// The `*` pseudo method.
    Asterisk,
    Other,
}

impl Method {
    /// Maps a method token, methods are case-sensitive.
    pub fn from_bytes(token: &[u8]) -> Method {
        match token {
            b"GET" => Method::Get,
            b"HEAD" => Method::Head,
            b"POST" => Method::Post,
            b"PUT" => Method::Put,
            b"DELETE" => Method::Delete,
            b"CONNECT" => Method::Connect,
            b"OPTIONS" => Method::Options,
            b"TRACE" => Method::Trace,
            b"*" => Method::Asterisk,
            _ => Method::Other,
        }
    }

    /// Canonical token, `None` for [`Method::Other`].
    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            Method::Get => Some("GET"),
            Method::Head => Some("HEAD"),
            Method::Post => Some("POST"),
            Method::Put => Some("PUT"),
            Method::Delete => Some("DELETE"),
            Method::Connect => Some("CONNECT"),
            Method::Options => Some("OPTIONS"),
            Method::Trace => Some("TRACE"),
            Method::Asterisk => Some("*"),
            Method::Other => None,
        }
    }

    /// Methods whose requests normally carry content.
    pub(crate) fn expects_content(&self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_methods() {
        assert_eq!(Method::from_bytes(b"GET"), Method::Get);
        assert_eq!(Method::from_bytes(b"*"), Method::Asterisk);
        assert_eq!(Method::from_bytes(b"get"), Method::Other);
        assert_eq!(Method::from_bytes(b"PATCH"), Method::Other);
        assert_eq!(Method::Options.as_str(), Some("OPTIONS"));
        assert_eq!(Method::Other.as_str(), None);
    }
}
