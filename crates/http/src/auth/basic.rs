use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::AUTHORIZATION;

use crate::protocol::RequestView;
use crate::utils::trim_ows;

/// Credentials of an `Authorization: Basic` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: Option<String>,
}

pub(crate) fn parse_basic_header(value: &[u8]) -> Option<BasicCredentials> {
    let value = trim_ows(value);
    if value.len() < 6 || !value[..6].eq_ignore_ascii_case(b"basic ") {
        return None;
    }
    let decoded = STANDARD.decode(trim_ows(&value[6..])).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    match decoded.split_once(':') {
        Some((username, password)) => {
            Some(BasicCredentials { username: username.to_owned(), password: Some(password.to_owned()) })
        }
        None => Some(BasicCredentials { username: decoded, password: None }),
    }
}

impl RequestView<'_> {
    /// Decoded `Authorization: Basic` credentials, `None` if absent or malformed.
    pub fn basic_auth(&self) -> Option<BasicCredentials> {
        self.header_bytes(AUTHORIZATION.as_str()).and_then(parse_basic_header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_user_and_password() {
        let credentials = parse_basic_header(b"Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==").unwrap();
        assert_eq!(credentials.username, "Aladdin");
        assert_eq!(credentials.password.as_deref(), Some("open sesame"));
    }

    #[test]
    fn password_is_optional() {
        let credentials = parse_basic_header(b"basic dXNlcg==").unwrap();
        assert_eq!(credentials.username, "user");
        assert_eq!(credentials.password, None);
    }

    #[test]
    fn rejects_other_input() {
        assert!(parse_basic_header(b"Digest username=\"x\"").is_none());
        assert!(parse_basic_header(b"Basic !!!").is_none());
        assert!(parse_basic_header(b"Basic").is_none());
    }
}
