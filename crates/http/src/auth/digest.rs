//! HTTP Digest access authentication, [RFC 7616](https://www.rfc-editor.org/rfc/rfc7616).
//!
//! Only `qop=auth` is supported. Nonces are issued by
//! [`RequestView::digest_auth_challenge`] and verified, including the replay window, by
//! [`RequestView::digest_auth_check`].

use std::time::{SystemTime, UNIX_EPOCH};

use http::StatusCode;
use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use md5::Md5;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::auth::nonce::{
    NonceBinding, NonceCheck, elapsed_ms, generate_nonce, nonce_timestamp, retry_jitter,
};
use crate::protocol::{FieldKind, RequestView, Response, ResponseError};
use crate::utils::{is_ows, trim_ows};

/// Hash algorithm of a digest exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    #[default]
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl DigestAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Md5Sess => "MD5-sess",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha256Sess => "SHA-256-sess",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        [Self::Md5, Self::Md5Sess, Self::Sha256, Self::Sha256Sess]
            .into_iter()
            .find(|algorithm| algorithm.name().eq_ignore_ascii_case(name))
    }

    fn is_session(self) -> bool {
        matches!(self, DigestAlgorithm::Md5Sess | DigestAlgorithm::Sha256Sess)
    }

    /// Hex digest of `parts` joined by `:`.
    fn hash(self, parts: &[&[u8]]) -> String {
        match self {
            DigestAlgorithm::Md5 | DigestAlgorithm::Md5Sess => hex_digest::<Md5>(parts),
            DigestAlgorithm::Sha256 | DigestAlgorithm::Sha256Sess => hex_digest::<Sha256>(parts),
        }
    }
}

fn hex_digest<D: Digest>(parts: &[&[u8]]) -> String {
    let mut hasher = D::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b":");
        }
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

/// Outcome of [`RequestView::digest_auth_check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAuthResult {
    Ok,
    /// The daemon runs without a replay window.
    Disabled,
    NoHeader,
    /// The `Authorization` header cannot be parsed or misses parameters.
    WrongHeader,
    WrongUsername,
    WrongRealm,
    WrongUri,
    WrongQop,
    WrongAlgorithm,
    /// Expired, replayed or issued for another request: challenge again with `stale=true`.
    NonceStale,
    /// The nonce was not issued by this daemon.
    NonceWrong,
    ResponseWrong,
}

impl DigestAuthResult {
    pub fn is_ok(self) -> bool {
        self == DigestAuthResult::Ok
    }

    /// The client knows the password, only the nonce needs to be renewed.
    pub fn is_stale(self) -> bool {
        self == DigestAuthResult::NonceStale
    }
}

/// Parameters of an `Authorization: Digest` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DigestParams {
    pub username: Option<String>,
    pub realm: Option<String>,
    pub nonce: Option<String>,
    pub uri: Option<String>,
    pub response: Option<String>,
    pub algorithm: Option<String>,
    pub cnonce: Option<String>,
    pub opaque: Option<String>,
    pub qop: Option<String>,
    pub nc: Option<String>,
}

/// Parses the value of an `Authorization` header using the `Digest` scheme.
pub(crate) fn parse_digest_header(value: &[u8]) -> Option<DigestParams> {
    let value = trim_ows(value);
    let rest = value.strip_prefix(b"Digest").or_else(|| {
        (value.len() >= 6 && value[..6].eq_ignore_ascii_case(b"digest")).then(|| &value[6..])
    })?;
    if !rest.first().copied().is_some_and(is_ows) {
        return None;
    }

    let mut params = DigestParams::default();
    let mut pos = 0;
    while pos < rest.len() {
        while pos < rest.len() && (is_ows(rest[pos]) || rest[pos] == b',') {
            pos += 1;
        }
        if pos == rest.len() {
            break;
        }
        let name_start = pos;
        while pos < rest.len() && rest[pos] != b'=' && !is_ows(rest[pos]) {
            pos += 1;
        }
        let name = std::str::from_utf8(&rest[name_start..pos]).ok()?.to_ascii_lowercase();
        while pos < rest.len() && is_ows(rest[pos]) {
            pos += 1;
        }
        if rest.get(pos) != Some(&b'=') {
            return None;
        }
        pos += 1;
        while pos < rest.len() && is_ows(rest[pos]) {
            pos += 1;
        }

        let mut value = Vec::new();
        if rest.get(pos) == Some(&b'"') {
            pos += 1;
            loop {
                match rest.get(pos)? {
                    b'"' => {
                        pos += 1;
                        break;
                    }
                    b'\\' => {
                        value.push(*rest.get(pos + 1)?);
                        pos += 2;
                    }
                    b => {
                        value.push(*b);
                        pos += 1;
                    }
                }
            }
        } else {
            while pos < rest.len() && rest[pos] != b',' && !is_ows(rest[pos]) {
                value.push(rest[pos]);
                pos += 1;
            }
        }
        let value = String::from_utf8(value).ok()?;

        let slot = match name.as_str() {
            "username" => &mut params.username,
            "realm" => &mut params.realm,
            "nonce" => &mut params.nonce,
            "uri" => &mut params.uri,
            "response" => &mut params.response,
            "algorithm" => &mut params.algorithm,
            "cnonce" => &mut params.cnonce,
            "opaque" => &mut params.opaque,
            "qop" => &mut params.qop,
            "nc" => &mut params.nc,
            _ => continue,
        };
        if slot.is_some() {
            return None;
        }
        *slot = Some(value);
    }
    Some(params)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Byte comparison whose duration does not depend on the first difference.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

impl RequestView<'_> {
    /// Query arguments in arrival order, the request context a nonce binds to.
    fn nonce_args(&self) -> Vec<u8> {
        let mut args = Vec::new();
        for (name, value) in self.fields(FieldKind::GetArgument) {
            if !args.is_empty() {
                args.push(b'&');
            }
            args.extend_from_slice(name);
            if let Some(value) = value {
                args.push(b'=');
                args.extend_from_slice(value);
            }
        }
        args
    }

    fn nonce_for(&self, ts_ms: u64, realm: &str) -> String {
        let args = self.nonce_args();
        let binding = NonceBinding {
            method: self.method_str().as_bytes(),
            random: &self.context.random,
            uri: self.path_bytes(),
            args: &args,
            realm: realm.as_bytes(),
        };
        generate_nonce(ts_ms, &binding)
    }

    /// Builds a `401 Unauthorized` carrying a fresh nonce for this request.
    ///
    /// `stale` tells the client its credentials were fine and only the nonce expired.
    pub fn digest_auth_challenge(
        &self,
        realm: &str,
        opaque: &str,
        algorithm: DigestAlgorithm,
        stale: bool,
    ) -> Result<Response, ResponseError> {
        let Some(nonces) = &self.context.nonces else {
            return Err(ResponseError::invalid("digest authentication is disabled"));
        };

        let now = now_ms();
        let mut nonce = self.nonce_for(now, realm);
        {
            let mut nonces = nonces.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if !nonces.try_register(&nonce, now) {
                let retry = now + retry_jitter(&nonce);
                let candidate = self.nonce_for(retry, realm);
                if nonces.try_register(&candidate, now) {
                    nonce = candidate;
                } else {
                    // the client will be told the nonce is stale and retry with a new one
                    debug!("nonce slot busy, issuing an unregistered nonce");
                }
            }
        }

        let mut challenge = format!(
            "Digest realm=\"{}\", qop=\"auth\", algorithm={}, nonce=\"{nonce}\", opaque=\"{}\"",
            quote(realm),
            algorithm.name(),
            quote(opaque)
        );
        if stale {
            challenge.push_str(", stale=true");
        }
        challenge.push_str(", charset=UTF-8");
        Response::builder(StatusCode::UNAUTHORIZED).header(WWW_AUTHENTICATE, challenge).build()
    }

    /// Verifies the `Authorization: Digest` header of this request.
    pub fn digest_auth_check(
        &self,
        realm: &str,
        username: &str,
        password: &str,
        algorithm: DigestAlgorithm,
    ) -> DigestAuthResult {
        let Some(nonces) = &self.context.nonces else {
            return DigestAuthResult::Disabled;
        };
        let Some(header) = self.header_bytes(AUTHORIZATION.as_str()) else {
            return DigestAuthResult::NoHeader;
        };
        let Some(params) = parse_digest_header(header) else {
            return DigestAuthResult::WrongHeader;
        };
        let (Some(user), Some(req_realm), Some(nonce), Some(uri), Some(response)) =
            (&params.username, &params.realm, &params.nonce, &params.uri, &params.response)
        else {
            return DigestAuthResult::WrongHeader;
        };

        let requested = match &params.algorithm {
            Some(name) => DigestAlgorithm::from_name(name),
            None => Some(DigestAlgorithm::Md5),
        };
        if requested != Some(algorithm) {
            return DigestAuthResult::WrongAlgorithm;
        }
        if !params.qop.as_deref().is_some_and(|qop| qop.eq_ignore_ascii_case("auth")) {
            return DigestAuthResult::WrongQop;
        }
        let (Some(cnonce), Some(nc_text)) = (&params.cnonce, &params.nc) else {
            return DigestAuthResult::WrongHeader;
        };
        let Ok(nc) = u64::from_str_radix(nc_text, 16) else {
            return DigestAuthResult::WrongHeader;
        };
        if user != username {
            return DigestAuthResult::WrongUsername;
        }
        if req_realm != realm {
            return DigestAuthResult::WrongRealm;
        }
        if uri.as_bytes() != self.target() {
            return DigestAuthResult::WrongUri;
        }

        let Some(ts) = nonce_timestamp(nonce) else {
            return DigestAuthResult::NonceWrong;
        };
        let now = now_ms();
        if elapsed_ms(ts, now) > self.context.options.digest_nonce_timeout.saturating_mul(1000) {
            return DigestAuthResult::NonceStale;
        }
        if self.nonce_for(ts, realm) != *nonce {
            debug!("nonce was issued for another request");
            return DigestAuthResult::NonceStale;
        }

        let mut ha1 = algorithm.hash(&[username.as_bytes(), realm.as_bytes(), password.as_bytes()]);
        if algorithm.is_session() {
            ha1 = algorithm.hash(&[ha1.as_bytes(), nonce.as_bytes(), cnonce.as_bytes()]);
        }
        let ha2 = algorithm.hash(&[self.method_str().as_bytes(), uri.as_bytes()]);
        let expected = algorithm.hash(&[
            ha1.as_bytes(),
            nonce.as_bytes(),
            nc_text.as_bytes(),
            cnonce.as_bytes(),
            b"auth",
            ha2.as_bytes(),
        ]);
        if !constant_time_eq(expected.as_bytes(), response.to_ascii_lowercase().as_bytes()) {
            warn!(username = %user, "digest response mismatch");
            return DigestAuthResult::ResponseWrong;
        }

        let check = nonces.lock().unwrap_or_else(std::sync::PoisonError::into_inner).check(nonce, nc);
        match check {
            NonceCheck::Ok => DigestAuthResult::Ok,
            NonceCheck::Stale => DigestAuthResult::NonceStale,
            NonceCheck::Wrong => DigestAuthResult::NonceWrong,
        }
    }
}
