//! Client authentication helpers.
//!
//! Both schemes are exposed as methods of [`RequestView`](crate::protocol::RequestView):
//!
//! - Basic: [`basic_auth`](crate::protocol::RequestView::basic_auth) decodes the credentials,
//!   [`Response::basic_auth_required`](crate::protocol::Response::basic_auth_required) builds
//!   the challenge
//! - Digest: [`digest_auth_check`](crate::protocol::RequestView::digest_auth_check) and
//!   [`digest_auth_challenge`](crate::protocol::RequestView::digest_auth_challenge), backed by
//!   the daemon-wide [`NonceNcArray`]

mod basic;
mod digest;
mod nonce;

pub use basic::BasicCredentials;
pub use digest::{DigestAlgorithm, DigestAuthResult};
pub use nonce::{NonceCheck, NonceNcArray};
