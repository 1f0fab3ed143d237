mod common;

use http::StatusCode;
use md5::{Digest, Md5};
use micro_httpd::auth::DigestAlgorithm;
use micro_httpd::handler::{Action, make_handler};
use micro_httpd::protocol::{RequestView, Response};

use common::{Harness, options, split_response, status_of};

const REALM: &str = "vault@example.org";

fn md5_hex(parts: &[&str]) -> String {
    hex::encode(Md5::digest(parts.join(":").as_bytes()))
}

fn digest_handler(request: &RequestView<'_>) -> Action {
    let result = request.digest_auth_check(REALM, "keeper", "open sesame", DigestAlgorithm::Md5);
    if result.is_ok() {
        return Action::response(Response::from_buffer(StatusCode::OK, "welcome"));
    }
    match request.digest_auth_challenge(REALM, "opaque-token", DigestAlgorithm::Md5, result.is_stale()) {
        Ok(challenge) => Action::response(challenge),
        Err(_) => Action::Abort,
    }
}

fn nonce_of(head: &str) -> String {
    let start = head.find("nonce=\"").expect("challenge carries a nonce") + 7;
    let len = head[start..].find('"').expect("nonce is quoted");
    head[start..start + len].to_owned()
}

fn authorized_get(nonce: &str, nc: &str) -> Vec<u8> {
    let cnonce = "0a4f113b";
    let ha1 = md5_hex(&["keeper", REALM, "open sesame"]);
    let ha2 = md5_hex(&["GET", "/secret"]);
    let response = md5_hex(&[&ha1, nonce, nc, cnonce, "auth", &ha2]);
    format!(
        "GET /secret HTTP/1.1\r\nHost: x\r\nAuthorization: Digest username=\"keeper\", realm=\"{REALM}\", \
         nonce=\"{nonce}\", uri=\"/secret\", qop=auth, nc={nc}, cnonce=\"{cnonce}\", \
         response=\"{response}\", opaque=\"opaque-token\"\r\n\r\n"
    )
    .into_bytes()
}

#[test]
fn digest_challenge_answer_and_replay() {
    let mut harness = Harness::new(options().build().unwrap(), make_handler(digest_handler));
    harness.send(b"GET /secret HTTP/1.1\r\nHost: x\r\n\r\n").run();

    let output = harness.take_output();
    let (head, _, _) = split_response(&output);
    assert_eq!(status_of(head), 401);
    assert!(head.contains("www-authenticate: Digest realm=\"vault@example.org\""));
    assert!(!head.contains("stale=true"));
    let nonce = nonce_of(head);

    harness.send(&authorized_get(&nonce, "00000001")).run();
    let output = harness.take_output();
    assert_eq!(split_response(&output).1, "welcome");

    // the same count again is a replay
    harness.send(&authorized_get(&nonce, "00000001")).run();
    let output = harness.take_output();
    let (head, _, _) = split_response(&output);
    assert_eq!(status_of(head), 401);
    assert!(head.contains("stale=true"));

    harness.send(&authorized_get(&nonce, "00000002")).run();
    assert_eq!(status_of(&harness.take_output()), 200);
}

#[test]
fn digest_wrong_password_is_challenged_again() {
    let mut harness = Harness::new(options().build().unwrap(), make_handler(digest_handler));
    harness.send(b"GET /secret HTTP/1.1\r\nHost: x\r\n\r\n").run();
    let output = harness.take_output();
    let nonce = nonce_of(split_response(&output).0);

    let forged = String::from_utf8(authorized_get(&nonce, "00000001"))
        .unwrap()
        .replace("response=\"", "response=\"0");
    harness.send(forged.as_bytes()).run();
    let output = harness.take_output();
    let (head, _, _) = split_response(&output);
    assert_eq!(status_of(head), 401);
    assert!(!head.contains("stale=true"));
}

#[test]
fn digest_disabled_without_a_nonce_array() {
    let options = options().digest_nc_array_size(0).build().unwrap();
    let mut harness = Harness::new(options, make_handler(digest_handler));
    harness.send(b"GET /secret HTTP/1.1\r\nHost: x\r\n\r\n").run();
    // no challenge can be issued, the handler aborts
    assert!(harness.take_output().is_empty());
    assert!(harness.connection.is_closed());
}

#[test]
fn basic_credentials_and_challenge() {
    let handler = make_handler(|request: &RequestView<'_>| match request.basic_auth() {
        Some(credentials) if credentials.password.as_deref() == Some("pass") => {
            Action::response(Response::from_buffer(StatusCode::OK, credentials.username))
        }
        _ => match Response::basic_auth_required("files") {
            Ok(challenge) => Action::response(challenge),
            Err(_) => Action::Abort,
        },
    });
    let mut harness = Harness::new(options().build().unwrap(), handler);

    harness.send(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").run();
    let output = harness.take_output();
    let (head, _, _) = split_response(&output);
    assert_eq!(status_of(head), 401);
    assert!(head.contains("www-authenticate: Basic realm=\"files\""));

    // user:pass
    harness.send(b"GET / HTTP/1.1\r\nHost: x\r\nAuthorization: Basic dXNlcjpwYXNz\r\n\r\n").run();
    let output = harness.take_output();
    assert_eq!(split_response(&output).1, "user");
}
