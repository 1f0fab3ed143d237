mod common;

use std::sync::{Arc, Mutex};

use http::StatusCode;
use indoc::indoc;
use micro_httpd::connection::State;
use micro_httpd::handler::{Action, Upload, UploadAction, make_handler};
use micro_httpd::protocol::{CloseReason, FieldKind, HttpVersion, Method, RequestView, Response};

use common::{Harness, options, split_response, status_of};

/// What the handler saw of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Seen {
    method: Method,
    path: String,
    version: HttpVersion,
    fields: Vec<(FieldKind, String, String)>,
}

fn recorder() -> (Arc<Mutex<Vec<Seen>>>, impl Fn(&RequestView<'_>) -> Action + Send + Sync) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let handler = move |request: &RequestView<'_>| {
        let mut fields = Vec::new();
        for kind in [FieldKind::Header, FieldKind::Cookie, FieldKind::GetArgument] {
            for (name, value) in request.fields(kind) {
                let value = value.map(|v| String::from_utf8_lossy(v).into_owned()).unwrap_or_default();
                fields.push((kind, String::from_utf8_lossy(name).into_owned(), value));
            }
        }
        log.lock().unwrap().push(Seen {
            method: request.method(),
            path: request.path().into_owned(),
            version: request.version(),
            fields,
        });
        Action::response(Response::from_buffer(StatusCode::OK, request.path().into_owned()))
    };
    (seen, handler)
}

fn of_kind(seen: &Seen, kind: FieldKind) -> Vec<(&str, &str)> {
    seen.fields.iter().filter(|(k, _, _)| *k == kind).map(|(_, n, v)| (n.as_str(), v.as_str())).collect()
}

#[test]
fn minimum_get() {
    let (seen, handler) = recorder();
    let mut harness = Harness::new(options().build().unwrap(), make_handler(handler));
    harness.send(b"GET / HTTP/1.0\r\n\r\n").run();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, Method::Get);
    assert_eq!(seen[0].path, "/");
    assert_eq!(seen[0].version, HttpVersion::Http10);

    for state in [
        State::ReqLineReceiving,
        State::ReqLineReceived,
        State::ReqHeadersReceiving,
        State::HeadersReceived,
        State::HeadersProcessed,
        State::FullReqReceived,
        State::FullReplySent,
    ] {
        assert!(harness.visited(state), "{state:?} not visited");
    }

    let output = harness.take_output();
    let (head, body, rest) = split_response(&output);
    assert_eq!(status_of(head), 200);
    // HTTP/1.0 without keep-alive
    assert!(head.contains("Connection: close"));
    assert_eq!(body, "/");
    assert!(rest.is_empty());
    assert_eq!(harness.close_reason(), Some(CloseReason::Completed));
}

#[test]
fn pipelined_requests_share_the_connection() {
    let (seen, handler) = recorder();
    let mut harness = Harness::new(options().build().unwrap(), make_handler(handler));
    harness.send(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n").run();

    let paths: Vec<String> = seen.lock().unwrap().iter().map(|seen| seen.path.clone()).collect();
    assert_eq!(paths, ["/a", "/b"]);
    assert_eq!(harness.count(State::FullReplySent), 2);
    assert_eq!(harness.state(), State::Init);

    let output = harness.take_output();
    let (first, body_a, rest) = split_response(&output);
    let (second, body_b, rest) = split_response(rest);
    assert_eq!((status_of(first), body_a), (200, "/a"));
    assert_eq!((status_of(second), body_b), (200, "/b"));
    assert!(!first.contains("Connection: close"));
    assert!(rest.is_empty());

    harness.close_input().run();
    assert_eq!(harness.close_reason(), Some(CloseReason::ClientShutdown));
}

#[test]
fn request_split_over_many_reads() {
    let (seen, handler) = recorder();
    let mut harness = Harness::new(options().build().unwrap(), make_handler(handler));
    for piece in [&b"GE"[..], b"T /slow HT", b"TP/1.1\r\nHo", b"st: x\r", b"\n\r\n"] {
        assert!(seen.lock().unwrap().is_empty());
        harness.send(piece).run();
    }
    assert_eq!(seen.lock().unwrap()[0].path, "/slow");
    assert_eq!(status_of(&harness.take_output()), 200);
}

#[test]
fn cookies_are_split() {
    let (seen, handler) = recorder();
    let mut harness = Harness::new(options().build().unwrap(), make_handler(handler));
    harness
        .send(b"GET / HTTP/1.1\r\nHost: x\r\n")
        .send(b"Cookie: name1=var1; name2=var2; name3=; name4=\"var4 with spaces\"; name5=var_with_=_char\r\n\r\n")
        .run();

    let seen = seen.lock().unwrap();
    assert_eq!(
        of_kind(&seen[0], FieldKind::Cookie),
        [
            ("name1", "var1"),
            ("name2", "var2"),
            ("name3", ""),
            ("name4", "var4 with spaces"),
            ("name5", "var_with_=_char"),
        ]
    );
}

#[test]
fn query_arguments_and_decoded_path() {
    let (seen, handler) = recorder();
    let mut harness = Harness::new(options().build().unwrap(), make_handler(handler));
    harness.send(b"GET /a%20b/c?x=1&y=hello%20world&flag HTTP/1.1\r\nHost: x\r\n\r\n").run();

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].path, "/a b/c");
    assert_eq!(of_kind(&seen[0], FieldKind::GetArgument), [("x", "1"), ("y", "hello world"), ("flag", "")]);
}

#[test]
fn headers_keep_order_and_raw_names() {
    let (seen, handler) = recorder();
    let mut harness = Harness::new(options().build().unwrap(), make_handler(handler));
    harness
        .send(indoc! {b"
            GET / HTTP/1.1\r
            Host: example.org\r
            X-Custom:   padded value  \r
            x-custom: second\r
            \r
        "})
        .run();

    let seen = seen.lock().unwrap();
    assert_eq!(
        of_kind(&seen[0], FieldKind::Header),
        [("Host", "example.org"), ("X-Custom", "padded value"), ("x-custom", "second")]
    );
}

#[test]
fn missing_colon_is_rejected() {
    let (seen, handler) = recorder();
    let mut harness = Harness::new(options().build().unwrap(), make_handler(handler));
    harness.send(b"GET / HTTP/1.1\r\nHost: x\r\nX-Bad value\r\n\r\n").run();

    assert!(seen.lock().unwrap().is_empty());
    let output = harness.take_output();
    let (head, _, _) = split_response(&output);
    assert_eq!(status_of(head), 400);
    assert!(head.contains("Connection: close"));
    assert_eq!(harness.state(), State::Closed);
    assert_eq!(harness.close_reason(), Some(CloseReason::ProtocolError));
}

#[test]
fn header_without_colon_is_skipped_when_lenient() {
    let (seen, handler) = recorder();
    let options = options().strictness_level(-2).build().unwrap();
    let mut harness = Harness::new(options, make_handler(handler));
    harness.send(b"GET / HTTP/1.1\r\nHost: x\r\nX-Bad value\r\n\r\n").run();

    let seen = seen.lock().unwrap();
    assert_eq!(of_kind(&seen[0], FieldKind::Header), [("Host", "x")]);
    assert_eq!(status_of(&harness.take_output()), 200);
}

#[test]
fn error_statuses() {
    let cases: [(&[u8], u16); 6] = [
        (b"GET / HTTP/1.1\r\n\r\n", 400),
        (b"GET / HTTP/2.0\r\nHost: x\r\n\r\n", 505),
        (b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 12a\r\n\r\n", 400),
        (b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 99999999999999999999999\r\n\r\n", 413),
        (b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\n", 400),
        (b"POST / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: gzip\r\n\r\n", 400),
    ];
    for (request, status) in cases {
        let (seen, handler) = recorder();
        let mut harness = Harness::new(options().build().unwrap(), make_handler(handler));
        harness.send(request).run();
        assert!(seen.lock().unwrap().is_empty(), "{}", String::from_utf8_lossy(request));
        assert_eq!(status_of(&harness.take_output()), status, "{}", String::from_utf8_lossy(request));
        assert!(harness.connection.is_closed());
    }
}

#[test]
fn oversized_uri_selects_414() {
    let (_, handler) = recorder();
    let options = options().connection_memory_limit(2048).connection_memory_increment(256).build().unwrap();
    let mut harness = Harness::new(options, make_handler(handler));
    let mut request = b"GET /".to_vec();
    request.extend(std::iter::repeat_n(b'a', 4096));
    harness.send(&request).run();
    assert_eq!(status_of(&harness.take_output()), 414);
}

#[test]
fn oversized_headers_select_431() {
    let (_, handler) = recorder();
    let options = options().connection_memory_limit(2048).connection_memory_increment(256).build().unwrap();
    let mut harness = Harness::new(options, make_handler(handler));
    harness.send(b"GET / HTTP/1.1\r\nHost: x\r\n");
    for i in 0..200 {
        harness.send(format!("X-Header-{i}: some fairly long value to fill the pool\r\n").as_bytes());
    }
    harness.run();
    assert_eq!(status_of(&harness.take_output()), 431);
}

#[test]
fn whitespace_in_target_redirects() {
    let (seen, handler) = recorder();
    let options = options().strictness_level(0).build().unwrap();
    let mut harness = Harness::new(options, make_handler(handler));
    harness.send(b"GET /a b HTTP/1.1\r\nHost: x\r\n\r\n").run();

    assert!(seen.lock().unwrap().is_empty());
    let output = harness.take_output();
    let (head, _, _) = split_response(&output);
    assert_eq!(status_of(head), 301);
    assert!(head.contains("Location: /a%20b"));
}

#[test]
fn empty_lines_before_request_line() {
    let (seen, handler) = recorder();
    let mut harness = Harness::new(options().build().unwrap(), make_handler(handler));
    harness.send(b"\r\n\r\nGET /x HTTP/1.1\r\nHost: x\r\n\r\n").run();
    assert_eq!(seen.lock().unwrap()[0].path, "/x");

    let (_, handler) = recorder();
    let strict = options().strictness_level(2).build().unwrap();
    let mut harness = Harness::new(strict, make_handler(handler));
    harness.send(b"\r\n\r\nGET /x HTTP/1.1\r\nHost: x\r\n\r\n").run();
    assert_eq!(status_of(&harness.take_output()), 400);
}

#[test]
fn connection_close_header_ends_connection() {
    let (_, handler) = recorder();
    let mut harness = Harness::new(options().build().unwrap(), make_handler(handler));
    harness.send(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").run();
    assert!(harness.take_output().contains("Connection: close"));
    assert_eq!(harness.close_reason(), Some(CloseReason::Completed));
}

#[test]
fn http10_keep_alive() {
    let (seen, handler) = recorder();
    let mut harness = Harness::new(options().build().unwrap(), make_handler(handler));
    harness.send(b"GET /1 HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\nGET /2 HTTP/1.0\r\n\r\n").run();

    assert_eq!(seen.lock().unwrap().len(), 2);
    let output = harness.take_output();
    let (first, _, rest) = split_response(&output);
    let (second, _, _) = split_response(rest);
    assert!(first.contains("Connection: Keep-Alive"));
    assert!(second.contains("Connection: close"));
    assert_eq!(harness.close_reason(), Some(CloseReason::Completed));
}

#[test]
fn abort_closes_without_reply() {
    let mut harness = Harness::new(options().build().unwrap(), make_handler(|_: &RequestView<'_>| Action::Abort));
    harness.send(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").run();
    assert!(harness.take_output().is_empty());
    assert_eq!(harness.close_reason(), Some(CloseReason::AppAbort));
}

#[test]
fn idle_timeout_closes() {
    let (_, handler) = recorder();
    let mut harness = Harness::new(options().connection_default_timeout(1).build().unwrap(), make_handler(handler));
    harness.send(b"GET / HTT").run();
    assert!(harness.connection.deadline().is_some());
    std::thread::sleep(std::time::Duration::from_millis(1100));
    harness.run();
    assert_eq!(harness.close_reason(), Some(CloseReason::Timeout));
}

#[test]
fn reset_closes_silently() {
    let (_, handler) = recorder();
    let mut harness = Harness::new(options().build().unwrap(), make_handler(handler));
    harness.send(b"GET / HTT").run();
    harness.peer.reset();
    harness.send(b"P/1.1\r\n").run();
    assert_eq!(harness.close_reason(), Some(CloseReason::TransportReset));
    assert!(harness.take_output().is_empty());
}

#[test]
fn parsed_head_agrees_with_httparse() {
    let raw: &[u8] = indoc! {b"
        POST /submit/form?id=7 HTTP/1.1\r
        Host: example.org\r
        User-Agent: probe/1.0\r
        Accept:text/html, */*;q=0.8\r
        X-Padded:    spaced value   \r
        Content-Length: 0\r
        \r
    "};
    let mut headers = [httparse::EMPTY_HEADER; 16];
    let mut oracle = httparse::Request::new(&mut headers);
    assert!(oracle.parse(raw).unwrap().is_complete());

    let (seen, handler) = recorder();
    let mut harness = Harness::new(options().build().unwrap(), make_handler(handler));
    harness.send(raw).run();

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].method, Method::Post);
    assert_eq!(oracle.method, Some("POST"));
    assert_eq!(oracle.path, Some("/submit/form?id=7"));
    assert_eq!(seen[0].path, "/submit/form");
    assert_eq!(oracle.version, Some(1));
    assert_eq!(seen[0].version, HttpVersion::Http11);

    let expected: Vec<(&str, &str)> = oracle
        .headers
        .iter()
        .map(|h| (h.name, std::str::from_utf8(h.value).unwrap().trim()))
        .collect();
    assert_eq!(of_kind(&seen[0], FieldKind::Header), expected);
}

#[test]
fn chunked_framing_wins_over_content_length() {
    let request: &[u8] =
        b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
    for strictness in [0, 1] {
        let handler = make_handler(|_: &RequestView<'_>| {
            Action::Upload(Upload::full(64, |_: &RequestView<'_>, body: &[u8]| {
                UploadAction::response(Response::from_buffer(StatusCode::OK, body.to_vec()))
            }))
        });
        let mut harness = Harness::new(options().strictness_level(strictness).build().unwrap(), handler);
        harness.send(request).run();

        let output = harness.take_output();
        let (head, body, _) = split_response(&output);
        assert_eq!((status_of(head), body), (200, "hello"), "strictness {strictness}");
        // the framing is ambiguous to other hops, the connection is not reused
        assert!(head.contains("Connection: close"));
        assert!(harness.connection.is_closed());
    }
    for strictness in [2, 3] {
        let (seen, handler) = recorder();
        let mut harness = Harness::new(options().strictness_level(strictness).build().unwrap(), make_handler(handler));
        harness.send(request).run();
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(status_of(&harness.take_output()), 400, "strictness {strictness}");
        assert!(harness.connection.is_closed());
    }
}

#[test]
fn duplicate_host_depends_on_strictness() {
    let request: &[u8] = b"GET / HTTP/1.1\r\nHost: a\r\nHost: b\r\n\r\n";

    let (seen, handler) = recorder();
    let mut harness = Harness::new(options().strictness_level(0).build().unwrap(), make_handler(handler));
    harness.send(request).run();
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(status_of(&harness.take_output()), 400);
    assert!(harness.connection.is_closed());

    let (seen, handler) = recorder();
    let mut harness = Harness::new(options().strictness_level(-3).build().unwrap(), make_handler(handler));
    harness.send(request).run();
    assert_eq!(status_of(&harness.take_output()), 200);
    let seen = seen.lock().unwrap();
    assert_eq!(of_kind(&seen[0], FieldKind::Header), [("Host", "a"), ("Host", "b")]);
}

#[test]
fn upload_without_length_needs_one_when_strict() {
    let request: &[u8] = b"POST / HTTP/1.1\r\nHost: x\r\n\r\n";

    let (seen, handler) = recorder();
    let mut harness = Harness::new(options().strictness_level(3).build().unwrap(), make_handler(handler));
    harness.send(request).run();
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(status_of(&harness.take_output()), 411);

    let (seen, handler) = recorder();
    let mut harness = Harness::new(options().strictness_level(0).build().unwrap(), make_handler(handler));
    harness.send(request).run();
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(status_of(&harness.take_output()), 200);
}
