mod support;

use std::io::Read;

use support::server;

#[test]
fn get_returns_body_text() {
    let srv = server::spawn(|mut stream| {
        server::read_request_head(&mut stream);
        server::respond_ok(&mut stream, "hello");
    });

    let client = hyperpool::Client::new();
    let mut response = client.get(srv.url("/")).send().expect("request should succeed");
    assert_eq!(response.status(), http::StatusCode::OK);

    let body = response.data().expect("body should be readable");
    assert_eq!(body, b"hello");
}

#[test]
fn post_sends_body_with_content_length() {
    let srv = server::spawn(|mut stream| {
        let head = server::read_request_head(&mut stream);
        assert!(head.contains("POST / HTTP/1.1"));
        assert!(head.to_ascii_lowercase().contains("content-length: 4"));

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"body");

        server::respond_ok(&mut stream, "ok");
    });

    let client = hyperpool::Client::new();
    let response = client
        .post(srv.url("/"))
        .body("body")
        .send()
        .expect("request should succeed");
    assert_eq!(response.status(), http::StatusCode::OK);
}

#[test]
fn connection_is_reused_across_requests() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let accepts = Arc::new(AtomicUsize::new(0));
    let accepts_clone = accepts.clone();
    let srv = server::spawn(move |mut stream| {
        accepts_clone.fetch_add(1, Ordering::SeqCst);
        for _ in 0..2 {
            server::read_request_head(&mut stream);
            server::respond_ok(&mut stream, "ok");
        }
    });

    let client = hyperpool::Client::new();
    for _ in 0..2 {
        let response = client.get(srv.url("/")).send().expect("request should succeed");
        assert_eq!(response.status(), http::StatusCode::OK);
    }

    assert_eq!(accepts.load(Ordering::SeqCst), 1, "both requests should share one TCP connection");
}

#[test]
fn default_headers_apply_to_every_request() {
    let srv = server::spawn(|mut stream| {
        let head = server::read_request_head(&mut stream);
        assert!(head.to_ascii_lowercase().contains("x-api-key: secret"));
        server::respond_ok(&mut stream, "ok");
    });

    let mut headers = hyperpool::HeaderDict::new();
    headers.set("x-api-key", "secret").unwrap();
    let client = hyperpool::Client::builder().default_headers(headers).build().unwrap();

    let response = client.get(srv.url("/")).send().expect("request should succeed");
    assert_eq!(response.status(), http::StatusCode::OK);
}

#[test]
fn custom_header_on_a_single_request_does_not_leak_into_the_next() {
    let srv = server::spawn(|mut stream| {
        for i in 0..2 {
            let head = server::read_request_head(&mut stream);
            if i == 0 {
                assert!(head.to_ascii_lowercase().contains("x-once: yes"));
            } else {
                assert!(!head.to_ascii_lowercase().contains("x-once"));
            }
            server::respond_ok(&mut stream, "ok");
        }
    });

    let client = hyperpool::Client::new();
    let mut once_headers = hyperpool::HeaderDict::new();
    once_headers.set("x-once", "yes").unwrap();
    let r1 = client.get(srv.url("/")).headers(once_headers).send().unwrap();
    assert_eq!(r1.status(), http::StatusCode::OK);

    let r2 = client.get(srv.url("/")).send().unwrap();
    assert_eq!(r2.status(), http::StatusCode::OK);
}
