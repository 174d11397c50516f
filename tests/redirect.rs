mod support;

use std::io::Read;

use support::server;

#[test]
fn follows_a_303_and_rewrites_post_to_get() {
    let srv = server::spawn(|mut stream| {
        let head = server::read_request_head(&mut stream);
        if head.starts_with("POST /start") {
            // drain the request body still sitting on the wire before
            // reusing this connection for the redirected GET.
            let mut discard = [0u8; b"payload".len()];
            stream.read_exact(&mut discard).unwrap();

            let location = "HTTP/1.1 303 See Other\r\nLocation: /next\r\nContent-Length: 0\r\n\r\n";
            let _ = std::io::Write::write_all(&mut stream, location.as_bytes());
        } else {
            assert!(head.starts_with("GET /next"));
            server::respond_ok(&mut stream, "redirected");
        }
    });

    let client = hyperpool::Client::new();
    let mut response = client
        .post(srv.url("/start"))
        .body("payload")
        .send()
        .expect("request should succeed");

    assert_eq!(response.status(), http::StatusCode::OK);
    assert_eq!(response.data().unwrap(), b"redirected");
}

#[test]
fn disabling_redirects_on_one_request_returns_the_303_directly() {
    let srv = server::spawn(|mut stream| {
        server::read_request_head(&mut stream);
        let _ = std::io::Write::write_all(
            &mut stream,
            b"HTTP/1.1 303 See Other\r\nLocation: /next\r\nContent-Length: 0\r\n\r\n",
        );
    });

    let client = hyperpool::Client::new();
    let response = client
        .get(srv.url("/start"))
        .redirect(false)
        .send()
        .expect("request should succeed");

    assert_eq!(response.status(), http::StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get("location"),
        Some("/next".to_string())
    );
}
