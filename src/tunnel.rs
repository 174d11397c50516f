//! CONNECT tunnel wire protocol.
//!
//! Grounded on the donor's `core/client/connect/proxy/tunnel.rs`: sends a
//! byte-exact `CONNECT host:port HTTP/1.1` request over an already-open TCP
//! connection to a proxy, then scans the response status line for a `200`.
//! Translated from async/hyper framing to a direct blocking read loop over
//! `std::net::TcpStream`, since this crate has no hyper dependency.

use std::io::{Read, Write};
use std::net::TcpStream;

use http::HeaderValue;

use crate::error::{Error, Result};

/// Establishes a CONNECT tunnel through `tcp` (already connected to the
/// proxy) to `target_host:target_port`. On success, `tcp` is left positioned
/// immediately after the proxy's response headers, ready for the target's
/// own protocol (typically a TLS handshake) to begin.
pub fn establish(tcp: &mut TcpStream, target_host: &str, target_port: u16, proxy_auth: Option<&HeaderValue>) -> Result<()> {
    let authority = format!("{target_host}:{target_port}");
    let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some(auth) = proxy_auth {
        let value = auth.to_str().map_err(|_| Error::proxy("invalid proxy-authorization header value"))?;
        request.push_str("Proxy-Authorization: ");
        request.push_str(value);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");

    tcp.write_all(request.as_bytes()).map_err(Error::io)?;

    let mut buf = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        if let Some(idx) = find_double_crlf(&buf) {
            check_status_line(&buf[..idx])?;
            return Ok(());
        }
        let n = tcp.read(&mut chunk).map_err(Error::io)?;
        if n == 0 {
            return Err(Error::proxy("proxy closed connection during CONNECT handshake"));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > 64 * 1024 {
            return Err(Error::proxy("proxy CONNECT response headers too large"));
        }
    }
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn check_status_line(head: &[u8]) -> Result<()> {
    let text = std::str::from_utf8(head).map_err(|_| Error::proxy("non-UTF8 CONNECT response"))?;
    let status_line = text.lines().next().unwrap_or("");
    // Byte-exact scan per the donor: accept `HTTP/1.0 200` or `HTTP/1.1 200`
    // with any reason phrase.
    let is_ok = status_line.starts_with("HTTP/1.1 200") || status_line.starts_with("HTTP/1.0 200");
    if is_ok {
        Ok(())
    } else {
        Err(Error::proxy(format!("proxy CONNECT failed: {status_line}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn establish_succeeds_on_200_response() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let n = sock.read(&mut buf).unwrap();
            let request = String::from_utf8_lossy(&buf[..n]);
            assert!(request.starts_with("CONNECT example.com:443 HTTP/1.1"));
            sock.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n").unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let result = establish(&mut client, "example.com", 443, None);
        server.join().unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn establish_fails_on_non_200_response() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = sock.read(&mut buf).unwrap();
            sock.write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n").unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let result = establish(&mut client, "example.com", 443, None);
        server.join().unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn establish_includes_proxy_authorization_when_given() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let n = sock.read(&mut buf).unwrap();
            let request = String::from_utf8_lossy(&buf[..n]);
            assert!(request.contains("Proxy-Authorization: Basic abc123"));
            sock.write_all(b"HTTP/1.1 200 OK\r\n\r\n").unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let auth = HeaderValue::from_static("Basic abc123");
        let result = establish(&mut client, "example.com", 443, Some(&auth));
        server.join().unwrap();
        assert!(result.is_ok());
    }
}
