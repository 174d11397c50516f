//! HTTP/1.1 sans-I/O framing: request serialization and incremental
//! response parsing.
//!
//! Modeled after the donor's `core/client/proto/h1/role.rs` parser (macro-
//! assisted byte scanning over a growable buffer) but built sans-I/O per the
//! "coroutine-style send/receive" REDESIGN FLAG: the parser consumes bytes
//! fed to it and returns [`ParseOutcome::NeedMoreData`] rather than awaiting
//! a future. The caller (`connection.rs`) owns the socket and the event
//! loop; this module owns only the byte-level state machine.

use bytes::{Buf, BytesMut};
use http::{HeaderMap, Method, StatusCode, Version};

use crate::error::{Error, Result};
use crate::header::HeaderValue;

/// Our side of the HTTP/1.1 exchange (request writer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Idle,
    SendingHeaders,
    SendingBody,
    Done,
}

/// Their side of the HTTP/1.1 exchange (response reader).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvState {
    Idle,
    ReadingHeaders,
    ReadingBody,
    Done,
}

/// Whether the body is framed by a `Content-Length`, `Transfer-Encoding:
/// chunked`, or neither (read until EOF, HTTP/0.9-compatible).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFraming {
    Length(u64),
    Chunked,
    UntilClose,
    Empty,
}

/// A parsed status line + header block, with enough metadata to drive body
/// framing and the keep-alive decision.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: Version,
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderMap<HeaderValue>,
}

/// One parse step's result.
#[derive(Debug)]
pub enum ParseOutcome {
    /// A complete response head was parsed; `consumed` bytes should be
    /// advanced out of the input buffer.
    Head { head: ResponseHead, consumed: usize },
    /// More bytes are needed before progress can be made.
    NeedMoreData,
}

/// One body-read step's result.
#[derive(Debug)]
pub enum BodyEvent {
    /// `n` bytes of body data are available at the front of the buffer.
    Data(usize),
    /// The message is complete; `consumed` trailing bytes (e.g. the final
    /// chunk terminator) should be advanced out of the buffer.
    EndOfMessage { consumed: usize },
    NeedMoreData,
    /// The peer closed the connection. Valid completion only for
    /// `BodyFraming::UntilClose`; otherwise an `IncompleteRead`.
    ConnectionClosed,
}

/// Incrementally parses an HTTP/1.1 response out of a growable buffer.
pub struct ResponseParser {
    recv: RecvState,
    framing: Option<BodyFraming>,
    remaining: u64,
    chunk_remaining: u64,
    in_chunk_trailer: bool,
    force_empty_body: bool,
}

impl ResponseParser {
    pub fn new() -> Self {
        ResponseParser {
            recv: RecvState::Idle,
            framing: None,
            remaining: 0,
            chunk_remaining: 0,
            in_chunk_trailer: false,
            force_empty_body: false,
        }
    }

    pub fn state(&self) -> RecvState {
        self.recv
    }

    /// Call before parsing the head when the corresponding request used
    /// `HEAD`, so the forced-empty-body rule (spec §4.4) applies regardless
    /// of any `Content-Length` the server sends.
    pub fn expect_head_request(&mut self, is_head: bool) {
        self.force_empty_body = is_head;
    }

    /// Attempts to parse a complete status line + header block from `buf`.
    /// Does not consume `buf` itself; the caller advances it by
    /// `consumed` on [`ParseOutcome::Head`].
    pub fn parse_head(&mut self, buf: &[u8]) -> Result<ParseOutcome> {
        debug_assert_eq!(self.recv, RecvState::Idle);
        self.recv = RecvState::ReadingHeaders;

        let header_end = match find_double_crlf(buf) {
            Some(i) => i,
            None => return Ok(ParseOutcome::NeedMoreData),
        };

        let block = &buf[..header_end];
        let mut lines = block.split(|&b| b == b'\n');
        let status_line = lines.next().ok_or_else(|| Error::protocol("empty response"))?;
        let status_line = strip_cr(status_line);

        let (version, status, reason) = parse_status_line(status_line)?;

        let mut headers = HeaderMap::new();
        for raw_line in lines {
            let line = strip_cr(raw_line);
            if line.is_empty() {
                continue;
            }
            let colon = line
                .iter()
                .position(|&b| b == b':')
                .ok_or_else(|| Error::protocol("malformed header line"))?;
            let (name, value) = (&line[..colon], trim_ows(&line[colon + 1..]));
            if name.iter().any(|&b| b < 0x21 || b == b' ') {
                // header name contains CTL or space: spec says log, do not raise.
                crate::trace::warn!("dropping header with invalid name bytes");
                continue;
            }
            let hname = match http::header::HeaderName::from_bytes(name) {
                Ok(n) => n,
                Err(_) => {
                    crate::trace::warn!("dropping unparseable header name");
                    continue;
                }
            };
            let hvalue =
                HeaderValue::from_bytes(value).map_err(|_| Error::protocol("invalid header value bytes"))?;
            headers.append(hname, hvalue);
        }

        self.recv = RecvState::ReadingBody;
        self.framing = Some(determine_body_framing(
            status,
            &headers,
            self.force_empty_body,
        ));
        match self.framing {
            Some(BodyFraming::Length(n)) => self.remaining = n,
            Some(BodyFraming::Chunked) => self.chunk_remaining = 0,
            _ => {}
        }
        if matches!(self.framing, Some(BodyFraming::Empty)) {
            self.recv = RecvState::Done;
        }

        Ok(ParseOutcome::Head {
            head: ResponseHead {
                version,
                status,
                reason,
                headers,
            },
            consumed: header_end + 2, // past the blank line's CRLF
        })
    }

    /// Advances body parsing against `buf`. Returns how many bytes (if any)
    /// of decoded-on-the-wire body are ready, or signals end-of-message.
    pub fn parse_body<'a>(&mut self, buf: &'a [u8], peer_closed: bool) -> Result<BodyEvent> {
        match self.framing {
            None | Some(BodyFraming::Empty) => {
                self.recv = RecvState::Done;
                Ok(BodyEvent::EndOfMessage { consumed: 0 })
            }
            Some(BodyFraming::Length(_)) => self.parse_length_delimited(buf, peer_closed),
            Some(BodyFraming::UntilClose) => {
                if buf.is_empty() {
                    if peer_closed {
                        self.recv = RecvState::Done;
                        return Ok(BodyEvent::ConnectionClosed);
                    }
                    return Ok(BodyEvent::NeedMoreData);
                }
                Ok(BodyEvent::Data(buf.len()))
            }
            Some(BodyFraming::Chunked) => self.parse_chunked(buf, peer_closed),
        }
    }

    fn parse_length_delimited(&mut self, buf: &[u8], peer_closed: bool) -> Result<BodyEvent> {
        if self.remaining == 0 {
            self.recv = RecvState::Done;
            return Ok(BodyEvent::EndOfMessage { consumed: 0 });
        }
        if buf.is_empty() {
            if peer_closed {
                return Err(Error::protocol("connection closed before declared Content-Length was satisfied"));
            }
            return Ok(BodyEvent::NeedMoreData);
        }
        let take = (buf.len() as u64).min(self.remaining) as usize;
        self.remaining -= take as u64;
        if self.remaining == 0 {
            self.recv = RecvState::Done;
        }
        Ok(BodyEvent::Data(take))
    }

    fn parse_chunked(&mut self, buf: &[u8], peer_closed: bool) -> Result<BodyEvent> {
        if self.in_chunk_trailer {
            return match find_double_crlf_or_crlf(buf) {
                Some(consumed) => {
                    self.recv = RecvState::Done;
                    Ok(BodyEvent::EndOfMessage { consumed })
                }
                None if peer_closed => Err(Error::protocol("connection closed mid-trailer")),
                None => Ok(BodyEvent::NeedMoreData),
            };
        }

        if self.chunk_remaining == 0 {
            // Need a chunk-size line: "<hex>[;ext]\r\n".
            let line_end = match find_crlf(buf) {
                Some(i) => i,
                None => {
                    if peer_closed {
                        return Err(Error::protocol("connection closed mid-chunk-size"));
                    }
                    return Ok(BodyEvent::NeedMoreData);
                }
            };
            let size_field = &buf[..line_end];
            let size_str = size_field
                .split(|&b| b == b';')
                .next()
                .unwrap_or(size_field);
            let size_str = std::str::from_utf8(size_str)
                .map_err(|_| Error::protocol("chunk size is not valid UTF-8"))?
                .trim();
            let size = u64::from_str_radix(size_str, 16)
                .map_err(|_| Error::protocol("chunk size is not valid hex"))?;
            if size == 0 {
                self.in_chunk_trailer = true;
                // consumed the size line; re-enter to look for trailer terminator.
                return self.parse_chunked(&buf[line_end + 2..], peer_closed).map(|ev| match ev {
                    BodyEvent::EndOfMessage { consumed } => BodyEvent::EndOfMessage {
                        consumed: consumed + line_end + 2,
                    },
                    BodyEvent::NeedMoreData => BodyEvent::NeedMoreData,
                    other => other,
                });
            }
            self.chunk_remaining = size;
            return self
                .parse_chunked(&buf[line_end + 2..], peer_closed)
                .map(|ev| shift_consumed(ev, line_end + 2));
        }

        if buf.is_empty() {
            if peer_closed {
                return Err(Error::protocol("connection closed mid-chunk-body"));
            }
            return Ok(BodyEvent::NeedMoreData);
        }
        let take = (buf.len() as u64).min(self.chunk_remaining) as usize;
        self.chunk_remaining -= take as u64;
        Ok(BodyEvent::Data(take))
    }

    /// Whether the response we just parsed permits the connection to be
    /// reused, per spec §4.4: version 1.1, no `Connection: close`, and our
    /// side reached `Done` (no aborted upload).
    pub fn is_keep_alive(head: &ResponseHead, our_side_done: bool) -> bool {
        if !our_side_done {
            return false;
        }
        if head.version != Version::HTTP_11 {
            return false;
        }
        !connection_header_says_close(&head.headers)
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

fn shift_consumed(ev: BodyEvent, extra: usize) -> BodyEvent {
    match ev {
        BodyEvent::EndOfMessage { consumed } => BodyEvent::EndOfMessage {
            consumed: consumed + extra,
        },
        other => other,
    }
}

fn connection_header_says_close(headers: &HeaderMap<HeaderValue>) -> bool {
    headers
        .get_all(http::header::CONNECTION)
        .iter()
        .any(|v| v.to_str().map(|s| s.eq_ignore_ascii_case("close")).unwrap_or(false))
}

fn determine_body_framing(status: StatusCode, headers: &HeaderMap<HeaderValue>, force_empty: bool) -> BodyFraming {
    if force_empty
        || status.as_u16() < 200
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return BodyFraming::Empty;
    }
    let chunked = headers
        .get_all(http::header::TRANSFER_ENCODING)
        .iter()
        .any(|v| v.to_str().map(|s| s.to_ascii_lowercase().contains("chunked")).unwrap_or(false));
    if chunked {
        return BodyFraming::Chunked;
    }
    if let Some(len) = headers.get(http::header::CONTENT_LENGTH) {
        if let Ok(s) = len.to_str() {
            if let Ok(n) = s.trim().parse::<u64>() {
                return BodyFraming::Length(n);
            }
        }
    }
    BodyFraming::UntilClose
}

fn parse_status_line(line: &[u8]) -> Result<(Version, StatusCode, String)> {
    let text = std::str::from_utf8(line).map_err(|_| Error::protocol("status line is not valid UTF-8"))?;
    let mut parts = text.splitn(3, ' ');
    let version = match parts.next() {
        Some("HTTP/1.1") => Version::HTTP_11,
        Some("HTTP/1.0") => Version::HTTP_10,
        _ => return Err(Error::protocol("malformed status line: bad HTTP version")),
    };
    let code = parts
        .next()
        .ok_or_else(|| Error::protocol("malformed status line: missing status code"))?;
    let status = StatusCode::from_bytes(code.as_bytes()).map_err(|_| Error::protocol("malformed status code"))?;
    let reason = parts.next().unwrap_or("").to_string();
    Ok((version, status, reason))
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn find_double_crlf_or_crlf(buf: &[u8]) -> Option<usize> {
    // Trailer section ends on an empty line: either immediately "\r\n" (no
    // trailers) or after trailer header lines, terminated by "\r\n\r\n".
    if buf.starts_with(b"\r\n") {
        return Some(2);
    }
    find_double_crlf(buf).map(|i| i + 2)
}

fn strip_cr(line: &[u8]) -> &[u8] {
    if line.ends_with(b"\r") {
        &line[..line.len() - 1]
    } else {
        line
    }
}

fn trim_ows(value: &[u8]) -> &[u8] {
    let start = value.iter().position(|&b| b != b' ' && b != b'\t').unwrap_or(value.len());
    let end = value.iter().rposition(|&b| b != b' ' && b != b'\t').map(|i| i + 1).unwrap_or(start);
    &value[start..end]
}

/// Serializes a request head (request line + headers) in HTTP/1.1 wire
/// form. `request_target` is pre-resolved by the caller (origin-form,
/// absolute-form, or authority-form per spec §6.3).
pub fn serialize_request_head(
    out: &mut BytesMut,
    method: &Method,
    request_target: &str,
    headers: &HeaderMap<HeaderValue>,
) {
    out.extend_from_slice(method.as_str().as_bytes());
    out.extend_from_slice(b" ");
    out.extend_from_slice(request_target.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");
    for (name, value) in headers.iter() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
}

/// Encodes one chunk of `data` using chunked transfer-coding: hex length,
/// CRLF, bytes, CRLF. An empty slice is a programmer error (use
/// [`encode_final_chunk`] for the terminator).
pub fn encode_chunk(out: &mut BytesMut, data: &[u8]) {
    out.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

/// The chunked-encoding terminator: `"0\r\n\r\n"`.
pub fn encode_final_chunk(out: &mut BytesMut) {
    out.extend_from_slice(b"0\r\n\r\n");
}

/// Advances `buf` past `n` bytes, the common "consumed" bookkeeping step
/// shared by head- and body-parsing call sites.
pub fn advance(buf: &mut BytesMut, n: usize) {
    buf.advance(n);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_status_line_and_headers() {
        let mut parser = ResponseParser::new();
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 13\r\n\r\nDummy server!";
        match parser.parse_head(raw).unwrap() {
            ParseOutcome::Head { head, consumed } => {
                assert_eq!(head.status, StatusCode::OK);
                assert_eq!(head.version, Version::HTTP_11);
                assert_eq!(&raw[consumed..], b"Dummy server!");
            }
            ParseOutcome::NeedMoreData => panic!("expected a complete head"),
        }
    }

    #[test]
    fn incomplete_head_requests_more_data() {
        let mut parser = ResponseParser::new();
        let raw = b"HTTP/1.1 200 OK\r\nContent-Len";
        match parser.parse_head(raw).unwrap() {
            ParseOutcome::NeedMoreData => {}
            _ => panic!("expected NeedMoreData"),
        }
    }

    #[test]
    fn head_response_forces_empty_body() {
        let mut parser = ResponseParser::new();
        parser.expect_head_request(true);
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 500\r\n\r\n";
        if let ParseOutcome::Head { .. } = parser.parse_head(raw).unwrap() {
            assert_eq!(parser.state(), RecvState::Done);
        } else {
            panic!("expected head");
        }
    }

    #[test]
    fn no_content_status_forces_empty_body() {
        let mut parser = ResponseParser::new();
        let raw = b"HTTP/1.1 204 No Content\r\n\r\n";
        parser.parse_head(raw).unwrap();
        assert_eq!(parser.state(), RecvState::Done);
    }

    #[test]
    fn chunked_body_round_trips_through_terminator() {
        let mut parser = ResponseParser::new();
        let head = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
        parser.parse_head(head).unwrap();

        let body = b"5\r\nhello\r\n0\r\n\r\n";
        let first = parser.parse_body(body, false).unwrap();
        match first {
            BodyEvent::Data(n) => assert_eq!(n, 5),
            other => panic!("expected Data(5), got {other:?}"),
        }
        let rest = &body[3 + 5 + 2..];
        let second = parser.parse_body(rest, false).unwrap();
        match second {
            BodyEvent::EndOfMessage { .. } => {}
            other => panic!("expected EndOfMessage, got {other:?}"),
        }
    }

    #[test]
    fn content_length_body_signals_end_at_exact_count() {
        let mut parser = ResponseParser::new();
        parser.parse_head(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\n").unwrap();
        let event = parser.parse_body(b"abc", false).unwrap();
        assert!(matches!(event, BodyEvent::Data(3)));
        let event = parser.parse_body(b"", false).unwrap();
        assert!(matches!(event, BodyEvent::EndOfMessage { .. }));
    }

    #[test]
    fn non_chunked_no_length_body_ends_at_close() {
        let mut parser = ResponseParser::new();
        parser.parse_head(b"HTTP/1.0 200 OK\r\n\r\n").unwrap();
        let event = parser.parse_body(b"", true).unwrap();
        assert!(matches!(event, BodyEvent::ConnectionClosed));
    }

    #[test]
    fn malformed_status_line_is_protocol_error() {
        let mut parser = ResponseParser::new();
        assert!(parser.parse_head(b"NOT A STATUS LINE\r\n\r\n").is_err());
    }

    #[test]
    fn keep_alive_requires_http11_and_no_close_header() {
        let head_11 = ResponseHead {
            version: Version::HTTP_11,
            status: StatusCode::OK,
            reason: "OK".into(),
            headers: HeaderMap::new(),
        };
        assert!(ResponseParser::is_keep_alive(&head_11, true));
        assert!(!ResponseParser::is_keep_alive(&head_11, false));

        let mut headers_close = HeaderMap::new();
        headers_close.insert(http::header::CONNECTION, HeaderValue::from_static("close"));
        let head_close = ResponseHead {
            headers: headers_close,
            ..head_11.clone()
        };
        assert!(!ResponseParser::is_keep_alive(&head_close, true));
    }

    #[test]
    fn serialize_request_head_writes_expected_bytes() {
        let mut out = BytesMut::new();
        let mut headers = HeaderMap::new();
        headers.insert(http::header::HOST, HeaderValue::from_static("example.com"));
        serialize_request_head(&mut out, &Method::GET, "/", &headers);
        assert_eq!(&out[..], &b"GET / HTTP/1.1\r\nhost: example.com\r\n\r\n"[..]);
    }

    #[test]
    fn chunk_encoding_matches_wire_format() {
        let mut out = BytesMut::new();
        encode_chunk(&mut out, b"hello");
        encode_final_chunk(&mut out);
        assert_eq!(&out[..], &b"5\r\nhello\r\n0\r\n\r\n"[..]);
    }
}
