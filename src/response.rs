//! The response value handed back from [`crate::engine::RequestEngine`],
//! spec §3/§6.2.
//!
//! Generalizes the donor's `client/response.rs` (an async `http_body::Body`
//! wrapped response) into a synchronous, pull-based body: the wire bytes for
//! each chunk are read from the owning [`Connection`] only when the caller
//! asks for more (`read`/`stream`), and the connection is handed back to its
//! [`Pool`] the moment the message is fully consumed, closed, or dropped --
//! never left dangling for the caller to leak.

use std::sync::Arc;
use std::time::Duration;

use http::{StatusCode, Version};

use crate::connection::Connection;
use crate::decode::{decoder_for, Decoder};
use crate::error::{Error, Result};
use crate::framing::{RecvState, ResponseHead, ResponseParser};
use crate::header::HeaderDict;
use crate::pool::Pool;

/// An HTTP response, spec §3. Owns (weakly, in the sense that dropping or
/// finishing the body relinquishes it) the [`Connection`] the response
/// arrived on until the body is fully read, released, or closed.
pub struct Response {
    status: StatusCode,
    version: Version,
    reason: String,
    headers: HeaderDict,
    body: Option<BodyStream>,
    /// Decoded bytes already pulled off the wire but not yet handed to the
    /// caller by [`Response::read`], spec §3's `buffered_excess`.
    buffered_excess: Vec<u8>,
    content: Option<Vec<u8>>,
    is_closed: bool,
}

struct BodyStream {
    connection: Option<Connection>,
    pool: Arc<Pool>,
    parser: ResponseParser,
    decoders: Vec<Box<dyn Decoder>>,
    read_timeout: Option<Duration>,
    message_done: bool,
    // A small clone of the head, kept only to re-derive the keep-alive
    // decision once the body finishes; cheap since `ResponseHead` is tiny.
    keep_alive_head: ResponseHead,
    // Whether the request's own upload had finished by the time this head
    // arrived. `false` means the response raced ahead of our upload (spec
    // §4.6/§8 scenario 3); the connection's framing is then undefined from
    // the peer's side regardless of what the head's `Connection` header
    // says, so it is never eligible for keep-alive reuse.
    upload_done: bool,
}

impl BodyStream {
    fn next_chunk(&mut self) -> Result<Vec<u8>> {
        if self.message_done {
            return Ok(Vec::new());
        }
        let Some(conn) = self.connection.as_mut() else {
            self.message_done = true;
            return Ok(Vec::new());
        };

        let mut raw = Vec::new();
        let complete = conn.read_body(&mut self.parser, &mut raw, self.read_timeout)?;
        let mut decoded = decode_chunk(&mut self.decoders, raw)?;

        if complete {
            decoded.extend(decode_flush(&mut self.decoders)?);
            self.message_done = true;
            self.recycle_connection();
        }

        Ok(decoded)
    }

    fn recycle_connection(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            if ResponseParser::is_keep_alive(&self.keep_alive_head, self.upload_done) {
                conn.mark_idle();
            } else {
                conn.mark_must_close();
            }
            self.pool.put(conn);
        }
    }

    fn discard_connection(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            conn.mark_must_close();
            self.pool.put(conn);
        }
        self.message_done = true;
    }
}

impl Response {
    /// Builds a `Response` from a just-parsed head and the connection it
    /// arrived on. If the head alone already determined the body is empty
    /// (e.g. a `HEAD` response, or `204 No Content`), the connection is
    /// returned to `pool` immediately.
    pub(crate) fn new(
        head: ResponseHead,
        parser: ResponseParser,
        connection: Connection,
        pool: Arc<Pool>,
        read_timeout: Option<Duration>,
        decode_content: bool,
        upload_done: bool,
    ) -> Response {
        let headers = dict_from_wire(&head);
        let decoders = build_decoders(&headers, decode_content);
        let body_already_done = matches!(parser.state(), RecvState::Done);

        let mut body = BodyStream {
            connection: Some(connection),
            pool,
            parser,
            decoders,
            read_timeout,
            message_done: false,
            keep_alive_head: head.clone(),
            upload_done,
        };
        if body_already_done {
            body.message_done = true;
            body.recycle_connection();
        }

        Response {
            status: head.status,
            version: head.version,
            reason: head.reason,
            headers,
            body: Some(body),
            buffered_excess: Vec::new(),
            content: None,
            is_closed: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &HeaderDict {
        &self.headers
    }

    /// Whether this response's body has been fully consumed, released, or
    /// closed -- further [`Response::read`] calls return an empty chunk.
    pub fn is_closed(&self) -> bool {
        self.is_closed && self.buffered_excess.is_empty()
    }

    /// Reads decoded body bytes. `amt = None` drains and returns the entire
    /// remaining body; `amt = Some(n)` returns up to `n` bytes, buffering any
    /// excess already pulled off the wire in [`Response::buffered_excess`]
    /// for the next call. An empty result means the body is exhausted.
    pub fn read(&mut self, amt: Option<usize>) -> Result<Vec<u8>> {
        if self.is_closed {
            return Ok(Vec::new());
        }

        while amt.map_or(true, |n| self.buffered_excess.len() < n) {
            let Some(body) = self.body.as_mut() else { break };
            let chunk = body.next_chunk()?;
            let done = body.message_done;
            self.buffered_excess.extend(chunk);
            if done {
                self.body = None;
                self.is_closed = true;
                break;
            }
        }

        match amt {
            None => Ok(std::mem::take(&mut self.buffered_excess)),
            Some(n) => {
                let n = n.min(self.buffered_excess.len());
                let rest = self.buffered_excess.split_off(n);
                Ok(std::mem::replace(&mut self.buffered_excess, rest))
            }
        }
    }

    /// An iterator over decoded chunks of at most `chunk_size` bytes
    /// (default 8 KiB), spec §6.2's `stream()`.
    pub fn stream(&mut self, chunk_size: Option<usize>) -> Chunks<'_> {
        Chunks {
            response: self,
            chunk_size: chunk_size.unwrap_or(8192),
        }
    }

    /// Discards any unread body content and returns the connection to its
    /// pool for reuse, without requiring the caller to read the body first.
    pub fn release_conn(&mut self) -> Result<()> {
        loop {
            let Some(body) = self.body.as_mut() else { break };
            if body.message_done {
                self.body = None;
                break;
            }
            body.next_chunk()?;
        }
        self.buffered_excess.clear();
        self.is_closed = true;
        Ok(())
    }

    /// Forcibly closes the underlying connection rather than returning it
    /// for reuse, discarding any unread body content.
    pub fn close(&mut self) {
        if let Some(mut body) = self.body.take() {
            body.discard_connection();
        }
        self.buffered_excess.clear();
        self.is_closed = true;
    }

    /// The entire (decoded) response body, buffered and cached on first
    /// call -- the synchronous analogue of `requests.Response.content`.
    pub fn data(&mut self) -> Result<Vec<u8>> {
        if self.content.is_none() {
            let body = self.read(None)?;
            self.content = Some(body);
        }
        Ok(self.content.clone().unwrap_or_default())
    }

    #[cfg(feature = "json")]
    pub fn json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T> {
        let data = self.data()?;
        serde_json::from_slice(&data).map_err(Error::decode)
    }
}

impl Drop for Response {
    fn drop(&mut self) {
        if let Some(body) = self.body.as_mut() {
            body.discard_connection();
        }
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("version", &self.version)
            .finish()
    }
}

/// Iterator returned by [`Response::stream`].
pub struct Chunks<'a> {
    response: &'a mut Response,
    chunk_size: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.response.read(Some(self.chunk_size)) {
            Ok(chunk) if chunk.is_empty() => None,
            Ok(chunk) => Some(Ok(chunk)),
            Err(e) => Some(Err(e)),
        }
    }
}

fn dict_from_wire(head: &ResponseHead) -> HeaderDict {
    let pairs: Vec<(String, String)> = head
        .headers
        .iter()
        .map(|(name, value)| (name.as_str().to_string(), value.to_str().unwrap_or("").to_string()))
        .collect();
    HeaderDict::from_pairs(pairs).unwrap_or_default()
}

/// Builds the decoder pipeline for the response's `Content-Encoding`, in
/// decode order (the reverse of the encoding order the header lists), per
/// spec §4.5. Empty when `decode_content` is false or no coding applies.
fn build_decoders(headers: &HeaderDict, decode_content: bool) -> Vec<Box<dyn Decoder>> {
    if !decode_content {
        return Vec::new();
    }
    let mut codings: Vec<String> = headers
        .get_all("content-encoding")
        .iter()
        .flat_map(|v| v.split(',').map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("identity"))
        .collect();
    codings.reverse();
    codings.iter().map(|coding| decoder_for(coding)).collect()
}

fn decode_chunk(decoders: &mut [Box<dyn Decoder>], mut data: Vec<u8>) -> Result<Vec<u8>> {
    for decoder in decoders.iter_mut() {
        data = decoder.decompress(&data)?;
    }
    Ok(data)
}

fn decode_flush(decoders: &mut [Box<dyn Decoder>]) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    for decoder in decoders.iter_mut() {
        let mut out = decoder.decompress(&data)?;
        out.extend(decoder.flush()?);
        data = out;
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::ResponseParser;
    use http::{HeaderMap, Version};

    fn empty_head(status: StatusCode) -> ResponseHead {
        ResponseHead {
            version: Version::HTTP_11,
            status,
            reason: "OK".to_string(),
            headers: HeaderMap::new(),
        }
    }

    #[test]
    fn head_response_is_immediately_closed_with_no_connection_held() {
        let pool = Arc::new(Pool::new(1));
        let parser = {
            let mut p = ResponseParser::new();
            p.expect_head_request(true);
            p.parse_head(b"HTTP/1.1 200 OK\r\nContent-Length: 500\r\n\r\n").unwrap();
            p
        };
        // Build a connection-less response path is not exercised directly
        // here (Response::new requires a live Connection); the head-only
        // completion path is covered end-to-end in engine.rs's tests.
        let _ = (pool, parser, empty_head(StatusCode::OK));
    }

    #[test]
    fn decoder_pipeline_reverses_encoding_order_for_decode() {
        let mut headers = HeaderDict::new();
        headers.add("content-encoding", "gzip, identity").unwrap();
        let decoders = build_decoders(&headers, true);
        assert_eq!(decoders.len(), 1);
    }

    #[test]
    fn decode_disabled_yields_no_decoders() {
        let mut headers = HeaderDict::new();
        headers.add("content-encoding", "gzip").unwrap();
        assert!(build_decoders(&headers, false).is_empty());
    }
}
