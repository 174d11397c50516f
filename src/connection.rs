//! A single transport connection: TCP (optionally TLS-wrapped), happy-
//! eyeballs address racing, CONNECT tunneling, and the send/receive framing
//! loop. Generalizes the donor's `core/client/connect/mod.rs` connector
//! (there: async, hyper-driven, BoringSSL) into a blocking, sans-io-framing
//! driven connection per spec §4.6.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use http::{HeaderMap, HeaderValue, Method};

use crate::dns::{Addrs, Resolve};
use crate::error::{Error, Result};
use crate::framing::{self, BodyEvent, ParseOutcome, ResponseHead, ResponseParser};
#[cfg(feature = "socks")]
use crate::proxy::SocksVersion;
#[cfg(feature = "socks")]
use crate::socks;
use crate::tls::{TlsConfig, TlsStream};
use crate::tunnel;
use crate::urlmodel::Url;
use crate::wait;

/// How long the first connect attempt gets before a second candidate
/// address is raced in parallel, per spec §4.6's happy-eyeballs algorithm.
const HAPPY_EYEBALLS_STALL: Duration = Duration::from_millis(200);

/// Lifecycle state of a pooled connection, spec §3's `Idle|Active|MustClose|
/// Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Active,
    MustClose,
    Closed,
}

enum Transport {
    Plain(TcpStream),
    Tls(TlsStream),
}

impl Transport {
    fn tcp_ref(&self) -> &TcpStream {
        match self {
            Transport::Plain(s) => s,
            Transport::Tls(s) => s.tcp_ref(),
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf),
            Transport::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Transport::Plain(s) => s.write(buf),
            Transport::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Transport::Plain(s) => s.flush(),
            Transport::Tls(s) => s.flush(),
        }
    }
}

/// A live connection to a single origin (or to a proxy, possibly tunneled
/// through to an origin). Owned exclusively by one `Pool` slot at a time.
pub struct Connection {
    transport: Transport,
    pub state: ConnState,
    pub is_verified: bool,
    recv_buf: BytesMut,
    peer_closed: bool,
}

impl Connection {
    /// Opens a new connection to `host:port`, racing candidate addresses
    /// returned by `resolver` per the happy-eyeballs stall timer, then
    /// optionally wraps the winning socket in TLS with SNI set to `host`.
    pub fn connect(
        resolver: &dyn Resolve,
        host: &str,
        port: u16,
        connect_timeout: Option<Duration>,
        tls: Option<&TlsConfig>,
    ) -> Result<Connection> {
        let addrs = resolver.resolve(host, port)?;
        let tcp = connect_happy_eyeballs(&addrs, connect_timeout)?;
        tcp.set_nodelay(true).map_err(Error::new_connection)?;

        let (transport, is_verified) = match tls {
            Some(cfg) => {
                let tls_stream = TlsStream::connect(tcp, host, cfg)?;
                let verified = tls_stream.is_verified;
                (Transport::Tls(tls_stream), verified)
            }
            None => (Transport::Plain(tcp), false),
        };

        Ok(Connection {
            transport,
            state: ConnState::Idle,
            is_verified,
            recv_buf: BytesMut::new(),
            peer_closed: false,
        })
    }

    /// Upgrades a plain connection already established to a proxy into a
    /// tunnel to `target_host:target_port` via `CONNECT`, per spec §4.6/§8
    /// scenario 6, then (optionally) performs the target's TLS handshake
    /// over the tunneled stream.
    pub fn connect_via_tunnel(
        resolver: &dyn Resolve,
        proxy_host: &str,
        proxy_port: u16,
        target_host: &str,
        target_port: u16,
        connect_timeout: Option<Duration>,
        proxy_auth: Option<&HeaderValue>,
        tls: Option<&TlsConfig>,
    ) -> Result<Connection> {
        let addrs = resolver.resolve(proxy_host, proxy_port)?;
        let mut tcp = connect_happy_eyeballs(&addrs, connect_timeout)?;
        tcp.set_nodelay(true).map_err(Error::new_connection)?;

        tunnel::establish(&mut tcp, target_host, target_port, proxy_auth)?;

        let (transport, is_verified) = match tls {
            Some(cfg) => {
                let tls_stream = TlsStream::connect(tcp, target_host, cfg)?;
                let verified = tls_stream.is_verified;
                (Transport::Tls(tls_stream), verified)
            }
            None => (Transport::Plain(tcp), false),
        };

        Ok(Connection {
            transport,
            state: ConnState::Idle,
            is_verified,
            recv_buf: BytesMut::new(),
            peer_closed: false,
        })
    }

    /// Opens a new connection to a SOCKS4/4a/5/5h proxy at `proxy_host:
    /// proxy_port`, performs the SOCKS handshake to relay to
    /// `target_host:target_port` (spec §4.9/§6.3), then optionally performs
    /// the target's own TLS handshake over the relayed stream.
    #[cfg(feature = "socks")]
    #[allow(clippy::too_many_arguments)]
    pub fn connect_via_socks(
        resolver: &dyn Resolve,
        version: SocksVersion,
        proxy_host: &str,
        proxy_port: u16,
        target_host: &str,
        target_port: u16,
        connect_timeout: Option<Duration>,
        socks_auth: Option<&(String, String)>,
        tls: Option<&TlsConfig>,
    ) -> Result<Connection> {
        let addrs = resolver.resolve(proxy_host, proxy_port)?;
        let mut tcp = connect_happy_eyeballs(&addrs, connect_timeout)?;
        tcp.set_nodelay(true).map_err(Error::new_connection)?;

        socks::establish(&mut tcp, version, resolver, target_host, target_port, socks_auth)?;

        let (transport, is_verified) = match tls {
            Some(cfg) => {
                let tls_stream = TlsStream::connect(tcp, target_host, cfg)?;
                let verified = tls_stream.is_verified;
                (Transport::Tls(tls_stream), verified)
            }
            None => (Transport::Plain(tcp), false),
        };

        Ok(Connection {
            transport,
            state: ConnState::Idle,
            is_verified,
            recv_buf: BytesMut::new(),
            peer_closed: false,
        })
    }

    /// Sends the request head and body, reading the response head
    /// concurrently (spec §4.6's upload/early-response interleave: the
    /// server may answer, e.g. with a `417` or a redirect, before the full
    /// request body has been uploaded). Returns the parsed response head
    /// together with the parser that parsed it, so the caller can keep
    /// driving the same parser through [`Connection::read_body`] for the
    /// message body that follows, plus whether the upload had finished by
    /// the time the head arrived -- spec §4.6/§8 scenario 3: a response that
    /// arrives while bytes of the request body are still unsent leaves the
    /// connection's framing undefined from the peer's perspective, so it is
    /// never eligible for keep-alive reuse even if the head says so.
    pub fn send_request(
        &mut self,
        method: &Method,
        request_target: &str,
        headers: &HeaderMap<HeaderValue>,
        mut body: Option<&mut dyn Read>,
        read_timeout: Option<Duration>,
        expect_head_request: bool,
    ) -> Result<(ResponseHead, ResponseParser, bool)> {
        self.state = ConnState::Active;

        let mut out = BytesMut::new();
        framing::serialize_request_head(&mut out, method, request_target, headers);
        self.write_all_blocking(&out)?;

        let mut parser = ResponseParser::new();
        parser.expect_head_request(expect_head_request);

        let mut send_buf = [0u8; 8192];
        let mut upload_done = body.is_none();

        loop {
            if let Some(head) = self.try_parse_head(&mut parser)? {
                return Ok((head, parser, upload_done));
            }

            if upload_done {
                self.fill_recv_buf(read_timeout)?;
                continue;
            }

            let readiness = wait::wait_for_read_or_write(&mut self.mio_tcp(), read_timeout)
                .map_err(Error::io)?
                .ok_or_else(|| Error::read_timeout("timed out waiting for socket readiness during upload"))?;

            if readiness.readable {
                self.fill_recv_buf_nonblocking()?;
            }
            if readiness.writable {
                let reader = body.as_mut().expect("upload_done false implies body is Some");
                match reader.read(&mut send_buf) {
                    Ok(0) => upload_done = true,
                    Ok(n) => self.write_all_blocking(&send_buf[..n])?,
                    Err(e) => return Err(Error::io(e)),
                }
            }
        }
    }

    fn try_parse_head(&mut self, parser: &mut ResponseParser) -> Result<Option<ResponseHead>> {
        match parser.parse_head(&self.recv_buf)? {
            ParseOutcome::Head { head, consumed } => {
                framing::advance(&mut self.recv_buf, consumed);
                Ok(Some(head))
            }
            ParseOutcome::NeedMoreData => Ok(None),
        }
    }

    /// Reads the next chunk of response body, driving the sans-io
    /// [`ResponseParser`] with freshly read bytes as needed.
    pub fn read_body(&mut self, parser: &mut ResponseParser, out: &mut Vec<u8>, read_timeout: Option<Duration>) -> Result<bool> {
        loop {
            let event = parser.parse_body(&self.recv_buf, self.peer_closed)?;
            match event {
                BodyEvent::Data(consumed) => {
                    out.extend_from_slice(&self.recv_buf[..consumed]);
                    framing::advance(&mut self.recv_buf, consumed);
                }
                BodyEvent::EndOfMessage { consumed } => {
                    framing::advance(&mut self.recv_buf, consumed);
                    return Ok(true);
                }
                BodyEvent::ConnectionClosed => {
                    self.state = ConnState::MustClose;
                    return Ok(true);
                }
                BodyEvent::NeedMoreData => {
                    if self.peer_closed {
                        return Ok(true);
                    }
                    self.fill_recv_buf(read_timeout)?;
                    if self.recv_buf.is_empty() && self.peer_closed {
                        continue;
                    }
                    return Ok(false);
                }
            }
        }
    }

    /// Marks the connection for closing rather than pool return, per spec
    /// §4.6/§4.7 (non-keep-alive responses, protocol errors, or an explicit
    /// `Connection: close`).
    pub fn mark_must_close(&mut self) {
        self.state = ConnState::MustClose;
    }

    pub fn mark_idle(&mut self) {
        if self.state != ConnState::MustClose {
            self.state = ConnState::Idle;
        }
    }

    pub fn close(&mut self) {
        self.state = ConnState::Closed;
    }

    /// Best-effort liveness check for an idle pooled connection, spec §4.7:
    /// peeks one byte without blocking, so a peer that closed the connection
    /// while it sat idle in the pool is discarded instead of reused for the
    /// next request on it.
    pub fn is_dropped(&self) -> bool {
        if self.peer_closed || matches!(self.state, ConnState::Closed | ConnState::MustClose) {
            return true;
        }
        let tcp = self.transport.tcp_ref();
        if tcp.set_nonblocking(true).is_err() {
            return false;
        }
        let mut buf = [0u8; 1];
        let result = tcp.peek(&mut buf);
        let _ = tcp.set_nonblocking(false);
        match result {
            Ok(0) => true,
            Ok(_) => false,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => false,
            Err(_) => true,
        }
    }

    fn fill_recv_buf(&mut self, timeout: Option<Duration>) -> Result<()> {
        let ready = wait::wait_for_read(&mut self.mio_tcp(), timeout).map_err(Error::io)?;
        if !ready {
            return Err(Error::read_timeout("timed out waiting to read from connection"));
        }
        self.fill_recv_buf_nonblocking()
    }

    fn fill_recv_buf_nonblocking(&mut self) -> Result<()> {
        let mut chunk = [0u8; 8192];
        match self.transport.read(&mut chunk) {
            Ok(0) => {
                self.peer_closed = true;
                Ok(())
            }
            Ok(n) => {
                self.recv_buf.extend_from_slice(&chunk[..n]);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(Error::io(e)),
        }
    }

    fn write_all_blocking(&mut self, buf: &[u8]) -> Result<()> {
        self.transport.write_all(buf).map_err(Error::io)
    }

    fn mio_tcp(&self) -> mio::net::TcpStream {
        // `mio::net::TcpStream` borrows the fd via `try_clone`; used only to
        // register the already-connected socket with a transient `Poll`
        // instance inside `wait.rs`. Cloning the fd (not the object) keeps
        // the original `TcpStream`/`TlsStream` as the sole owner of state.
        let cloned = self.transport.tcp_ref().try_clone().expect("fd clone for readiness poll");
        mio::net::TcpStream::from_std(cloned)
    }
}

/// Races candidate addresses per spec §4.6's happy-eyeballs algorithm: try
/// the first address; if it hasn't succeeded or failed within
/// [`HAPPY_EYEBALLS_STALL`], kick off the next candidate in parallel; keep
/// the first success and drop the rest.
fn connect_happy_eyeballs(addrs: &Addrs, timeout: Option<Duration>) -> Result<TcpStream> {
    if addrs.is_empty() {
        return Err(Error::new_connection("no addresses to connect to"));
    }
    if addrs.len() == 1 {
        return connect_one(addrs[0], timeout);
    }

    let deadline = timeout.map(|t| Instant::now() + t);
    let (tx, rx) = std::sync::mpsc::channel();
    let mut handles = Vec::new();

    for (i, addr) in addrs.iter().copied().enumerate() {
        let tx = tx.clone();
        let per_attempt_timeout = remaining(deadline);
        if i > 0 {
            std::thread::sleep(HAPPY_EYEBALLS_STALL.min(per_attempt_timeout.unwrap_or(HAPPY_EYEBALLS_STALL)));
        }
        handles.push(std::thread::spawn(move || {
            let result = connect_one(addr, per_attempt_timeout);
            let _ = tx.send(result);
        }));
    }
    drop(tx);

    let mut last_err = None;
    for _ in 0..addrs.len() {
        match rx.recv() {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => last_err = Some(e),
            Err(_) => break,
        }
    }
    Err(last_err.unwrap_or_else(|| Error::new_connection("happy-eyeballs: all candidates failed")))
}

fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

fn connect_one(addr: SocketAddr, timeout: Option<Duration>) -> Result<TcpStream> {
    match timeout {
        Some(t) => TcpStream::connect_timeout(&addr, t).map_err(Error::new_connection),
        None => TcpStream::connect(addr).map_err(Error::new_connection),
    }
}

/// Resolves the target authority for CONNECT-tunnel decisions (spec §4.6),
/// delegating to [`crate::urlmodel::connection_requires_http_tunnel`].
pub fn requires_tunnel(proxy: Option<&Url>, tunnel_non_http_for_proxy: bool, destination_scheme: &str) -> bool {
    crate::urlmodel::connection_requires_http_tunnel(proxy, tunnel_non_http_for_proxy, destination_scheme)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn connect_one_succeeds_against_loopback_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = connect_one(addr, Some(Duration::from_secs(1)));
        assert!(stream.is_ok());
    }

    #[test]
    fn happy_eyeballs_single_address_shortcuts_racing() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let addrs = vec![addr];
        let stream = connect_happy_eyeballs(&addrs, Some(Duration::from_secs(1)));
        assert!(stream.is_ok());
    }

    #[test]
    fn connect_one_fails_against_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let result = connect_one(addr, Some(Duration::from_millis(200)));
        assert!(result.is_err());
    }
}
