//! The request engine: the synchronous core that turns a [`Request`] into a
//! [`Response`], spec §4.12. Owns the [`Manager`] (pool-of-pools), the
//! default [`RetryPolicy`]/[`Redirector`]/[`InterceptorChain`], and the
//! content-coding [`Accepts`] used to synthesize `Accept-Encoding`.
//!
//! There is no donor module to generalize here: the donor's request
//! execution lives inside its async `hyper`/`tower` service stack
//! (`core/client/mod.rs`'s `Client::execute_request`), which has no
//! synchronous analogue in this crate. This module is authored from spec
//! §4.12's step list directly, wiring together the collaborators each of
//! this crate's other modules already provide: [`Manager::lease`] for pool
//! acquisition, [`Connection::connect`]/`connect_via_tunnel`/`connect_via_socks`
//! for dialing, [`Connection::send_request`] for the wire exchange,
//! [`Redirector::next`] for 3xx handling, and [`RetryPolicy::increment`] for
//! the connect/read/status retry loop.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use http::Method;

use crate::config::{RequestConfig, RequestPoolTimeout, RequestRedirect, RequestRetryPolicy, RequestTimeout};
use crate::connection::Connection;
use crate::decode::Accepts;
use crate::error::{Error, Result};
use crate::framing;
use crate::header::{self, HeaderDict};
use crate::interceptor::InterceptorChain;
use crate::manager::{Manager, PoolKey};
use crate::pool::Pool;
use crate::proxy::Routing;
use crate::redirect::{Outcome, Redirector};
use crate::request::Request;
use crate::response::Response;
use crate::retry::{RetryCause, RetryPolicy};
use crate::timeout::Timeout;
use crate::urlmodel::Url;

/// The order request headers are sorted into before being written to the
/// wire, mirroring the donor's `util::sort_headers` call site in its request
/// builder: well-known headers up front, everything else after in insertion
/// order.
const HEADER_ORDER: &[&str] = &[
    "host",
    "accept-encoding",
    "content-length",
    "transfer-encoding",
    "content-type",
];

/// The synchronous entry point that executes a built [`Request`], spec
/// §4.12. Cheaply `Clone`: internally an `Arc`, so a [`crate::request::RequestBuilder`]
/// can hold one by value without cloning the whole pool cache.
pub struct RequestEngine(Arc<Inner>);

struct Inner {
    manager: Manager,
    retry_policy: RetryPolicy,
    redirector: Redirector,
    interceptors: InterceptorChain,
    accepts: Accepts,
    timeout: Timeout,
    pool_timeout: Option<Duration>,
}

impl Clone for RequestEngine {
    fn clone(&self) -> Self {
        RequestEngine(self.0.clone())
    }
}

/// Outcome of one physical attempt (one connection, one request/response),
/// distinguishing where in the attempt the failure happened so the retry
/// loop can pick the right [`RetryCause`] -- or skip retrying altogether for
/// a caller-fault/config error.
enum AttemptError {
    /// Failed before or while establishing the connection.
    Connect(Error),
    /// Failed after the connection was established (sending the request or
    /// reading the response head).
    Transfer(Error),
    /// Not a connect/transfer failure at all (bad routing config, an
    /// interceptor error): never retried.
    Fatal(Error),
}

impl RequestEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manager: Manager,
        retry_policy: RetryPolicy,
        redirector: Redirector,
        interceptors: InterceptorChain,
        accepts: Accepts,
        timeout: Timeout,
        pool_timeout: Option<Duration>,
    ) -> RequestEngine {
        RequestEngine(Arc::new(Inner {
            manager,
            retry_policy,
            redirector,
            interceptors,
            accepts,
            timeout,
            pool_timeout,
        }))
    }

    /// Executes `request` to completion: dials or reuses a connection,
    /// sends it, follows redirects, and retries connect/read/status
    /// failures per the active [`RetryPolicy`], per spec §4.12's full loop.
    pub fn execute(&self, mut request: Request) -> Result<Response> {
        let pool_timeout = RequestConfig::<RequestPoolTimeout>::get(request.extensions())
            .copied()
            .or(self.0.pool_timeout);
        let mut retry_policy = RequestConfig::<RequestRetryPolicy>::get(request.extensions())
            .cloned()
            .unwrap_or_else(|| self.0.retry_policy.clone());
        let follow_redirects = RequestConfig::<RequestRedirect>::get(request.extensions())
            .copied()
            .unwrap_or(true);
        let base_timeout = RequestConfig::<RequestTimeout>::get(request.extensions())
            .copied()
            .unwrap_or(self.0.timeout);

        let preload_content = request.preload_content();
        let decode_content = request.decode_content();

        let mut method = request.method().clone();
        let mut url = request.url().clone();
        let mut headers = request.headers().clone();
        let mut body = request.body_mut().take();

        loop {
            let body_rewindable = body.as_ref().map_or(true, |b| b.is_rewindable());
            let mut timeout = base_timeout;
            timeout.start_connect();

            let mut response = match self.send_once(&method, &url, &headers, body.as_mut(), &mut timeout, pool_timeout, decode_content) {
                Ok(response) => response,
                Err(AttemptError::Fatal(e)) => return Err(e.with_url(url.as_ext().clone())),
                Err(AttemptError::Connect(e)) => {
                    if !body_rewindable {
                        return Err(e.with_url(url.as_ext().clone()));
                    }
                    retry_policy = match retry_policy.increment(&method, &url, RetryCause::Connect(e.to_string())) {
                        Ok(next) => next,
                        Err(max) => return Err(max.with_url(url.as_ext().clone())),
                    };
                    std::thread::sleep(retry_policy.backoff_for(None));
                    continue;
                }
                Err(AttemptError::Transfer(e)) => {
                    if !body_rewindable {
                        return Err(e.with_url(url.as_ext().clone()));
                    }
                    retry_policy = match retry_policy.increment(&method, &url, RetryCause::Read(e.to_string())) {
                        Ok(next) => next,
                        Err(max) => return Err(max.with_url(url.as_ext().clone())),
                    };
                    std::thread::sleep(retry_policy.backoff_for(None));
                    continue;
                }
            };

            self.0.interceptors.extract_from(&url, response.headers());

            if follow_redirects {
                match self.0.redirector.next(
                    response.status(),
                    response.headers(),
                    &method,
                    &url,
                    body.as_ref(),
                    &headers,
                    &retry_policy,
                ) {
                    Ok(Outcome::Follow {
                        method: next_method,
                        url: next_url,
                        body: next_body,
                        headers: next_headers,
                        policy,
                    }) => {
                        response.release_conn()?;
                        method = next_method;
                        url = next_url;
                        body = next_body;
                        headers = next_headers;
                        retry_policy = policy;
                        continue;
                    }
                    Ok(Outcome::Final) => {}
                    Err(e) => return Err(e),
                }
            }

            let status_rewindable = body.as_ref().map_or(true, |b| b.is_rewindable());
            if status_rewindable && retry_policy.is_retriable_status(response.status()) {
                let backoff = retry_policy.backoff_for(Some(response.headers().as_wire_map()));
                match retry_policy.increment(&method, &url, RetryCause::Status(response.status())) {
                    Ok(next) => {
                        response.release_conn()?;
                        retry_policy = next;
                        std::thread::sleep(backoff);
                        continue;
                    }
                    Err(e) => return Err(e.with_url(url.as_ext().clone())),
                }
            }

            if preload_content {
                response.data()?;
            }
            return Ok(response);
        }
    }

    /// One physical attempt: resolve routing, acquire/dial a connection,
    /// assemble the wire request, send it, and build the [`Response`].
    fn send_once(
        &self,
        method: &Method,
        url: &Url,
        headers: &HeaderDict,
        body: Option<&mut crate::body::Body>,
        timeout: &mut Timeout,
        pool_timeout: Option<Duration>,
        decode_content: bool,
    ) -> std::result::Result<Response, AttemptError> {
        let routing = self.0.manager.proxy_router().route(url).map_err(AttemptError::Fatal)?;
        let key = pool_key_for(url, &routing);

        let (pool, lease) = self.0.manager.lease(&key, pool_timeout).map_err(AttemptError::Connect)?;
        let mut conn = self
            .acquire_connection(&pool, lease, &routing, url, timeout.connect_timeout())
            .map_err(AttemptError::Connect)?;

        let content_length = body.as_ref().map(|b| b.content_length()).unwrap_or(None);
        let mut reader: Option<Box<dyn Read + Send>> = body.map(|b| b.take_reader());

        let mut request_headers = headers.clone();
        if let Err(e) = self.0.interceptors.apply_to(url, &mut request_headers) {
            pool.put(conn);
            return Err(AttemptError::Fatal(e));
        }

        let _ = request_headers.set("host", url.host_header_value());
        if let Some(accept_encoding) = self.0.accepts.to_header_value() {
            if !request_headers.contains("accept-encoding") {
                let _ = request_headers.set("accept-encoding", accept_encoding);
            }
        }
        if let Routing::Forward { proxy_auth: Some(auth), .. } = &routing {
            if let Ok(s) = auth.to_str() {
                let _ = request_headers.set("proxy-authorization", s);
            }
        }
        if reader.is_some() {
            match content_length {
                Some(len) => {
                    let _ = request_headers.set("content-length", len.to_string());
                }
                None => {
                    let _ = request_headers.set("transfer-encoding", "chunked");
                    reader = reader.map(|r| Box::new(ChunkedUpload::new(r)) as Box<dyn Read + Send>);
                }
            }
        }
        header::sort_headers(&mut request_headers, HEADER_ORDER);

        let read_timeout = match timeout.read_timeout() {
            Ok(t) => t,
            Err(e) => {
                conn.mark_must_close();
                pool.put(conn);
                return Err(AttemptError::Transfer(e));
            }
        };

        let request_target = request_target_for(&routing, url);
        let is_head = *method == Method::HEAD;

        let send_result = conn.send_request(
            method,
            &request_target,
            request_headers.as_wire_map(),
            reader.as_deref_mut().map(|r| r as &mut dyn Read),
            read_timeout,
            is_head,
        );

        match send_result {
            Ok((head, parser, upload_done)) => Ok(Response::new(
                head,
                parser,
                conn,
                pool,
                read_timeout,
                decode_content,
                upload_done,
            )),
            Err(e) => {
                conn.mark_must_close();
                pool.put(conn);
                Err(AttemptError::Transfer(e))
            }
        }
    }

    /// Turns a [`crate::pool::Lease`] into a live [`Connection`]: reuses an
    /// idle one unless it was found dropped by the peer (spec §4.7), dialing
    /// fresh otherwise. A dial failure gives the consumed slot back to the
    /// pool as a free permit.
    fn acquire_connection(
        &self,
        pool: &Pool,
        lease: crate::pool::Lease,
        routing: &Routing,
        url: &Url,
        connect_timeout: Option<Duration>,
    ) -> Result<Connection> {
        if let crate::pool::Lease::Idle(conn) = lease {
            if !conn.is_dropped() {
                return Ok(conn);
            }
        }
        match self.dial(routing, url, connect_timeout) {
            Ok(conn) => Ok(conn),
            Err(e) => {
                pool.release_permit();
                Err(e)
            }
        }
    }

    fn dial(&self, routing: &Routing, url: &Url, connect_timeout: Option<Duration>) -> Result<Connection> {
        let resolver = self.0.manager.resolver().as_ref();
        let is_https = url.scheme().eq_ignore_ascii_case("https");
        let tls = if is_https { self.0.manager.tls_config() } else { None };
        let host = url.host_str().unwrap_or_default();
        let port = url.port_or_known_default().unwrap_or(if is_https { 443 } else { 80 });

        match routing {
            Routing::Direct => Connection::connect(resolver, host, port, connect_timeout, tls),
            Routing::Tunnel { proxy_host, proxy_port, proxy_auth } => Connection::connect_via_tunnel(
                resolver,
                proxy_host,
                *proxy_port,
                host,
                port,
                connect_timeout,
                proxy_auth.as_ref(),
                tls,
            ),
            Routing::Forward { proxy_host, proxy_port, .. } => {
                Connection::connect(resolver, proxy_host, *proxy_port, connect_timeout, None)
            }
            #[cfg(feature = "socks")]
            Routing::Socks { version, proxy_host, proxy_port, auth } => Connection::connect_via_socks(
                resolver,
                *version,
                proxy_host,
                *proxy_port,
                host,
                port,
                connect_timeout,
                auth.as_ref(),
                tls,
            ),
        }
    }
}

/// Builds the pool key for `url` routed via `routing`: same scheme+host+port
/// always share a pool, but a proxied route gets its own key so tunneled and
/// direct connections to the same origin never mix, per spec §4.8.
fn pool_key_for(url: &Url, routing: &Routing) -> PoolKey {
    let proxy = match routing {
        Routing::Direct => None,
        Routing::Tunnel { proxy_host, proxy_port, .. } | Routing::Forward { proxy_host, proxy_port, .. } => {
            Some(format!("{proxy_host}:{proxy_port}"))
        }
        #[cfg(feature = "socks")]
        Routing::Socks { proxy_host, proxy_port, .. } => Some(format!("{proxy_host}:{proxy_port}")),
    };
    PoolKey {
        scheme: url.scheme().to_ascii_lowercase(),
        host: url.host_str().unwrap_or_default().to_ascii_lowercase(),
        port: url.port_or_known_default().unwrap_or(0),
        proxy,
    }
}

/// The request-target written on the wire: absolute-form when forwarding
/// through a plain proxy, origin-form otherwise, per spec §6.3.
fn request_target_for(routing: &Routing, url: &Url) -> String {
    match routing {
        Routing::Forward { .. } => format!("{}://{}{}", url.scheme(), url.host_header_value(), url.request_uri()),
        _ => url.request_uri(),
    }
}

/// Wraps a request body reader to emit HTTP chunked transfer-coding on the
/// fly, for streaming bodies with no known length (spec §4.4). Reusable
/// bodies always have a known length and never go through this path.
struct ChunkedUpload<R> {
    inner: R,
    buf: BytesMut,
    done: bool,
}

impl<R: Read> ChunkedUpload<R> {
    fn new(inner: R) -> Self {
        ChunkedUpload { inner, buf: BytesMut::new(), done: false }
    }
}

impl<R: Read> Read for ChunkedUpload<R> {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        while self.buf.is_empty() && !self.done {
            let mut chunk = [0u8; 8192];
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                framing::encode_final_chunk(&mut self.buf);
                self.done = true;
            } else {
                framing::encode_chunk(&mut self.buf, &chunk[..n]);
            }
        }
        let n = out.len().min(self.buf.len());
        out[..n].copy_from_slice(&self.buf[..n]);
        framing::advance(&mut self.buf, n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use crate::manager::ManagerConfig;
    use crate::proxy::ProxyRouter;
    use http::StatusCode;
    use std::io::{BufRead, BufReader, Write};
    use std::net::{SocketAddr, TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_engine() -> RequestEngine {
        let config = ManagerConfig {
            pool_maxsize: 2,
            max_pools: 4,
            tls: None,
        };
        let manager = Manager::new(config, ProxyRouter::direct());
        RequestEngine::new(
            manager,
            RetryPolicy::new(2),
            Redirector::new(),
            InterceptorChain::new(),
            Accepts::none(),
            Timeout::from_duration(Duration::from_secs(2)).unwrap(),
            Some(Duration::from_secs(2)),
        )
    }

    fn read_request_head(stream: &mut TcpStream) -> String {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut head = String::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                break;
            }
            head.push_str(&line);
        }
        head
    }

    fn spawn_server<F>(handler: F) -> SocketAddr
    where
        F: Fn(TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                handler(stream);
            }
        });
        addr
    }

    #[test]
    fn get_reuses_pooled_connection_across_two_requests() {
        let addr = spawn_server(|mut stream| {
            for _ in 0..2 {
                read_request_head(&mut stream);
                stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").unwrap();
            }
        });
        let engine = test_engine();
        let url = Url::parse(&format!("http://{addr}/")).unwrap();

        let r1 = engine.execute(Request::new(Method::GET, url.clone())).unwrap();
        assert_eq!(r1.status(), StatusCode::OK);

        let r2 = engine.execute(Request::new(Method::GET, url)).unwrap();
        assert_eq!(r2.status(), StatusCode::OK);
    }

    #[test]
    fn server_closing_between_requests_forces_a_fresh_dial() {
        let addr = spawn_server(|mut stream| {
            read_request_head(&mut stream);
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                .unwrap();
        });
        let engine = test_engine();
        let url = Url::parse(&format!("http://{addr}/")).unwrap();

        let r1 = engine.execute(Request::new(Method::GET, url.clone())).unwrap();
        assert_eq!(r1.status(), StatusCode::OK);
        let r2 = engine.execute(Request::new(Method::GET, url)).unwrap();
        assert_eq!(r2.status(), StatusCode::OK);
    }

    struct SlowBody {
        remaining: usize,
    }

    impl Read for SlowBody {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.remaining == 0 {
                return Ok(0);
            }
            std::thread::sleep(Duration::from_millis(2));
            let n = buf.len().min(self.remaining).min(1);
            for b in &mut buf[..n] {
                *b = b'x';
            }
            self.remaining -= n;
            Ok(n)
        }
    }

    #[test]
    fn server_can_respond_before_the_full_request_body_is_uploaded() {
        let addr = spawn_server(|mut stream| {
            read_request_head(&mut stream);
            stream
                .write_all(b"HTTP/1.1 413 Payload Too Large\r\nContent-Length: 0\r\n\r\n")
                .unwrap();
        });
        let engine = test_engine();
        let url = Url::parse(&format!("http://{addr}/upload")).unwrap();
        let mut request = Request::new(Method::POST, url);
        *request.body_mut() = Some(Body::from_reader(SlowBody { remaining: 5000 }, Some(5000)));

        let response = engine.execute(request).unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn connection_is_not_pooled_after_an_early_response_during_upload() {
        let accepts = Arc::new(AtomicUsize::new(0));
        let accepts_clone = accepts.clone();
        let addr = spawn_server(move |mut stream| {
            let n = accepts_clone.fetch_add(1, Ordering::SeqCst);
            read_request_head(&mut stream);
            if n == 0 {
                // No `Connection: close` here -- the head alone looks
                // keep-alive-eligible. Leak the fd instead of letting `stream`
                // drop, so the socket stays genuinely open rather than being
                // saved by an incidental peer close; only a correct
                // `upload_done` check should keep this connection out of the
                // pool.
                stream
                    .write_all(b"HTTP/1.1 413 Payload Too Large\r\nContent-Length: 0\r\n\r\n")
                    .unwrap();
                std::mem::forget(stream);
            } else {
                stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").unwrap();
            }
        });
        let engine = test_engine();
        let url = Url::parse(&format!("http://{addr}/upload")).unwrap();
        let mut request = Request::new(Method::POST, url.clone());
        *request.body_mut() = Some(Body::from_reader(SlowBody { remaining: 5000 }, Some(5000)));
        let response = engine.execute(request).unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        drop(response);

        let second = engine.execute(Request::new(Method::GET, url)).unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(
            accepts.load(Ordering::SeqCst),
            2,
            "a connection whose upload was aborted by an early response must not be reused"
        );
    }

    #[test]
    fn see_other_redirect_rewrites_post_to_get() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let addr = spawn_server(move |mut stream| {
            let head = read_request_head(&mut stream);
            let n = hits_clone.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                assert!(head.starts_with("POST"));
                stream
                    .write_all(b"HTTP/1.1 303 See Other\r\nLocation: /next\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .unwrap();
            } else {
                assert!(head.starts_with("GET"));
                stream
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                    .unwrap();
            }
        });
        let engine = test_engine();
        let url = Url::parse(&format!("http://{addr}/start")).unwrap();
        let mut request = Request::new(Method::POST, url);
        *request.body_mut() = Some(Body::from_bytes("payload"));

        let response = engine.execute(request).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn connect_refused_exhausts_retries_into_max_retry_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let engine = test_engine();
        let url = Url::parse(&format!("http://{addr}/")).unwrap();
        let err = engine.execute(Request::new(Method::GET, url)).unwrap_err();
        assert!(err.is_max_retry());
    }
}
