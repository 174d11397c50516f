//! The public synchronous HTTP client, spec §6.2.
//!
//! Generalizes the donor's `client/http.rs` `Client`/`ClientBuilder` (an
//! `ArcSwap<ClientInner>` wrapping a `hyper`/`tower` stack configured via a
//! large `Config` struct): this crate's core has no hot-swappable inner
//! config and no async service stack, so `Client` is a thin, cheaply
//! `Clone`-able wrapper around a [`RequestEngine`] plus the default headers
//! every request starts from, and `ClientBuilder` assembles the
//! [`Manager`]/[`RetryPolicy`]/[`Redirector`]/[`InterceptorChain`] the
//! donor's `Config` struct would otherwise hold inline.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::Method;

use crate::decode::Accepts;
use crate::dns::{Addrs, GaiResolver, Resolve, WithOverrides};
use crate::engine::RequestEngine;
use crate::error::Result;
use crate::hash::HashMap;
use crate::header::HeaderDict;
use crate::interceptor::InterceptorChain;
use crate::into_url::IntoUrl;
use crate::manager::{Manager, ManagerConfig};
use crate::proxy::{Proxy, ProxyRouter};
use crate::redirect::Redirector;
use crate::request::{Request, RequestBuilder};
use crate::response::Response;
use crate::retry::RetryPolicy;
use crate::timeout::{Bound, Timeout};
use crate::tls::TlsConfig;

/// A synchronous HTTP client, spec §6.2. Cheap to `Clone` (an `Arc`-backed
/// [`RequestEngine`] inside); the usual pattern is to build one `Client` and
/// share it across threads rather than build a fresh one per request.
#[derive(Clone)]
pub struct Client {
    engine: RequestEngine,
    default_headers: HeaderDict,
}

impl Client {
    /// A client with every default, equivalent to `Client::builder().build()`.
    pub fn new() -> Client {
        ClientBuilder::new().build().expect("ClientBuilder::new()'s defaults never fail to build")
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn get<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    pub fn post<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    pub fn put<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    pub fn patch<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    pub fn delete<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    pub fn head<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::HEAD, url)
    }

    /// Starts building a request of an arbitrary method, spec §6.2's
    /// `request(method, url, ...)` entry point.
    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        RequestBuilder::new(self.engine.clone(), method, url).headers(self.default_headers.clone())
    }

    /// Executes an already-built [`Request`] directly, spec §6.2's
    /// `urlopen(method, url, ...)` entry point for callers that built their
    /// own [`Request`] rather than going through [`Client::request`].
    pub fn execute(&self, request: Request) -> Result<Response> {
        self.engine.execute(request)
    }
}

impl Default for Client {
    fn default() -> Self {
        Client::new()
    }
}

/// Adapts a type-erased resolver back into [`Resolve`] so it can be layered
/// under [`WithOverrides`], which is generic over a concrete resolver type.
struct ArcResolver(Arc<dyn Resolve>);

impl Resolve for ArcResolver {
    fn resolve(&self, host: &str, port: u16) -> Result<Addrs> {
        self.0.resolve(host, port)
    }
}

/// Builds a [`Client`] with custom configuration, spec §6.2.
#[must_use]
pub struct ClientBuilder {
    default_headers: HeaderDict,
    accepts: Accepts,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    total_timeout: Option<Duration>,
    pool_timeout: Option<Duration>,
    pool_maxsize: usize,
    max_pools: u32,
    proxy: Option<Proxy>,
    tunnel_non_http_for_proxy: bool,
    https_only: bool,
    referer: bool,
    retry_policy: RetryPolicy,
    tls_config: TlsConfig,
    resolver: Option<Arc<dyn Resolve>>,
    dns_overrides: HashMap<String, Addrs>,
    interceptors: InterceptorChain,
}

impl ClientBuilder {
    pub fn new() -> ClientBuilder {
        ClientBuilder {
            default_headers: HeaderDict::new(),
            accepts: Accepts::default(),
            connect_timeout: None,
            read_timeout: None,
            total_timeout: None,
            pool_timeout: None,
            pool_maxsize: 10,
            max_pools: 10,
            proxy: None,
            tunnel_non_http_for_proxy: false,
            https_only: false,
            referer: false,
            retry_policy: RetryPolicy::default(),
            tls_config: TlsConfig::default(),
            resolver: None,
            dns_overrides: HashMap::with_hasher(crate::hash::HASHER),
            interceptors: InterceptorChain::new(),
        }
    }

    /// Headers sent with every request built through this client, unless a
    /// request overrides them.
    pub fn default_headers(mut self, headers: HeaderDict) -> Self {
        self.default_headers = headers;
        self
    }

    pub fn gzip(mut self, enable: bool) -> Self {
        self.accepts.gzip = enable;
        self
    }

    pub fn deflate(mut self, enable: bool) -> Self {
        self.accepts.deflate = enable;
        self
    }

    pub fn brotli(mut self, enable: bool) -> Self {
        self.accepts.brotli = enable;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// The total wall-clock budget for a request, spanning connect, upload,
    /// and every byte of the response (spec §4.3).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = Some(timeout);
        self
    }

    /// How long a request will wait for a pooled connection to free up
    /// before failing with [`crate::error::Error::is_closed_pool`]-style
    /// empty-pool error.
    pub fn pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool_timeout = Some(timeout);
        self
    }

    /// Idle connections kept per origin, spec §4.7/§4.8.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_maxsize = max;
        self
    }

    /// Distinct origin pools kept before the LRU cache evicts the oldest,
    /// spec §4.8.
    pub fn max_pools(mut self, max: u32) -> Self {
        self.max_pools = max;
        self
    }

    pub fn proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn tunnel_non_http_for_proxy(mut self, value: bool) -> Self {
        self.tunnel_non_http_for_proxy = value;
        self
    }

    /// Rejects a redirect response that would downgrade from https to http.
    pub fn https_only(mut self, enabled: bool) -> Self {
        self.https_only = enabled;
        self
    }

    /// Synthesizes a `Referer` header for each redirect hop.
    pub fn referer(mut self, enabled: bool) -> Self {
        self.referer = enabled;
        self
    }

    /// Caps how many redirect hops a single request will follow, spec §4.11.
    pub fn max_redirects(mut self, max: u32) -> Self {
        self.retry_policy = self.retry_policy.with_redirect(max);
        self
    }

    /// Replaces the default retry policy wholesale.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn tls_config(mut self, config: TlsConfig) -> Self {
        self.tls_config = config;
        self
    }

    pub fn dns_resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Pins `host` to a fixed set of addresses, bypassing DNS for it.
    pub fn resolve(mut self, host: impl Into<String>, addr: SocketAddr) -> Self {
        self.dns_overrides.entry(host.into()).or_insert_with(Vec::new).push(addr);
        self
    }

    /// Registers an [`crate::interceptor::Interceptor`] (e.g. a cookie jar)
    /// run around every request/response pair, spec §6.1.
    pub fn interceptor(mut self, interceptor: Box<dyn crate::interceptor::Interceptor>) -> Self {
        self.interceptors = self.interceptors.push(interceptor);
        self
    }

    #[cfg(feature = "cookies")]
    pub fn cookie_store(self, enable: bool) -> Self {
        if enable {
            self.interceptor(Box::new(crate::interceptor::cookie::CookieInterceptor::new(
                crate::interceptor::cookie::Jar::default(),
            )))
        } else {
            self
        }
    }

    pub fn build(self) -> Result<Client> {
        let proxy_router = match self.proxy {
            Some(proxy) => ProxyRouter::new(proxy).with_tunnel_non_http_for_proxy(self.tunnel_non_http_for_proxy),
            None => ProxyRouter::direct(),
        };

        let manager_config = ManagerConfig {
            pool_maxsize: self.pool_maxsize,
            max_pools: self.max_pools,
            tls: Some(self.tls_config),
        };
        let mut manager = Manager::new(manager_config, proxy_router);

        if !self.dns_overrides.is_empty() {
            let base = self.resolver.unwrap_or_else(|| Arc::new(GaiResolver) as Arc<dyn Resolve>);
            let resolver: Arc<dyn Resolve> = Arc::new(WithOverrides::new(ArcResolver(base), self.dns_overrides));
            manager = manager.with_resolver(resolver);
        } else if let Some(resolver) = self.resolver {
            manager = manager.with_resolver(resolver);
        }

        let timeout = Timeout::new(
            self.connect_timeout.map(Bound::Finite).unwrap_or(Bound::Default),
            self.read_timeout.map(Bound::Finite).unwrap_or(Bound::Default),
            self.total_timeout.map(Bound::Finite).unwrap_or(Bound::None),
        )?;

        let redirector = Redirector::new().with_https_only(self.https_only).with_referer(self.referer);

        let engine = RequestEngine::new(
            manager,
            self.retry_policy,
            redirector,
            self.interceptors,
            self.accepts,
            timeout,
            self.pool_timeout,
        );

        Ok(Client { engine, default_headers: self.default_headers })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        ClientBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_client_builds_without_error() {
        let client = Client::new();
        let builder = client.get("http://example.com/");
        assert!(builder.build().is_ok());
    }

    #[test]
    fn builder_applies_default_headers_to_new_requests() {
        let mut headers = HeaderDict::new();
        headers.set("x-api-key", "secret").unwrap();
        let client = ClientBuilder::new().default_headers(headers).build().unwrap();

        let request = client.get("http://example.com/").build().unwrap();
        assert_eq!(request.headers().get("x-api-key"), Some("secret".to_string()));
    }
}
