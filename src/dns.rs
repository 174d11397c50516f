//! DNS resolution: a blocking resolver trait plus a `getaddrinfo`-backed
//! default implementation. Generalizes the donor's `dns.rs`/`dns/gai.rs`
//! `Resolve`/`GaiResolver` abstraction from async (`tower::Service`) to a
//! plain blocking call, per spec §6.1: "a callable `(host, port, ...) ->
//! [AddrInfo]`; the core never constructs addresses itself."

use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::{Error, Result};

/// A resolved hostname: its ordered candidate addresses.
pub type Addrs = Vec<SocketAddr>;

/// The DNS resolver seam. The core never does its own resolution beyond
/// calling this trait once per connect attempt (no caching across calls --
/// spec §1's non-goal: "does not itself perform DNS caching beyond a single
/// happy-eyeballs resolution attempt per connect").
pub trait Resolve: Send + Sync {
    /// Resolves `host` (a DNS name or literal IP) at `port` to an ordered
    /// list of candidate socket addresses.
    fn resolve(&self, host: &str, port: u16) -> Result<Addrs>;
}

/// The default resolver: delegates to the platform's `getaddrinfo` via
/// `std::net::ToSocketAddrs`, exactly mirroring the donor's `GaiResolver`
/// but blocking rather than spawned onto a thread pool future.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaiResolver;

impl Resolve for GaiResolver {
    fn resolve(&self, host: &str, port: u16) -> Result<Addrs> {
        (host, port)
            .to_socket_addrs()
            .map(|it| it.collect())
            .map_err(|e| Error::new_connection(e).with_url_hint(host))
    }
}

trait WithUrlHint {
    fn with_url_hint(self, host: &str) -> Self;
}

impl WithUrlHint for Error {
    fn with_url_hint(self, host: &str) -> Self {
        // Best-effort: not every caller has a full URL on hand at the DNS
        // layer, so we only attach one when `host` happens to already be a
        // valid standalone URL authority; otherwise leave it unset and let
        // the caller (`connection.rs`) attach its own.
        match url::Url::parse(&format!("dns://{host}")) {
            Ok(u) => self.with_url(u),
            Err(_) => self,
        }
    }
}

/// A resolver that consults a static override table before falling back to
/// `inner`, the synchronous analogue of the donor's
/// `DnsResolverWithOverrides`. Useful for tests and for `--resolve`-style
/// host pinning.
pub struct WithOverrides<R: Resolve> {
    inner: R,
    overrides: crate::hash::HashMap<String, Addrs>,
}

impl<R: Resolve> WithOverrides<R> {
    pub fn new(inner: R, overrides: crate::hash::HashMap<String, Addrs>) -> Self {
        WithOverrides { inner, overrides }
    }
}

impl<R: Resolve> Resolve for WithOverrides<R> {
    fn resolve(&self, host: &str, port: u16) -> Result<Addrs> {
        if let Some(addrs) = self.overrides.get(host) {
            return Ok(addrs.clone());
        }
        self.inner.resolve(host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gai_resolver_resolves_loopback_literal() {
        let addrs = GaiResolver.resolve("127.0.0.1", 80).unwrap();
        assert_eq!(addrs, vec![SocketAddr::from(([127, 0, 0, 1], 80))]);
    }

    #[test]
    fn overrides_short_circuit_inner_resolver() {
        let mut table = crate::hash::HashMap::default();
        table.insert("pinned.example".to_string(), vec![SocketAddr::from(([10, 0, 0, 1], 443))]);
        let resolver = WithOverrides::new(GaiResolver, table);
        let addrs = resolver.resolve("pinned.example", 443).unwrap();
        assert_eq!(addrs, vec![SocketAddr::from(([10, 0, 0, 1], 443))]);
    }
}
