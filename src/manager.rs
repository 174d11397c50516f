//! Top-level pool cache: an LRU of per-origin [`Pool`]s, plus proxy
//! routing. Generalizes `original_source/urllib3/poolmanager.py`'s
//! `PoolManager` (a `RecentlyUsedContainer`-backed `dict` of
//! `ConnectionPool`s keyed by scheme+host+port+extra) onto this crate's
//! `schnellru::LruMap` + `ahash` hashing stack (already used by
//! `hash.rs`), per spec §4.8.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::dns::{GaiResolver, Resolve};
use crate::error::Result;
use crate::hash::{LruMap, HASHER};
use crate::pool::{Lease, Pool};
use crate::proxy::ProxyRouter;
use crate::tls::TlsConfig;
use crate::urlmodel::Url;

/// Identifies a distinct pool: same scheme, host, and port always share a
/// pool; proxies get their own key so tunneled and direct connections to
/// the same origin never mix, per spec §4.8's key definition.
///
/// Deliberately omits `ssl_params_hash`/`source_address`/`socket_options_hash`
/// from spec §3's fuller key: the `Manager` holds one shared `TlsConfig` for
/// every pool and exposes no per-request `source_address`/`socket_options`,
/// so scheme+host+port+proxy is the whole space of distinct origins today.
/// If a per-request TLS override or bind address is ever added, it MUST be
/// folded into this key too, or requests with differing TLS material would
/// silently share a pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub proxy: Option<String>,
}

impl PoolKey {
    pub fn for_url(url: &Url, proxy: Option<&Url>) -> PoolKey {
        PoolKey {
            scheme: url.scheme().to_ascii_lowercase(),
            host: url.host_str().unwrap_or_default().to_ascii_lowercase(),
            port: url.port_or_known_default().unwrap_or(0),
            proxy: proxy.map(|p| p.authority()),
        }
    }
}

/// Settings every freshly created [`Pool`] is configured with; shared across
/// all origins managed by one [`Manager`].
#[derive(Clone)]
pub struct ManagerConfig {
    pub pool_maxsize: usize,
    pub max_pools: u32,
    pub tls: Option<TlsConfig>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            pool_maxsize: 10,
            max_pools: 10,
            tls: Some(TlsConfig::default()),
        }
    }
}

/// The client's top-level connection cache, spec §4.8. Owns one [`Pool`] per
/// distinct origin (bounded LRU, oldest evicted pool is closed), and routes
/// each request through [`ProxyRouter`] to decide whether it needs a direct
/// connection or a proxy/tunnel.
pub struct Manager {
    pools: Mutex<LruMap<PoolKey, Arc<Pool>>>,
    config: ManagerConfig,
    resolver: Arc<dyn Resolve>,
    proxy_router: ProxyRouter,
}

impl Manager {
    pub fn new(config: ManagerConfig, proxy_router: ProxyRouter) -> Manager {
        Manager {
            pools: Mutex::new(LruMap::with_hasher(
                schnellru::ByLength::new(config.max_pools),
                HASHER,
            )),
            config,
            resolver: Arc::new(GaiResolver),
            proxy_router,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Returns the pool for `key`, creating (and LRU-inserting) one if this
    /// is the first request to this origin. Per spec §4.8, inserting past
    /// `max_pools` evicts and closes the least-recently-used pool.
    pub fn pool_for(&self, key: &PoolKey) -> Arc<Pool> {
        let mut pools = self.pools.lock().expect("manager mutex poisoned");
        if let Some(existing) = pools.get(key) {
            return existing.clone();
        }
        let pool = Arc::new(Pool::new(self.config.pool_maxsize));
        if pools.len() as u32 >= self.config.max_pools {
            if let Some((_, evicted)) = pools.pop_oldest() {
                evicted.close();
            }
        }
        pools.insert(key.clone(), pool.clone());
        pool
    }

    /// Acquires a lease for `key`, blocking up to `timeout` as described by
    /// [`Pool::get`].
    pub fn lease(&self, key: &PoolKey, timeout: Option<Duration>) -> Result<(Arc<Pool>, Lease)> {
        let pool = self.pool_for(key);
        let lease = pool.get(timeout)?;
        Ok((pool, lease))
    }

    pub fn resolver(&self) -> &Arc<dyn Resolve> {
        &self.resolver
    }

    pub fn proxy_router(&self) -> &ProxyRouter {
        &self.proxy_router
    }

    pub fn tls_config(&self) -> Option<&TlsConfig> {
        self.config.tls.as_ref()
    }

    /// Closes every managed pool and empties the LRU, per spec §4.8's
    /// `clear()`.
    pub fn clear(&self) {
        let mut pools = self.pools.lock().expect("manager mutex poisoned");
        for (_, pool) in pools.iter() {
            pool.close();
        }
        pools.clear();
    }

    pub fn pool_count(&self) -> usize {
        self.pools.lock().expect("manager mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyRouter;

    fn key(host: &str) -> PoolKey {
        PoolKey {
            scheme: "http".into(),
            host: host.into(),
            port: 80,
            proxy: None,
        }
    }

    #[test]
    fn pool_for_same_key_returns_same_pool() {
        let manager = Manager::new(ManagerConfig::default(), ProxyRouter::direct());
        let a = manager.pool_for(&key("example.com"));
        let b = manager.pool_for(&key("example.com"));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn pool_for_distinct_hosts_returns_distinct_pools() {
        let manager = Manager::new(ManagerConfig::default(), ProxyRouter::direct());
        let a = manager.pool_for(&key("a.example.com"));
        let b = manager.pool_for(&key("b.example.com"));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn exceeding_max_pools_evicts_lru() {
        let config = ManagerConfig {
            max_pools: 2,
            ..ManagerConfig::default()
        };
        let manager = Manager::new(config, ProxyRouter::direct());
        let _a = manager.pool_for(&key("a.example.com"));
        let _b = manager.pool_for(&key("b.example.com"));
        let _c = manager.pool_for(&key("c.example.com"));
        assert_eq!(manager.pool_count(), 2);
    }

    #[test]
    fn clear_empties_the_manager() {
        let manager = Manager::new(ManagerConfig::default(), ProxyRouter::direct());
        let _a = manager.pool_for(&key("example.com"));
        manager.clear();
        assert_eq!(manager.pool_count(), 0);
    }
}
