//! Interceptor bus: pluggable request/response middleware, spec §6.1's
//! optional cookie/session support plus the `apply_to`/`extract_from` hooks
//! spec §4.12's expansion note adds around the request engine's core loop.
//!
//! Generalizes the donor's `cookie.rs` (`CookieStore` trait + `Jar`, an
//! in-memory `cookie_store::CookieStore` behind a lock, wired in through a
//! `tower` `CookieManagerLayer`/`CookieManager` service and a `pin_project`
//! response future): there is no async service stack in this crate, so the
//! donor's `Layer`/`Service`/`Future` plumbing is dropped and replaced with a
//! plain synchronous [`Interceptor`] trait the engine calls directly around
//! each request/response pair. The `CookieStore` trait and `Jar` type
//! themselves -- and the `cookie_crate`/`cookie_store` crates backing them --
//! carry over unchanged in spirit, just re-homed onto this crate's own `Url`
//! and `HeaderDict`/`HeaderValue` types and a plain `std::sync::RwLock`
//! instead of the donor's `antidote` dependency, which this crate does not
//! carry.

use crate::error::Result;
use crate::header::HeaderDict;
use crate::urlmodel::Url;

/// A hook invoked around each request/response pair the engine processes,
/// spec §4.12's expansion note. The default no-op impls mean implementors
/// only need to override the half they care about.
pub trait Interceptor: Send + Sync {
    /// Called just before a request is sent, with the chance to add or
    /// replace headers (e.g. attach a `Cookie` header for the request's
    /// URL).
    fn apply_to(&self, _url: &Url, _headers: &mut HeaderDict) -> Result<()> {
        Ok(())
    }

    /// Called once response headers have arrived, before the body is
    /// drained, with the chance to record state (e.g. store `Set-Cookie`
    /// values) for future requests.
    fn extract_from(&self, _url: &Url, _response_headers: &HeaderDict) {}
}

/// The engine's default: touches nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInterceptor;

impl Interceptor for NoopInterceptor {}

/// An ordered chain of interceptors. `apply_to` runs in registration order
/// (first-registered touches the request first); `extract_from` runs in
/// reverse, so the last interceptor to touch the outbound request is the
/// first to see the inbound response -- the usual middleware-onion rule.
#[derive(Default)]
pub struct InterceptorChain {
    interceptors: Vec<Box<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        InterceptorChain { interceptors: Vec::new() }
    }

    pub fn push(mut self, interceptor: Box<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub(crate) fn apply_to(&self, url: &Url, headers: &mut HeaderDict) -> Result<()> {
        for interceptor in &self.interceptors {
            interceptor.apply_to(url, headers)?;
        }
        Ok(())
    }

    pub(crate) fn extract_from(&self, url: &Url, response_headers: &HeaderDict) {
        for interceptor in self.interceptors.iter().rev() {
            interceptor.extract_from(url, response_headers);
        }
    }
}

#[cfg(feature = "cookies")]
pub mod cookie {
    //! In-memory cookie jar, adapted from the donor's `cookie.rs`.

    use std::sync::RwLock;

    use super::{Interceptor, Result};
    use crate::header::{HeaderDict, HeaderValue};
    use crate::urlmodel::Url;

    /// Actions for a persistent cookie store providing session support.
    pub trait CookieStore: Send + Sync {
        /// Stores a set of `Set-Cookie` header values received from `url`.
        fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url);

        /// Returns any `Cookie` values this store holds for `url`.
        fn cookies(&self, url: &Url) -> Option<Vec<HeaderValue>>;
    }

    /// A good default [`CookieStore`] implementation backed by the
    /// `cookie_store` crate's public-suffix-aware jar.
    pub struct Jar(RwLock<cookie_store::CookieStore>);

    impl Default for Jar {
        fn default() -> Self {
            Jar(RwLock::new(cookie_store::CookieStore::default()))
        }
    }

    impl Jar {
        pub fn add_cookie_str(&self, cookie: &str, url: &Url) {
            let cookies = cookie_crate::Cookie::parse(cookie.to_owned())
                .ok()
                .map(|c| c.into_owned())
                .into_iter();
            self.0.write().unwrap().store_response_cookies(cookies, url.as_ext());
        }

        pub fn clear(&self) {
            self.0.write().unwrap().clear();
        }
    }

    impl CookieStore for Jar {
        fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
            let cookies = cookie_headers.filter_map(|value| {
                value
                    .to_str()
                    .ok()
                    .and_then(|s| cookie_crate::Cookie::parse(s.to_owned()).ok())
                    .map(|c| c.into_owned())
            });
            self.0.write().unwrap().store_response_cookies(cookies, url.as_ext());
        }

        fn cookies(&self, url: &Url) -> Option<Vec<HeaderValue>> {
            let lock = self.0.read().unwrap();
            let mut cookies = Vec::new();
            for (name, value) in lock.get_request_values(url.as_ext()) {
                if let Ok(header) = HeaderValue::from_str(&format!("{name}={value}")) {
                    cookies.push(header);
                }
            }
            if cookies.is_empty() {
                None
            } else {
                Some(cookies)
            }
        }
    }

    /// Adapts any [`CookieStore`] into the engine's [`Interceptor`] bus:
    /// attaches a `Cookie` header before each request, and records
    /// `Set-Cookie` values from each response.
    pub struct CookieInterceptor<C> {
        store: C,
    }

    impl<C: CookieStore> CookieInterceptor<C> {
        pub fn new(store: C) -> Self {
            CookieInterceptor { store }
        }
    }

    impl<C: CookieStore> Interceptor for CookieInterceptor<C> {
        fn apply_to(&self, url: &Url, headers: &mut HeaderDict) -> Result<()> {
            if headers.contains("cookie") {
                return Ok(());
            }
            if let Some(cookies) = self.store.cookies(url) {
                let joined = cookies
                    .iter()
                    .filter_map(|v| v.to_str().ok())
                    .collect::<Vec<_>>()
                    .join("; ");
                if !joined.is_empty() {
                    headers.set("cookie", joined)?;
                }
            }
            Ok(())
        }

        fn extract_from(&self, url: &Url, response_headers: &HeaderDict) {
            let values: Vec<HeaderValue> = response_headers
                .get_all("set-cookie")
                .iter()
                .filter_map(|s| HeaderValue::from_str(s).ok())
                .collect();
            if values.is_empty() {
                return;
            }
            self.store.set_cookies(&mut values.iter(), url);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn jar_round_trips_a_cookie_through_set_and_get() {
            let jar = Jar::default();
            let url = Url::parse("https://example.com/").unwrap();
            let mut headers = HeaderDict::new();
            headers.add("set-cookie", "session=abc123; Path=/").unwrap();

            let interceptor = CookieInterceptor::new(jar);
            interceptor.extract_from(&url, &headers);

            let mut outgoing = HeaderDict::new();
            interceptor.apply_to(&url, &mut outgoing).unwrap();
            assert_eq!(outgoing.get("cookie"), Some("session=abc123".to_string()));
        }

        #[test]
        fn existing_cookie_header_is_not_overwritten() {
            let jar = Jar::default();
            let url = Url::parse("https://example.com/").unwrap();
            let interceptor = CookieInterceptor::new(jar);

            let mut outgoing = HeaderDict::new();
            outgoing.set("cookie", "already=set").unwrap();
            interceptor.apply_to(&url, &mut outgoing).unwrap();
            assert_eq!(outgoing.get("cookie"), Some("already=set".to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingInterceptor {
        tag: &'static str,
        order: std::sync::Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    impl Interceptor for RecordingInterceptor {
        fn apply_to(&self, _url: &Url, _headers: &mut HeaderDict) -> Result<()> {
            self.order.lock().unwrap().push(self.tag);
            Ok(())
        }

        fn extract_from(&self, _url: &Url, _response_headers: &HeaderDict) {
            self.order.lock().unwrap().push(self.tag);
        }
    }

    #[test]
    fn empty_chain_is_a_no_op() {
        let chain = InterceptorChain::new();
        let url = Url::parse("http://example.com/").unwrap();
        let mut headers = HeaderDict::new();
        assert!(chain.apply_to(&url, &mut headers).is_ok());
        chain.extract_from(&url, &headers);
        assert!(chain.is_empty());
    }

    #[test]
    fn extract_from_runs_in_reverse_order_of_apply_to() {
        let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let chain = InterceptorChain::new()
            .push(Box::new(RecordingInterceptor { tag: "a", order: order.clone() }))
            .push(Box::new(RecordingInterceptor { tag: "b", order: order.clone() }));

        let url = Url::parse("http://example.com/").unwrap();
        let mut headers = HeaderDict::new();
        chain.apply_to(&url, &mut headers).unwrap();
        chain.extract_from(&url, &headers);

        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "b", "a"]);
    }
}
