#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # hyperpool
//!
//! A synchronous, thread-safe HTTP client core: a bounded per-origin
//! connection pool, an LRU pool-of-pools router, a sans-I/O HTTP/1.1
//! transaction engine, and a retry/redirect policy engine, modeled on
//! urllib3's architecture.
//!
//! - Connection pooling and reuse per `(scheme, host, port, proxy)` origin
//! - A bounded LRU cache of per-origin pools, so long-lived processes that
//!   talk to many hosts don't grow pools without bound
//! - Declarative, per-category retry policy (connect/read/status/redirect)
//!   with exponential backoff and `Retry-After` honoring
//! - Redirect following with method/body/header rewrite rules
//! - HTTP and SOCKS4/4a/5/5h proxying, including CONNECT tunneling
//! - Pluggable content-decoding (gzip, deflate, brotli) and DNS resolution
//! - An interceptor bus for request/response middleware (an optional
//!   cookie jar ships behind the `cookies` feature)
//!
//! ## Example
//!
//! ```rust,no_run
//! # fn run() -> Result<(), hyperpool::Error> {
//! let client = hyperpool::Client::new();
//! let response = client.get("https://example.com").send()?;
//! println!("status = {}", response.status());
//! # Ok(())
//! # }
//! ```
//!
//! **NOTE**: If you plan to perform multiple requests, create one
//! [`Client`] and reuse it -- that's what lets the connection pool pay off.
//!
//! ## Optional Features
//!
//! - **gzip**, **deflate**, **brotli**: response body decompression.
//! - **socks**: SOCKS4/4a/5/5h proxy support.
//! - **cookies**: automatic cookie jar support via [`ClientBuilder::cookie_store`].
//! - **json**: JSON request/response helpers.

#[macro_use]
mod trace;

pub use http::Method;
pub use http::{StatusCode, Version};

mod error;
mod into_url;

pub use self::error::{Error, Result};
pub use self::into_url::IntoUrl;

mod body;
mod client;
mod config;
mod connection;
mod decode;
pub mod dns;
mod engine;
mod framing;
mod hash;
mod header;
mod interceptor;
mod manager;
mod pool;
pub mod proxy;
pub mod redirect;
mod request;
mod response;
mod retry;
#[cfg(feature = "socks")]
mod socks;
pub mod tls;
mod timeout;
mod tunnel;
mod urlmodel;
mod util;
mod wait;

pub use self::body::Body;
pub use self::client::{Client, ClientBuilder};
pub use self::header::HeaderDict;
pub use self::interceptor::Interceptor;
#[cfg(feature = "cookies")]
pub use self::interceptor::cookie::{CookieStore, Jar};
pub use self::proxy::{NoProxy, Proxy};
pub use self::redirect::Redirector;
pub use self::request::{Request, RequestBuilder};
pub use self::response::Response;
pub use self::retry::RetryPolicy;
pub use self::timeout::Timeout;
pub use self::tls::TlsConfig;
pub use self::urlmodel::Url;

fn _assert_impls() {
    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}
    fn assert_clone<T: Clone>() {}

    assert_send::<Client>();
    assert_sync::<Client>();
    assert_clone::<Client>();

    assert_send::<Request>();
    assert_send::<RequestBuilder>();

    assert_send::<Response>();

    assert_send::<Error>();
    assert_sync::<Error>();
}
