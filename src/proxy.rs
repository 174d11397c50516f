//! Proxy configuration and routing decisions, spec §4.9.
//!
//! Generalizes the donor's `proxy.rs`: `Proxy`/`NoProxy`/`ProxyScheme`/
//! `Intercept` are kept nearly as-is (including the `NO_PROXY` matcher and
//! the Windows/macOS system-proxy lookups), but rebased onto this crate's
//! [`crate::urlmodel::Url`] instead of a raw `url::Url`/`http::Uri`, and
//! extended with a [`ProxyRouter`] that turns "which `ProxyScheme`, if any,
//! applies to this request" into a concrete routing decision: direct,
//! CONNECT-tunnel, forward-proxy, or SOCKS.

use std::fmt;
#[cfg(feature = "socks")]
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use http::header::HeaderValue;
use ipnet::IpNet;
use percent_encoding::percent_decode;
use std::collections::HashMap;
use std::env;
use std::error::Error as StdError;
use std::net::IpAddr;
#[cfg(target_os = "macos")]
use system_configuration::{
    core_foundation::{
        base::CFType,
        dictionary::CFDictionary,
        number::CFNumber,
        string::{CFString, CFStringRef},
    },
    dynamic_store::SCDynamicStoreBuilder,
    sys::schema_definitions::kSCPropNetProxiesHTTPEnable,
    sys::schema_definitions::kSCPropNetProxiesHTTPPort,
    sys::schema_definitions::kSCPropNetProxiesHTTPProxy,
    sys::schema_definitions::kSCPropNetProxiesHTTPSEnable,
    sys::schema_definitions::kSCPropNetProxiesHTTPSPort,
    sys::schema_definitions::kSCPropNetProxiesHTTPSProxy,
};
#[cfg(target_os = "windows")]
use winreg::enums::HKEY_CURRENT_USER;
#[cfg(target_os = "windows")]
use winreg::RegKey;

use crate::error::{Error, Result};
use crate::into_url::{IntoUrl, IntoUrlSealed};
use crate::urlmodel::{connection_requires_http_tunnel, Url};

/// Configuration of a proxy that the [`crate::manager::Manager`] should pass
/// requests to.
///
/// A `Proxy` has a couple pieces to it:
///
/// - a URL of how to talk to the proxy
/// - rules on what requests should be directed to the proxy
#[derive(Clone)]
pub struct Proxy {
    intercept: Intercept,
    no_proxy: Option<NoProxy>,
}

/// Represents a possible matching entry for an IP address.
#[derive(Clone, Debug)]
enum Ip {
    Address(IpAddr),
    Network(IpNet),
}

/// A wrapper around a list of IP cidr blocks or addresses with a `contains`
/// method for checking if an IP address is contained within the matcher.
#[derive(Clone, Debug, Default)]
struct IpMatcher(Vec<Ip>);

/// A wrapper around a list of domains with a `contains` method for checking
/// if a domain is contained within the matcher.
#[derive(Clone, Debug, Default)]
struct DomainMatcher(Vec<String>);

/// A configuration for filtering out requests that shouldn't be proxied,
/// per the `NO_PROXY`/`no_proxy` environment variable convention.
#[derive(Clone, Debug, Default)]
pub struct NoProxy {
    ips: IpMatcher,
    domains: DomainMatcher,
}

/// The SOCKS protocol variant, spec §6.3. `4`/`5` resolve the hostname
/// locally before the handshake; `4a`/`5h` pass the hostname to the proxy
/// for remote resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg(feature = "socks")]
pub enum SocksVersion {
    V4,
    V4a,
    V5,
    V5h,
}

#[cfg(feature = "socks")]
impl SocksVersion {
    pub fn is_remote_dns(self) -> bool {
        matches!(self, SocksVersion::V4a | SocksVersion::V5h)
    }
}

/// A particular scheme used for proxying requests: HTTP(S) forward/CONNECT,
/// or SOCKS.
#[derive(Clone)]
pub enum ProxyScheme {
    Http {
        auth: Option<HeaderValue>,
        host: http::uri::Authority,
    },
    Https {
        auth: Option<HeaderValue>,
        host: http::uri::Authority,
    },
    #[cfg(feature = "socks")]
    Socks {
        version: SocksVersion,
        host: String,
        port: u16,
        auth: Option<(String, String)>,
    },
}

impl ProxyScheme {
    fn maybe_http_auth(&self) -> Option<&HeaderValue> {
        match self {
            ProxyScheme::Http { auth, .. } | ProxyScheme::Https { auth, .. } => auth.as_ref(),
            #[cfg(feature = "socks")]
            ProxyScheme::Socks { .. } => None,
        }
    }
}

/// Trait used for converting into a proxy scheme. Supports parsing from a
/// URL-like type as well as proxy schemes built directly via factory
/// methods.
pub trait IntoProxyScheme {
    fn into_proxy_scheme(self) -> Result<ProxyScheme>;
}

impl<S: IntoUrl> IntoProxyScheme for S {
    fn into_proxy_scheme(self) -> Result<ProxyScheme> {
        let url = match self.as_url_str().parse::<Url>() {
            Ok(url) => match url.into_url() {
                Ok(url) => url,
                Err(e) => return Err(Error::builder(e)),
            },
            Err(_) => {
                // The input may be missing a scheme (e.g. "localhost:1234");
                // retry once with an assumed `http://` prefix.
                let try_this = format!("http://{}", self.as_url_str());
                Url::parse(&try_this).map_err(Error::builder)?
            }
        };
        ProxyScheme::parse(url)
    }
}

impl IntoProxyScheme for ProxyScheme {
    fn into_proxy_scheme(self) -> Result<ProxyScheme> {
        Ok(self)
    }
}

impl Proxy {
    /// Proxy all HTTP traffic to the passed URL.
    pub fn http<U: IntoProxyScheme>(proxy_scheme: U) -> Result<Proxy> {
        Ok(Proxy::new(Intercept::Http(proxy_scheme.into_proxy_scheme()?)))
    }

    /// Proxy all HTTPS traffic to the passed URL.
    pub fn https<U: IntoProxyScheme>(proxy_scheme: U) -> Result<Proxy> {
        Ok(Proxy::new(Intercept::Https(proxy_scheme.into_proxy_scheme()?)))
    }

    /// Proxy **all** traffic to the passed URL.
    pub fn all<U: IntoProxyScheme>(proxy_scheme: U) -> Result<Proxy> {
        Ok(Proxy::new(Intercept::All(proxy_scheme.into_proxy_scheme()?)))
    }

    /// Provide a custom function to determine what traffic to proxy to where.
    pub fn custom<F, U: IntoProxyScheme>(fun: F) -> Proxy
    where
        F: Fn(&Url) -> Option<U> + Send + Sync + 'static,
    {
        Proxy::new(Intercept::Custom(Custom {
            auth: None,
            func: Arc::new(move |url| fun(url).map(IntoProxyScheme::into_proxy_scheme)),
        }))
    }

    /// Looks up the system's proxy configuration (`*_PROXY` environment
    /// variables, falling back to the platform proxy settings on Windows and
    /// macOS).
    pub fn system() -> Proxy {
        let mut proxy = if cfg!(feature = "__internal_proxy_sys_no_cache") {
            Proxy::new(Intercept::System(Arc::new(get_sys_proxies(get_from_platform()))))
        } else {
            let sys_proxies = SYS_PROXIES.get_or_init(|| Arc::new(get_sys_proxies(get_from_platform())));
            Proxy::new(Intercept::System(sys_proxies.clone()))
        };
        proxy.no_proxy = NoProxy::from_env();
        proxy
    }

    fn new(intercept: Intercept) -> Proxy {
        Proxy { intercept, no_proxy: None }
    }

    /// Set the `Proxy-Authorization` header using Basic auth.
    pub fn basic_auth(mut self, username: &str, password: &str) -> Proxy {
        self.intercept.set_basic_auth(username, password);
        self
    }

    /// Set the `Proxy-Authorization` header to a specified value.
    pub fn custom_http_auth(mut self, header_value: HeaderValue) -> Proxy {
        self.intercept.set_custom_http_auth(header_value);
        self
    }

    /// Adds a `NO_PROXY`-style exclusion list to this Proxy.
    pub fn no_proxy(mut self, no_proxy: Option<NoProxy>) -> Proxy {
        self.no_proxy = no_proxy;
        self
    }

    fn in_no_proxy(&self, url: &Url) -> bool {
        self.no_proxy
            .as_ref()
            .map_or(false, |np| np.contains(url.host_str().unwrap_or_default()))
    }

    fn intercept(&self, url: &Url) -> Option<ProxyScheme> {
        let in_no_proxy = self.in_no_proxy(url);
        match &self.intercept {
            Intercept::All(u) => (!in_no_proxy).then(|| u.clone()),
            Intercept::Http(u) => (!in_no_proxy && url.scheme() == "http").then(|| u.clone()),
            Intercept::Https(u) => (!in_no_proxy && url.scheme() == "https").then(|| u.clone()),
            Intercept::System(map) => {
                if in_no_proxy {
                    None
                } else {
                    map.get(url.scheme()).cloned()
                }
            }
            Intercept::Custom(custom) => (!in_no_proxy).then(|| custom.call(url)).flatten(),
        }
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Proxy")
            .field(&self.intercept)
            .field(&self.no_proxy)
            .finish()
    }
}

impl NoProxy {
    /// Returns a new no-proxy configuration based on environment variables
    /// (or `None` if no variables are set). See [`NoProxy::from_string`] for
    /// the string format.
    pub fn from_env() -> Option<NoProxy> {
        let raw = env::var("NO_PROXY").or_else(|_| env::var("no_proxy")).unwrap_or_default();
        Self::from_string(&raw)
    }

    /// Returns a new no-proxy configuration based on a `no_proxy` string.
    ///
    /// Entries are comma-separated; IP addresses and CIDR blocks are
    /// matched literally, `*` matches everything, and any other entry is a
    /// domain (and its subdomains).
    pub fn from_string(no_proxy_list: &str) -> Option<Self> {
        if no_proxy_list.is_empty() {
            return None;
        }
        let mut ips = Vec::new();
        let mut domains = Vec::new();
        for part in no_proxy_list.split(',').map(str::trim) {
            match part.parse::<IpNet>() {
                Ok(ip) => ips.push(Ip::Network(ip)),
                Err(_) => match part.parse::<IpAddr>() {
                    Ok(addr) => ips.push(Ip::Address(addr)),
                    Err(_) => domains.push(part.to_owned()),
                },
            }
        }
        Some(NoProxy {
            ips: IpMatcher(ips),
            domains: DomainMatcher(domains),
        })
    }

    fn contains(&self, host: &str) -> bool {
        let host = if host.starts_with('[') {
            host.trim_matches(&['[', ']'][..])
        } else {
            host
        };
        match host.parse::<IpAddr>() {
            Ok(ip) => self.ips.contains(ip),
            Err(_) => self.domains.contains(host),
        }
    }
}

impl IpMatcher {
    fn contains(&self, addr: IpAddr) -> bool {
        self.0.iter().any(|ip| match ip {
            Ip::Address(address) => &addr == address,
            Ip::Network(net) => net.contains(&addr),
        })
    }
}

impl DomainMatcher {
    // https://curl.se/libcurl/c/CURLOPT_NOPROXY.html
    fn contains(&self, domain: &str) -> bool {
        let domain_len = domain.len();
        for d in &self.0 {
            if d == domain || d.strip_prefix('.') == Some(domain) {
                return true;
            } else if domain.ends_with(d.as_str()) {
                if d.starts_with('.') {
                    return true;
                } else if domain.as_bytes().get(domain_len - d.len() - 1) == Some(&b'.') {
                    return true;
                }
            } else if d == "*" {
                return true;
            }
        }
        false
    }
}

impl ProxyScheme {
    fn http(host: &str) -> Result<Self> {
        Ok(ProxyScheme::Http {
            auth: None,
            host: host.parse().map_err(Error::builder)?,
        })
    }

    fn https(host: &str) -> Result<Self> {
        Ok(ProxyScheme::Https {
            auth: None,
            host: host.parse().map_err(Error::builder)?,
        })
    }

    #[cfg(feature = "socks")]
    fn socks(version: SocksVersion, host: &str, port: u16) -> Result<Self> {
        Ok(ProxyScheme::Socks {
            version,
            host: host.to_owned(),
            port,
            auth: None,
        })
    }

    fn with_basic_auth<T: Into<String>, U: Into<String>>(mut self, username: T, password: U) -> Self {
        self.set_basic_auth(username, password);
        self
    }

    fn set_basic_auth<T: Into<String>, U: Into<String>>(&mut self, username: T, password: U) {
        match self {
            ProxyScheme::Http { auth, .. } | ProxyScheme::Https { auth, .. } => {
                *auth = Some(encode_basic_auth(&username.into(), &password.into()));
            }
            #[cfg(feature = "socks")]
            ProxyScheme::Socks { auth, .. } => {
                *auth = Some((username.into(), password.into()));
            }
        }
    }

    fn set_custom_http_auth(&mut self, header_value: HeaderValue) {
        match self {
            ProxyScheme::Http { auth, .. } | ProxyScheme::Https { auth, .. } => {
                *auth = Some(header_value);
            }
            #[cfg(feature = "socks")]
            ProxyScheme::Socks { .. } => panic!("SOCKS proxies do not support custom HTTP auth headers"),
        }
    }

    fn if_no_auth(mut self, update: &Option<HeaderValue>) -> Self {
        match &mut self {
            ProxyScheme::Http { auth, .. } | ProxyScheme::Https { auth, .. } => {
                if auth.is_none() {
                    *auth = update.clone();
                }
            }
            #[cfg(feature = "socks")]
            ProxyScheme::Socks { .. } => {}
        }
        self
    }

    /// Convert a URL into a proxy scheme. Supported schemes: `http`,
    /// `https`, and (with the `socks` feature) `socks4`/`socks4a`/
    /// `socks5`/`socks5h`.
    fn parse(url: Url) -> Result<Self> {
        let host_port = format!(
            "{}:{}",
            url.host_str().unwrap_or_default(),
            url.port_or_known_default().unwrap_or(80)
        );

        let mut scheme = match url.scheme() {
            "http" => Self::http(&host_port)?,
            "https" => Self::https(&host_port)?,
            #[cfg(feature = "socks")]
            "socks4" => Self::socks(SocksVersion::V4, url.host_str().unwrap_or_default(), url.port_or_known_default().unwrap_or(1080))?,
            #[cfg(feature = "socks")]
            "socks4a" => Self::socks(SocksVersion::V4a, url.host_str().unwrap_or_default(), url.port_or_known_default().unwrap_or(1080))?,
            #[cfg(feature = "socks")]
            "socks5" => Self::socks(SocksVersion::V5, url.host_str().unwrap_or_default(), url.port_or_known_default().unwrap_or(1080))?,
            #[cfg(feature = "socks")]
            "socks5h" => Self::socks(SocksVersion::V5h, url.host_str().unwrap_or_default(), url.port_or_known_default().unwrap_or(1080))?,
            other => return Err(Error::builder(format!("unknown proxy scheme: {other}"))),
        };

        if let Some(pwd) = url.password() {
            let decoded_username = percent_decode(url.username().as_bytes()).decode_utf8_lossy();
            let decoded_password = percent_decode(pwd.as_bytes()).decode_utf8_lossy();
            scheme = scheme.with_basic_auth(decoded_username, decoded_password);
        }

        Ok(scheme)
    }
}

impl fmt::Debug for ProxyScheme {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProxyScheme::Http { host, .. } => write!(f, "http://{host}"),
            ProxyScheme::Https { host, .. } => write!(f, "https://{host}"),
            #[cfg(feature = "socks")]
            ProxyScheme::Socks { version, host, port, .. } => {
                let prefix = match version {
                    SocksVersion::V4 => "socks4",
                    SocksVersion::V4a => "socks4a",
                    SocksVersion::V5 => "socks5",
                    SocksVersion::V5h => "socks5h",
                };
                write!(f, "{prefix}://{host}:{port}")
            }
        }
    }
}

type SystemProxyMap = HashMap<String, ProxyScheme>;

#[derive(Clone, Debug)]
enum Intercept {
    All(ProxyScheme),
    Http(ProxyScheme),
    Https(ProxyScheme),
    System(Arc<SystemProxyMap>),
    Custom(Custom),
}

impl Intercept {
    fn set_basic_auth(&mut self, username: &str, password: &str) {
        match self {
            Intercept::All(s) | Intercept::Http(s) | Intercept::Https(s) => s.set_basic_auth(username, password),
            Intercept::System(_) => unimplemented!("system proxy credentials are not user-settable"),
            Intercept::Custom(custom) => custom.auth = Some(encode_basic_auth(username, password)),
        }
    }

    fn set_custom_http_auth(&mut self, header_value: HeaderValue) {
        match self {
            Intercept::All(s) | Intercept::Http(s) | Intercept::Https(s) => s.set_custom_http_auth(header_value),
            Intercept::System(_) => unimplemented!("system proxy credentials are not user-settable"),
            Intercept::Custom(custom) => custom.auth = Some(header_value),
        }
    }
}

#[derive(Clone)]
struct Custom {
    auth: Option<HeaderValue>,
    func: Arc<dyn Fn(&Url) -> Option<Result<ProxyScheme>> + Send + Sync + 'static>,
}

impl Custom {
    fn call(&self, url: &Url) -> Option<ProxyScheme> {
        (self.func)(url)
            .and_then(|result| result.ok())
            .map(|scheme| scheme.if_no_auth(&self.auth))
    }
}

impl fmt::Debug for Custom {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("_")
    }
}

pub(crate) fn encode_basic_auth(username: &str, password: &str) -> HeaderValue {
    crate::util::basic_auth(username, Some(password))
}

static SYS_PROXIES: OnceLock<Arc<SystemProxyMap>> = OnceLock::new();

/// Gets system proxies information. All platforms check for proxy settings
/// via environment variables first; Windows and macOS then fall back to the
/// platform-wide settings. Errors discovering these settings are ignored.
fn get_sys_proxies(
    #[cfg_attr(not(any(target_os = "windows", target_os = "macos")), allow(unused_variables))] platform_proxies: Option<String>,
) -> SystemProxyMap {
    let proxies = get_from_environment();

    #[cfg(any(target_os = "windows", target_os = "macos"))]
    if proxies.is_empty() {
        if let Some(platform_proxies) = platform_proxies {
            return parse_platform_values(platform_proxies);
        }
    }

    proxies
}

fn insert_proxy(proxies: &mut SystemProxyMap, scheme: impl Into<String>, addr: String) -> bool {
    if addr.trim().is_empty() {
        false
    } else if let Ok(valid_addr) = addr.into_proxy_scheme() {
        proxies.insert(scheme.into(), valid_addr);
        true
    } else {
        false
    }
}

fn get_from_environment() -> SystemProxyMap {
    let mut proxies = HashMap::new();

    if is_cgi() {
        if log::log_enabled!(log::Level::Warn) && env::var_os("HTTP_PROXY").is_some() {
            log::warn!("HTTP_PROXY environment variable ignored in CGI");
        }
    } else if !insert_from_env(&mut proxies, "http", "HTTP_PROXY") {
        insert_from_env(&mut proxies, "http", "http_proxy");
    }

    if !insert_from_env(&mut proxies, "https", "HTTPS_PROXY") {
        insert_from_env(&mut proxies, "https", "https_proxy");
    }

    if !(insert_from_env(&mut proxies, "http", "ALL_PROXY") && insert_from_env(&mut proxies, "https", "ALL_PROXY")) {
        insert_from_env(&mut proxies, "http", "all_proxy");
        insert_from_env(&mut proxies, "https", "all_proxy");
    }

    proxies
}

fn insert_from_env(proxies: &mut SystemProxyMap, scheme: &str, var: &str) -> bool {
    match env::var(var) {
        Ok(val) => insert_proxy(proxies, scheme, val),
        Err(_) => false,
    }
}

/// Checks if we are being executed in a CGI context. If so, a malicious
/// client can send the `Proxy:` header, and it will land in `HTTP_PROXY`, so
/// that variable is ignored.
fn is_cgi() -> bool {
    env::var_os("REQUEST_METHOD").is_some()
}

#[cfg(target_os = "windows")]
fn get_from_platform_impl() -> std::result::Result<Option<String>, Box<dyn StdError>> {
    let hkcu = RegKey::predef(HKEY_CURRENT_USER);
    let internet_setting: RegKey = hkcu.open_subkey("Software\\Microsoft\\Windows\\CurrentVersion\\Internet Settings")?;
    let proxy_enable: u32 = internet_setting.get_value("ProxyEnable")?;
    let proxy_server: String = internet_setting.get_value("ProxyServer")?;
    Ok((proxy_enable == 1).then_some(proxy_server))
}

#[cfg(target_os = "macos")]
fn parse_setting_from_dynamic_store(
    proxies_map: &CFDictionary<CFString, CFType>,
    enabled_key: CFStringRef,
    host_key: CFStringRef,
    port_key: CFStringRef,
    scheme: &str,
) -> Option<String> {
    let proxy_enabled = proxies_map
        .find(enabled_key)
        .and_then(|flag| flag.downcast::<CFNumber>())
        .and_then(|flag| flag.to_i32())
        .unwrap_or(0)
        == 1;

    if proxy_enabled {
        let proxy_host = proxies_map.find(host_key).and_then(|host| host.downcast::<CFString>()).map(|host| host.to_string());
        let proxy_port = proxies_map.find(port_key).and_then(|port| port.downcast::<CFNumber>()).and_then(|port| port.to_i32());

        return match (proxy_host, proxy_port) {
            (Some(proxy_host), Some(proxy_port)) => Some(format!("{scheme}={proxy_host}:{proxy_port}")),
            (Some(proxy_host), None) => Some(format!("{scheme}={proxy_host}")),
            _ => None,
        };
    }

    None
}

#[cfg(target_os = "macos")]
fn get_from_platform_impl() -> std::result::Result<Option<String>, Box<dyn StdError>> {
    let store = SCDynamicStoreBuilder::new("hyperpool").build();

    let Some(proxies_map) = store.get_proxies() else {
        return Ok(None);
    };

    let http_proxy_config = parse_setting_from_dynamic_store(
        &proxies_map,
        unsafe { kSCPropNetProxiesHTTPEnable },
        unsafe { kSCPropNetProxiesHTTPProxy },
        unsafe { kSCPropNetProxiesHTTPPort },
        "http",
    );
    let https_proxy_config = parse_setting_from_dynamic_store(
        &proxies_map,
        unsafe { kSCPropNetProxiesHTTPSEnable },
        unsafe { kSCPropNetProxiesHTTPSProxy },
        unsafe { kSCPropNetProxiesHTTPSPort },
        "https",
    );

    match http_proxy_config.as_ref().zip(https_proxy_config.as_ref()) {
        Some((http_config, https_config)) => Ok(Some(format!("{http_config};{https_config}"))),
        None => Ok(http_proxy_config.or(https_proxy_config)),
    }
}

#[cfg(any(target_os = "windows", target_os = "macos"))]
fn get_from_platform() -> Option<String> {
    get_from_platform_impl().ok().flatten()
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn get_from_platform() -> Option<String> {
    None
}

#[cfg(any(target_os = "windows", target_os = "macos"))]
fn parse_platform_values_impl(platform_values: String) -> SystemProxyMap {
    let mut proxies = HashMap::new();
    if platform_values.contains('=') {
        for p in platform_values.split(';') {
            let protocol_parts: Vec<&str> = p.split('=').collect();
            match protocol_parts.as_slice() {
                [protocol, address] => {
                    let address = if extract_type_prefix(address).is_some() {
                        String::from(*address)
                    } else {
                        format!("http://{address}")
                    };
                    insert_proxy(&mut proxies, *protocol, address);
                }
                _ => {
                    proxies.clear();
                    break;
                }
            }
        }
    } else if let Some(scheme) = extract_type_prefix(&platform_values) {
        insert_proxy(&mut proxies, scheme, platform_values.to_owned());
    } else {
        insert_proxy(&mut proxies, "http", format!("http://{platform_values}"));
        insert_proxy(&mut proxies, "https", format!("http://{platform_values}"));
    }
    proxies
}

/// Extracts the protocol from the given address, if present. E.g.
/// `"https://example.com"` yields `Some("https")`.
#[cfg(any(target_os = "windows", target_os = "macos"))]
fn extract_type_prefix(address: &str) -> Option<&str> {
    let indice = address.find("://")?;
    if indice == 0 {
        return None;
    }
    let prefix = &address[..indice];
    let contains_banned = prefix.contains(|c| c == ':' || c == '/');
    (!contains_banned).then_some(prefix)
}

#[cfg(any(target_os = "windows", target_os = "macos"))]
fn parse_platform_values(platform_values: String) -> SystemProxyMap {
    parse_platform_values_impl(platform_values)
}

/// The routing decision the [`ProxyRouter`] makes for a single request, spec
/// §4.9.
pub enum Routing {
    /// Connect directly to the origin.
    Direct,
    /// Connect to `proxy_host:proxy_port`, then CONNECT-tunnel to the
    /// origin. `proxy_auth` is sent only on the `CONNECT` request itself.
    Tunnel {
        proxy_host: String,
        proxy_port: u16,
        proxy_auth: Option<HeaderValue>,
    },
    /// Send the request directly to `proxy_host:proxy_port` using an
    /// absolute-form request-target; `proxy_auth` is attached to every
    /// forwarded request.
    Forward {
        proxy_host: String,
        proxy_port: u16,
        proxy_auth: Option<HeaderValue>,
    },
    /// Connect to the origin via a SOCKS proxy.
    #[cfg(feature = "socks")]
    Socks {
        version: SocksVersion,
        proxy_host: String,
        proxy_port: u16,
        auth: Option<(String, String)>,
    },
}

/// Decides, per request, how a connection should reach its origin: direct,
/// forward-proxied, CONNECT-tunneled, or via SOCKS, spec §4.9. Also decides
/// whether `Authorization`/`Proxy-Authorization` survive a redirect.
#[derive(Clone, Default)]
pub struct ProxyRouter {
    proxy: Option<Proxy>,
    /// Escape hatch matching spec §4.1's `tunnel_non_http_for_proxy`: when
    /// set, HTTPS requests are forwarded through an HTTP proxy rather than
    /// CONNECT-tunneled.
    tunnel_non_http_for_proxy: bool,
}

impl ProxyRouter {
    /// No proxy is configured; every request connects directly.
    pub fn direct() -> ProxyRouter {
        ProxyRouter {
            proxy: None,
            tunnel_non_http_for_proxy: false,
        }
    }

    pub fn new(proxy: Proxy) -> ProxyRouter {
        ProxyRouter {
            proxy: Some(proxy),
            tunnel_non_http_for_proxy: false,
        }
    }

    pub fn with_tunnel_non_http_for_proxy(mut self, value: bool) -> Self {
        self.tunnel_non_http_for_proxy = value;
        self
    }

    /// Decides the routing for `url`.
    pub fn route(&self, url: &Url) -> Result<Routing> {
        let Some(proxy) = &self.proxy else {
            return Ok(Routing::Direct);
        };
        let Some(scheme) = proxy.intercept(url) else {
            return Ok(Routing::Direct);
        };

        match scheme {
            ProxyScheme::Http { auth, host } | ProxyScheme::Https { auth, host } => {
                let proxy_host = host.host().to_string();
                let proxy_port = host.port_u16().unwrap_or(80);
                // `Some(url)` only stands in for "a proxy is configured" here
                // -- `connection_requires_http_tunnel` only inspects whether
                // its first argument is present, per spec §4.1.
                if connection_requires_http_tunnel(Some(url), self.tunnel_non_http_for_proxy, url.scheme()) {
                    Ok(Routing::Tunnel {
                        proxy_host,
                        proxy_port,
                        proxy_auth: auth,
                    })
                } else {
                    Ok(Routing::Forward {
                        proxy_host,
                        proxy_port,
                        proxy_auth: auth,
                    })
                }
            }
            #[cfg(feature = "socks")]
            ProxyScheme::Socks { version, host, port, auth } => Ok(Routing::Socks {
                version,
                proxy_host: host,
                proxy_port: port,
                auth,
            }),
        }
    }

    /// Whether `Authorization`/`Proxy-Authorization` headers should survive
    /// a redirect from `from` to `to`, per spec §4.9/§4.11: only when the
    /// origin (scheme, host, port) is unchanged.
    pub fn auth_survives_redirect(from: &Url, to: &Url) -> bool {
        from.is_same_origin(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_proxy_matches_exact_domain_and_subdomains() {
        let np = NoProxy::from_string("example.com").unwrap();
        assert!(np.contains("example.com"));
        assert!(np.contains("sub.example.com"));
        assert!(!np.contains("notexample.com"));
    }

    #[test]
    fn no_proxy_matches_cidr() {
        let np = NoProxy::from_string("192.168.1.0/24").unwrap();
        assert!(np.contains("192.168.1.42"));
        assert!(!np.contains("10.0.0.1"));
    }

    #[test]
    fn direct_router_routes_everything_direct() {
        let router = ProxyRouter::direct();
        let url = Url::parse("https://example.com/").unwrap();
        assert!(matches!(router.route(&url).unwrap(), Routing::Direct));
    }

    #[test]
    fn http_proxy_forwards_http_requests() {
        let proxy = Proxy::http("http://proxy.local:8080").unwrap();
        let router = ProxyRouter::new(proxy);
        let url = Url::parse("http://example.com/").unwrap();
        match router.route(&url).unwrap() {
            Routing::Forward { proxy_host, proxy_port, .. } => {
                assert_eq!(proxy_host, "proxy.local");
                assert_eq!(proxy_port, 8080);
            }
            _ => panic!("expected Forward"),
        }
    }

    #[test]
    fn http_proxy_tunnels_https_requests() {
        let proxy = Proxy::all("http://proxy.local:8080").unwrap();
        let router = ProxyRouter::new(proxy);
        let url = Url::parse("https://example.com/").unwrap();
        assert!(matches!(router.route(&url).unwrap(), Routing::Tunnel { .. }));
    }

    #[test]
    fn auth_does_not_survive_cross_origin_redirect() {
        let a = Url::parse("https://a.example.com/").unwrap();
        let b = Url::parse("https://b.example.com/").unwrap();
        assert!(!ProxyRouter::auth_survives_redirect(&a, &b));
        assert!(ProxyRouter::auth_survives_redirect(&a, &a));
    }
}
