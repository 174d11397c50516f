//! Redirect following, spec §4.11.
//!
//! Generalized from the donor's `redirect.rs` (`Policy`, `Attempt`, `Action`,
//! `History`, `remove_sensitive_headers`, `make_referer`): the donor's
//! `tower`-`Service`-shaped `FollowRedirectPolicy` layer is flattened here
//! into a plain synchronous function called directly by the request engine,
//! since nothing in this crate is async and there is no middleware stack to
//! thread a policy object through.

use http::{HeaderValue, Method, StatusCode};

use crate::body::Body;
use crate::error::{Error, Result};
use crate::header::HeaderDict;
use crate::proxy::ProxyRouter;
use crate::retry::{RetryCause, RetryPolicy};
use crate::urlmodel::Url;

const AUTHORIZATION: &str = "authorization";
const PROXY_AUTHORIZATION: &str = "proxy-authorization";
const COOKIE: &str = "cookie";
const CONTENT_TYPE: &str = "content-type";
const CONTENT_LENGTH: &str = "content-length";
const REFERER: &str = "referer";
const WWW_AUTHENTICATE: &str = "www-authenticate";

/// What the redirector decided to do with a 3xx response, spec §4.11's
/// per-hop decision.
pub enum Outcome {
    /// No redirect needed (not a 3xx, or no `Location` header): the
    /// response the caller already has is final.
    Final,
    /// Follow the redirect with the given rewritten method/URL/body/headers,
    /// and the retry policy updated to reflect one more redirect spent.
    Follow {
        method: Method,
        url: Url,
        body: Option<Body>,
        headers: HeaderDict,
        policy: RetryPolicy,
    },
}

/// Stateless redirect-following logic: given the request that was just sent
/// and the 3xx response it got back, decides whether/how to follow.
///
/// `https_only` enforces the "never downgrade to a plaintext hop" rule some
/// callers opt into; `referer` controls whether a `Referer` header is
/// synthesized for the next hop.
#[derive(Debug, Clone)]
pub struct Redirector {
    https_only: bool,
    referer: bool,
}

impl Default for Redirector {
    fn default() -> Self {
        Redirector {
            https_only: false,
            referer: false,
        }
    }
}

impl Redirector {
    pub fn new() -> Self {
        Redirector::default()
    }

    pub fn with_https_only(mut self, https_only: bool) -> Self {
        self.https_only = https_only;
        self
    }

    pub fn with_referer(mut self, referer: bool) -> Self {
        self.referer = referer;
        self
    }

    /// Inspects `status`/`response_headers` for a redirect; if one applies,
    /// resolves the (possibly relative) `Location` against `current_url`,
    /// rewrites `method`/`body` per the status code's semantics, strips
    /// cross-origin auth headers, and spends one unit of the policy's
    /// `redirect` counter.
    ///
    /// Fails with [`Error::unrewindable_body`] if a 307/308 redirect would
    /// need to replay a non-rewindable streaming body, and with
    /// [`Error::is_max_retry`] if the policy's `redirect` (or `total`)
    /// counter is already exhausted.
    #[allow(clippy::too_many_arguments)]
    pub fn next(
        &self,
        status: StatusCode,
        response_headers: &HeaderDict,
        current_method: &Method,
        current_url: &Url,
        current_body: Option<&Body>,
        current_headers: &HeaderDict,
        policy: &RetryPolicy,
    ) -> Result<Outcome> {
        if !status.is_redirection() {
            return Ok(Outcome::Final);
        }
        let Some(location) = response_headers.get("location") else {
            return Ok(Outcome::Final);
        };

        let next_url = current_url
            .join(&location)
            .map_err(|e| Error::location_value(e.to_string()).with_url(current_url.as_ext().clone()))?;

        if self.https_only && next_url.scheme() != "https" {
            return Err(Error::redirect(format!(
                "redirect to non-https URL {next_url} rejected by https_only policy"
            )));
        }

        let next_policy = policy.increment(current_method, current_url, RetryCause::Redirect)?;

        let (next_method, drop_body) = rewrite_method(status, current_method);

        let next_body = if drop_body {
            None
        } else {
            match current_body {
                None => None,
                Some(body) => {
                    if body.is_rewindable() {
                        body.try_clone()
                    } else {
                        return Err(Error::unrewindable_body().with_url(current_url.as_ext().clone()));
                    }
                }
            }
        };

        let mut next_headers = current_headers.clone();
        if drop_body {
            next_headers.remove(CONTENT_TYPE);
            next_headers.remove(CONTENT_LENGTH);
        }

        if !ProxyRouter::auth_survives_redirect(current_url, &next_url) {
            next_headers.remove(AUTHORIZATION);
            next_headers.remove(PROXY_AUTHORIZATION);
            next_headers.remove(COOKIE);
            next_headers.remove(WWW_AUTHENTICATE);
        }

        if self.referer {
            if let Some(value) = make_referer(&next_url, current_url) {
                let _ = next_headers.set(REFERER, value.to_str().unwrap_or_default());
            }
        } else {
            next_headers.remove(REFERER);
        }

        Ok(Outcome::Follow {
            method: next_method,
            url: next_url,
            body: next_body,
            headers: next_headers,
            policy: next_policy,
        })
    }
}

/// Method/body rewriting rules for 3xx codes, per spec §4.11: 301/302/303 on
/// POST downgrade to GET and drop the body; everything else (notably
/// 307/308) preserves method and body unchanged.
fn rewrite_method(status: StatusCode, method: &Method) -> (Method, bool) {
    match status {
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER
            if method == Method::POST =>
        {
            (Method::GET, true)
        }
        _ => (method.clone(), false),
    }
}

fn make_referer(next: &Url, previous: &Url) -> Option<HeaderValue> {
    if next.scheme() == "http" && previous.scheme() == "https" {
        return None;
    }
    let mut referer = previous.clone();
    // Referer must never carry userinfo or fragment; urlmodel's authority()
    // intentionally includes userinfo, so build the header from parts.
    let text = format!("{}://{}{}", referer.scheme(), referer.host_header_value(), referer.request_uri());
    let _ = &mut referer;
    HeaderValue::from_str(&text).ok()
}
