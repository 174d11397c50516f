//! Declarative retry policy, spec §4.10.
//!
//! Authored from scratch against `original_source/urllib3/util/retry.py`'s
//! `Retry` object: an immutable value with independent per-category counters
//! (`total`, `connect`, `read`, `redirect`, `status`, `other`), exponential
//! backoff, and `Retry-After` parsing. The donor's own `retry.rs` implements
//! an unrelated async, tower-style request-budget policy (`Policy` with a
//! `classify_fn`/host `scope`) built for a completely different retry model
//! and is not generalizable here; this module replaces it outright.

use std::time::Duration;

use http::{HeaderMap, HeaderValue, Method, StatusCode};

use crate::error::{Error, Result};
use crate::urlmodel::Url;

/// Why a retry is being attempted, used to pick which counter to decrement
/// and to build the attached `MaxRetryError` reason, spec §4.10's table.
#[derive(Debug, Clone)]
pub enum RetryCause {
    /// `ConnectTimeout` / connection refused.
    Connect(String),
    /// `ReadTimeout` / mid-body `ProtocolError`.
    Read(String),
    /// 3xx with `Location`.
    Redirect,
    /// Status in `status_forcelist`.
    Status(StatusCode),
    /// Any other retriable outcome.
    Other(String),
}

/// One step of retry history, spec §3's `RetryState.history`.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub method: Method,
    pub url: Url,
    pub cause: String,
}

/// Immutable retry policy/state, spec §3's `RetryState` + §4.10's
/// `RetryPolicy`. Every [`RetryPolicy::increment`] call returns a new,
/// independent value; the original is left untouched.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    total: Option<u32>,
    connect: Option<u32>,
    read: Option<u32>,
    redirect: Option<u32>,
    status: Option<u32>,
    other: Option<u32>,
    backoff_factor: f64,
    backoff_max: Duration,
    respect_retry_after: bool,
    status_forcelist: Vec<StatusCode>,
    allowed_methods: Vec<Method>,
    history: Vec<Attempt>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            total: Some(3),
            connect: Some(3),
            read: Some(3),
            redirect: Some(5),
            status: Some(3),
            other: Some(3),
            backoff_factor: 0.0,
            backoff_max: Duration::from_secs(120),
            respect_retry_after: true,
            status_forcelist: Vec::new(),
            allowed_methods: vec![
                Method::GET,
                Method::HEAD,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
                Method::TRACE,
            ],
            history: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries: every counter is zero.
    pub fn never() -> Self {
        RetryPolicy {
            total: Some(0),
            connect: Some(0),
            read: Some(0),
            redirect: Some(0),
            status: Some(0),
            other: Some(0),
            ..RetryPolicy::default()
        }
    }

    /// A policy with explicit `total`/`connect` budgets, all other counters
    /// left at their default, for the common "I just want N attempts" case.
    pub fn new(total: u32) -> Self {
        RetryPolicy {
            total: Some(total),
            connect: Some(total),
            read: Some(total),
            redirect: Some(total.max(5)),
            status: Some(total),
            other: Some(total),
            ..RetryPolicy::default()
        }
    }

    pub fn with_connect(mut self, n: u32) -> Self {
        self.connect = Some(n);
        self
    }

    pub fn with_read(mut self, n: u32) -> Self {
        self.read = Some(n);
        self
    }

    pub fn with_redirect(mut self, n: u32) -> Self {
        self.redirect = Some(n);
        self
    }

    pub fn with_status(mut self, n: u32) -> Self {
        self.status = Some(n);
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_backoff_max(mut self, max: Duration) -> Self {
        self.backoff_max = max;
        self
    }

    pub fn with_respect_retry_after(mut self, respect: bool) -> Self {
        self.respect_retry_after = respect;
        self
    }

    pub fn with_status_forcelist(mut self, codes: Vec<StatusCode>) -> Self {
        self.status_forcelist = codes;
        self
    }

    pub fn with_allowed_methods(mut self, methods: Vec<Method>) -> Self {
        self.allowed_methods = methods;
        self
    }

    pub fn is_retriable_status(&self, status: StatusCode) -> bool {
        self.status_forcelist.contains(&status)
    }

    pub fn is_method_retriable(&self, method: &Method) -> bool {
        self.allowed_methods.contains(method)
    }

    pub fn history(&self) -> &[Attempt] {
        &self.history
    }

    /// Number of retries already performed (`history.len()`), the `n` in
    /// spec §4.10's backoff formula.
    pub fn retries_done(&self) -> u32 {
        self.history.len() as u32
    }

    /// Computes `min(backoff_max, backoff_factor * 2^(n-1))` where `n` is
    /// the number of retries already performed, per spec §4.10. Zero before
    /// the first retry.
    pub fn computed_backoff(&self) -> Duration {
        let n = self.retries_done();
        if n == 0 || self.backoff_factor <= 0.0 {
            return Duration::ZERO;
        }
        let seconds = self.backoff_factor * 2f64.powi(n as i32 - 1);
        Duration::from_secs_f64(seconds.max(0.0)).min(self.backoff_max)
    }

    /// Resolves the sleep duration for the *next* retry, honoring a
    /// `Retry-After` response header (parsed as integer seconds or an
    /// HTTP-date) when `respect_retry_after` is set: `max(parsed, computed)`.
    pub fn backoff_for(&self, response_headers: Option<&HeaderMap<HeaderValue>>) -> Duration {
        let computed = self.computed_backoff();
        if !self.respect_retry_after {
            return computed;
        }
        let Some(headers) = response_headers else {
            return computed;
        };
        let Some(value) = headers.get(http::header::RETRY_AFTER) else {
            return computed;
        };
        match parse_retry_after(value) {
            Some(parsed) => parsed.max(computed),
            None => computed,
        }
    }

    /// Applies one retry, decrementing `total` plus the counter `cause`
    /// maps to (spec §4.10's table), and appending an entry to `history`.
    /// Returns [`Error::max_retry`] (carrying the full history) once any
    /// relevant counter, or `total`, would go below zero.
    pub fn increment(&self, method: &Method, url: &Url, cause: RetryCause) -> Result<RetryPolicy> {
        if let RetryCause::Read(_) = &cause {
            if !self.is_method_retriable(method) {
                return Err(self.max_retry_error(method, url, &cause));
            }
        }

        let mut next = self.clone();
        next.history.push(Attempt {
            method: method.clone(),
            url: url.clone(),
            cause: describe(&cause),
        });

        next.total = decrement_checked(self.total)?;

        match &cause {
            RetryCause::Connect(_) => next.connect = decrement_checked(self.connect)?,
            RetryCause::Read(_) => next.read = decrement_checked(self.read)?,
            RetryCause::Redirect => next.redirect = decrement_checked(self.redirect)?,
            RetryCause::Status(_) => next.status = decrement_checked(self.status)?,
            RetryCause::Other(_) => next.other = decrement_checked(self.other)?,
        }

        Ok(next)
    }

    fn max_retry_error(&self, method: &Method, url: &Url, cause: &RetryCause) -> Error {
        let _ = method;
        Error::max_retry(format!(
            "max retries exceeded for {url} after {} attempt(s); last cause: {}",
            self.history.len(),
            describe(cause)
        ))
    }
}

fn decrement_checked(counter: Option<u32>) -> Result<Option<u32>> {
    match counter {
        None => Ok(None),
        Some(0) => Err(Error::max_retry("retry counter exhausted")),
        Some(n) => Ok(Some(n - 1)),
    }
}

fn describe(cause: &RetryCause) -> String {
    match cause {
        RetryCause::Connect(msg) => format!("connect error: {msg}"),
        RetryCause::Read(msg) => format!("read error: {msg}"),
        RetryCause::Redirect => "redirect".to_string(),
        RetryCause::Status(code) => format!("status {code}"),
        RetryCause::Other(msg) => msg.clone(),
    }
}

/// Parses a `Retry-After` header value as either an integer number of
/// seconds or an HTTP-date (spec §4.10), returning the remaining duration
/// until that date for the latter.
fn parse_retry_after(value: &HeaderValue) -> Option<Duration> {
    let text = value.to_str().ok()?;
    if let Ok(secs) = text.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when: httpdate::HttpDate = text.parse().ok()?;
    let when: std::time::SystemTime = when.into();
    when.duration_since(std::time::SystemTime::now()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("http://example.com/").unwrap()
    }

    #[test]
    fn increment_decrements_total_and_category_independently() {
        let policy = RetryPolicy::default();
        let next = policy.increment(&Method::GET, &url(), RetryCause::Connect("refused".into())).unwrap();
        assert_eq!(next.total, Some(2));
        assert_eq!(next.connect, Some(2));
        assert_eq!(next.read, Some(3));
    }

    #[test]
    fn exhausting_connect_counter_raises_max_retry_even_with_total_left() {
        let policy = RetryPolicy::default().with_connect(0);
        let err = policy.increment(&Method::GET, &url(), RetryCause::Connect("refused".into())).unwrap_err();
        assert!(err.is_max_retry());
    }

    #[test]
    fn read_retry_on_non_idempotent_method_is_rejected() {
        let policy = RetryPolicy::default();
        let err = policy.increment(&Method::POST, &url(), RetryCause::Read("reset".into())).unwrap_err();
        assert!(err.is_max_retry());
    }

    #[test]
    fn total_reaching_zero_raises_max_retry() {
        let mut policy = RetryPolicy::new(2);
        for _ in 0..2 {
            policy = policy.increment(&Method::GET, &url(), RetryCause::Connect("refused".into())).unwrap();
        }
        let err = policy.increment(&Method::GET, &url(), RetryCause::Connect("refused".into())).unwrap_err();
        assert!(err.is_max_retry());
    }

    #[test]
    fn retry_policy_idempotence_matches_spec_property() {
        // increment(m, u, e) applied N times in succession yields MaxRetryError
        // on the (N+1)-th call iff total == N.
        let n = 4;
        let mut policy = RetryPolicy::new(n);
        for _ in 0..n {
            policy = policy.increment(&Method::GET, &url(), RetryCause::Other("boom".into())).unwrap();
        }
        assert!(policy.increment(&Method::GET, &url(), RetryCause::Other("boom".into())).is_err());
    }

    #[test]
    fn backoff_grows_exponentially_until_capped() {
        let policy = RetryPolicy::default().with_backoff_factor(1.0).with_backoff_max(Duration::from_secs(8));
        let mut p = policy.clone();
        assert_eq!(p.computed_backoff(), Duration::ZERO);
        p = p.increment(&Method::GET, &url(), RetryCause::Other("x".into())).unwrap();
        assert_eq!(p.computed_backoff(), Duration::from_secs(1));
        p = p.increment(&Method::GET, &url(), RetryCause::Other("x".into())).unwrap();
        assert_eq!(p.computed_backoff(), Duration::from_secs(2));
        for _ in 0..10 {
            p = p.increment(&Method::GET, &url(), RetryCause::Other("x".into())).unwrap_or(p.clone());
        }
        assert_eq!(p.computed_backoff(), Duration::from_secs(8));
    }

    #[test]
    fn retry_after_integer_seconds_wins_over_smaller_computed_backoff() {
        let policy = RetryPolicy::default().with_backoff_factor(0.0);
        let mut headers = HeaderMap::new();
        headers.insert(http::header::RETRY_AFTER, HeaderValue::from_static("5"));
        assert_eq!(policy.backoff_for(Some(&headers)), Duration::from_secs(5));
    }
}
