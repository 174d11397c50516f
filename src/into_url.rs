//! A sealed `IntoUrl` trait letting request-building entry points accept a
//! `&str`, `String`, or an already-parsed [`Url`] interchangeably.
//!
//! Generalizes the donor's `into_url.rs` (which wraps a raw `url::Url`) onto
//! this crate's [`crate::urlmodel::Url`] wrapper.

use std::borrow::Cow;

use crate::urlmodel::Url;

/// A trait to try to convert some type into a [`Url`].
///
/// This trait is "sealed", so it can only be implemented by types within
/// this crate.
pub trait IntoUrl: IntoUrlSealed {}

impl IntoUrl for Url {}
impl IntoUrl for &Url {}
impl IntoUrl for &str {}
impl IntoUrl for &String {}
impl IntoUrl for String {}
impl IntoUrl for Cow<'_, str> {}

pub trait IntoUrlSealed {
    fn into_url(self) -> crate::error::Result<Url>;

    /// A string form suitable for re-parsing (e.g. the "maybe missing a
    /// scheme, retry with `http://` prepended" fallback in `proxy.rs`).
    fn as_url_str(&self) -> String;
}

impl IntoUrlSealed for Url {
    fn into_url(self) -> crate::error::Result<Url> {
        if self.host_str().is_some() {
            Ok(self)
        } else {
            Err(crate::error::Error::builder(format!(
                "URL scheme is not allowed: {self}"
            )))
        }
    }

    fn as_url_str(&self) -> String {
        self.to_string()
    }
}

impl IntoUrlSealed for &Url {
    fn into_url(self) -> crate::error::Result<Url> {
        self.clone().into_url()
    }

    fn as_url_str(&self) -> String {
        self.to_string()
    }
}

impl IntoUrlSealed for &str {
    fn into_url(self) -> crate::error::Result<Url> {
        Url::parse(self).map_err(crate::error::Error::builder)?.into_url()
    }

    fn as_url_str(&self) -> String {
        self.to_string()
    }
}

impl IntoUrlSealed for &String {
    fn into_url(self) -> crate::error::Result<Url> {
        (&**self).into_url()
    }

    fn as_url_str(&self) -> String {
        self.to_string()
    }
}

impl IntoUrlSealed for String {
    fn into_url(self) -> crate::error::Result<Url> {
        (&*self).into_url()
    }

    fn as_url_str(&self) -> String {
        self.clone()
    }
}

impl IntoUrlSealed for Cow<'_, str> {
    fn into_url(self) -> crate::error::Result<Url> {
        (&*self).into_url()
    }

    fn as_url_str(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_string_parses() {
        let url = "http://example.com/a".into_url().unwrap();
        assert_eq!(url.host_str(), Some("example.com"));
    }

    #[test]
    fn invalid_hostname_is_rejected() {
        assert!("https://{{hostname}}/".into_url().is_err());
    }

    #[test]
    fn relative_url_without_base_is_rejected() {
        assert!("/just/a/path".into_url().is_err());
    }
}
