//! `HeaderDict`: a case-insensitive ordered multi-map that preserves the
//! original case of header names, built atop [`http::HeaderMap`] for
//! wire-validity (CTL/space rejection in names, visible-ASCII validation
//! in values) with an original-case side table, mirroring the donor's
//! `OrigHeaderMap` (`core/ext/header/original.rs`).

pub use http::header::{HeaderName, HeaderValue, InvalidHeaderName, InvalidHeaderValue};
use http::HeaderMap as WireHeaderMap;

use crate::error::{Error, Result};

/// A single original-case header name, remembered alongside the canonical
/// lowercase [`HeaderName`] used for lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OrigName(Box<str>);

impl OrigName {
    fn as_str(&self) -> &str {
        &self.0
    }
}

/// Case-insensitive ordered multi-map of header name/value pairs.
///
/// Lookups are case-insensitive (delegated to [`HeaderName`], which already
/// lowercases); iteration and [`HeaderDict::raw_items`] yield the
/// *original* case of each name in insertion order. Comma-joining in
/// [`HeaderDict::get`] must never be used for `Set-Cookie`; use
/// [`HeaderDict::get_all`] for that header.
#[derive(Debug, Clone, Default)]
pub struct HeaderDict {
    wire: WireHeaderMap<HeaderValue>,
    // Parallel ordered record of (canonical name, original-case spelling),
    // one entry per value, in insertion order. `http::HeaderMap`'s own
    // iteration order already tracks insertion order per-name, but not the
    // original spelling, hence this side table.
    order: Vec<(HeaderName, OrigName)>,
}

impl HeaderDict {
    /// An empty `HeaderDict`.
    pub fn new() -> Self {
        HeaderDict::default()
    }

    /// Replaces all values for `name` with a single `value`.
    pub fn set(&mut self, name: &str, value: impl AsRef<str>) -> Result<()> {
        let hname = HeaderName::try_from(name).map_err(Error::invalid_header)?;
        let hvalue = HeaderValue::try_from(value.as_ref()).map_err(Error::invalid_header)?;
        self.wire.remove(&hname);
        self.order.retain(|(n, _)| n != &hname);
        self.wire.insert(hname.clone(), hvalue);
        self.order.push((hname, OrigName(name.into())));
        Ok(())
    }

    /// Appends `value` under `name`, keeping any existing values.
    pub fn add(&mut self, name: &str, value: impl AsRef<str>) -> Result<()> {
        let hname = HeaderName::try_from(name).map_err(Error::invalid_header)?;
        let hvalue = HeaderValue::try_from(value.as_ref()).map_err(Error::invalid_header)?;
        self.wire.append(hname.clone(), hvalue);
        self.order.push((hname, OrigName(name.into())));
        Ok(())
    }

    /// The comma-joined value for `name`, or `None` if absent. MUST NOT be
    /// used for `Set-Cookie`; use [`HeaderDict::get_all`] instead.
    pub fn get(&self, name: &str) -> Option<String> {
        let values = self.get_all(name);
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    /// All values for `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<String> {
        match HeaderName::try_from(name) {
            Ok(hname) => self
                .wire
                .get_all(&hname)
                .iter()
                .filter_map(|v| v.to_str().ok().map(str::to_string))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Removes every value for `name`, returning whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        match HeaderName::try_from(name) {
            Ok(hname) => {
                let existed = self.wire.remove(&hname).is_some();
                self.order.retain(|(n, _)| n != &hname);
                existed
            }
            Err(_) => false,
        }
    }

    /// Whether any value is present for `name`.
    pub fn contains(&self, name: &str) -> bool {
        HeaderName::try_from(name)
            .map(|hname| self.wire.contains_key(&hname))
            .unwrap_or(false)
    }

    /// The number of distinct header names.
    pub fn keys_len(&self) -> usize {
        self.wire.keys_len()
    }

    /// Whether the dict holds no values at all.
    pub fn is_empty(&self) -> bool {
        self.wire.is_empty()
    }

    /// Iterates `(original_case_name, value)` pairs in insertion order.
    ///
    /// `order` holds one entry per value in global insertion order, while
    /// `wire` groups values per name; a plain zip of the two would mispair
    /// them as soon as a name has more than one value. Instead, walk `order`
    /// and track how many of each name's values have already been yielded,
    /// using that as the index into that name's group in `wire`.
    pub fn raw_items(&self) -> impl Iterator<Item = (&str, &str)> {
        let mut seen: std::collections::HashMap<&HeaderName, usize> = std::collections::HashMap::new();
        self.order.iter().map(move |(name, orig)| {
            let idx = seen.entry(name).or_insert(0);
            let value = self
                .wire
                .get_all(name)
                .iter()
                .nth(*idx)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            *idx += 1;
            (orig.as_str(), value)
        })
    }

    /// A reference to the underlying validated [`http::HeaderMap`], for
    /// collaborators (the framing layer) that only need wire-correct
    /// name/value pairs, not original case.
    pub fn as_wire_map(&self) -> &WireHeaderMap<HeaderValue> {
        &self.wire
    }

    /// Builds a `HeaderDict` from an iterable of `(name, value)` string pairs.
    pub fn from_pairs<I, N, V>(pairs: I) -> Result<HeaderDict>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: AsRef<str>,
    {
        let mut dict = HeaderDict::new();
        for (name, value) in pairs {
            dict.add(name.as_ref(), value)?;
        }
        Ok(dict)
    }
}

impl PartialEq for HeaderDict {
    /// Equality by lowercased-name multiset equality, per spec §4.2: two
    /// dicts are equal iff every name maps to the same multiset of values,
    /// irrespective of insertion order or original case.
    fn eq(&self, other: &Self) -> bool {
        if self.wire.keys_len() != other.wire.keys_len() {
            return false;
        }
        for name in self.wire.keys() {
            let mut a = self.get_all(name.as_str());
            let mut b = other.get_all(name.as_str());
            a.sort_unstable();
            b.sort_unstable();
            if a != b {
                return false;
            }
        }
        true
    }
}

impl Eq for HeaderDict {}

/// Sorts `headers` so names in `headers_order` come first (in that order),
/// with any remaining headers appended afterward in their original order.
/// Generalizes the donor's `util::sort_headers`.
pub(crate) fn sort_headers(headers: &mut HeaderDict, headers_order: &[&str]) {
    if headers.keys_len() <= 1 {
        return;
    }
    let mut sorted = HeaderDict::new();
    for name in headers_order {
        for value in headers.get_all(name) {
            let _ = sorted.add(name, value);
        }
        headers.remove(name);
    }
    let remaining: Vec<(String, String)> = headers
        .raw_items()
        .map(|(n, v)| (n.to_string(), v.to_string()))
        .collect();
    for (name, value) in remaining {
        let _ = sorted.add(&name, value);
    }
    *headers = sorted;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_all_is_case_insensitive_and_order_preserving() {
        let mut h = HeaderDict::new();
        h.add("Set-Cookie", "a=1").unwrap();
        h.add("set-cookie", "b=2").unwrap();
        assert_eq!(h.get_all("SET-COOKIE"), vec!["a=1", "b=2"]);
    }

    #[test]
    fn get_joins_with_comma() {
        let mut h = HeaderDict::new();
        h.add("X-Thing", "one").unwrap();
        h.add("X-Thing", "two").unwrap();
        assert_eq!(h.get("x-thing"), Some("one, two".to_string()));
    }

    #[test]
    fn set_replaces_all_prior_values() {
        let mut h = HeaderDict::new();
        h.add("X-Thing", "one").unwrap();
        h.add("X-Thing", "two").unwrap();
        h.set("X-Thing", "three").unwrap();
        assert_eq!(h.get_all("x-thing"), vec!["three"]);
    }

    #[test]
    fn equality_ignores_case_and_order() {
        let mut a = HeaderDict::new();
        a.add("Accept", "text/html").unwrap();
        a.add("X-Foo", "1").unwrap();

        let mut b = HeaderDict::new();
        b.add("x-foo", "1").unwrap();
        b.add("ACCEPT", "text/html").unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn raw_items_preserve_original_case() {
        let mut h = HeaderDict::new();
        h.add("X-Custom-Header", "v").unwrap();
        let items: Vec<_> = h.raw_items().collect();
        assert_eq!(items, vec![("X-Custom-Header", "v")]);
    }

    #[test]
    fn raw_items_pairs_repeated_names_correctly_when_interleaved() {
        let mut h = HeaderDict::new();
        h.add("X-A", "1").unwrap();
        h.add("X-B", "2").unwrap();
        h.add("X-A", "3").unwrap();
        let items: Vec<_> = h.raw_items().collect();
        assert_eq!(items, vec![("X-A", "1"), ("X-B", "2"), ("X-A", "3")]);
    }

    #[test]
    fn rejects_invalid_header_name() {
        let mut h = HeaderDict::new();
        assert!(h.set("bad header", "v").is_err());
    }

    #[test]
    fn sort_headers_moves_named_headers_to_front() {
        let mut h = HeaderDict::new();
        h.add("X-Custom", "1").unwrap();
        h.add("Host", "example.com").unwrap();
        h.add("Accept", "*/*").unwrap();
        sort_headers(&mut h, &["host", "accept"]);
        let names: Vec<&str> = h.raw_items().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Host", "Accept", "X-Custom"]);
    }
}
