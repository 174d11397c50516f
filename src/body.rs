//! Request bodies.
//!
//! Generalizes the donor's `client/body.rs` (an async `http_body::Body`
//! wrapping either a reusable `Bytes` buffer or a boxed stream) into a
//! synchronous equivalent: either a reusable in-memory buffer (always
//! rewindable, so redirects per spec §4.11 can always replay it) or a
//! boxed [`Read`] of unknown length (not rewindable -- a 307/308 redirect
//! that needs to replay it fails with [`crate::error::Kind::UnrewindableBody`]).

use std::fmt;
use std::io::Read;

use bytes::Bytes;

/// A request body: either a reusable in-memory buffer, or a one-shot
/// streaming reader.
pub struct Body {
    inner: Inner,
}

enum Inner {
    Reusable(Bytes),
    Streaming {
        reader: Option<Box<dyn Read + Send>>,
        len: Option<u64>,
    },
}

impl Body {
    /// An empty body.
    pub fn empty() -> Body {
        Body {
            inner: Inner::Reusable(Bytes::new()),
        }
    }

    /// A body backed by an in-memory buffer. Always rewindable.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Body {
        Body {
            inner: Inner::Reusable(bytes.into()),
        }
    }

    /// A body backed by an arbitrary reader of `len` bytes (if known). Not
    /// rewindable: replaying it after a redirect or retry fails with
    /// [`crate::error::Error::unrewindable_body`].
    pub fn from_reader<R: Read + Send + 'static>(reader: R, len: Option<u64>) -> Body {
        Body {
            inner: Inner::Streaming {
                reader: Some(Box::new(reader)),
                len,
            },
        }
    }

    /// The body's length, if known without consuming it.
    pub fn content_length(&self) -> Option<u64> {
        match &self.inner {
            Inner::Reusable(b) => Some(b.len() as u64),
            Inner::Streaming { len, .. } => *len,
        }
    }

    /// Whether this body can be replayed (seeked back to its start) for a
    /// redirect or retry, per spec §4.11's `UnrewindableBodyError` rule.
    pub fn is_rewindable(&self) -> bool {
        matches!(self.inner, Inner::Reusable(_))
    }

    /// The buffered bytes, if this is a reusable body.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.inner {
            Inner::Reusable(b) => Some(b.as_ref()),
            Inner::Streaming { .. } => None,
        }
    }

    /// A fresh [`Read`] positioned at the start of the body, consuming
    /// `self`. Streaming bodies can only be read once.
    pub fn into_reader(self) -> Box<dyn Read + Send> {
        match self.inner {
            Inner::Reusable(b) => Box::new(std::io::Cursor::new(b)),
            Inner::Streaming { reader, .. } => reader.unwrap_or_else(|| Box::new(std::io::empty())),
        }
    }

    /// A reader for this send attempt, without consuming `self`: a reusable
    /// body hands back a fresh cursor over its buffer every time (so a retry
    /// or redirect replay can call this again), while a streaming body hands
    /// over its reader once and returns an empty reader on any further call.
    pub(crate) fn take_reader(&mut self) -> Box<dyn Read + Send> {
        match &mut self.inner {
            Inner::Reusable(b) => Box::new(std::io::Cursor::new(b.clone())),
            Inner::Streaming { reader, .. } => reader.take().unwrap_or_else(|| Box::new(std::io::empty())),
        }
    }

    /// A cheap clone for replay, only possible for reusable bodies. Callers
    /// that need to replay a streaming body must check [`Body::is_rewindable`]
    /// first.
    pub fn try_clone(&self) -> Option<Body> {
        match &self.inner {
            Inner::Reusable(b) => Some(Body {
                inner: Inner::Reusable(b.clone()),
            }),
            Inner::Streaming { .. } => None,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Reusable(b) => f.debug_struct("Body").field("bytes", &b.len()).finish(),
            Inner::Streaming { len, .. } => f.debug_struct("Body").field("streaming_len", len).finish(),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Body {
        Body::from_bytes(v)
    }
}

impl From<String> for Body {
    fn from(s: String) -> Body {
        Body::from_bytes(s.into_bytes())
    }
}

impl From<&'static [u8]> for Body {
    fn from(s: &'static [u8]) -> Body {
        Body::from_bytes(s)
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Body {
        Body::from_bytes(s.as_bytes())
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Body {
        Body::from_bytes(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reusable_body_is_rewindable_and_clonable() {
        let body = Body::from_bytes(Bytes::from_static(b"hello"));
        assert!(body.is_rewindable());
        assert_eq!(body.content_length(), Some(5));
        let clone = body.try_clone().unwrap();
        assert_eq!(clone.as_bytes(), Some(&b"hello"[..]));
    }

    #[test]
    fn streaming_body_is_not_rewindable() {
        let body = Body::from_reader(std::io::Cursor::new(b"stream".to_vec()), Some(6));
        assert!(!body.is_rewindable());
        assert!(body.try_clone().is_none());
    }
}
