//! Small stateless helpers shared across modules: Basic-auth header encoding
//! and a fast non-cryptographic RNG for jitter/ids. Generalizes the donor's
//! `util.rs`, trimmed of the `HeaderMap`-merging helpers that belonged to
//! the donor's own `header` module (this crate's ordered multimap lives in
//! [`crate::header`] instead and owns its own `sort_headers`).

use http::HeaderValue;

/// Builds an `Authorization: Basic ...` (or `Proxy-Authorization`) header
/// value from a username and optional password, base64-encoding `user:pass`
/// directly into the header's byte buffer.
pub fn basic_auth<U, P>(username: U, password: Option<P>) -> HeaderValue
where
    U: std::fmt::Display,
    P: std::fmt::Display,
{
    use base64::prelude::BASE64_STANDARD;
    use base64::write::EncoderWriter;
    use std::io::Write;

    let mut buf = b"Basic ".to_vec();
    {
        let mut encoder = EncoderWriter::new(&mut buf, &BASE64_STANDARD);
        let _ = write!(encoder, "{}:", username);
        if let Some(password) = password {
            let _ = write!(encoder, "{}", password);
        }
    }
    let mut header = HeaderValue::from_bytes(&buf).expect("base64 is always valid HeaderValue");
    header.set_sensitive(true);
    header
}

/// A fast, non-cryptographic xor-shift RNG, used for things like retry
/// jitter where `rand`'s thread-local generator would be overkill.
pub(crate) fn fast_random() -> u64 {
    use std::cell::Cell;
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    use std::num::Wrapping;

    thread_local! {
        static RNG: Cell<Wrapping<u64>> = Cell::new(Wrapping(seed()));
    }

    fn seed() -> u64 {
        let seed = RandomState::new();

        let mut out = 0;
        let mut cnt = 0;
        while out == 0 {
            cnt += 1;
            let mut hasher = seed.build_hasher();
            hasher.write_usize(cnt);
            out = hasher.finish();
        }
        out
    }

    RNG.with(|rng| {
        let mut n = rng.get();
        debug_assert_ne!(n.0, 0);
        n ^= n >> 12;
        n ^= n << 25;
        n ^= n >> 27;
        rng.set(n);
        n.0.wrapping_mul(0x2545_f491_4f6c_dd1d)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_encodes_user_and_password() {
        let header = basic_auth("Aladdin", Some("open sesame"));
        assert_eq!(header, "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
    }

    #[test]
    fn basic_auth_without_password_still_includes_colon() {
        let header = basic_auth("Aladdin", None::<&str>);
        assert_eq!(header, "Basic QWxhZGRpbjo=");
    }

    #[test]
    fn fast_random_is_nonzero_and_varies() {
        let a = fast_random();
        let b = fast_random();
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert_ne!(a, b);
    }
}
