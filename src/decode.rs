//! Content-encoding decompression pipeline.
//!
//! Generalizes the donor's `client/decoder.rs` `Accepts` struct (feature-
//! gated gzip/brotli/zstd/deflate toggles used to synthesize `Accept-
//! Encoding`) into a pluggable synchronous decoder registry. `zstd` is
//! dropped: the spec names only `identity, gzip, deflate, br`. Because this
//! crate is synchronous rather than async, the codecs are the synchronous
//! `flate2` (gzip + deflate) and `brotli` crates rather than the donor's
//! `async-compression` wrapper.

use std::io::Write;

use crate::error::{Error, Result};

/// Which content-codings this client is willing to accept, used both to
/// synthesize the `Accept-Encoding` request header and to select a decoder
/// for the response's `Content-Encoding`.
#[derive(Debug, Clone, Copy)]
pub struct Accepts {
    pub gzip: bool,
    pub deflate: bool,
    pub brotli: bool,
}

impl Default for Accepts {
    fn default() -> Accepts {
        Accepts {
            gzip: cfg!(feature = "gzip"),
            deflate: cfg!(feature = "deflate"),
            brotli: cfg!(feature = "brotli"),
        }
    }
}

impl Accepts {
    /// No codecs accepted; the engine will request and accept `identity` only.
    pub fn none() -> Accepts {
        Accepts {
            gzip: false,
            deflate: false,
            brotli: false,
        }
    }

    /// Synthesizes the `Accept-Encoding` header value from the enabled
    /// codecs, or `None` if none are enabled (caller omits the header).
    pub fn to_header_value(self) -> Option<&'static str> {
        match (self.gzip, self.deflate, self.brotli) {
            (true, true, true) => Some("gzip, deflate, br"),
            (true, true, false) => Some("gzip, deflate"),
            (true, false, true) => Some("gzip, br"),
            (true, false, false) => Some("gzip"),
            (false, true, true) => Some("deflate, br"),
            (false, true, false) => Some("deflate"),
            (false, false, true) => Some("br"),
            (false, false, false) => None,
        }
    }
}

/// An incremental decompressor: bytes are pushed in and decoded bytes come
/// out, with `flush` draining any buffered output once the input is known
/// complete. Implementations that can't support true incremental streaming
/// (e.g. whole-buffer decoders) may buffer all input until `flush`.
pub trait Decoder: Send {
    /// Decompresses the next chunk of wire bytes.
    fn decompress(&mut self, input: &[u8]) -> Result<Vec<u8>>;

    /// Flushes any remaining buffered output after the input stream ends.
    fn flush(&mut self) -> Result<Vec<u8>>;
}

/// Pass-through decoder for `identity` (or an unrecognized coding, per
/// HTTP's liberal-in-what-you-accept convention -- an unrecognized
/// `Content-Encoding` is surfaced to the caller undecoded rather than as an
/// error, since the spec scopes `DecodeError` to "errors during
/// decompression", not to unsupported codings).
#[derive(Default)]
pub struct IdentityDecoder;

impl Decoder for IdentityDecoder {
    fn decompress(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn flush(&mut self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

#[cfg(feature = "gzip")]
pub struct GzipDecoder {
    inner: flate2::write::GzDecoder<Vec<u8>>,
}

#[cfg(feature = "gzip")]
impl Default for GzipDecoder {
    fn default() -> Self {
        GzipDecoder {
            inner: flate2::write::GzDecoder::new(Vec::new()),
        }
    }
}

#[cfg(feature = "gzip")]
impl Decoder for GzipDecoder {
    fn decompress(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        self.inner.write_all(input).map_err(Error::decode)?;
        self.inner.flush().map_err(Error::decode)?;
        Ok(std::mem::take(self.inner.get_mut()))
    }

    fn flush(&mut self) -> Result<Vec<u8>> {
        Ok(std::mem::take(self.inner.get_mut()))
    }
}

/// `deflate` with automatic fallback to raw-deflate (`-MAX_WBITS`, i.e. no
/// zlib header) on the first write failure, per spec §4.5: some legacy
/// servers mislabel raw DEFLATE streams as `deflate`.
#[cfg(feature = "deflate")]
pub struct DeflateDecoder {
    inner: DeflateInner,
    tried_raw_fallback: bool,
}

#[cfg(feature = "deflate")]
enum DeflateInner {
    Zlib(flate2::write::ZlibDecoder<Vec<u8>>),
    Raw(flate2::write::DeflateDecoder<Vec<u8>>),
}

#[cfg(feature = "deflate")]
impl Default for DeflateDecoder {
    fn default() -> Self {
        DeflateDecoder {
            inner: DeflateInner::Zlib(flate2::write::ZlibDecoder::new(Vec::new())),
            tried_raw_fallback: false,
        }
    }
}

#[cfg(feature = "deflate")]
impl Decoder for DeflateDecoder {
    fn decompress(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        match &mut self.inner {
            DeflateInner::Zlib(z) => match z.write_all(input).and_then(|_| z.flush()) {
                Ok(()) => Ok(std::mem::take(z.get_mut())),
                Err(_) if !self.tried_raw_fallback => {
                    self.tried_raw_fallback = true;
                    let mut raw = flate2::write::DeflateDecoder::new(Vec::new());
                    raw.write_all(input).map_err(Error::decode)?;
                    raw.flush().map_err(Error::decode)?;
                    let out = std::mem::take(raw.get_mut());
                    self.inner = DeflateInner::Raw(raw);
                    Ok(out)
                }
                Err(e) => Err(Error::decode(e)),
            },
            DeflateInner::Raw(r) => {
                r.write_all(input).map_err(Error::decode)?;
                r.flush().map_err(Error::decode)?;
                Ok(std::mem::take(r.get_mut()))
            }
        }
    }

    fn flush(&mut self) -> Result<Vec<u8>> {
        match &mut self.inner {
            DeflateInner::Zlib(z) => Ok(std::mem::take(z.get_mut())),
            DeflateInner::Raw(r) => Ok(std::mem::take(r.get_mut())),
        }
    }
}

#[cfg(feature = "brotli")]
pub struct BrotliDecoder {
    buffered_input: Vec<u8>,
}

#[cfg(feature = "brotli")]
impl Default for BrotliDecoder {
    fn default() -> Self {
        BrotliDecoder {
            buffered_input: Vec::new(),
        }
    }
}

#[cfg(feature = "brotli")]
impl Decoder for BrotliDecoder {
    fn decompress(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        // The `brotli` crate's streaming `Decompressor` wants a `Read`; the
        // simplest correct sans-I/O adaptation is to buffer the compressed
        // stream and decode once flushed, which is also what the donor's
        // own dev-dependency round-trip tests do for brotli fixtures.
        self.buffered_input.extend_from_slice(input);
        Ok(Vec::new())
    }

    fn flush(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut reader = brotli::Decompressor::new(&self.buffered_input[..], 4096);
        std::io::copy(&mut reader, &mut out).map_err(Error::decode)?;
        Ok(out)
    }
}

/// Constructs the decoder for a `Content-Encoding` token, falling back to
/// [`IdentityDecoder`] for `identity` or any coding not compiled in.
pub fn decoder_for(coding: &str) -> Box<dyn Decoder> {
    match coding.trim().to_ascii_lowercase().as_str() {
        #[cfg(feature = "gzip")]
        "gzip" | "x-gzip" => Box::new(GzipDecoder::default()),
        #[cfg(feature = "deflate")]
        "deflate" => Box::new(DeflateDecoder::default()),
        #[cfg(feature = "brotli")]
        "br" => Box::new(BrotliDecoder::default()),
        _ => Box::new(IdentityDecoder),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_header_lists_enabled_codecs_in_order() {
        let accepts = Accepts {
            gzip: true,
            deflate: true,
            brotli: true,
        };
        assert_eq!(accepts.to_header_value(), Some("gzip, deflate, br"));
    }

    #[test]
    fn none_accepts_has_no_header_value() {
        assert_eq!(Accepts::none().to_header_value(), None);
    }

    #[test]
    fn identity_decoder_is_pass_through() {
        let mut d = IdentityDecoder;
        assert_eq!(d.decompress(b"hello").unwrap(), b"hello");
        assert_eq!(d.flush().unwrap(), Vec::<u8>::new());
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn gzip_round_trip() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"hello, world").unwrap();
        let compressed = enc.finish().unwrap();

        let mut dec = GzipDecoder::default();
        let mut out = dec.decompress(&compressed).unwrap();
        out.extend(dec.flush().unwrap());
        assert_eq!(out, b"hello, world");
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn deflate_round_trip() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;

        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"deflate me").unwrap();
        let compressed = enc.finish().unwrap();

        let mut dec = DeflateDecoder::default();
        let mut out = dec.decompress(&compressed).unwrap();
        out.extend(dec.flush().unwrap());
        assert_eq!(out, b"deflate me");
    }

    #[cfg(feature = "brotli")]
    #[test]
    fn brotli_round_trip() {
        let mut compressed = Vec::new();
        {
            let mut writer = brotli::CompressorWriter::new(&mut compressed, 4096, 5, 20);
            writer.write_all(b"brotli payload").unwrap();
        }
        let mut dec = BrotliDecoder::default();
        dec.decompress(&compressed).unwrap();
        let out = dec.flush().unwrap();
        assert_eq!(out, b"brotli payload");
    }

    #[test]
    fn decoder_for_unknown_coding_is_identity() {
        let mut d = decoder_for("zstd");
        assert_eq!(d.decompress(b"raw").unwrap(), b"raw");
    }
}
