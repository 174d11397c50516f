//! TLS configuration and connector, backed by `rustls`.
//!
//! The spec treats the TLS library as an external collaborator consumed
//! through a narrow interface (`TlsConfig` in, a wrapped socket with
//! `send`/`recv`/`getpeercert`/`unwrap` out, §6.1). This module is that
//! consumed interface's concrete binding: `rustls` is chosen from the
//! donor's `rustls-tls` feature family (`rustls`, `rustls-pemfile`,
//! `rustls-native-certs`, `webpki-roots`) used directly rather than through
//! the async `tokio-rustls` wrapper, since the transport here is
//! synchronous `std::net::TcpStream`. `boring`/`native-tls` are dropped
//! (see DESIGN.md).

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerName, StreamOwned};

use crate::error::{Error, Result};

/// Certificate verification mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Full chain + hostname verification (the default).
    Required,
    /// No verification at all -- dangerous, exists for explicit opt-out only.
    None,
}

/// Digest algorithm for certificate fingerprint pinning, selected by the
/// pinned digest's byte length per spec §4.6 (MD5=16, SHA-1=20, SHA-256=32).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl FingerprintAlgorithm {
    pub fn from_digest_len(len: usize) -> Option<Self> {
        match len {
            16 => Some(FingerprintAlgorithm::Md5),
            20 => Some(FingerprintAlgorithm::Sha1),
            32 => Some(FingerprintAlgorithm::Sha256),
            _ => None,
        }
    }
}

/// Configuration for a single TLS handshake, the spec §6.1 `TlsConfig`
/// consumed-interface payload.
#[derive(Clone)]
pub struct TlsConfig {
    pub verify_mode: VerifyMode,
    pub assert_hostname: Option<String>,
    pub assert_fingerprint: Option<Vec<u8>>,
    pub ca_certs_pem: Option<Vec<u8>>,
    pub alpn_protocols: Vec<Vec<u8>>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        TlsConfig {
            verify_mode: VerifyMode::Required,
            assert_hostname: None,
            assert_fingerprint: None,
            ca_certs_pem: None,
            alpn_protocols: vec![b"http/1.1".to_vec()],
        }
    }
}

/// A TLS-wrapped `TcpStream`, plus the verification outcome the `Connection`
/// layer records as `is_verified` (spec §3/§4.6).
pub struct TlsStream {
    inner: StreamOwned<ClientConnection, TcpStream>,
    pub is_verified: bool,
}

impl TlsStream {
    /// Performs a TLS handshake over `tcp` with Server Name Indication set
    /// to `sni_hostname` (the *target* host, even behind a CONNECT tunnel,
    /// per spec §4.6/§8 scenario 6 -- never the proxy's hostname).
    pub fn connect(tcp: TcpStream, sni_hostname: &str, config: &TlsConfig) -> Result<TlsStream> {
        let client_config = build_client_config(config)?;
        let server_name = ServerName::try_from(sni_hostname)
            .map_err(|_| Error::tls(format!("invalid SNI hostname: {sni_hostname}")))?;
        let conn = ClientConnection::new(Arc::new(client_config), server_name).map_err(Error::tls)?;
        let mut stream = StreamOwned::new(conn, tcp);

        // Force the handshake to complete: StreamOwned performs it lazily
        // on first read/write, so flush an empty write to drive it now and
        // surface handshake errors immediately rather than on first use.
        stream.flush().map_err(Error::tls)?;

        let is_verified = match config.verify_mode {
            VerifyMode::Required => verify_fingerprint_if_configured(&stream, config)?,
            VerifyMode::None => false,
        };

        Ok(TlsStream {
            inner: stream,
            is_verified,
        })
    }

    /// The peer's leaf certificate, DER-encoded, if the handshake completed.
    pub fn peer_certificate_der(&self) -> Option<&[u8]> {
        self.inner
            .conn
            .peer_certificates()
            .and_then(|certs| certs.first())
            .map(|c| c.0.as_slice())
    }

    /// Borrows the underlying TCP socket, for readiness polling via `mio`
    /// (the `Poll`/`mio::net::TcpStream` readiness machinery operates below
    /// the TLS record layer).
    pub fn tcp_ref(&self) -> &TcpStream {
        self.inner.get_ref()
    }
}

impl Read for TlsStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for TlsStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn build_client_config(config: &TlsConfig) -> Result<ClientConfig> {
    let mut roots = RootCertStore::empty();

    if let Some(pem) = &config.ca_certs_pem {
        let mut reader = std::io::BufReader::new(&pem[..]);
        for cert in rustls_pemfile::certs(&mut reader).map_err(Error::tls)? {
            roots.add(&rustls::Certificate(cert)).map_err(Error::tls)?;
        }
    } else {
        roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));
        if let Ok(native) = rustls_native_certs::load_native_certs() {
            for cert in native {
                let _ = roots.add(&rustls::Certificate(cert.0));
            }
        }
    }

    let mut client_config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    if !config.alpn_protocols.is_empty() {
        client_config.alpn_protocols = config.alpn_protocols.clone();
    }

    Ok(client_config)
}

fn verify_fingerprint_if_configured(stream: &StreamOwned<ClientConnection, TcpStream>, config: &TlsConfig) -> Result<bool> {
    let Some(expected) = &config.assert_fingerprint else {
        // rustls already performed full chain+hostname verification during
        // the handshake (it would have errored otherwise); `is_verified` is
        // set because the hostname was checked, per spec §4.6.
        return Ok(true);
    };
    let algo = FingerprintAlgorithm::from_digest_len(expected.len())
        .ok_or_else(|| Error::tls("assert_fingerprint has an unrecognized digest length"))?;
    let leaf = stream
        .conn
        .peer_certificates()
        .and_then(|c| c.first())
        .ok_or_else(|| Error::tls("no peer certificate presented"))?;
    let actual = digest(algo, &leaf.0);
    if &actual != expected {
        return Err(Error::tls("certificate fingerprint mismatch"));
    }
    Ok(true)
}

fn digest(algo: FingerprintAlgorithm, der: &[u8]) -> Vec<u8> {
    use sha1::Digest as _;
    match algo {
        FingerprintAlgorithm::Md5 => md5::Md5::digest(der).to_vec(),
        FingerprintAlgorithm::Sha1 => sha1::Sha1::digest(der).to_vec(),
        FingerprintAlgorithm::Sha256 => sha2::Sha256::digest(der).to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_algorithm_selected_by_digest_length() {
        assert_eq!(FingerprintAlgorithm::from_digest_len(16), Some(FingerprintAlgorithm::Md5));
        assert_eq!(FingerprintAlgorithm::from_digest_len(20), Some(FingerprintAlgorithm::Sha1));
        assert_eq!(FingerprintAlgorithm::from_digest_len(32), Some(FingerprintAlgorithm::Sha256));
        assert_eq!(FingerprintAlgorithm::from_digest_len(7), None);
    }

    #[test]
    fn default_config_requires_verification_and_offers_http11_alpn() {
        let config = TlsConfig::default();
        assert_eq!(config.verify_mode, VerifyMode::Required);
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }
}
