//! SOCKS4/4a/5/5h proxy wire protocol, spec §6.3.
//!
//! Authored from scratch for this crate: the donor's SOCKS support
//! (`proxy.rs`'s `ProxyScheme::Socks5`) delegates the actual handshake to
//! `tokio-socks`, an async dependency this crate does not carry. Reimplemented
//! here as a direct blocking read/write over `std::net::TcpStream`, following
//! the byte layouts RFC 1928 (SOCKS5) and the SOCKS4/4a draft specify.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpStream};

use crate::dns::Resolve;
use crate::error::{Error, Result};
use crate::proxy::SocksVersion;

/// Performs the SOCKS handshake over `tcp` (already connected to the proxy),
/// establishing a relay to `target_host:target_port`. On success `tcp` is
/// ready for the target's own protocol (plaintext HTTP, or a TLS handshake)
/// to begin.
pub fn establish(
    tcp: &mut TcpStream,
    version: SocksVersion,
    resolver: &dyn Resolve,
    target_host: &str,
    target_port: u16,
    auth: Option<&(String, String)>,
) -> Result<()> {
    match version {
        SocksVersion::V4 => handshake_v4(tcp, resolver, target_host, target_port, false),
        SocksVersion::V4a => handshake_v4(tcp, resolver, target_host, target_port, true),
        SocksVersion::V5 => handshake_v5(tcp, resolver, target_host, target_port, false, auth),
        SocksVersion::V5h => handshake_v5(tcp, resolver, target_host, target_port, true, auth),
    }
}

fn resolve_ipv4(resolver: &dyn Resolve, host: &str, port: u16) -> Result<Ipv4Addr> {
    let addrs = resolver.resolve(host, port)?;
    addrs
        .into_iter()
        .find_map(|a| match a.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            std::net::IpAddr::V6(_) => None,
        })
        .ok_or_else(|| Error::proxy(format!("SOCKS4 requires an IPv4 address, none found for {host}")))
}

fn handshake_v4(tcp: &mut TcpStream, resolver: &dyn Resolve, target_host: &str, target_port: u16, remote_dns: bool) -> Result<()> {
    let mut req = Vec::with_capacity(16);
    req.push(0x04); // VER
    req.push(0x01); // CMD = CONNECT
    req.extend_from_slice(&target_port.to_be_bytes());

    if remote_dns {
        // SOCKS4a: DSTIP is the invalid-but-reserved 0.0.0.1, hostname follows USERID.
        req.extend_from_slice(&[0, 0, 0, 1]);
        req.push(0); // empty USERID
        req.extend_from_slice(target_host.as_bytes());
        req.push(0);
    } else {
        let addr = resolve_ipv4(resolver, target_host, target_port)?;
        req.extend_from_slice(&addr.octets());
        req.push(0); // empty USERID
    }

    tcp.write_all(&req).map_err(Error::io)?;

    let mut reply = [0u8; 8];
    tcp.read_exact(&mut reply).map_err(Error::io)?;
    if reply[0] != 0x00 {
        return Err(Error::proxy(format!("malformed SOCKS4 reply (VN={})", reply[0])));
    }
    if reply[1] != 0x5a {
        return Err(Error::proxy(format!("SOCKS4 proxy refused connection (CD=0x{:02x})", reply[1])));
    }
    Ok(())
}

fn handshake_v5(
    tcp: &mut TcpStream,
    resolver: &dyn Resolve,
    target_host: &str,
    target_port: u16,
    remote_dns: bool,
    auth: Option<&(String, String)>,
) -> Result<()> {
    let offer_auth = auth.is_some();
    let methods: &[u8] = if offer_auth { &[0x00, 0x02] } else { &[0x00] };
    let mut greeting = vec![0x05, methods.len() as u8];
    greeting.extend_from_slice(methods);
    tcp.write_all(&greeting).map_err(Error::io)?;

    let mut chosen = [0u8; 2];
    tcp.read_exact(&mut chosen).map_err(Error::io)?;
    if chosen[0] != 0x05 {
        return Err(Error::proxy("SOCKS5 proxy replied with an unexpected version"));
    }
    match chosen[1] {
        0x00 => {}
        0x02 => negotiate_userpass(tcp, auth)?,
        0xff => return Err(Error::proxy("SOCKS5 proxy rejected all authentication methods")),
        other => return Err(Error::proxy(format!("SOCKS5 proxy selected unsupported method 0x{other:02x}"))),
    }

    let mut request = vec![0x05, 0x01, 0x00]; // VER, CMD=CONNECT, RSV
    if remote_dns {
        request.push(0x03); // ATYP = domain name
        request.push(target_host.len() as u8);
        request.extend_from_slice(target_host.as_bytes());
    } else {
        let addr = resolve_ipv4(resolver, target_host, target_port)?;
        request.push(0x01); // ATYP = IPv4
        request.extend_from_slice(&addr.octets());
    }
    request.extend_from_slice(&target_port.to_be_bytes());
    tcp.write_all(&request).map_err(Error::io)?;

    let mut head = [0u8; 4];
    tcp.read_exact(&mut head).map_err(Error::io)?;
    if head[0] != 0x05 {
        return Err(Error::proxy("SOCKS5 proxy replied with an unexpected version"));
    }
    if head[1] != 0x00 {
        return Err(Error::proxy(format!("SOCKS5 proxy refused connection (REP=0x{:02x})", head[1])));
    }
    let bound_addr_len = match head[3] {
        0x01 => 4,
        0x03 => {
            let mut len = [0u8; 1];
            tcp.read_exact(&mut len).map_err(Error::io)?;
            len[0] as usize
        }
        0x04 => 16,
        other => return Err(Error::proxy(format!("SOCKS5 proxy replied with unknown ATYP 0x{other:02x}"))),
    };
    let mut rest = vec![0u8; bound_addr_len + 2];
    tcp.read_exact(&mut rest).map_err(Error::io)?;
    Ok(())
}

fn negotiate_userpass(tcp: &mut TcpStream, auth: Option<&(String, String)>) -> Result<()> {
    let (user, pass) = auth.ok_or_else(|| Error::proxy("SOCKS5 proxy requires username/password authentication"))?;
    let mut req = vec![0x01, user.len() as u8];
    req.extend_from_slice(user.as_bytes());
    req.push(pass.len() as u8);
    req.extend_from_slice(pass.as_bytes());
    tcp.write_all(&req).map_err(Error::io)?;

    let mut reply = [0u8; 2];
    tcp.read_exact(&mut reply).map_err(Error::io)?;
    if reply[1] != 0x00 {
        return Err(Error::proxy("SOCKS5 proxy rejected username/password credentials"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::GaiResolver;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn socks4_success_reply_is_accepted() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 32];
            let n = sock.read(&mut buf).unwrap();
            assert_eq!(buf[0], 0x04);
            assert_eq!(buf[1], 0x01);
            let _ = n;
            sock.write_all(&[0x00, 0x5a, 0, 0, 0, 0, 0, 0]).unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let result = handshake_v4(&mut client, &GaiResolver, "127.0.0.1", 80, false);
        server.join().unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn socks4_rejection_reply_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 32];
            let _ = sock.read(&mut buf).unwrap();
            sock.write_all(&[0x00, 0x5b, 0, 0, 0, 0, 0, 0]).unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let result = handshake_v4(&mut client, &GaiResolver, "127.0.0.1", 80, false);
        server.join().unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn socks4a_sends_hostname_with_dummy_dstip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 64];
            let n = sock.read(&mut buf).unwrap();
            assert_eq!(&buf[4..8], &[0, 0, 0, 1]);
            assert!(String::from_utf8_lossy(&buf[..n]).contains("example.com"));
            sock.write_all(&[0x00, 0x5a, 0, 0, 0, 0, 0, 0]).unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let result = handshake_v4(&mut client, &GaiResolver, "example.com", 443, true);
        server.join().unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn socks5_no_auth_handshake_succeeds() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut greeting = [0u8; 2];
            sock.read_exact(&mut greeting).unwrap();
            assert_eq!(greeting, [0x05, 0x01]);
            sock.write_all(&[0x05, 0x00]).unwrap();

            let mut req_head = [0u8; 4];
            sock.read_exact(&mut req_head).unwrap();
            assert_eq!(req_head[3], 0x03); // ATYP domain
            let mut len = [0u8; 1];
            sock.read_exact(&mut len).unwrap();
            let mut host = vec![0u8; len[0] as usize];
            sock.read_exact(&mut host).unwrap();
            let mut port = [0u8; 2];
            sock.read_exact(&mut port).unwrap();
            assert_eq!(host, b"example.com");

            sock.write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let result = handshake_v5(&mut client, &GaiResolver, "example.com", 443, true, None);
        server.join().unwrap();
        assert!(result.is_ok());
    }
}
