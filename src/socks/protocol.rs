//! SOCKS5 wire format (RFC 1928), CONNECT with no authentication.
//!
//! ## Method selection (client → server)
//! ```text
//! | VER (1) | NMETHODS (1) | METHODS (NMETHODS) |
//! ```
//!
//! ## Request (client → server)
//! ```text
//! | VER (1) | CMD (1) | RSV (1) | ATYP (1) | DST.ADDR (var) | DST.PORT (2) |
//! ```
//! - ATYP: 0x01 = IPv4, 0x03 = domain (length-prefixed), 0x04 = IPv6
//! - DST.PORT: big-endian
//!
//! ## Reply (server → client)
//! ```text
//! | VER (1) | REP (1) | RSV (1) | ATYP (1) | BND.ADDR (var) | BND.PORT (2) |
//! ```

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::{SocksError, SocksResult};

/// Protocol version byte.
pub const SOCKS5_VERSION: u8 = 0x05;
/// "No authentication required" method.
pub const AUTH_METHOD_NONE: u8 = 0x00;
/// "No acceptable methods" answer.
pub const AUTH_METHOD_UNACCEPTABLE: u8 = 0xFF;
/// CONNECT command.
pub const CMD_CONNECT: u8 = 0x01;
/// IPv4 address type.
pub const ATYP_IPV4: u8 = 0x01;
/// Domain name address type.
pub const ATYP_DOMAIN: u8 = 0x03;
/// IPv6 address type.
pub const ATYP_IPV6: u8 = 0x04;

/// Reply codes sent to the client.
///
/// Only the codes this proxy can produce; a failed dial on the far side
/// arrives as a plain message and is reported as `HostUnreachable`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    /// Request granted.
    Succeeded = 0x00,
    /// General server failure.
    GeneralFailure = 0x01,
    /// Host unreachable.
    HostUnreachable = 0x04,
    /// Command not supported.
    CommandNotSupported = 0x07,
    /// Address type not supported.
    AddressTypeNotSupported = 0x08,
}

/// Destination requested by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Host name or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&host_port(&self.host, self.port))
    }
}

/// Format `host:port`, bracketing IPv6 literals.
pub fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Encode a reply with the given bound address (all zeros if `None`).
pub fn encode_reply(code: ReplyCode, bound: Option<SocketAddr>) -> Vec<u8> {
    let bound = bound.unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0));

    let mut buf = Vec::with_capacity(22);
    buf.extend_from_slice(&[SOCKS5_VERSION, code as u8, 0x00]);
    match bound.ip() {
        IpAddr::V4(ip) => {
            buf.push(ATYP_IPV4);
            buf.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            buf.push(ATYP_IPV6);
            buf.extend_from_slice(&ip.octets());
        }
    }
    buf.extend_from_slice(&bound.port().to_be_bytes());
    buf
}

/// Send a reply to the client.
pub async fn send_reply<S>(stream: &mut S, code: ReplyCode, bound: Option<SocketAddr>) -> SocksResult<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&encode_reply(code, bound)).await?;
    stream.flush().await?;
    Ok(())
}

/// Run the server side of the handshake up to (not including) the reply.
///
/// Protocol violations that have a defined reply (unsupported command or
/// address type) are answered before the error is returned.
pub async fn read_request<S>(stream: &mut S) -> SocksResult<Destination>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Method selection
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    if header[0] != SOCKS5_VERSION {
        return Err(SocksError::UnsupportedVersion(header[0]));
    }

    let mut methods = vec![0u8; header[1] as usize];
    stream.read_exact(&mut methods).await?;
    if !methods.contains(&AUTH_METHOD_NONE) {
        stream
            .write_all(&[SOCKS5_VERSION, AUTH_METHOD_UNACCEPTABLE])
            .await?;
        return Err(SocksError::NoAcceptableAuth);
    }
    stream.write_all(&[SOCKS5_VERSION, AUTH_METHOD_NONE]).await?;

    // Request
    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    let [version, command, _reserved, atyp] = request;
    if version != SOCKS5_VERSION {
        return Err(SocksError::UnsupportedVersion(version));
    }
    if command != CMD_CONNECT {
        send_reply(stream, ReplyCode::CommandNotSupported, None).await?;
        return Err(SocksError::UnsupportedCommand(command));
    }

    let host = match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            Ipv4Addr::from(octets).to_string()
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            Ipv6Addr::from(octets).to_string()
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).await?;
            match String::from_utf8(name) {
                Ok(name) if !name.is_empty() => name,
                _ => {
                    send_reply(stream, ReplyCode::GeneralFailure, None).await?;
                    return Err(SocksError::InvalidDomain);
                }
            }
        }
        other => {
            send_reply(stream, ReplyCode::AddressTypeNotSupported, None).await?;
            return Err(SocksError::UnsupportedAddressType(other));
        }
    };

    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;

    Ok(Destination {
        host,
        port: u16::from_be_bytes(port),
    })
}
