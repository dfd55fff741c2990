use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use tokio::io::AsyncRead;

use crate::error::{Result, Stage, TunnelError};
use crate::socks5::handshake::read_exact;
use crate::socks5::protocol::AddressType;

/// Endpoint is a destination or proxy-reported network address: a host
/// that may be an IPv4 literal, IPv6 literal, or domain name, plus a TCP
/// port. Immutable once constructed; classification into one of the
/// three wire forms happens at encode time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

/// Endpoint implementation block
impl Endpoint {
    /// new is a constructor for the Endpoint type
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // IPv6 literals need brackets to keep the port separator unambiguous
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = String;

    /// Parses `host:port`, accepting `[v6-literal]:port` brackets
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (host, port) = match s.strip_prefix('[') {
            Some(rest) => {
                let (host, rest) = rest
                    .split_once(']')
                    .ok_or_else(|| format!("unclosed bracket in address: {s}"))?;
                let port = rest
                    .strip_prefix(':')
                    .ok_or_else(|| format!("missing port in address: {s}"))?;
                (host, port)
            }
            None => s
                .rsplit_once(':')
                .ok_or_else(|| format!("expected host:port, got: {s}"))?,
        };

        let port = port
            .parse::<u16>()
            .map_err(|_| format!("invalid port in address: {s}"))?;

        Ok(Endpoint::new(host, port))
    }
}

/// encode_address appends the wire form of a destination address to buf:
/// type byte, address bytes, then the port in network order.
///
/// Classification tries an IPv4 literal first, then IPv6, then falls back
/// to a domain name in its ASCII-compatible (IDNA) encoding. The domain
/// form carries a single length byte, so encodings past 255 bytes are
/// rejected before anything is written.
pub fn encode_address(endpoint: &Endpoint, buf: &mut Vec<u8>) -> Result<()> {
    if let Ok(addr) = endpoint.host().parse::<Ipv4Addr>() {
        buf.push(AddressType::IPv4 as u8);
        buf.extend_from_slice(&addr.octets());
    } else if let Ok(addr) = endpoint.host().parse::<Ipv6Addr>() {
        buf.push(AddressType::IPv6 as u8);
        buf.extend_from_slice(&addr.octets());
    } else {
        let domain = idna::domain_to_ascii(endpoint.host())
            .map_err(|_| TunnelError::InvalidDomain(endpoint.host().to_string()))?;

        if domain.len() > u8::MAX as usize {
            return Err(TunnelError::EncodingConstraint {
                field: "domain name",
                len: domain.len(),
                max: u8::MAX as usize,
            });
        }

        buf.push(AddressType::DomainName as u8);
        buf.push(domain.len() as u8);
        buf.extend_from_slice(domain.as_bytes());
    }

    buf.extend_from_slice(&endpoint.port().to_be_bytes());
    Ok(())
}

/// read_address decodes the bound address the proxy appends to its
/// connect reply: IPv4, IPv6, or domain name, followed by the port
pub async fn read_address<S>(stream: &mut S) -> Result<Endpoint>
where
    S: AsyncRead + Unpin,
{
    // Read address type byte from stream
    let mut atype = [0u8; 1];
    read_exact(stream, &mut atype, Stage::AddressDecode).await?;

    // Match type and extract address or domain name
    let host = match AddressType::from_byte(atype[0]) {
        Some(AddressType::IPv4) => {
            let mut addr = [0u8; 4];
            read_exact(stream, &mut addr, Stage::AddressDecode).await?;
            Ipv4Addr::from(addr).to_string()
        }
        Some(AddressType::DomainName) => {
            // First octet in DomainName contains the number of
            // octets to follow
            let mut len = [0u8; 1];
            read_exact(stream, &mut len, Stage::AddressDecode).await?;

            let mut domain = vec![0u8; len[0] as usize];
            read_exact(stream, &mut domain, Stage::AddressDecode).await?;
            String::from_utf8(domain).map_err(|_| TunnelError::ProtocolViolation {
                stage: Stage::AddressDecode,
                detail: "bound domain name is not valid UTF-8".into(),
            })?
        }
        Some(AddressType::IPv6) => {
            let mut addr = [0u8; 16];
            read_exact(stream, &mut addr, Stage::AddressDecode).await?;
            Ipv6Addr::from(addr).to_string()
        }
        None => {
            return Err(TunnelError::ProtocolViolation {
                stage: Stage::AddressDecode,
                detail: format!("unknown address type {:#04x}", atype[0]),
            });
        }
    };

    // Read port -> BigEndian (network order)
    let mut port_buf = [0u8; 2];
    read_exact(stream, &mut port_buf, Stage::AddressDecode).await?;
    let port = u16::from_be_bytes(port_buf);

    Ok(Endpoint::new(host, port))
}
