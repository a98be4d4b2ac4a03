//! Host and port parsing for direct peer connections.
//!
//! Peers are reached by address only; whatever pairing happened out of band
//! (a scanned ticket, a typed IP) ends up here as a `host[:port]` string.

use std::net::{IpAddr, SocketAddr};

use crate::error::{Error, Result};
use crate::DEFAULT_PORT;

/// A peer endpoint as typed by the user: a host name or IP plus a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or IP literal (IPv6 without brackets)
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Resolve the endpoint to the first matching socket address.
    ///
    /// # Errors
    ///
    /// Returns an error if the host does not resolve.
    pub async fn resolve(&self) -> Result<SocketAddr> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }

        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| Error::InvalidInput(format!("host '{}' did not resolve", self.host)))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parse a `host[:port]` string.
///
/// Accepts formats:
/// - `IP` or `HOST` (e.g., `192.168.1.100`, `phone.local`) - uses default port 4000
/// - `IP:PORT` or `HOST:PORT` (e.g., `192.168.1.100:4100`)
/// - `[IPv6]` or `[IPv6]:PORT` (e.g., `[::1]:4100`)
///
/// # Examples
///
/// ```
/// use lanshare_core::connection::parse_endpoint;
///
/// let endpoint = parse_endpoint("192.168.1.100").unwrap();
/// assert_eq!(endpoint.port, 4000);
///
/// let endpoint = parse_endpoint("phone.local:4100").unwrap();
/// assert_eq!(endpoint.host, "phone.local");
/// assert_eq!(endpoint.port, 4100);
/// ```
///
/// # Errors
///
/// Returns an error if the string is empty or the port is not a number.
pub fn parse_endpoint(input: &str) -> Result<Endpoint> {
    let input = input.trim();
    let invalid = || {
        Error::InvalidInput(format!(
            "Invalid host format '{input}'. Use HOST or HOST:PORT (e.g., 192.168.1.100 or 192.168.1.100:4000)"
        ))
    };

    if input.is_empty() {
        return Err(invalid());
    }

    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(Endpoint {
            host: addr.ip().to_string(),
            port: parse_port(&addr.port().to_string())?,
        });
    }

    if let Some(rest) = input.strip_prefix('[') {
        let (ip_str, tail) = rest.split_once(']').ok_or_else(invalid)?;
        let ip: IpAddr = ip_str.parse().map_err(|_| invalid())?;
        let port = match tail.strip_prefix(':') {
            Some(port) => parse_port(port)?,
            None if tail.is_empty() => DEFAULT_PORT,
            None => return Err(invalid()),
        };
        return Ok(Endpoint {
            host: ip.to_string(),
            port,
        });
    }

    if let Ok(ip) = input.parse::<IpAddr>() {
        return Ok(Endpoint {
            host: ip.to_string(),
            port: DEFAULT_PORT,
        });
    }

    match input.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.contains(':') => Ok(Endpoint {
            host: host.to_string(),
            port: parse_port(port)?,
        }),
        Some(_) => Err(invalid()),
        None if input.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-') => {
            Ok(Endpoint {
                host: input.to_string(),
                port: DEFAULT_PORT,
            })
        }
        None => Err(invalid()),
    }
}

fn parse_port(port: &str) -> Result<u16> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(Error::InvalidInput(format!(
            "Invalid port '{port}'. Port must be a number between 1 and 65535"
        ))),
        Ok(port) => Ok(port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4_only() {
        let endpoint = parse_endpoint("192.168.1.100").unwrap();
        assert_eq!(endpoint.host, "192.168.1.100");
        assert_eq!(endpoint.port, DEFAULT_PORT);
    }

    #[test]
    fn test_parse_ipv4_with_port() {
        let endpoint = parse_endpoint("192.168.1.100:4100").unwrap();
        assert_eq!(endpoint.host, "192.168.1.100");
        assert_eq!(endpoint.port, 4100);
    }

    #[test]
    fn test_parse_ipv6_forms() {
        let endpoint = parse_endpoint("[::1]").unwrap();
        assert_eq!(endpoint.host, "::1");
        assert_eq!(endpoint.port, DEFAULT_PORT);

        let endpoint = parse_endpoint("[2001:db8::1]:4100").unwrap();
        assert_eq!(endpoint.host, "2001:db8::1");
        assert_eq!(endpoint.port, 4100);
        assert_eq!(endpoint.to_string(), "[2001:db8::1]:4100");
    }

    #[test]
    fn test_parse_hostname() {
        let endpoint = parse_endpoint("  phone.local:4001 ").unwrap();
        assert_eq!(endpoint.host, "phone.local");
        assert_eq!(endpoint.port, 4001);

        let endpoint = parse_endpoint("desktop-7").unwrap();
        assert_eq!(endpoint.port, DEFAULT_PORT);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_endpoint("").is_err());
        assert!(parse_endpoint("192.168.1.100:abc").is_err());
        assert!(parse_endpoint("192.168.1.100:0").is_err());
        assert!(parse_endpoint("[::1]:0").is_err());
        assert!(parse_endpoint("host.local:0").is_err());
        assert!(parse_endpoint("[::1").is_err());
        assert!(parse_endpoint("bad host").is_err());
    }

    #[tokio::test]
    async fn test_resolve_ip_literal() {
        let endpoint = parse_endpoint("127.0.0.1:4100").unwrap();
        let addr = endpoint.resolve().await.unwrap();
        assert_eq!(addr, "127.0.0.1:4100".parse().unwrap());
    }
}
