//! Connection tickets.
//!
//! A ticket is what the listening device shows (usually as a QR code) and
//! the connecting device scans: `tcp://<host>:<port>|<deviceName>`.

use std::fmt;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::str::FromStr;

use crate::connection::{parse_endpoint, Endpoint};
use crate::error::{Error, Result};

/// Ticket URL scheme.
pub const SCHEME: &str = "tcp://";

/// Where to connect and who is listening there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTicket {
    /// Listener address
    pub endpoint: Endpoint,
    /// Listener display name
    pub device_name: String,
}

impl ConnectionTicket {
    /// Ticket for a listener on `addr`.
    ///
    /// An unspecified bind address (`0.0.0.0`, `::`) is replaced by this
    /// device's LAN address when one can be found.
    #[must_use]
    pub fn for_listener(addr: SocketAddr, device_name: &str) -> Self {
        let ip = if addr.ip().is_unspecified() {
            local_ip().unwrap_or(addr.ip())
        } else {
            addr.ip()
        };

        Self {
            endpoint: Endpoint {
                host: ip.to_string(),
                port: addr.port(),
            },
            device_name: device_name.to_string(),
        }
    }
}

impl fmt::Display for ConnectionTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}|{}", self.endpoint, self.device_name)
    }
}

impl FromStr for ConnectionTicket {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .trim()
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::InvalidInput(format!("ticket must start with {SCHEME}")))?;

        let (address, device_name) = rest
            .split_once('|')
            .ok_or_else(|| Error::InvalidInput("ticket is missing the device name".to_string()))?;

        Ok(Self {
            endpoint: parse_endpoint(address)?,
            device_name: device_name.to_string(),
        })
    }
}

/// This device's outward-facing LAN address.
///
/// Connecting a UDP socket sends nothing; it only makes the OS pick the
/// route, whose source address is the one peers can reach.
#[must_use]
pub fn local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:53").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}
