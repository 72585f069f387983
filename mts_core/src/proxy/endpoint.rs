use crate::error::{MtsError, MtsResult};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Where a process's proxy server can be reached
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Simulated process inside this OS process: "loopback://name"
    Loopback { name: String },

    /// Proxy server over TCP: "tcp://192.168.1.5:7401" or "192.168.1.5:7401"
    Tcp { host: IpAddr, port: u16 },
}

impl Endpoint {
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Endpoint::Tcp { host, port } => Some(SocketAddr::new(*host, *port)),
            Endpoint::Loopback { .. } => None,
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::Tcp {
            host: addr.ip(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Loopback { name } => write!(f, "loopback://{}", name),
            Endpoint::Tcp { host, port } => write!(f, "tcp://{}", SocketAddr::new(*host, *port)),
        }
    }
}

/// Parse an endpoint string
///
/// # Format:
/// - `"loopback://name"` → in-process loopback
/// - `"tcp://192.168.1.5:7401"` or `"192.168.1.5:7401"` → TCP
/// - `"tcp://[2001:db8::1]:7401"` → TCP over IPv6
/// - `"localhost:7401"` → TCP on 127.0.0.1
pub fn parse_endpoint(input: &str) -> MtsResult<Endpoint> {
    if let Some(name) = input.strip_prefix("loopback://") {
        if name.is_empty() {
            return Err(MtsError::config("Loopback endpoint name cannot be empty"));
        }
        return Ok(Endpoint::Loopback {
            name: name.to_string(),
        });
    }

    let location = input.strip_prefix("tcp://").unwrap_or(input);
    if let Ok(addr) = location.parse::<SocketAddr>() {
        return Ok(Endpoint::from(addr));
    }

    // Hostname form, only localhost is resolved here
    if let Some(port_str) = location.strip_prefix("localhost:") {
        let port = port_str
            .parse::<u16>()
            .map_err(|e| MtsError::config(format!("Invalid port '{}': {}", port_str, e)))?;
        return Ok(Endpoint::Tcp {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
        });
    }

    if location.starts_with('[') && !location.contains(']') {
        return Err(MtsError::config(format!(
            "Missing closing bracket in IPv6 address '{}'",
            location
        )));
    }
    Err(MtsError::config(format!(
        "Invalid endpoint '{}': expected loopback://name or host:port",
        input
    )))
}
