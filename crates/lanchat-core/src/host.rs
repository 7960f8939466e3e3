//! Value types shared by discovery, resolution, and the connection layer.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

// ── Service type ──────────────────────────────────────────────────────────────

/// Application service type advertised by listeners and browsed by discoverers.
/// Both sides must agree on it; changing it splits the network in two.
pub const SERVICE_TYPE: &str = "_lanchat._tcp";

/// Link-local multicast DNS domain.
pub const SERVICE_DOMAIN: &str = "local.";

/// A DNS-SD service type qualified by its domain, e.g. `_lanchat._tcp` in `local.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceType {
    pub name: String,
    pub domain: String,
}

impl ServiceType {
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
        }
    }

    /// Fully qualified type as used on the wire, e.g. `_lanchat._tcp.local.`.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.name.trim_end_matches('.'), self.domain)
    }
}

impl Default for ServiceType {
    fn default() -> Self {
        Self::new(SERVICE_TYPE, SERVICE_DOMAIN)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified())
    }
}

// ── Service record ────────────────────────────────────────────────────────────

/// A raw browse result: an advertised instance that has not been resolved yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceRecord {
    /// Instance name, e.g. `alice-laptop`.
    pub name: String,
    /// Service type without the domain, e.g. `_lanchat._tcp`.
    pub service_type: String,
    /// Domain, e.g. `local.`.
    pub domain: String,
}

impl ServiceRecord {
    pub fn new(name: impl Into<String>, service_type: &ServiceType) -> Self {
        Self {
            name: name.into(),
            service_type: service_type.name.clone(),
            domain: service_type.domain.clone(),
        }
    }

    pub fn kind(&self) -> ServiceType {
        ServiceType::new(self.service_type.clone(), self.domain.clone())
    }

    /// Full instance name, e.g. `alice-laptop._lanchat._tcp.local.`.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.name, self.kind().qualified())
    }

    /// Split a full instance name back into a record of the given type.
    /// Returns None if `full_name` is not an instance of `service_type`.
    pub fn from_full_name(full_name: &str, service_type: &ServiceType) -> Option<Self> {
        let suffix = format!(".{}", service_type.qualified());
        let name = full_name.strip_suffix(&suffix)?;
        if name.is_empty() {
            return None;
        }
        Some(Self::new(name, service_type))
    }
}

impl fmt::Display for ServiceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

// ── Host ──────────────────────────────────────────────────────────────────────

/// A resolved, dialable chat host.
///
/// Identity is the IP address: two hosts with the same address are the same
/// host regardless of name or port. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct Host {
    pub name: String,
    pub ip_address: Ipv4Addr,
    pub port: u16,
}

impl Host {
    pub fn new(name: impl Into<String>, ip_address: Ipv4Addr, port: u16) -> Self {
        Self {
            name: name.into(),
            ip_address,
            port,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip_address, self.port))
    }

    /// WebSocket URL used as the dial target.
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.ip_address, self.port)
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.ip_address == other.ip_address
    }
}

impl Eq for Host {}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip_address.hash(state);
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip_address, self.port)
    }
}

/// Error parsing a user-typed `IP:PORT` address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid host address {0:?}, expected IP:PORT")]
pub struct HostParseError(pub String);

impl FromStr for Host {
    type Err = HostParseError;

    /// Parse `192.168.1.5:54321`. The name of a manually entered host is its IP text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (ip, port) = s
            .split_once(':')
            .ok_or_else(|| HostParseError(s.to_string()))?;
        let ip_address: Ipv4Addr = ip.parse().map_err(|_| HostParseError(s.to_string()))?;
        let port: u16 = port.parse().map_err(|_| HostParseError(s.to_string()))?;
        Ok(Host::new(ip, ip_address, port))
    }
}
