//! Interface address lookup.

use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};

use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;

use lanchat_core::{ResolveError, TransportError};

/// One address bound to one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub name: String,
    pub address: IpAddr,
    pub is_loopback: bool,
    pub is_up: bool,
}

/// Source of the host's interface addresses.
pub trait InterfaceTable: Send + Sync + 'static {
    fn addresses(&self) -> Result<Vec<InterfaceAddress>, TransportError>;
}

/// The operating system's interface table, via `getifaddrs(3)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceTable for SystemInterfaces {
    fn addresses(&self) -> Result<Vec<InterfaceAddress>, TransportError> {
        let ifaddrs = getifaddrs().map_err(|e| TransportError::from(std::io::Error::from(e)))?;
        let mut out = Vec::new();
        for ifa in ifaddrs {
            let Some(storage) = ifa.address else { continue };
            let address = if let Some(sin) = storage.as_sockaddr_in() {
                IpAddr::V4(*SocketAddrV4::from(*sin).ip())
            } else if let Some(sin6) = storage.as_sockaddr_in6() {
                IpAddr::V6(sin6.ip())
            } else {
                continue;
            };
            out.push(InterfaceAddress {
                name: ifa.interface_name,
                address,
                is_loopback: ifa.flags.contains(InterfaceFlags::IFF_LOOPBACK),
                is_up: ifa.flags.contains(InterfaceFlags::IFF_UP),
            });
        }
        Ok(out)
    }
}

/// Finds the IPv4 address bound to a named interface.
pub struct AddressProbe<'a> {
    table: &'a dyn InterfaceTable,
}

impl<'a> AddressProbe<'a> {
    pub fn new(table: &'a dyn InterfaceTable) -> Self {
        Self { table }
    }

    /// First IPv4 address of `interface`.
    pub fn ipv4_of(&self, interface: &str) -> Result<Ipv4Addr, ResolveError> {
        self.table
            .addresses()?
            .into_iter()
            .filter(|a| a.name == interface)
            .find_map(|a| match a.address {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .ok_or_else(|| ResolveError::InterfaceNotFound(interface.to_string()))
    }
}
