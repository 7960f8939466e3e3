//! Network path monitoring: which interfaces are usable, primary first.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use lanchat_core::TransportError;

use crate::probe::{InterfaceAddress, InterfaceTable, SystemInterfaces};
use crate::subscription::Subscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceKind {
    Wifi,
    WiredEthernet,
    Cellular,
    Loopback,
    Other,
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InterfaceKind::Wifi => "wifi",
            InterfaceKind::WiredEthernet => "wired ethernet",
            InterfaceKind::Cellular => "cellular",
            InterfaceKind::Loopback => "loopback",
            InterfaceKind::Other => "other",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInterface {
    pub name: String,
    pub kind: InterfaceKind,
}

impl PathInterface {
    pub fn new(name: impl Into<String>, kind: InterfaceKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Snapshot of the usable interfaces. The first one carries the default route.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetworkPath {
    pub available_interfaces: Vec<PathInterface>,
}

impl NetworkPath {
    pub fn primary(&self) -> Option<&PathInterface> {
        self.available_interfaces.first()
    }
}

/// Source of network path updates. The first update arrives promptly after
/// subscribing; later ones only when the path changes.
pub trait PathMonitor: Send + Sync + 'static {
    fn subscribe(&self) -> Result<Subscription<NetworkPath>, TransportError>;
}

/// Polls the operating system's interface table.
pub struct SystemPathMonitor {
    table: Arc<dyn InterfaceTable>,
    poll_interval: Duration,
}

impl Default for SystemPathMonitor {
    fn default() -> Self {
        Self::new(Arc::new(SystemInterfaces), Duration::from_secs(2))
    }
}

impl SystemPathMonitor {
    pub fn new(table: Arc<dyn InterfaceTable>, poll_interval: Duration) -> Self {
        Self {
            table,
            poll_interval,
        }
    }
}

impl PathMonitor for SystemPathMonitor {
    fn subscribe(&self) -> Result<Subscription<NetworkPath>, TransportError> {
        let first = current_path(&*self.table)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(first.clone());

        let table = self.table.clone();
        let interval = self.poll_interval;
        let task = tokio::spawn(async move {
            let mut last = first;
            loop {
                tokio::time::sleep(interval).await;
                let path = match current_path(&*table) {
                    Ok(p) => p,
                    Err(e) => {
                        debug!(error = %e, "interface poll failed");
                        continue;
                    }
                };
                if path != last {
                    trace!(?path, "network path changed");
                    if tx.send(path.clone()).is_err() {
                        break;
                    }
                    last = path;
                }
            }
        });
        Ok(Subscription::new(rx, move || task.abort()))
    }
}

/// Local address the kernel would use for outbound traffic. No packet is sent.
fn default_route_address() -> Option<IpAddr> {
    let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    sock.connect((Ipv4Addr::new(192, 0, 2, 1), 9)).ok()?;
    sock.local_addr().ok().map(|a| a.ip())
}

fn current_path(table: &dyn InterfaceTable) -> Result<NetworkPath, TransportError> {
    let addresses = table.addresses()?;
    let primary = default_route_address();
    Ok(build_path(&addresses, primary, |name| {
        Path::new("/sys/class/net").join(name).join("wireless").exists()
    }))
}

/// Order usable interfaces: the one owning `primary` first, loopback last.
pub(crate) fn build_path(
    addresses: &[InterfaceAddress],
    primary: Option<IpAddr>,
    is_wireless: impl Fn(&str) -> bool,
) -> NetworkPath {
    let mut interfaces: Vec<PathInterface> = Vec::new();
    for a in addresses.iter().filter(|a| a.is_up) {
        if interfaces.iter().any(|i| i.name == a.name) {
            continue;
        }
        let kind = classify(&a.name, a.is_loopback, is_wireless(&a.name));
        interfaces.push(PathInterface::new(a.name.clone(), kind));
    }

    let primary_name = primary.and_then(|ip| {
        addresses
            .iter()
            .find(|a| a.address == ip)
            .map(|a| a.name.clone())
    });
    // Stable sort: primary, then everything else in table order, loopback last.
    interfaces.sort_by_key(|i| {
        if Some(&i.name) == primary_name.as_ref() {
            0
        } else if i.kind == InterfaceKind::Loopback {
            2
        } else {
            1
        }
    });
    NetworkPath {
        available_interfaces: interfaces,
    }
}

pub(crate) fn classify(name: &str, is_loopback: bool, is_wireless: bool) -> InterfaceKind {
    if is_loopback {
        return InterfaceKind::Loopback;
    }
    if is_wireless || name.starts_with("wl") {
        return InterfaceKind::Wifi;
    }
    if ["wwan", "rmnet", "ccmni", "pdp_ip"].iter().any(|p| name.starts_with(p)) {
        return InterfaceKind::Cellular;
    }
    if ["en", "eth"].iter().any(|p| name.starts_with(p)) {
        return InterfaceKind::WiredEthernet;
    }
    InterfaceKind::Other
}
