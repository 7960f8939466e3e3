//! Determine the LAN endpoint of this host's own listener.
//!
//! Only the primary interface is considered, and only when it is wifi or
//! wired ethernet; the listener's port is combined with that interface's
//! IPv4 address.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tracing::{debug, warn};

use lanchat_core::ResolveError;

use crate::listener::PortSource;
use crate::path::{InterfaceKind, NetworkPath, PathMonitor};
use crate::probe::{AddressProbe, InterfaceTable};
use crate::subscription::{stop_pair, StopHandle};

#[derive(Debug)]
pub struct LocalListenerAddressResolver {
    stop: StopHandle,
}

impl LocalListenerAddressResolver {
    /// Wait for the first network path update and resolve against it.
    /// The completion runs exactly once, after the path subscription has
    /// been released. Dropping the handle does not cancel the resolution.
    ///
    /// `completion` is called from a spawned task, possibly on another
    /// runtime worker thread. Callers that must handle the result in their
    /// own context should forward it, e.g. through a channel.
    pub fn resolve<P, F>(
        monitor: &dyn PathMonitor,
        interfaces: Arc<dyn InterfaceTable>,
        port: P,
        completion: F,
    ) -> Self
    where
        P: PortSource,
        F: FnOnce(Result<(Ipv4Addr, u16), ResolveError>) + Send + 'static,
    {
        let (stop, mut signal) = stop_pair();
        let updates = monitor.subscribe();

        tokio::spawn(async move {
            let result = match updates {
                Err(e) => Err(ResolveError::from(e)),
                Ok(mut updates) => {
                    let result = tokio::select! {
                        biased;
                        _ = signal.explicitly_requested() => Err(ResolveError::Cancelled),
                        path = updates.next() => match path {
                            Some(path) => resolve_on_path(&path, &*interfaces, &port),
                            None => Err(ResolveError::NoActiveInterface),
                        },
                    };
                    updates.cancel();
                    result
                }
            };
            match &result {
                Ok((ip, port)) => debug!(%ip, port, "local listener endpoint resolved"),
                Err(e) => warn!(error = %e, "local listener endpoint unavailable"),
            }
            completion(result);
        });

        Self { stop }
    }

    /// Abort; the completion receives `Cancelled`. Idempotent.
    pub fn stop(&self) {
        self.stop.request();
    }
}

/// Resolve against one path snapshot. Interfaces are only enumerated once
/// the primary interface has passed the kind check.
pub(crate) fn resolve_on_path(
    path: &NetworkPath,
    interfaces: &dyn InterfaceTable,
    port: &dyn PortSource,
) -> Result<(Ipv4Addr, u16), ResolveError> {
    let primary = path.primary().ok_or(ResolveError::NoActiveInterface)?;
    if !matches!(primary.kind, InterfaceKind::Wifi | InterfaceKind::WiredEthernet) {
        return Err(ResolveError::UnsupportedInterface {
            name: primary.name.clone(),
            kind: primary.kind.to_string(),
        });
    }
    let ip = AddressProbe::new(interfaces).ipv4_of(&primary.name)?;
    let port = port.bound_port().ok_or(ResolveError::ListenerNotBound)?;
    Ok((ip, port))
}
