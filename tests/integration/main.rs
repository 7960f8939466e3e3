//! LanChat integration test harness.
//!
//! Every test runs over loopback against the in-memory name service, so no
//! multicast or root privileges are needed:
//!
//!   cargo test --test integration

use std::collections::BTreeSet;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use lanchat_core::{ServiceRecord, TransportError};
use lanchat_net::{
    event_channel, ConnectionDelegate, ConnectionEvent, DiscovererDelegate, DiscoveryEvent, DnsSd,
    InterfaceAddress, InterfaceTable, ListenerDelegate, ListenerEvent, ListenerOptions,
    MemoryDnsSd, NetworkPath, PathMonitor, ServiceDiscoverer, ServiceListener, Subscription,
};

mod end_to_end;
mod resolution;
mod restart;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const WAIT: Duration = Duration::from_secs(5);

pub type Events<E> = mpsc::UnboundedReceiver<E>;
pub type Delegate<E> = Arc<mpsc::UnboundedSender<E>>;

/// Await `fut`, failing after `WAIT`.
pub async fn within<T>(what: &str, fut: impl Future<Output = T>) -> Result<T> {
    tokio::time::timeout(WAIT, fut)
        .await
        .with_context(|| format!("timed out waiting for {what}"))
}

pub async fn next<E>(events: &mut Events<E>) -> Result<E> {
    within("event", events.recv())
        .await?
        .context("event channel closed")
}

pub fn backend(dns: &MemoryDnsSd) -> Arc<dyn DnsSd> {
    Arc::new(dns.clone())
}

/// A listener named `name` with a channel delegate.
pub fn listener(
    dns: &MemoryDnsSd,
    name: &str,
) -> (ServiceListener, Events<ListenerEvent>, Delegate<ListenerEvent>) {
    let (delegate, events) = event_channel::<ListenerEvent>();
    let listener = ServiceListener::new(
        backend(dns),
        ListenerOptions::new(name),
        Arc::downgrade(&delegate) as Weak<dyn ListenerDelegate>,
    );
    (listener, events, delegate)
}

pub fn discoverer(
    dns: &MemoryDnsSd,
) -> (ServiceDiscoverer, Events<DiscoveryEvent>, Delegate<DiscoveryEvent>) {
    let (delegate, events) = event_channel::<DiscoveryEvent>();
    let discoverer = ServiceDiscoverer::new(
        backend(dns),
        Default::default(),
        Arc::downgrade(&delegate) as Weak<dyn DiscovererDelegate>,
    );
    (discoverer, events, delegate)
}

pub fn connection_delegate(
) -> (Weak<dyn ConnectionDelegate>, Events<ConnectionEvent>, Delegate<ConnectionEvent>) {
    let (delegate, events) = event_channel::<ConnectionEvent>();
    (Arc::downgrade(&delegate) as Weak<dyn ConnectionDelegate>, events, delegate)
}

/// Skip discovery events until a non-empty result set arrives.
pub async fn first_results(events: &mut Events<DiscoveryEvent>) -> Result<BTreeSet<ServiceRecord>> {
    loop {
        match next(events).await? {
            DiscoveryEvent::ResultsChanged(results) if !results.is_empty() => return Ok(results),
            DiscoveryEvent::Failed(e) => anyhow::bail!("discovery failed: {e}"),
            _ => {}
        }
    }
}

/// Fixed interface table.
pub struct StaticInterfaces(pub Vec<InterfaceAddress>);

impl StaticInterfaces {
    pub fn ipv4(entries: &[(&str, [u8; 4])]) -> Self {
        Self(
            entries
                .iter()
                .map(|(name, ip)| InterfaceAddress {
                    name: name.to_string(),
                    address: IpAddr::V4(Ipv4Addr::from(*ip)),
                    is_loopback: false,
                    is_up: true,
                })
                .collect(),
        )
    }
}

impl InterfaceTable for StaticInterfaces {
    fn addresses(&self) -> Result<Vec<InterfaceAddress>, TransportError> {
        Ok(self.0.clone())
    }
}

/// Path monitor that delivers one fixed snapshot.
pub struct FixedPath(pub NetworkPath);

impl PathMonitor for FixedPath {
    fn subscribe(&self) -> Result<Subscription<NetworkPath>, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(self.0.clone());
        Ok(Subscription::new(rx, move || drop(tx)))
    }
}
