//! DNS-SD backend seam.
//!
//! Listeners, discoverers, and resolvers never talk to a name service
//! directly; they go through a shared `Arc<dyn DnsSd>`. `MdnsSd` is the
//! multicast DNS implementation used on a real network, `MemoryDnsSd` an
//! in-process directory for tests and single-machine runs.

use std::collections::BTreeSet;
use std::net::IpAddr;

use lanchat_core::{ServiceRecord, ServiceType, TransportError};

use crate::subscription::Subscription;

pub mod mdns;
pub mod memory;

pub use mdns::MdnsSd;
pub use memory::MemoryDnsSd;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvertiseEvent {
    /// The name service accepted the registration.
    Registered,
    /// The advertisement is dead; the subscription should be cancelled.
    Failed(TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseEvent {
    /// The browse query is running.
    Ready,
    /// The complete current result set, sent whenever it changes.
    Results(BTreeSet<ServiceRecord>),
    Failed(TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveEvent {
    Resolved { addresses: Vec<IpAddr>, port: u16 },
    Failed(TransportError),
}

/// A DNS service-discovery implementation.
///
/// Each call starts an independent operation owned by the returned
/// subscription; cancelling or dropping the subscription withdraws it.
pub trait DnsSd: Send + Sync + 'static {
    /// Advertise `record` on `port` of this host.
    fn advertise(
        &self,
        record: &ServiceRecord,
        port: u16,
    ) -> Result<Subscription<AdvertiseEvent>, TransportError>;

    /// Browse for instances of `service_type`.
    fn browse(
        &self,
        service_type: &ServiceType,
    ) -> Result<Subscription<BrowseEvent>, TransportError>;

    /// Look up the addresses and port of one advertised instance.
    fn resolve(&self, record: &ServiceRecord) -> Result<Subscription<ResolveEvent>, TransportError>;
}
