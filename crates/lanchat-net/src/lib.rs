//! Peer discovery and chat transport for LanChat.
//!
//! - `ServiceListener` advertises this host and accepts inbound streams.
//! - `ServiceDiscoverer` browses for other hosts.
//! - `ServiceAddressResolver` turns a browse result into an IPv4 endpoint.
//! - `LocalListenerAddressResolver` finds the endpoint of our own listener.
//! - `PeerConnection` carries one WebSocket chat session.
//!
//! Components report to delegates held as `Weak` references; every delegate
//! trait is also implemented for an unbounded channel sender.

pub mod connection;
pub mod delegate;
pub mod discoverer;
pub mod dnssd;
mod frame;
pub mod lifecycle;
pub mod listener;
pub mod path;
pub mod probe;
pub mod resolver;
pub mod socket;
pub mod subscription;
mod websocket;

pub use connection::{ConnectionState, PeerConnection};
pub use delegate::{
    event_channel, ConnectionDelegate, ConnectionEvent, DiscovererDelegate, DiscoveryEvent,
    ListenerDelegate, ListenerEvent,
};
pub use discoverer::ServiceDiscoverer;
pub use dnssd::{DnsSd, MdnsSd, MemoryDnsSd};
pub use lifecycle::{LifecycleState, LifecycleStatus, RestartPolicy};
pub use listener::{ListenerOptions, ListenerPort, PortSource, ServiceListener};
pub use path::{InterfaceKind, NetworkPath, PathInterface, PathMonitor, SystemPathMonitor};
pub use probe::{AddressProbe, InterfaceAddress, InterfaceTable, SystemInterfaces};
pub use resolver::{
    resolve_all, LocalListenerAddressResolver, ServiceAddressResolver, DEFAULT_RESOLVE_TIMEOUT,
};
pub use subscription::Subscription;
