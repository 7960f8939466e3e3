use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use anyhow::Result;
use tokio::sync::oneshot;

use lanchat_core::{ResolveError, ServiceRecord, ServiceType};
use lanchat_net::{
    InterfaceKind, LocalListenerAddressResolver, MemoryDnsSd, NetworkPath, PathInterface,
    ServiceAddressResolver,
};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Address resolution
// ══════════════════════════════════════════════════════════════════════════════

type Resolved = Result<(Ipv4Addr, u16), ResolveError>;

async fn resolve_record(dns: &MemoryDnsSd, record: ServiceRecord) -> Result<Resolved> {
    let (tx, rx) = oneshot::channel();
    let _handle = ServiceAddressResolver::resolve(&backend(dns), record, WAIT, move |r| {
        let _ = tx.send(r);
    });
    Ok(within("resolution", rx).await??)
}

#[tokio::test]
async fn advertised_ipv4_endpoint_is_resolved() -> Result<()> {
    let dns = MemoryDnsSd::new();
    let record = ServiceRecord::new("desk", &ServiceType::default());
    dns.publish(record.clone(), vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))], 8080);
    assert_eq!(resolve_record(&dns, record).await?, Ok((Ipv4Addr::new(10, 0, 0, 7), 8080)));
    Ok(())
}

#[tokio::test]
async fn ipv6_only_endpoint_is_rejected() -> Result<()> {
    let dns = MemoryDnsSd::new();
    let record = ServiceRecord::new("v6 desk", &ServiceType::default());
    dns.publish(record.clone(), vec![IpAddr::V6(Ipv6Addr::LOCALHOST)], 8080);
    assert_eq!(resolve_record(&dns, record).await?, Err(ResolveError::Ipv6Only));
    Ok(())
}

async fn resolve_local(
    path: NetworkPath,
    table: StaticInterfaces,
    port: Option<u16>,
) -> Result<Resolved> {
    let (tx, rx) = oneshot::channel();
    let monitor = FixedPath(path);
    let _handle = LocalListenerAddressResolver::resolve(&monitor, Arc::new(table), port, move |r| {
        let _ = tx.send(r);
    });
    Ok(within("local resolution", rx).await??)
}

fn path(interfaces: &[(&str, InterfaceKind)]) -> NetworkPath {
    NetworkPath {
        available_interfaces: interfaces.iter().map(|(n, k)| PathInterface::new(*n, *k)).collect(),
    }
}

#[tokio::test]
async fn wifi_listener_endpoint_is_its_lan_address() -> Result<()> {
    let result = resolve_local(
        path(&[("wlan0", InterfaceKind::Wifi), ("lo", InterfaceKind::Loopback)]),
        StaticInterfaces::ipv4(&[("wlan0", [192, 168, 1, 5])]),
        Some(54321),
    )
    .await?;
    assert_eq!(result, Ok((Ipv4Addr::new(192, 168, 1, 5), 54321)));
    Ok(())
}

#[tokio::test]
async fn cellular_primary_is_unsupported() -> Result<()> {
    let result = resolve_local(
        path(&[("wwan0", InterfaceKind::Cellular), ("wlan0", InterfaceKind::Wifi)]),
        StaticInterfaces::ipv4(&[("wlan0", [192, 168, 1, 5])]),
        Some(54321),
    )
    .await?;
    assert!(matches!(result, Err(ResolveError::UnsupportedInterface { .. })));
    Ok(())
}

#[tokio::test]
async fn unbound_listener_has_no_endpoint() -> Result<()> {
    let result = resolve_local(
        path(&[("eth0", InterfaceKind::WiredEthernet)]),
        StaticInterfaces::ipv4(&[("eth0", [10, 1, 1, 2])]),
        None,
    )
    .await?;
    assert_eq!(result, Err(ResolveError::ListenerNotBound));
    Ok(())
}
