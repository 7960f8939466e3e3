use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::oneshot;

use lanchat_core::Host;
use lanchat_net::{
    resolve_all, ConnectionEvent, ConnectionState, ListenerEvent, MemoryDnsSd, PeerConnection,
    ServiceAddressResolver,
};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Advertise → discover → resolve → connect → chat
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn discovered_host_can_be_joined_and_chatted_with() -> Result<()> {
    let dns = MemoryDnsSd::new();

    let (mut host, mut host_events, _host_delegate) = listener(&dns, "Alice's laptop");
    host.start();
    assert!(matches!(next(&mut host_events).await?, ListenerEvent::Ready));
    let port = host.port().context("listener has no port after ready")?;

    let (mut finder, mut found_events, _finder_delegate) = discoverer(&dns);
    finder.start();
    let results = first_results(&mut found_events).await?;
    assert_eq!(results.len(), 1);
    let record = results.into_iter().next().context("empty results")?;
    assert_eq!(record.name, "Alice's laptop");

    let (tx, rx) = oneshot::channel();
    let _lookup = ServiceAddressResolver::resolve(&backend(&dns), record.clone(), WAIT, move |r| {
        let _ = tx.send(r);
    });
    let (ip, resolved_port) = within("resolution", rx).await???;
    assert_eq!((ip, resolved_port), (Ipv4Addr::LOCALHOST, port));

    let target = Host::new(record.name, ip, resolved_port);
    let (joiner_delegate, mut joiner_events, _joiner_keep) = connection_delegate();
    let mut joiner = PeerConnection::to_host(&target, joiner_delegate);
    joiner.start();

    let stream = match next(&mut host_events).await? {
        ListenerEvent::NewConnection(stream) => stream,
        other => bail!("expected an inbound stream, got {other:?}"),
    };
    let (accepted_delegate, mut accepted_events, _accepted_keep) = connection_delegate();
    let mut accepted = PeerConnection::inbound(stream, accepted_delegate);
    accepted.start();

    assert_eq!(next(&mut joiner_events).await?, ConnectionEvent::Connected);
    assert_eq!(next(&mut accepted_events).await?, ConnectionEvent::Connected);
    assert_eq!(joiner.state(), ConnectionState::Ready);
    assert_eq!(accepted.state(), ConnectionState::Ready);

    joiner.send("hello");
    assert_eq!(next(&mut accepted_events).await?, ConnectionEvent::Message("hello".into()));
    accepted.send("héllo 👋🏽 wörld");
    assert_eq!(
        next(&mut joiner_events).await?,
        ConnectionEvent::Message("héllo 👋🏽 wörld".into())
    );

    joiner.stop();
    assert_eq!(next(&mut joiner_events).await?, ConnectionEvent::Disconnected);
    assert_eq!(next(&mut accepted_events).await?, ConnectionEvent::Disconnected);

    host.stop();
    finder.stop();
    Ok(())
}

#[tokio::test]
async fn stopping_the_host_withdraws_it_from_discovery() -> Result<()> {
    let dns = MemoryDnsSd::new();
    let (mut finder, mut found_events, _finder_delegate) = discoverer(&dns);
    finder.start();

    let (mut host, mut host_events, _host_delegate) = listener(&dns, "bob");
    host.start();
    assert!(matches!(next(&mut host_events).await?, ListenerEvent::Ready));
    assert_eq!(first_results(&mut found_events).await?.len(), 1);

    host.stop();
    assert!(matches!(
        next(&mut host_events).await?,
        ListenerEvent::Cancelled { is_restarting: false }
    ));
    loop {
        match next(&mut found_events).await? {
            DiscoveryEvent::ResultsChanged(results) if results.is_empty() => break,
            DiscoveryEvent::ResultsChanged(_) | DiscoveryEvent::Ready => {}
            other => bail!("unexpected discovery event {other:?}"),
        }
    }
    assert_eq!(dns.active_advertisements(), 0);
    Ok(())
}

#[tokio::test]
async fn two_hosts_on_one_address_collapse_to_one() -> Result<()> {
    let dns = MemoryDnsSd::new();
    let (mut first, mut first_events, _a) = listener(&dns, "first");
    let (mut second, mut second_events, _b) = listener(&dns, "second");
    first.start();
    second.start();
    assert!(matches!(next(&mut first_events).await?, ListenerEvent::Ready));
    assert!(matches!(next(&mut second_events).await?, ListenerEvent::Ready));

    let records = dns.records(&Default::default());
    assert_eq!(records.len(), 2);
    let hosts = resolve_all(&backend(&dns), records, WAIT).await;
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].ip_address, Ipv4Addr::LOCALHOST);
    Ok(())
}

#[tokio::test]
async fn dialling_a_closed_port_fails_once() -> Result<()> {
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = probe.local_addr()?;
    drop(probe);

    let (delegate, mut events, _keep) = connection_delegate();
    let mut connection = PeerConnection::outbound(addr, delegate);
    connection.start();
    assert!(matches!(next(&mut events).await?, ConnectionEvent::Failed(_)));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_err());
    assert!(connection.state().is_terminal());
    Ok(())
}
