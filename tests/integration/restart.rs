use std::time::Duration;

use anyhow::{bail, Result};

use lanchat_core::TransportError;
use lanchat_net::{LifecycleState, ListenerEvent, MemoryDnsSd};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Name-service restarts
// ══════════════════════════════════════════════════════════════════════════════

/// Each defunct report restarts the advertisement; the delegate sees a
/// restarting cancel and a fresh ready, never a failure.
#[tokio::test]
async fn listener_recovers_from_repeated_defunct_name_service() -> Result<()> {
    let dns = MemoryDnsSd::new();
    let (mut host, mut events, _keep) = listener(&dns, "sturdy");
    host.start();
    assert!(matches!(next(&mut events).await?, ListenerEvent::Ready));

    for round in 1..=4u32 {
        dns.fail_advertisements(TransportError::DnsServiceDefunct);
        match next(&mut events).await? {
            ListenerEvent::Cancelled { is_restarting: true } => {}
            other => bail!("round {round}: expected restart, got {other:?}"),
        }
        match next(&mut events).await? {
            ListenerEvent::Ready => {}
            other => bail!("round {round}: expected ready, got {other:?}"),
        }
    }
    assert_eq!(dns.advertise_calls(), 5);
    assert_eq!(dns.active_advertisements(), 1);
    assert_eq!(host.state(), LifecycleState::Ready);
    assert!(!host.is_restarting());
    Ok(())
}

#[tokio::test]
async fn discoverer_recovers_and_keeps_reporting() -> Result<()> {
    let dns = MemoryDnsSd::new();
    let (mut finder, mut events, _keep) = discoverer(&dns);
    finder.start();
    assert_eq!(next(&mut events).await?, DiscoveryEvent::Ready);

    dns.fail_browses(TransportError::DnsServiceDefunct);
    assert_eq!(next(&mut events).await?, DiscoveryEvent::Cancelled { is_restarting: true });
    assert_eq!(next(&mut events).await?, DiscoveryEvent::Ready);

    let (mut host, mut host_events, _host_keep) = listener(&dns, "late arrival");
    host.start();
    assert!(matches!(next(&mut host_events).await?, ListenerEvent::Ready));
    let results = first_results(&mut events).await?;
    assert!(results.iter().any(|r| r.name == "late arrival"));
    Ok(())
}

#[tokio::test]
async fn other_failure_is_surfaced_exactly_once() -> Result<()> {
    let dns = MemoryDnsSd::new();
    let (mut host, mut events, _keep) = listener(&dns, "fragile");
    host.start();
    assert!(matches!(next(&mut events).await?, ListenerEvent::Ready));

    dns.fail_advertisements(TransportError::NameService("daemon went away".into()));
    match next(&mut events).await? {
        ListenerEvent::Failed(TransportError::NameService(msg)) => {
            assert_eq!(msg, "daemon went away")
        }
        other => bail!("expected failure, got {other:?}"),
    }
    assert!(matches!(
        next(&mut events).await?,
        ListenerEvent::Cancelled { is_restarting: false }
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(dns.advertise_calls(), 1);
    Ok(())
}
