//! One-shot resolution of a browse result to a dialable IPv4 endpoint.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use lanchat_core::{Host, ResolveError, ServiceRecord};

use crate::dnssd::{DnsSd, ResolveEvent};
use crate::subscription::{stop_pair, StopHandle};

pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle on an in-flight resolution.
///
/// The completion runs exactly once on a Tokio task, after the name-service
/// lookup has been released. Dropping the handle does not cancel it.
#[derive(Debug)]
pub struct ServiceAddressResolver {
    stop: StopHandle,
}

impl ServiceAddressResolver {
    /// Resolve `record`, giving up after `timeout`.
    ///
    /// `completion` is called from a spawned task, possibly on another
    /// runtime worker thread. Callers that must handle the result in their
    /// own context should forward it, e.g. through a channel.
    pub fn resolve<F>(
        backend: &Arc<dyn DnsSd>,
        record: ServiceRecord,
        timeout: Duration,
        completion: F,
    ) -> Self
    where
        F: FnOnce(Result<(Ipv4Addr, u16), ResolveError>) + Send + 'static,
    {
        let (stop, mut signal) = stop_pair();
        let lookup = backend.resolve(&record);

        tokio::spawn(async move {
            let result = match lookup {
                Err(e) => Err(ResolveError::from(e)),
                Ok(mut lookup) => {
                    let result = tokio::select! {
                        biased;
                        _ = signal.explicitly_requested() => Err(ResolveError::Cancelled),
                        _ = tokio::time::sleep(timeout) => Err(ResolveError::Timeout(timeout)),
                        event = lookup.next() => match event {
                            Some(ResolveEvent::Resolved { addresses, port }) => {
                                first_ipv4(&addresses).map(|ip| (ip, port))
                            }
                            Some(ResolveEvent::Failed(e)) => Err(e.into()),
                            None => Err(ResolveError::NoAddress),
                        },
                    };
                    lookup.cancel();
                    result
                }
            };
            match &result {
                Ok((ip, port)) => debug!(name = %record.name, %ip, port, "service resolved"),
                Err(e) => warn!(name = %record.name, error = %e, "service resolution failed"),
            }
            completion(result);
        });

        Self { stop }
    }

    /// Abort the resolution; the completion receives `Cancelled`. Idempotent.
    pub fn stop(&self) {
        self.stop.request();
    }
}

/// First IPv4 address in resolver order.
pub(crate) fn first_ipv4(addresses: &[IpAddr]) -> Result<Ipv4Addr, ResolveError> {
    if addresses.is_empty() {
        return Err(ResolveError::NoAddress);
    }
    addresses
        .iter()
        .find_map(|a| match a {
            IpAddr::V4(v4) => Some(*v4),
            IpAddr::V6(_) => None,
        })
        .ok_or(ResolveError::Ipv6Only)
}

/// Resolve every record concurrently and return the reachable hosts,
/// deduplicated by address in record order.
pub async fn resolve_all(
    backend: &Arc<dyn DnsSd>,
    records: impl IntoIterator<Item = ServiceRecord>,
    timeout: Duration,
) -> Vec<Host> {
    let pending = records.into_iter().map(|record| {
        let (tx, rx) = oneshot::channel();
        let name = record.name.clone();
        let handle = ServiceAddressResolver::resolve(backend, record, timeout, move |result| {
            let _ = tx.send(result);
        });
        async move {
            let result = rx.await.unwrap_or(Err(ResolveError::Cancelled));
            drop(handle);
            result.ok().map(|(ip, port)| Host::new(name, ip, port))
        }
    });

    let mut hosts: Vec<Host> = Vec::new();
    for host in join_all(pending).await.into_iter().flatten() {
        if !hosts.contains(&host) {
            hosts.push(host);
        }
    }
    hosts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dnssd::MemoryDnsSd;
    use lanchat_core::{ServiceType, TransportError};
    use std::net::Ipv6Addr;

    fn record(name: &str) -> ServiceRecord {
        ServiceRecord::new(name, &ServiceType::default())
    }

    fn backend(dns: &MemoryDnsSd) -> Arc<dyn DnsSd> {
        Arc::new(dns.clone())
    }

    async fn resolve_once(
        backend: &Arc<dyn DnsSd>,
        record: ServiceRecord,
        timeout: Duration,
    ) -> Result<(Ipv4Addr, u16), ResolveError> {
        let (tx, rx) = oneshot::channel();
        let _handle = ServiceAddressResolver::resolve(backend, record, timeout, move |r| {
            let _ = tx.send(r);
        });
        rx.await.expect("completion dropped")
    }

    #[tokio::test]
    async fn resolves_published_ipv4_endpoint() {
        let dns = MemoryDnsSd::new();
        dns.publish(record("alice"), vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))], 8080);
        let result = resolve_once(&backend(&dns), record("alice"), DEFAULT_RESOLVE_TIMEOUT).await;
        assert_eq!(result, Ok((Ipv4Addr::new(10, 0, 0, 7), 8080)));
        assert_eq!(dns.pending_resolves(), 0);
    }

    #[tokio::test]
    async fn ipv4_is_preferred_over_ipv6() {
        let dns = MemoryDnsSd::new();
        dns.publish(
            record("alice"),
            vec![IpAddr::V6(Ipv6Addr::LOCALHOST), IpAddr::V4(Ipv4Addr::new(192, 168, 0, 4))],
            1234,
        );
        let result = resolve_once(&backend(&dns), record("alice"), DEFAULT_RESOLVE_TIMEOUT).await;
        assert_eq!(result, Ok((Ipv4Addr::new(192, 168, 0, 4), 1234)));
    }

    #[tokio::test]
    async fn ipv6_only_record_is_an_error() {
        let dns = MemoryDnsSd::new();
        dns.publish(record("v6"), vec![IpAddr::V6(Ipv6Addr::LOCALHOST)], 1);
        let result = resolve_once(&backend(&dns), record("v6"), DEFAULT_RESOLVE_TIMEOUT).await;
        assert_eq!(result, Err(ResolveError::Ipv6Only));
    }

    #[tokio::test]
    async fn record_without_addresses_is_an_error() {
        let dns = MemoryDnsSd::new();
        dns.publish(record("empty"), vec![], 1);
        let result = resolve_once(&backend(&dns), record("empty"), DEFAULT_RESOLVE_TIMEOUT).await;
        assert_eq!(result, Err(ResolveError::NoAddress));
    }

    #[tokio::test]
    async fn unanswered_lookup_times_out_and_is_released() {
        let dns = MemoryDnsSd::new();
        let timeout = Duration::from_millis(250);
        let result = resolve_once(&backend(&dns), record("ghost"), timeout).await;
        assert_eq!(result, Err(ResolveError::Timeout(timeout)));
        assert_eq!(dns.pending_resolves(), 0);
    }

    #[tokio::test]
    async fn stop_cancels_in_flight_resolution() {
        let dns = MemoryDnsSd::new();
        let (tx, rx) = oneshot::channel();
        let handle = ServiceAddressResolver::resolve(
            &backend(&dns),
            record("ghost"),
            DEFAULT_RESOLVE_TIMEOUT,
            move |r| {
                let _ = tx.send(r);
            },
        );
        handle.stop();
        handle.stop();
        assert_eq!(rx.await.unwrap(), Err(ResolveError::Cancelled));
        assert_eq!(dns.pending_resolves(), 0);
    }

    #[tokio::test]
    async fn dropping_the_handle_does_not_cancel() {
        let dns = MemoryDnsSd::new();
        let (tx, rx) = oneshot::channel();
        let handle = ServiceAddressResolver::resolve(
            &backend(&dns),
            record("late"),
            DEFAULT_RESOLVE_TIMEOUT,
            move |r| {
                let _ = tx.send(r);
            },
        );
        drop(handle);
        dns.publish(record("late"), vec![IpAddr::V4(Ipv4Addr::LOCALHOST)], 7);
        assert_eq!(rx.await.unwrap(), Ok((Ipv4Addr::LOCALHOST, 7)));
    }

    #[tokio::test]
    async fn name_service_failure_is_reported() {
        let dns = MemoryDnsSd::new();
        let (tx, rx) = oneshot::channel();
        let _handle = ServiceAddressResolver::resolve(
            &backend(&dns),
            record("ghost"),
            DEFAULT_RESOLVE_TIMEOUT,
            move |r| {
                let _ = tx.send(r);
            },
        );
        while dns.pending_resolves() == 0 {
            tokio::task::yield_now().await;
        }
        dns.fail_pending_resolves(TransportError::DnsServiceDefunct);
        assert_eq!(
            rx.await.unwrap(),
            Err(ResolveError::Transport(TransportError::DnsServiceDefunct))
        );
    }

    #[tokio::test]
    async fn resolve_all_dedups_by_address() {
        let dns = MemoryDnsSd::new();
        let shared = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        dns.publish(record("a"), vec![shared], 1000);
        dns.publish(record("b"), vec![shared], 2000);
        dns.publish(record("c"), vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))], 3000);
        dns.publish(record("d"), vec![IpAddr::V6(Ipv6Addr::LOCALHOST)], 4000);

        let hosts = resolve_all(
            &backend(&dns),
            [record("a"), record("b"), record("c"), record("d")],
            DEFAULT_RESOLVE_TIMEOUT,
        )
        .await;
        let summary: Vec<(String, u16)> = hosts.iter().map(|h| (h.name.clone(), h.port)).collect();
        assert_eq!(summary, vec![("a".to_string(), 1000), ("c".to_string(), 3000)]);
    }

    #[test]
    fn first_ipv4_rules() {
        assert_eq!(first_ipv4(&[]), Err(ResolveError::NoAddress));
        assert_eq!(first_ipv4(&[IpAddr::V6(Ipv6Addr::LOCALHOST)]), Err(ResolveError::Ipv6Only));
        assert_eq!(
            first_ipv4(&[IpAddr::V4(Ipv4Addr::LOCALHOST), IpAddr::V4(Ipv4Addr::BROADCAST)]),
            Ok(Ipv4Addr::LOCALHOST)
        );
    }
}
