//! Multicast DNS backend built on `mdns-sd`.
//!
//! Every operation runs on its own `ServiceDaemon`, so cancelling one
//! advertisement or browse never disturbs another. A daemon whose channel
//! disconnects while the operation is still wanted is reported as
//! `TransportError::DnsServiceDefunct`, which listeners and discoverers
//! answer by restarting.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mdns_sd::{DaemonEvent, ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use lanchat_core::{ServiceRecord, ServiceType, TransportError};

use super::{AdvertiseEvent, BrowseEvent, DnsSd, ResolveEvent};
use crate::subscription::Subscription;

pub struct MdnsSd {
    /// `<hostname>.local.`, the target of our SRV records.
    host_name: String,
}

impl Default for MdnsSd {
    fn default() -> Self {
        Self::new()
    }
}

impl MdnsSd {
    pub fn new() -> Self {
        let host = nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .map(|h| h.replace(|c: char| c == ' ' || c == '.', "-"))
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "lanchat".to_string());
        Self {
            host_name: format!("{host}.local."),
        }
    }
}

fn name_service(e: mdns_sd::Error) -> TransportError {
    TransportError::NameService(e.to_string())
}

/// Shut a daemon down after marking the operation as no longer wanted.
fn release(daemon: &ServiceDaemon, cancelled: &AtomicBool) {
    cancelled.store(true, Ordering::SeqCst);
    if let Err(e) = daemon.shutdown() {
        debug!(error = %e, "mdns daemon shutdown");
    }
}

impl DnsSd for MdnsSd {
    fn advertise(
        &self,
        record: &ServiceRecord,
        port: u16,
    ) -> Result<Subscription<AdvertiseEvent>, TransportError> {
        let daemon = ServiceDaemon::new().map_err(name_service)?;
        let service = ServiceInfo::new(
            &record.kind().qualified(),
            &record.name,
            &self.host_name,
            "",
            port,
            HashMap::<String, String>::new(),
        )
        .map_err(name_service)?
        .enable_addr_auto();
        let full_name = service.get_fullname().to_string();

        let monitor = daemon.monitor().map_err(name_service)?;
        daemon.register(service).map_err(name_service)?;
        info!(name = %full_name, port, "mdns advertisement registered");

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(AdvertiseEvent::Registered);

        let cancelled = Arc::new(AtomicBool::new(false));
        let watching = cancelled.clone();
        tokio::spawn(async move {
            loop {
                match monitor.recv_async().await {
                    Ok(DaemonEvent::Error(e)) => warn!(error = %e, "mdns daemon error"),
                    Ok(event) => trace!(?event, "mdns daemon event"),
                    Err(_) => {
                        if !watching.load(Ordering::SeqCst) {
                            warn!("mdns daemon went away under a live advertisement");
                            let defunct = TransportError::DnsServiceDefunct;
                            let _ = tx.send(AdvertiseEvent::Failed(defunct));
                        }
                        break;
                    }
                }
            }
        });

        Ok(Subscription::new(rx, move || {
            // Queued ahead of shutdown, so the goodbye packet still goes out.
            let _ = daemon.unregister(&full_name);
            release(&daemon, &cancelled);
        }))
    }

    fn browse(
        &self,
        service_type: &ServiceType,
    ) -> Result<Subscription<BrowseEvent>, TransportError> {
        let daemon = ServiceDaemon::new().map_err(name_service)?;
        let qualified = service_type.qualified();
        let receiver = daemon.browse(&qualified).map_err(name_service)?;
        debug!(service_type = %qualified, "mdns browse started");

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(BrowseEvent::Ready);

        let cancelled = Arc::new(AtomicBool::new(false));
        let watching = cancelled.clone();
        let kind = service_type.clone();
        tokio::spawn(async move {
            let mut results = BTreeSet::new();
            loop {
                let changed = match receiver.recv_async().await {
                    Ok(ServiceEvent::ServiceFound(_, full_name)) => {
                        ServiceRecord::from_full_name(&full_name, &kind)
                            .is_some_and(|r| results.insert(r))
                    }
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        ServiceRecord::from_full_name(info.get_fullname(), &kind)
                            .is_some_and(|r| results.insert(r))
                    }
                    Ok(ServiceEvent::ServiceRemoved(_, full_name)) => {
                        ServiceRecord::from_full_name(&full_name, &kind)
                            .is_some_and(|r| results.remove(&r))
                    }
                    Ok(ServiceEvent::SearchStopped(_)) => break,
                    Ok(_) => false,
                    Err(_) => {
                        if !watching.load(Ordering::SeqCst) {
                            warn!("mdns daemon went away under a live browse");
                            let _ = tx.send(BrowseEvent::Failed(TransportError::DnsServiceDefunct));
                        }
                        break;
                    }
                };
                if changed && tx.send(BrowseEvent::Results(results.clone())).is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, move || {
            let _ = daemon.stop_browse(&qualified);
            release(&daemon, &cancelled);
        }))
    }

    fn resolve(
        &self,
        record: &ServiceRecord,
    ) -> Result<Subscription<ResolveEvent>, TransportError> {
        let daemon = ServiceDaemon::new().map_err(name_service)?;
        let qualified = record.kind().qualified();
        let receiver = daemon.browse(&qualified).map_err(name_service)?;
        let wanted = record.full_name();

        let (tx, rx) = mpsc::unbounded_channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let watching = cancelled.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv_async().await {
                    Ok(ServiceEvent::ServiceResolved(info))
                        if info.get_fullname().eq_ignore_ascii_case(&wanted) =>
                    {
                        let addresses = info.get_addresses().iter().copied().collect();
                        let _ = tx.send(ResolveEvent::Resolved {
                            addresses,
                            port: info.get_port(),
                        });
                        break;
                    }
                    Ok(ServiceEvent::SearchStopped(_)) => break,
                    Ok(_) => {}
                    Err(_) => {
                        if !watching.load(Ordering::SeqCst) {
                            let defunct = TransportError::DnsServiceDefunct;
                            let _ = tx.send(ResolveEvent::Failed(defunct));
                        }
                        break;
                    }
                }
            }
        });

        Ok(Subscription::new(rx, move || {
            let _ = daemon.stop_browse(&qualified);
            release(&daemon, &cancelled);
        }))
    }
}
