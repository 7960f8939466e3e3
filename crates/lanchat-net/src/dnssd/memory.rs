//! In-process DNS-SD directory.
//!
//! Advertisements registered through one `MemoryDnsSd` (or any clone of it)
//! are visible to browses and resolutions on the same directory. Every
//! advertisement resolves to the directory's host address, 127.0.0.1 unless
//! configured otherwise.
//!
//! The directory can also inject failures into live operations, which is how
//! the restart behaviour of listeners and discoverers is exercised without a
//! real name service.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use lanchat_core::{ServiceRecord, ServiceType, TransportError};

use super::{AdvertiseEvent, BrowseEvent, DnsSd, ResolveEvent};
use crate::subscription::Subscription;

#[derive(Clone)]
pub struct MemoryDnsSd {
    inner: Arc<Directory>,
}

struct Directory {
    host_address: IpAddr,
    next_id: AtomicU64,
    /// Full instance name → entry.
    entries: DashMap<String, Entry>,
    advertisers: DashMap<u64, Watcher<AdvertiseEvent>>,
    browsers: DashMap<u64, Watcher<BrowseEvent>>,
    pending_resolves: DashMap<u64, Watcher<ResolveEvent>>,
    advertise_calls: AtomicUsize,
    browse_calls: AtomicUsize,
    reject_advertise: Mutex<Option<TransportError>>,
    reject_browse: Mutex<Option<TransportError>>,
}

struct Entry {
    record: ServiceRecord,
    addresses: Vec<IpAddr>,
    port: u16,
    /// Advertisement that owns the entry; None for published entries.
    owner: Option<u64>,
}

/// A live operation: what it is about and where its events go.
struct Watcher<E> {
    topic: String,
    tx: mpsc::UnboundedSender<E>,
}

impl Default for MemoryDnsSd {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDnsSd {
    pub fn new() -> Self {
        Self::with_host_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    /// Directory whose advertisements resolve to `host_address`.
    pub fn with_host_address(host_address: IpAddr) -> Self {
        Self {
            inner: Arc::new(Directory {
                host_address,
                next_id: AtomicU64::new(1),
                entries: DashMap::new(),
                advertisers: DashMap::new(),
                browsers: DashMap::new(),
                pending_resolves: DashMap::new(),
                advertise_calls: AtomicUsize::new(0),
                browse_calls: AtomicUsize::new(0),
                reject_advertise: Mutex::new(None),
                reject_browse: Mutex::new(None),
            }),
        }
    }

    // ── Directory contents ────────────────────────────────────────────────────

    /// Add an entry with explicit addresses, as if some other host advertised it.
    pub fn publish(&self, record: ServiceRecord, addresses: Vec<IpAddr>, port: u16) {
        let kind = record.kind();
        let full_name = record.full_name();
        self.inner.entries.insert(
            full_name.clone(),
            Entry {
                record,
                addresses,
                port,
                owner: None,
            },
        );
        self.inner.entry_added(&full_name);
        self.inner.notify_browsers(&kind);
    }

    pub fn unpublish(&self, record: &ServiceRecord) {
        if self.inner.entries.remove(&record.full_name()).is_some() {
            self.inner.notify_browsers(&record.kind());
        }
    }

    /// Current instances of `service_type`.
    pub fn records(&self, service_type: &ServiceType) -> BTreeSet<ServiceRecord> {
        self.inner.records_of(service_type)
    }

    // ── Fault injection ───────────────────────────────────────────────────────

    /// Fail every live advertisement. Returns how many were hit.
    pub fn fail_advertisements(&self, error: TransportError) -> usize {
        fail_all(&self.inner.advertisers, || AdvertiseEvent::Failed(error.clone()))
    }

    /// Fail every live browse. Returns how many were hit.
    pub fn fail_browses(&self, error: TransportError) -> usize {
        fail_all(&self.inner.browsers, || BrowseEvent::Failed(error.clone()))
    }

    /// Fail every resolution still waiting for its record.
    pub fn fail_pending_resolves(&self, error: TransportError) -> usize {
        let ids: Vec<u64> = self.inner.pending_resolves.iter().map(|w| *w.key()).collect();
        let mut hit = 0;
        for id in ids {
            if let Some((_, watcher)) = self.inner.pending_resolves.remove(&id) {
                if watcher.tx.send(ResolveEvent::Failed(error.clone())).is_ok() {
                    hit += 1;
                }
            }
        }
        hit
    }

    /// Make the next `advertise` call fail synchronously.
    pub fn reject_next_advertise(&self, error: TransportError) {
        *lock(&self.inner.reject_advertise) = Some(error);
    }

    /// Make the next `browse` call fail synchronously.
    pub fn reject_next_browse(&self, error: TransportError) {
        *lock(&self.inner.reject_browse) = Some(error);
    }

    // ── Inspection ────────────────────────────────────────────────────────────

    pub fn advertise_calls(&self) -> usize {
        self.inner.advertise_calls.load(Ordering::SeqCst)
    }

    pub fn browse_calls(&self) -> usize {
        self.inner.browse_calls.load(Ordering::SeqCst)
    }

    pub fn active_advertisements(&self) -> usize {
        self.inner.advertisers.len()
    }

    pub fn active_browses(&self) -> usize {
        self.inner.browsers.len()
    }

    pub fn pending_resolves(&self) -> usize {
        self.inner.pending_resolves.len()
    }
}

impl DnsSd for MemoryDnsSd {
    fn advertise(
        &self,
        record: &ServiceRecord,
        port: u16,
    ) -> Result<Subscription<AdvertiseEvent>, TransportError> {
        self.inner.advertise_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.inner.reject_advertise).take() {
            return Err(error);
        }

        let id = self.inner.next_id();
        let full_name = record.full_name();
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(AdvertiseEvent::Registered);

        self.inner.entries.insert(
            full_name.clone(),
            Entry {
                record: record.clone(),
                addresses: vec![self.inner.host_address],
                port,
                owner: Some(id),
            },
        );
        self.inner.advertisers.insert(
            id,
            Watcher {
                topic: full_name.clone(),
                tx,
            },
        );
        debug!(id, name = %full_name, port, "memory advertisement registered");
        self.inner.entry_added(&full_name);
        self.inner.notify_browsers(&record.kind());

        let dir = self.inner.clone();
        Ok(Subscription::new(rx, move || dir.withdraw(id)))
    }

    fn browse(
        &self,
        service_type: &ServiceType,
    ) -> Result<Subscription<BrowseEvent>, TransportError> {
        self.inner.browse_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.inner.reject_browse).take() {
            return Err(error);
        }

        let id = self.inner.next_id();
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(BrowseEvent::Ready);
        let current = self.inner.records_of(service_type);
        if !current.is_empty() {
            let _ = tx.send(BrowseEvent::Results(current));
        }
        self.inner.browsers.insert(
            id,
            Watcher {
                topic: service_type.qualified(),
                tx,
            },
        );

        let dir = self.inner.clone();
        Ok(Subscription::new(rx, move || {
            dir.browsers.remove(&id);
        }))
    }

    fn resolve(
        &self,
        record: &ServiceRecord,
    ) -> Result<Subscription<ResolveEvent>, TransportError> {
        let id = self.inner.next_id();
        let full_name = record.full_name();
        let (tx, rx) = mpsc::unbounded_channel();

        let resolved = self.inner.entries.get(&full_name).map(|e| ResolveEvent::Resolved {
            addresses: e.addresses.clone(),
            port: e.port,
        });
        match resolved {
            Some(event) => {
                let _ = tx.send(event);
            }
            None => {
                self.inner.pending_resolves.insert(id, Watcher { topic: full_name, tx });
            }
        }

        let dir = self.inner.clone();
        Ok(Subscription::new(rx, move || {
            dir.pending_resolves.remove(&id);
        }))
    }
}

impl Directory {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn records_of(&self, service_type: &ServiceType) -> BTreeSet<ServiceRecord> {
        self.entries
            .iter()
            .filter(|e| e.record.kind() == *service_type)
            .map(|e| e.record.clone())
            .collect()
    }

    fn notify_browsers(&self, service_type: &ServiceType) {
        let results = self.records_of(service_type);
        let key = service_type.qualified();
        for browser in self.browsers.iter().filter(|b| b.topic == key) {
            let _ = browser.tx.send(BrowseEvent::Results(results.clone()));
        }
    }

    /// Answer resolutions that were waiting for `full_name`.
    fn entry_added(&self, full_name: &str) {
        let Some(event) = self.entries.get(full_name).map(|e| ResolveEvent::Resolved {
            addresses: e.addresses.clone(),
            port: e.port,
        }) else {
            return;
        };
        let waiting: Vec<u64> = self
            .pending_resolves
            .iter()
            .filter(|w| w.topic == full_name)
            .map(|w| *w.key())
            .collect();
        for id in waiting {
            if let Some((_, watcher)) = self.pending_resolves.remove(&id) {
                let _ = watcher.tx.send(event.clone());
            }
        }
    }

    /// Withdraw advertisement `id` and the entry it owns.
    fn withdraw(&self, id: u64) {
        let Some((_, watcher)) = self.advertisers.remove(&id) else {
            return;
        };
        let removed = self
            .entries
            .remove_if(&watcher.topic, |_, e| e.owner == Some(id))
            .map(|(_, e)| e.record);
        if let Some(record) = removed {
            debug!(id, name = %watcher.topic, "memory advertisement withdrawn");
            self.notify_browsers(&record.kind());
        }
    }
}

fn fail_all<E>(watchers: &DashMap<u64, Watcher<E>>, event: impl Fn() -> E) -> usize {
    watchers
        .iter()
        .filter(|w| w.tx.send(event()).is_ok())
        .count()
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
