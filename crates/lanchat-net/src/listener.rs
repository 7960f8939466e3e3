//! Advertises this host as a chat service and accepts inbound streams.
//!
//! A running listener owns one TCP listening socket and one DNS-SD
//! advertisement. If the name service goes defunct, the pair is torn down
//! and rebuilt without surfacing an error; the delegate only sees
//! `on_cancelled(true)` followed by a fresh `on_ready()`. Any other failure
//! is reported once through `on_failed` and ends the listener.

use std::net::Ipv4Addr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use lanchat_core::{LanchatConfig, ServiceRecord, ServiceType, TransportError};

use crate::delegate::{DelegateSlot, ListenerDelegate};
use crate::dnssd::{AdvertiseEvent, DnsSd};
use crate::lifecycle::{
    GenerationEnd, LifecycleState, LifecycleStatus, Recovery, RestartPolicy, StatusCell,
};
use crate::socket::{enable_keepalive, KEEPALIVE_IDLE};
use crate::subscription::{stop_pair, StopHandle, StopSignal};

#[derive(Debug, Clone)]
pub struct ListenerOptions {
    pub service_type: ServiceType,
    /// Instance name other hosts will see.
    pub name: String,
    /// 0 = OS-assigned.
    pub port: u16,
    pub keepalive_idle: Duration,
    pub restart: RestartPolicy,
}

impl ListenerOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            service_type: ServiceType::default(),
            name: name.into(),
            port: 0,
            keepalive_idle: KEEPALIVE_IDLE,
            restart: RestartPolicy::unbounded(),
        }
    }

    pub fn from_config(config: &LanchatConfig) -> Self {
        Self {
            service_type: config.discovery.service_type(),
            name: config.identity.resolved_display_name(),
            port: config.network.listen_port,
            keepalive_idle: config.network.keepalive_idle(),
            restart: RestartPolicy::from_config(config),
        }
    }

    pub fn record(&self) -> ServiceRecord {
        ServiceRecord::new(self.name.clone(), &self.service_type)
    }
}

/// Anything that can report the port a listener is bound to.
pub trait PortSource: Send + Sync + 'static {
    fn bound_port(&self) -> Option<u16>;
}

impl PortSource for u16 {
    fn bound_port(&self) -> Option<u16> {
        Some(*self)
    }
}

impl PortSource for Option<u16> {
    fn bound_port(&self) -> Option<u16> {
        *self
    }
}

/// Live view of a listener's bound port, usable after the listener moved.
#[derive(Debug, Clone)]
pub struct ListenerPort {
    rx: watch::Receiver<Option<u16>>,
}

impl PortSource for ListenerPort {
    fn bound_port(&self) -> Option<u16> {
        *self.rx.borrow()
    }
}

pub struct ServiceListener {
    backend: Arc<dyn DnsSd>,
    options: ListenerOptions,
    delegate: DelegateSlot<dyn ListenerDelegate>,
    status: StatusCell,
    port: Arc<watch::Sender<Option<u16>>>,
    stop: Option<StopHandle>,
}

impl ServiceListener {
    pub fn new(
        backend: Arc<dyn DnsSd>,
        options: ListenerOptions,
        delegate: Weak<dyn ListenerDelegate>,
    ) -> Self {
        let (port, _) = watch::channel(None);
        Self {
            status: StatusCell::new(options.restart),
            backend,
            options,
            delegate: DelegateSlot::new(delegate),
            port: Arc::new(port),
            stop: None,
        }
    }

    /// Bind, advertise, and begin accepting. Must be called inside a Tokio
    /// runtime. A listener whose previous run has ended may be started again.
    ///
    /// # Panics
    ///
    /// If the listener is already running.
    pub fn start(&mut self) {
        assert!(
            !self.status.get().active,
            "ServiceListener::start while already running"
        );
        self.status.set_policy(self.options.restart);
        self.status.activate();
        let (stop, signal) = stop_pair();
        self.stop = Some(stop);

        let driver = Driver {
            backend: self.backend.clone(),
            record: self.options.record(),
            requested_port: self.options.port,
            keepalive_idle: self.options.keepalive_idle,
            delegate: self.delegate.clone(),
            status: self.status.clone(),
            port: self.port.clone(),
            stop: signal,
        };
        info!(
            name = %self.options.name,
            service_type = %self.options.service_type,
            "listener starting"
        );
        tokio::spawn(driver.run());
    }

    /// Withdraw the advertisement and close the socket. Idempotent.
    pub fn stop(&self) {
        if let Some(stop) = &self.stop {
            stop.request();
        }
    }

    pub fn set_delegate(&self, delegate: Weak<dyn ListenerDelegate>) {
        self.delegate.set(delegate);
    }

    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    pub fn status(&self) -> LifecycleStatus {
        self.status.get()
    }

    pub fn state(&self) -> LifecycleState {
        self.status.get().state
    }

    pub fn is_restarting(&self) -> bool {
        self.status.get().is_restarting
    }

    pub fn status_changes(&self) -> watch::Receiver<LifecycleStatus> {
        self.status.subscribe()
    }

    /// Port currently bound, if any.
    pub fn port(&self) -> Option<u16> {
        *self.port.borrow()
    }

    pub fn port_handle(&self) -> ListenerPort {
        ListenerPort {
            rx: self.port.subscribe(),
        }
    }
}

impl PortSource for ServiceListener {
    fn bound_port(&self) -> Option<u16> {
        self.port()
    }
}

impl Drop for ServiceListener {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Driver ────────────────────────────────────────────────────────────────────

struct Driver {
    backend: Arc<dyn DnsSd>,
    record: ServiceRecord,
    requested_port: u16,
    keepalive_idle: Duration,
    delegate: DelegateSlot<dyn ListenerDelegate>,
    status: StatusCell,
    port: Arc<watch::Sender<Option<u16>>>,
    stop: StopSignal,
}

impl Driver {
    async fn run(mut self) {
        loop {
            self.status.starting();
            let end = self.run_generation().await;
            self.port.send_replace(None);

            let error = match end {
                GenerationEnd::Stopped => break,
                GenerationEnd::Failed(error) => error,
            };
            match self.status.recovery_for(&error) {
                Recovery::Restart => {
                    info!(name = %self.record.name, "name service defunct, restarting listener");
                    self.status.cancelled_for_restart();
                    self.delegate.notify(|d| d.on_cancelled(true));

                    let delay = self.status.policy().delay;
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = self.stop.requested() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    if self.stop.is_requested() {
                        break;
                    }
                }
                Recovery::Surface => {
                    warn!(name = %self.record.name, error = %error, "listener failed");
                    self.status.failed();
                    self.delegate.notify(|d| d.on_failed(error));
                    break;
                }
            }
        }

        self.status.cancelled();
        info!(name = %self.record.name, "listener cancelled");
        self.delegate.notify(|d| d.on_cancelled(false));
    }

    /// One socket + advertisement pair, from bind until stop or failure.
    async fn run_generation(&mut self) -> GenerationEnd {
        let listener = match TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.requested_port)).await {
            Ok(l) => l,
            Err(e) => return GenerationEnd::Failed(e.into()),
        };
        let port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => return GenerationEnd::Failed(e.into()),
        };
        self.port.send_replace(Some(port));
        debug!(port, "listener bound");

        let mut advertisement = match self.backend.advertise(&self.record, port) {
            Ok(sub) => sub,
            Err(e) => return GenerationEnd::Failed(e),
        };

        loop {
            tokio::select! {
                biased;
                _ = self.stop.requested() => {
                    advertisement.cancel();
                    return GenerationEnd::Stopped;
                }
                event = advertisement.next() => match event {
                    Some(AdvertiseEvent::Registered) => {
                        if self.status.get().state != LifecycleState::Ready {
                            self.status.ready();
                            info!(name = %self.record.name, port, "listener ready");
                            self.delegate.notify(|d| d.on_ready());
                        }
                    }
                    Some(AdvertiseEvent::Failed(e)) => {
                        advertisement.cancel();
                        return GenerationEnd::Failed(e);
                    }
                    None => {
                        return GenerationEnd::Failed(TransportError::NameService(
                            "advertisement ended unexpectedly".into(),
                        ));
                    }
                },
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = enable_keepalive(&stream, self.keepalive_idle) {
                            debug!(peer = %peer, error = %e, "keepalive not enabled");
                        }
                        info!(peer = %peer, "inbound connection");
                        self.delegate.notify(|d| d.on_new_connection(stream));
                    }
                    Err(e) => {
                        advertisement.cancel();
                        return GenerationEnd::Failed(e.into());
                    }
                },
            }
        }
    }
}
