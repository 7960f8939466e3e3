//! Browses for chat services and reports the full result set on every change.
//!
//! Restart behaviour matches `ServiceListener`: a defunct name service is
//! answered by tearing the browse down and starting a new one, visible to
//! the delegate only as `on_cancelled(true)` and a fresh `on_ready()`.

use std::sync::{Arc, Weak};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use lanchat_core::{LanchatConfig, ServiceType, TransportError};

use crate::delegate::{DelegateSlot, DiscovererDelegate};
use crate::dnssd::{BrowseEvent, DnsSd};
use crate::lifecycle::{
    GenerationEnd, LifecycleState, LifecycleStatus, Recovery, RestartPolicy, StatusCell,
};
use crate::subscription::{stop_pair, StopHandle, StopSignal};

pub struct ServiceDiscoverer {
    backend: Arc<dyn DnsSd>,
    service_type: ServiceType,
    restart: RestartPolicy,
    delegate: DelegateSlot<dyn DiscovererDelegate>,
    status: StatusCell,
    stop: Option<StopHandle>,
}

impl ServiceDiscoverer {
    pub fn new(
        backend: Arc<dyn DnsSd>,
        service_type: ServiceType,
        delegate: Weak<dyn DiscovererDelegate>,
    ) -> Self {
        Self {
            backend,
            service_type,
            restart: RestartPolicy::unbounded(),
            delegate: DelegateSlot::new(delegate),
            status: StatusCell::new(RestartPolicy::unbounded()),
            stop: None,
        }
    }

    pub fn from_config(
        backend: Arc<dyn DnsSd>,
        config: &LanchatConfig,
        delegate: Weak<dyn DiscovererDelegate>,
    ) -> Self {
        Self::new(backend, config.discovery.service_type(), delegate)
            .with_restart_policy(RestartPolicy::from_config(config))
    }

    pub fn with_restart_policy(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    /// Begin browsing. Must be called inside a Tokio runtime.
    ///
    /// # Panics
    ///
    /// If the discoverer is already running.
    pub fn start(&mut self) {
        assert!(
            !self.status.get().active,
            "ServiceDiscoverer::start while already running"
        );
        self.status.set_policy(self.restart);
        self.status.activate();
        let (stop, signal) = stop_pair();
        self.stop = Some(stop);

        let driver = Driver {
            backend: self.backend.clone(),
            service_type: self.service_type.clone(),
            delegate: self.delegate.clone(),
            status: self.status.clone(),
            stop: signal,
        };
        info!(service_type = %self.service_type, "discoverer starting");
        tokio::spawn(driver.run());
    }

    /// Cancel the browse. Idempotent.
    pub fn stop(&self) {
        if let Some(stop) = &self.stop {
            stop.request();
        }
    }

    pub fn set_delegate(&self, delegate: Weak<dyn DiscovererDelegate>) {
        self.delegate.set(delegate);
    }

    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
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
}

impl Drop for ServiceDiscoverer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Driver {
    backend: Arc<dyn DnsSd>,
    service_type: ServiceType,
    delegate: DelegateSlot<dyn DiscovererDelegate>,
    status: StatusCell,
    stop: StopSignal,
}

impl Driver {
    async fn run(mut self) {
        loop {
            self.status.starting();
            let error = match self.run_generation().await {
                GenerationEnd::Stopped => break,
                GenerationEnd::Failed(error) => error,
            };
            match self.status.recovery_for(&error) {
                Recovery::Restart => {
                    info!(
                        service_type = %self.service_type,
                        "name service defunct, restarting browse"
                    );
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
                    warn!(service_type = %self.service_type, error = %error, "discoverer failed");
                    self.status.failed();
                    self.delegate.notify(|d| d.on_failed(error));
                    break;
                }
            }
        }

        self.status.cancelled();
        info!(service_type = %self.service_type, "discoverer cancelled");
        self.delegate.notify(|d| d.on_cancelled(false));
    }

    async fn run_generation(&mut self) -> GenerationEnd {
        let mut browse = match self.backend.browse(&self.service_type) {
            Ok(sub) => sub,
            Err(e) => return GenerationEnd::Failed(e),
        };

        loop {
            tokio::select! {
                biased;
                _ = self.stop.requested() => {
                    browse.cancel();
                    return GenerationEnd::Stopped;
                }
                event = browse.next() => match event {
                    Some(BrowseEvent::Ready) => {
                        if self.status.get().state != LifecycleState::Ready {
                            self.status.ready();
                            info!(service_type = %self.service_type, "discoverer ready");
                            self.delegate.notify(|d| d.on_ready());
                        }
                    }
                    Some(BrowseEvent::Results(results)) => {
                        debug!(count = results.len(), "browse results changed");
                        self.delegate.notify(|d| d.on_results_changed(results));
                    }
                    Some(BrowseEvent::Failed(e)) => {
                        browse.cancel();
                        return GenerationEnd::Failed(e);
                    }
                    None => {
                        return GenerationEnd::Failed(TransportError::NameService(
                            "browse ended unexpectedly".into(),
                        ));
                    }
                },
            }
        }
    }
}
