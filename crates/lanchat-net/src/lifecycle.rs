//! Lifecycle bookkeeping shared by `ServiceListener` and `ServiceDiscoverer`.
//!
//! Both components run one *transport generation* at a time. A generation
//! ends when it is stopped or fails; a defunct name service ends it with a
//! silent restart, anything else ends the component.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use lanchat_core::{LanchatConfig, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Never started.
    Idle,
    /// A transport generation is being set up.
    Starting,
    Ready,
    Failed,
    Cancelled,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Starting => "starting",
            LifecycleState::Ready => "ready",
            LifecycleState::Failed => "failed",
            LifecycleState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleStatus {
    pub state: LifecycleState,
    /// Set while a generation is being torn down to be replaced.
    pub is_restarting: bool,
    /// True from `start()` until the final cancellation has been reported.
    pub active: bool,
    /// Silent restarts since the component was started.
    pub restarts: u32,
}

impl Default for LifecycleStatus {
    fn default() -> Self {
        Self {
            state: LifecycleState::Idle,
            is_restarting: false,
            active: false,
            restarts: 0,
        }
    }
}

/// How many silent restarts a component may perform, and how fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestartPolicy {
    /// Restarts allowed in a row without reaching Ready. None = unbounded.
    pub max_consecutive: Option<u32>,
    /// Pause before each restart.
    pub delay: Duration,
}

impl RestartPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn bounded(max_consecutive: u32, delay: Duration) -> Self {
        Self {
            max_consecutive: Some(max_consecutive),
            delay,
        }
    }

    pub fn from_config(config: &LanchatConfig) -> Self {
        Self {
            max_consecutive: config.discovery.max_restarts(),
            delay: config.discovery.restart_delay(),
        }
    }

    pub(crate) fn allows(&self, consecutive: u32) -> bool {
        self.max_consecutive.map_or(true, |max| consecutive < max)
    }
}

/// How a transport generation ended.
#[derive(Debug)]
pub(crate) enum GenerationEnd {
    Stopped,
    Failed(TransportError),
}

/// What the driver does after a failed generation.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Recovery {
    Restart,
    Surface,
}

/// Writer side of a component's status, held by its driver.
#[derive(Clone)]
pub(crate) struct StatusCell {
    tx: Arc<watch::Sender<LifecycleStatus>>,
    policy: RestartPolicy,
    consecutive: u32,
}

impl StatusCell {
    pub(crate) fn new(policy: RestartPolicy) -> Self {
        let (tx, _) = watch::channel(LifecycleStatus::default());
        Self {
            tx: Arc::new(tx),
            policy,
            consecutive: 0,
        }
    }

    pub(crate) fn get(&self) -> LifecycleStatus {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<LifecycleStatus> {
        self.tx.subscribe()
    }

    pub(crate) fn policy(&self) -> RestartPolicy {
        self.policy
    }

    pub(crate) fn set_policy(&mut self, policy: RestartPolicy) {
        self.policy = policy;
    }

    /// `start()` was called: mark active, clear restart bookkeeping.
    pub(crate) fn activate(&mut self) {
        self.consecutive = 0;
        self.tx.send_modify(|s| {
            s.state = LifecycleState::Starting;
            s.active = true;
            s.is_restarting = false;
            s.restarts = 0;
        });
    }

    pub(crate) fn starting(&self) {
        self.tx.send_modify(|s| {
            s.state = LifecycleState::Starting;
            s.is_restarting = false;
        });
    }

    pub(crate) fn ready(&mut self) {
        self.consecutive = 0;
        self.tx.send_modify(|s| s.state = LifecycleState::Ready);
    }

    /// Decide how to handle a failed generation.
    pub(crate) fn recovery_for(&mut self, error: &TransportError) -> Recovery {
        if error.is_dns_defunct() && self.policy.allows(self.consecutive) {
            self.consecutive += 1;
            Recovery::Restart
        } else {
            Recovery::Surface
        }
    }

    /// The generation is down and a new one will follow.
    pub(crate) fn cancelled_for_restart(&self) {
        self.tx.send_modify(|s| {
            s.state = LifecycleState::Cancelled;
            s.is_restarting = true;
            s.restarts += 1;
        });
    }

    pub(crate) fn failed(&self) {
        self.tx.send_modify(|s| s.state = LifecycleState::Failed);
    }

    /// Final cancellation: the component no longer owns a transport.
    pub(crate) fn cancelled(&self) {
        self.tx.send_modify(|s| {
            s.state = LifecycleState::Cancelled;
            s.is_restarting = false;
            s.active = false;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_policy_always_restarts_defunct() {
        let mut cell = StatusCell::new(RestartPolicy::unbounded());
        cell.activate();
        for _ in 0..100 {
            assert_eq!(cell.recovery_for(&TransportError::DnsServiceDefunct), Recovery::Restart);
        }
    }

    #[test]
    fn other_errors_are_surfaced() {
        let mut cell = StatusCell::new(RestartPolicy::unbounded());
        let e = TransportError::Io {
            kind: std::io::ErrorKind::AddrInUse,
            message: "in use".into(),
        };
        assert_eq!(cell.recovery_for(&e), Recovery::Surface);
    }

    #[test]
    fn bounded_policy_counts_consecutive_restarts() {
        let mut cell = StatusCell::new(RestartPolicy::bounded(2, Duration::ZERO));
        cell.activate();
        assert_eq!(cell.recovery_for(&TransportError::DnsServiceDefunct), Recovery::Restart);
        assert_eq!(cell.recovery_for(&TransportError::DnsServiceDefunct), Recovery::Restart);
        assert_eq!(cell.recovery_for(&TransportError::DnsServiceDefunct), Recovery::Surface);

        cell.ready();
        assert_eq!(cell.recovery_for(&TransportError::DnsServiceDefunct), Recovery::Restart);
    }

    #[test]
    fn restart_flag_is_cleared_when_next_generation_starts() {
        let mut cell = StatusCell::new(RestartPolicy::unbounded());
        cell.activate();
        cell.cancelled_for_restart();
        assert!(cell.get().is_restarting);
        assert_eq!(cell.get().restarts, 1);
        assert!(cell.get().active);

        cell.starting();
        assert!(!cell.get().is_restarting);

        cell.cancelled();
        assert!(!cell.get().active);
        assert_eq!(cell.get().state, LifecycleState::Cancelled);
    }

    #[test]
    fn config_zero_means_unbounded() {
        let config = LanchatConfig::default();
        assert_eq!(RestartPolicy::from_config(&config), RestartPolicy::unbounded());
    }
}
