//! Delegate contracts between the core and the surrounding front-end.
//!
//! Components hold their delegate as a non-owning `Weak` reference: the
//! front-end owns both the component and the delegate, and a delegate that
//! has been dropped simply stops receiving callbacks. Callbacks for one
//! component are invoked from that component's task, one at a time.
//!
//! Every delegate trait is implemented for `mpsc::UnboundedSender<Event>`, so
//! a caller can consume callbacks as a stream of events instead.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, Weak};

use tokio::net::TcpStream;
use tokio::sync::mpsc;

use lanchat_core::{ServiceRecord, TransportError};

// ── Contracts ─────────────────────────────────────────────────────────────────

pub trait ConnectionDelegate: Send + Sync {
    fn on_connected(&self);
    fn on_disconnected(&self);
    fn on_message(&self, text: String);
    fn on_failed(&self, error: TransportError);
}

pub trait ListenerDelegate: Send + Sync {
    fn on_ready(&self);
    /// An accepted, not yet upgraded, inbound stream. Wrap it with
    /// `PeerConnection::inbound` to chat over it.
    fn on_new_connection(&self, stream: TcpStream);
    fn on_failed(&self, error: TransportError);
    fn on_cancelled(&self, is_restarting: bool);
}

pub trait DiscovererDelegate: Send + Sync {
    fn on_ready(&self);
    fn on_results_changed(&self, results: BTreeSet<ServiceRecord>);
    fn on_failed(&self, error: TransportError);
    fn on_cancelled(&self, is_restarting: bool);
}

// ── Events ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    Message(String),
    Failed(TransportError),
}

#[derive(Debug)]
pub enum ListenerEvent {
    Ready,
    NewConnection(TcpStream),
    Failed(TransportError),
    Cancelled { is_restarting: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Ready,
    ResultsChanged(BTreeSet<ServiceRecord>),
    Failed(TransportError),
    Cancelled { is_restarting: bool },
}

impl ConnectionDelegate for mpsc::UnboundedSender<ConnectionEvent> {
    fn on_connected(&self) {
        let _ = self.send(ConnectionEvent::Connected);
    }
    fn on_disconnected(&self) {
        let _ = self.send(ConnectionEvent::Disconnected);
    }
    fn on_message(&self, text: String) {
        let _ = self.send(ConnectionEvent::Message(text));
    }
    fn on_failed(&self, error: TransportError) {
        let _ = self.send(ConnectionEvent::Failed(error));
    }
}

impl ListenerDelegate for mpsc::UnboundedSender<ListenerEvent> {
    fn on_ready(&self) {
        let _ = self.send(ListenerEvent::Ready);
    }
    fn on_new_connection(&self, stream: TcpStream) {
        let _ = self.send(ListenerEvent::NewConnection(stream));
    }
    fn on_failed(&self, error: TransportError) {
        let _ = self.send(ListenerEvent::Failed(error));
    }
    fn on_cancelled(&self, is_restarting: bool) {
        let _ = self.send(ListenerEvent::Cancelled { is_restarting });
    }
}

impl DiscovererDelegate for mpsc::UnboundedSender<DiscoveryEvent> {
    fn on_ready(&self) {
        let _ = self.send(DiscoveryEvent::Ready);
    }
    fn on_results_changed(&self, results: BTreeSet<ServiceRecord>) {
        let _ = self.send(DiscoveryEvent::ResultsChanged(results));
    }
    fn on_failed(&self, error: TransportError) {
        let _ = self.send(DiscoveryEvent::Failed(error));
    }
    fn on_cancelled(&self, is_restarting: bool) {
        let _ = self.send(DiscoveryEvent::Cancelled { is_restarting });
    }
}

/// A channel-backed delegate and the receiving end of its events.
///
/// The returned `Arc` is the owning reference: keep it alive for as long as
/// the component should deliver events.
pub fn event_channel<E>() -> (Arc<mpsc::UnboundedSender<E>>, mpsc::UnboundedReceiver<E>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(tx), rx)
}

// ── Slot ──────────────────────────────────────────────────────────────────────

/// Shared, replaceable, non-owning delegate reference.
pub(crate) struct DelegateSlot<T: ?Sized> {
    inner: Arc<Mutex<Option<Weak<T>>>>,
}

impl<T: ?Sized> Clone for DelegateSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: ?Sized> DelegateSlot<T> {
    pub(crate) fn new(delegate: Weak<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(delegate))),
        }
    }

    pub(crate) fn set(&self, delegate: Weak<T>) {
        let mut slot = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(delegate);
    }

    pub(crate) fn get(&self) -> Option<Arc<T>> {
        let slot = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().and_then(Weak::upgrade)
    }

    /// Invoke `f` on the delegate if it is still alive.
    pub(crate) fn notify(&self, f: impl FnOnce(&T)) {
        if let Some(delegate) = self.get() {
            f(&delegate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_delegate_forwards_events() {
        let (delegate, mut events) = event_channel::<ConnectionEvent>();
        let weak = Arc::downgrade(&delegate) as Weak<dyn ConnectionDelegate>;
        let slot: DelegateSlot<dyn ConnectionDelegate> = DelegateSlot::new(weak);

        slot.notify(|d| d.on_connected());
        slot.notify(|d| d.on_message("hi".to_string()));

        assert_eq!(events.try_recv().unwrap(), ConnectionEvent::Connected);
        assert_eq!(events.try_recv().unwrap(), ConnectionEvent::Message("hi".to_string()));
    }

    #[test]
    fn dropped_delegate_is_silently_skipped() {
        let (delegate, mut events) = event_channel::<DiscoveryEvent>();
        let weak = Arc::downgrade(&delegate) as Weak<dyn DiscovererDelegate>;
        let slot: DelegateSlot<dyn DiscovererDelegate> = DelegateSlot::new(weak);
        drop(delegate);

        slot.notify(|d| d.on_ready());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn replaced_delegate_receives_later_events() {
        let (first, mut first_events) = event_channel::<ConnectionEvent>();
        let (second, mut second_events) = event_channel::<ConnectionEvent>();
        let weak = Arc::downgrade(&first) as Weak<dyn ConnectionDelegate>;
        let slot: DelegateSlot<dyn ConnectionDelegate> = DelegateSlot::new(weak);

        slot.notify(|d| d.on_connected());
        slot.set(Arc::downgrade(&second) as Weak<dyn ConnectionDelegate>);
        slot.notify(|d| d.on_disconnected());

        assert_eq!(first_events.try_recv().unwrap(), ConnectionEvent::Connected);
        assert!(first_events.try_recv().is_err());
        assert_eq!(second_events.try_recv().unwrap(), ConnectionEvent::Disconnected);
    }
}
