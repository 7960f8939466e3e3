//! Event subscriptions and stop signals shared by every component.
//!
//! A `Subscription` is an owned handle on a running transport operation
//! (advertisement, browse, resolution, path monitor). Events arrive on an
//! unbounded channel; cancelling or dropping the subscription releases the
//! underlying transport.

use tokio::sync::{mpsc, watch};

/// Owned handle on a transport operation and the events it reports.
pub struct Subscription<E> {
    events: mpsc::UnboundedReceiver<E>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl<E> Subscription<E> {
    /// Wrap an event channel; `cancel` runs once, on `cancel()` or drop.
    pub fn new(events: mpsc::UnboundedReceiver<E>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            events,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Next event. `None` once the transport has gone away.
    pub async fn next(&mut self) -> Option<E> {
        self.events.recv().await
    }

    /// Release the transport. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_none()
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<E> std::fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ── Stop signal ───────────────────────────────────────────────────────────────

/// Create a linked stop handle (held by the component) and signal (held by its task).
pub(crate) fn stop_pair() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx })
}

/// Requests teardown. Requesting twice is the same as requesting once.
#[derive(Debug)]
pub(crate) struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub(crate) fn request(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug)]
pub(crate) struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Resolves once stop has been requested or the handle is gone.
    pub(crate) async fn requested(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Like `requested`, but a dropped handle never counts as a stop.
    pub(crate) async fn explicitly_requested(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    pub(crate) fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }
}
