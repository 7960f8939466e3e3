//! One chat session with one peer: a TCP stream upgraded to WebSocket.
//!
//! Lifecycle:
//!   Setup → Ready → Cancelled   (either side closed cleanly, or `stop()`)
//!   Setup → Ready → Failed      (transport error)
//!   Setup → Failed              (connect or handshake error)
//!   Setup → Cancelled           (`stop()` before the session came up)
//!
//! A connection is either *outbound* (this side dialled the peer and
//! initiated the session) or *inbound* (wraps a stream accepted by a
//! `ServiceListener`). After `start()`, a driver task owns the socket; the
//! handle talks to it over a command channel and observes its state.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use lanchat_core::{Host, TransportError};

use crate::delegate::{ConnectionDelegate, DelegateSlot};
use crate::frame::{self, Inbound};
use crate::socket::{enable_keepalive, KEEPALIVE_IDLE};
use crate::websocket::Session;

/// Upper bound on the closing handshake when stopping.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Setup,
    Ready,
    Failed(TransportError),
    Cancelled,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed(_) | ConnectionState::Cancelled)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Setup => f.write_str("setup"),
            ConnectionState::Ready => f.write_str("ready"),
            ConnectionState::Failed(e) => write!(f, "failed: {e}"),
            ConnectionState::Cancelled => f.write_str("cancelled"),
        }
    }
}

enum Transport {
    Dial(SocketAddr),
    Accepted(TcpStream),
}

enum Command {
    Send(String),
    Stop,
}

pub struct PeerConnection {
    initiated: bool,
    peer: Option<SocketAddr>,
    pending: Option<Transport>,
    started: bool,
    keepalive_idle: Duration,
    state: Arc<watch::Sender<ConnectionState>>,
    delegate: DelegateSlot<dyn ConnectionDelegate>,
    commands: mpsc::UnboundedSender<Command>,
    command_rx: Option<mpsc::UnboundedReceiver<Command>>,
}

impl PeerConnection {
    /// A connection that will dial `peer` when started.
    pub fn outbound(peer: SocketAddr, delegate: Weak<dyn ConnectionDelegate>) -> Self {
        Self::build(true, Some(peer), Transport::Dial(peer), delegate)
    }

    /// Dial a resolved host.
    pub fn to_host(host: &Host, delegate: Weak<dyn ConnectionDelegate>) -> Self {
        Self::outbound(host.socket_addr(), delegate)
    }

    /// Wrap a stream accepted by a listener.
    pub fn inbound(stream: TcpStream, delegate: Weak<dyn ConnectionDelegate>) -> Self {
        let peer = stream.peer_addr().ok();
        Self::build(false, peer, Transport::Accepted(stream), delegate)
    }

    fn build(
        initiated: bool,
        peer: Option<SocketAddr>,
        transport: Transport,
        delegate: Weak<dyn ConnectionDelegate>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Setup);
        Self {
            initiated,
            peer,
            pending: Some(transport),
            started: false,
            keepalive_idle: KEEPALIVE_IDLE,
            state: Arc::new(state),
            delegate: DelegateSlot::new(delegate),
            commands,
            command_rx: Some(command_rx),
        }
    }

    pub fn with_keepalive_idle(mut self, idle: Duration) -> Self {
        self.keepalive_idle = idle;
        self
    }

    /// True for the side that dialled.
    pub fn initiated(&self) -> bool {
        self.initiated
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn set_delegate(&self, delegate: Weak<dyn ConnectionDelegate>) {
        self.delegate.set(delegate);
    }

    /// Begin connecting (outbound) or the server handshake (inbound).
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Panics
    ///
    /// If the connection was already started or has been stopped.
    pub fn start(&mut self) {
        let state = self.state();
        assert!(
            !self.started && state == ConnectionState::Setup,
            "PeerConnection::start on a connection that is not fresh (state {state})"
        );
        let (Some(transport), Some(commands)) = (self.pending.take(), self.command_rx.take()) else {
            panic!("PeerConnection::start called twice");
        };
        self.started = true;

        let driver = Driver {
            peer: self.peer,
            initiated: self.initiated,
            keepalive_idle: self.keepalive_idle,
            state: self.state.clone(),
            delegate: self.delegate.clone(),
            commands,
        };
        tokio::spawn(driver.run(transport));
    }

    /// Queue one text message.
    ///
    /// A connection that has already ended (by either side, or by failure)
    /// drops the message; callers reacting to a queued event may race the
    /// teardown.
    ///
    /// # Panics
    ///
    /// If the connection is still in `Setup`.
    pub fn send(&self, message: &str) {
        let state = self.state();
        assert!(
            state != ConnectionState::Setup,
            "PeerConnection::send while {state}"
        );
        if state.is_terminal() {
            debug!(peer = ?self.peer, %state, "dropping message on ended connection");
            return;
        }
        let _ = self.commands.send(Command::Send(message.to_owned()));
    }

    /// Tear the session down. Idempotent. Stopping a connection that was
    /// never started cancels it without any delegate callbacks.
    pub fn stop(&self) {
        if !self.started {
            self.state.send_if_modified(|s| {
                if *s == ConnectionState::Setup {
                    *s = ConnectionState::Cancelled;
                    true
                } else {
                    false
                }
            });
            return;
        }
        let _ = self.commands.send(Command::Stop);
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("initiated", &self.initiated)
            .field("peer", &self.peer)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

// ── Driver ────────────────────────────────────────────────────────────────────

struct Driver {
    peer: Option<SocketAddr>,
    initiated: bool,
    keepalive_idle: Duration,
    state: Arc<watch::Sender<ConnectionState>>,
    delegate: DelegateSlot<dyn ConnectionDelegate>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Driver {
    async fn run(mut self, transport: Transport) {
        let keepalive_idle = self.keepalive_idle;
        let mut session = tokio::select! {
            biased;
            _ = wait_for_stop(&mut self.commands) => {
                debug!(peer = ?self.peer, "connection stopped during setup");
                self.finish_cancelled();
                return;
            }
            result = establish(transport, keepalive_idle) => match result {
                Ok(session) => session,
                Err(e) => {
                    warn!(peer = ?self.peer, error = %e, "connection setup failed");
                    self.finish_failed(e);
                    return;
                }
            },
        };

        // Ready is observable before the delegate hears about it.
        self.state.send_replace(ConnectionState::Ready);
        info!(peer = ?self.peer, initiated = self.initiated, "connection ready");
        self.delegate.notify(|d| d.on_connected());

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => {
                        trace!(peer = ?self.peer, len = text.len(), "sending message");
                        if let Err(e) = session.send(Message::Text(text)).await {
                            let error = frame::transport_error(e);
                            warn!(peer = ?self.peer, error = %error, "send failed");
                            if error == TransportError::PeerClosed {
                                self.delegate.notify(|d| d.on_disconnected());
                            }
                            self.finish_failed(error);
                            return;
                        }
                    }
                    Some(Command::Stop) | None => {
                        if tokio::time::timeout(CLOSE_TIMEOUT, session.close()).await.is_err() {
                            debug!(peer = ?self.peer, "closing handshake timed out");
                        }
                        info!(peer = ?self.peer, "connection stopped");
                        self.finish_cancelled();
                        return;
                    }
                },
                item = session.recv() => match frame::classify(item) {
                    Inbound::Text(text) => self.delegate.notify(|d| d.on_message(text)),
                    Inbound::Ignored => trace!(peer = ?self.peer, "ignored frame"),
                    Inbound::Closed => {
                        info!(peer = ?self.peer, "peer closed connection");
                        // Deliver the queued close reply.
                        let _ = tokio::time::timeout(CLOSE_TIMEOUT, session.flush()).await;
                        self.finish_cancelled();
                        return;
                    }
                    Inbound::Failed(error) => {
                        warn!(peer = ?self.peer, error = %error, "receive failed");
                        self.finish_failed(error);
                        return;
                    }
                },
            }
        }
    }

    fn finish_cancelled(&self) {
        let was_ready = *self.state.borrow() == ConnectionState::Ready;
        self.state.send_replace(ConnectionState::Cancelled);
        if was_ready {
            self.delegate.notify(|d| d.on_disconnected());
        }
    }

    fn finish_failed(&self, error: TransportError) {
        self.state.send_replace(ConnectionState::Failed(error.clone()));
        self.delegate.notify(|d| d.on_failed(error));
    }
}

async fn establish(
    transport: Transport,
    keepalive_idle: Duration,
) -> Result<Session, TransportError> {
    match transport {
        Transport::Dial(addr) => {
            let stream = TcpStream::connect(addr).await?;
            if let Err(e) = enable_keepalive(&stream, keepalive_idle) {
                debug!(peer = %addr, error = %e, "keepalive not enabled");
            }
            Session::connect(stream, addr)
                .await
                .map_err(frame::transport_error)
        }
        Transport::Accepted(stream) => {
            if let Err(e) = enable_keepalive(&stream, keepalive_idle) {
                debug!(error = %e, "keepalive not enabled");
            }
            Session::accept(stream).await.map_err(frame::transport_error)
        }
    }
}

/// Resolves once a stop is queued. Sends cannot be queued before Ready.
async fn wait_for_stop(commands: &mut mpsc::UnboundedReceiver<Command>) {
    loop {
        match commands.recv().await {
            Some(Command::Stop) | None => return,
            Some(Command::Send(_)) => continue,
        }
    }
}
