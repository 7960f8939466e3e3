//! Terminal side of one chat session.

use std::future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;

use lanchat_core::{Host, TransportError};
use lanchat_net::{
    event_channel, ConnectionDelegate, ConnectionEvent, ConnectionState, PeerConnection,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatStatus {
    Open,
    Ended,
}

/// One conversation. Each chat owns the delegate its connection reports to,
/// so events from an earlier connection never reach a later chat.
pub struct Chat {
    connection: PeerConnection,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    _delegate: Arc<mpsc::UnboundedSender<ConnectionEvent>>,
    display_name: String,
    peer_name: Option<String>,
}

impl Chat {
    /// Dial a host. Its name is known up front.
    pub fn outbound(host: &Host, keepalive_idle: Duration, display_name: String) -> Self {
        let (delegate, events) = event_channel();
        let weak = Arc::downgrade(&delegate) as Weak<dyn ConnectionDelegate>;
        let connection = PeerConnection::to_host(host, weak).with_keepalive_idle(keepalive_idle);
        let peer_name = Some(host.name.clone());
        let mut chat = Self::new(connection, delegate, events, display_name, peer_name);
        chat.connection.start();
        chat
    }

    /// Take over a connection accepted by the listener. A joining peer
    /// introduces itself with its first message.
    pub fn inbound(stream: TcpStream, keepalive_idle: Duration, display_name: String) -> Self {
        let (delegate, events) = event_channel();
        let weak = Arc::downgrade(&delegate) as Weak<dyn ConnectionDelegate>;
        let connection = PeerConnection::inbound(stream, weak).with_keepalive_idle(keepalive_idle);
        let mut chat = Self::new(connection, delegate, events, display_name, None);
        chat.connection.start();
        chat
    }

    fn new(
        connection: PeerConnection,
        delegate: Arc<mpsc::UnboundedSender<ConnectionEvent>>,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
        display_name: String,
        peer_name: Option<String>,
    ) -> Self {
        Self {
            connection,
            events,
            _delegate: delegate,
            display_name,
            peer_name,
        }
    }

    /// Next event of this chat's connection. Pends forever once none are left.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        match self.events.recv().await {
            Some(event) => event,
            None => future::pending().await,
        }
    }

    fn peer(&self) -> String {
        self.peer_name
            .clone()
            .or_else(|| self.connection.peer_addr().map(|a| a.ip().to_string()))
            .unwrap_or_else(|| "peer".to_string())
    }

    pub fn is_over(&self) -> bool {
        self.connection.state().is_terminal()
    }

    pub fn handle(&mut self, event: ConnectionEvent) -> ChatStatus {
        match event {
            ConnectionEvent::Connected => {
                if self.connection.initiated() {
                    // The connection may have ended since the event was queued.
                    if self.connection.state() == ConnectionState::Ready {
                        self.connection.send(&self.display_name);
                    }
                    println!("* connected to {}", self.peer());
                }
                ChatStatus::Open
            }
            ConnectionEvent::Message(text) => {
                if self.peer_name.is_none() && !self.connection.initiated() {
                    println!("* {text} joined");
                    self.peer_name = Some(text);
                } else {
                    println!("{}: {text}", self.peer());
                }
                ChatStatus::Open
            }
            ConnectionEvent::Disconnected => {
                println!("* {} left", self.peer());
                ChatStatus::Ended
            }
            ConnectionEvent::Failed(TransportError::PeerClosed) => ChatStatus::Ended,
            ConnectionEvent::Failed(e) => {
                println!("* connection to {} failed: {e}", self.peer());
                ChatStatus::Ended
            }
        }
    }

    pub fn say(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match self.connection.state() {
            ConnectionState::Ready => self.connection.send(line),
            state => println!("* not connected ({state})"),
        }
    }

    pub fn stop(&self) {
        self.connection.stop();
    }
}
