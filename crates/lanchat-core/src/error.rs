//! Error kinds surfaced by the discovery and connection layer.
//!
//! Errors are values that can be stored in a state (`ConnectionState::Failed`)
//! and handed to several observers, so they are `Clone` and carry rendered
//! messages rather than boxed sources.

use std::io;
use std::time::Duration;

/// Failure of an underlying transport: socket, WebSocket, or name service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The local name service dropped its connection. Recoverable by tearing
    /// the advertisement or browse down and starting again.
    #[error("local name service connection is defunct")]
    DnsServiceDefunct,

    #[error("name service error: {0}")]
    NameService(String),

    #[error("i/o error ({kind:?}): {message}")]
    Io { kind: io::ErrorKind, message: String },

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("connection closed by peer")]
    PeerClosed,
}

impl TransportError {
    /// The transient condition handled by silent restart.
    pub fn is_dns_defunct(&self) -> bool {
        matches!(self, TransportError::DnsServiceDefunct)
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Failure of a one-shot address resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("resolution timed out after {0:?}")]
    Timeout(Duration),

    #[error("service resolved without any address")]
    NoAddress,

    #[error("service resolved to IPv6 addresses only")]
    Ipv6Only,

    #[error("resolution cancelled")]
    Cancelled,

    #[error("network path reports no available interface")]
    NoActiveInterface,

    #[error("interface {name} is {kind}, expected wifi or wired ethernet")]
    UnsupportedInterface { name: String, kind: String },

    #[error("no IPv4 address bound to interface {0}")]
    InterfaceNotFound(String),

    #[error("listener is not bound to a port")]
    ListenerNotBound,

    #[error(transparent)]
    Transport(#[from] TransportError),
}
