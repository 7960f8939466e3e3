//! Mapping between WebSocket frames and chat-level events.

use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use lanchat_core::TransportError;

/// What the receive loop should do with one item from the WebSocket stream.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Inbound {
    /// A text message for the delegate.
    Text(String),
    /// The peer closed the session.
    Closed,
    /// Nothing to report; keep receiving.
    Ignored,
    /// The session is broken.
    Failed(TransportError),
}

pub(crate) fn classify(item: Result<Message, WsError>) -> Inbound {
    match item {
        Ok(Message::Text(text)) => Inbound::Text(text),
        Ok(Message::Close(_)) => Inbound::Closed,
        Ok(_) => Inbound::Ignored,
        // A text frame whose payload is not UTF-8. The frame has been
        // consumed and the session stays usable.
        Err(WsError::Utf8) => Inbound::Ignored,
        Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Inbound::Closed,
        Err(e) => Inbound::Failed(transport_error(e)),
    }
}

pub(crate) fn transport_error(e: WsError) -> TransportError {
    match e {
        WsError::Io(io) => match io.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => TransportError::PeerClosed,
            _ => io.into(),
        },
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::PeerClosed,
        other => TransportError::WebSocket(other.to_string()),
    }
}
