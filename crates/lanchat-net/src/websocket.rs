//! WebSocket protocol driven over a Tokio TCP stream.
//!
//! tungstenite's protocol state machine is non-blocking: it reports
//! `WouldBlock` through its I/O errors and picks up where it left off on the
//! next call. `Session` waits for socket readiness in between. A read error
//! leaves the session usable, so one undecodable text frame can be skipped
//! while the frames after it are still delivered.

use std::io::{self, Read, Write};
use std::net::SocketAddr;

use tokio::io::Interest;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::{HandshakeError, HandshakeRole};
use tokio_tungstenite::tungstenite::{self, Error as WsError, Message, WebSocket};

/// Non-blocking `Read + Write` view of a Tokio stream. Remembers which
/// direction last blocked so the caller knows what to wait for.
pub(crate) struct PollIo {
    stream: TcpStream,
    blocked: Interest,
}

impl PollIo {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            blocked: Interest::READABLE,
        }
    }

    async fn ready(&self) -> io::Result<()> {
        self.stream.ready(self.blocked).await.map(|_| ())
    }
}

impl Read for PollIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.stream.try_read(buf);
        if is_would_block(&result) {
            self.blocked = Interest::READABLE;
        }
        result
    }
}

impl Write for PollIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.stream.try_write(buf);
        if is_would_block(&result) {
            self.blocked = Interest::WRITABLE;
        }
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn is_would_block<T>(result: &io::Result<T>) -> bool {
    matches!(result, Err(e) if e.kind() == io::ErrorKind::WouldBlock)
}

fn blocked(error: &WsError) -> bool {
    matches!(error, WsError::Io(e) if e.kind() == io::ErrorKind::WouldBlock)
}

/// One upgraded WebSocket session.
pub(crate) struct Session {
    ws: WebSocket<PollIo>,
}

impl Session {
    /// Client handshake against `ws://addr`.
    pub(crate) async fn connect(stream: TcpStream, addr: SocketAddr) -> Result<Self, WsError> {
        let attempt = tungstenite::client(format!("ws://{addr}"), PollIo::new(stream));
        let (ws, _response) = complete_handshake(attempt).await?;
        Ok(Self { ws })
    }

    /// Server handshake on an accepted stream.
    pub(crate) async fn accept(stream: TcpStream) -> Result<Self, WsError> {
        let ws = complete_handshake(tungstenite::accept(PollIo::new(stream))).await?;
        Ok(Self { ws })
    }

    /// Next message. Cancel-safe: partial frames stay buffered in the session.
    pub(crate) async fn recv(&mut self) -> Result<Message, WsError> {
        loop {
            match self.ws.read() {
                Err(e) if blocked(&e) => self.ws.get_ref().ready().await?,
                other => return other,
            }
        }
    }

    pub(crate) async fn send(&mut self, message: Message) -> Result<(), WsError> {
        match self.ws.write(message) {
            Err(e) if !blocked(&e) => return Err(e),
            _ => {}
        }
        self.flush().await
    }

    /// Push out queued frames, including automatic pong and close replies.
    pub(crate) async fn flush(&mut self) -> Result<(), WsError> {
        loop {
            match self.ws.flush() {
                Err(e) if blocked(&e) => self.ws.get_ref().ready().await?,
                other => return other,
            }
        }
    }

    /// Send a close frame and wait until the peer has acknowledged it or
    /// dropped the connection.
    pub(crate) async fn close(&mut self) -> Result<(), WsError> {
        match self.ws.close(None) {
            Err(e) if !blocked(&e) => return Err(e),
            _ => {}
        }
        self.flush().await?;
        loop {
            match self.recv().await {
                Ok(_) => {}
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

async fn complete_handshake<R>(
    mut attempt: Result<R::FinalResult, HandshakeError<R>>,
) -> Result<R::FinalResult, WsError>
where
    R: HandshakeRole<InternalStream = PollIo>,
{
    loop {
        match attempt {
            Ok(done) => return Ok(done),
            Err(HandshakeError::Failure(e)) => return Err(e),
            Err(HandshakeError::Interrupted(mid)) => {
                mid.get_ref().get_ref().ready().await?;
                attempt = mid.handshake();
            }
        }
    }
}
