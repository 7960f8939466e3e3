//! TCP socket options applied to every chat stream.

use std::io;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

/// Idle time before the first keepalive probe on chat streams.
pub const KEEPALIVE_IDLE: Duration = Duration::from_secs(2);

/// Turn on TCP keepalive with the given idle time.
pub fn enable_keepalive(stream: &TcpStream, idle: Duration) -> io::Result<()> {
    let sock = SockRef::from(stream);
    sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(idle))?;
    sock.set_nodelay(true)
}
