use std::net::TcpListener;

use eyre::Result;

/// Reserve an OS-assigned free TCP port. Tests use this so concurrently
/// running suites never collide on a fixed port.
pub fn get_random_tcp_port() -> Result<u16> {
    for attempt in 0..50 {
        match TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => {
                let port = listener.local_addr()?.port();
                return Ok(port);
            }
            Err(e) => {
                tracing::warn!(%attempt, %e, "binding probe socket");
            }
        }
    }

    eyre::bail!("could not get free port");
}
