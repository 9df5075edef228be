//! The BindServer daemon: accepts one test driver at a time and launches,
//! waits for, and kills debuggee processes on its behalf, streaming their
//! output back over the same connection.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, TryRecvError};
use eyre::WrapErr;

use bindfile::BindConfig;
use transport::responses::Response;
use transport::{Connection, Listener, Message, CONNECT_TIMEOUT, DEFAULT_BIND_PORT};

mod launcher;
pub mod paths;
mod session;

use paths::PathTranslator;
use session::Session;

/// Busy window for handing a request to the launch executor, and the bound
/// on internal drain waits.
pub const THREAD_TIMEOUT: Duration = Duration::from_secs(3);

const ACCEPT_POLL_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// The only host whose connections are served.
    pub authorized_host: String,
    pub translator: PathTranslator,
    pub windir: Option<String>,
}

impl ServerConfig {
    pub fn from_bind_config(config: &BindConfig, port_override: Option<u16>) -> Self {
        Self {
            port: port_override
                .or(config.bindserver_port)
                .unwrap_or(DEFAULT_BIND_PORT),
            authorized_host: config.debugger_host.clone(),
            translator: PathTranslator::between(&config.debugger, &config.debuggee),
            windir: config.debuggee_windir.clone(),
        }
    }
}

/// Connection statistics printed when the operator shuts the server down.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub accepted: u64,
    pub unauthorized: u64,
    pub busy: u64,
    pub served: u64,
}

pub struct BindServer {
    config: ServerConfig,
}

impl BindServer {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Serve until the shutdown channel fires (or disconnects). At most one
    /// session is alive at a time; everything else is rejected.
    pub fn run(&self, shutdown: Receiver<()>) -> eyre::Result<Stats> {
        let listener =
            Listener::bind(self.config.port, CONNECT_TIMEOUT).wrap_err("binding server port")?;
        tracing::info!(port = self.config.port, authorized = %self.config.authorized_host, "listening");

        let mut stats = Stats::default();
        let mut current: Option<Session> = None;

        loop {
            match shutdown.try_recv() {
                Ok(()) => break,
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => break,
            }

            let Some(stream) = listener.poll_accept()? else {
                thread::sleep(ACCEPT_POLL_DELAY);
                continue;
            };
            let connection = match Connection::from_stream(stream) {
                Ok(connection) => connection,
                Err(e) => {
                    tracing::warn!(error = %e, "discarding broken inbound connection");
                    continue;
                }
            };
            stats.accepted += 1;
            let peer = connection.peer_addr();

            if !peer_is_authorized(&self.config.authorized_host, &peer) {
                stats.unauthorized += 1;
                tracing::warn!(%peer, "rejecting unauthorized connection");
                let _ = connection.send(&Message::Response(Response::failed(format!(
                    "host {} is not authorized to connect",
                    peer.ip()
                ))));
                connection.close();
                continue;
            }

            if let Some(session) = current.take() {
                if session.is_alive() {
                    stats.busy += 1;
                    tracing::warn!(%peer, "rejecting connection, a session is already being served");
                    let _ = connection.send(&Message::Response(Response::failed(
                        "BindServer is busy with another connection",
                    )));
                    connection.close();
                    current = Some(session);
                    continue;
                }
                tracing::info!("evicting dead session");
                session.finish();
            }

            stats.served += 1;
            tracing::info!(%peer, "serving new session");
            current = Some(Session::spawn(
                Arc::new(connection),
                self.config.translator.clone(),
                self.config.windir.clone(),
            ));
        }

        if let Some(session) = current.take() {
            session.finish();
        }
        tracing::info!("server stopped");
        Ok(stats)
    }
}

/// "localhost" authorizes any loopback peer; otherwise the configured host is
/// compared as an address literal or resolved and compared address-by-address.
fn peer_is_authorized(authorized_host: &str, peer: &SocketAddr) -> bool {
    if authorized_host.eq_ignore_ascii_case("localhost") {
        return peer.ip().is_loopback();
    }
    if let Ok(ip) = authorized_host.parse::<IpAddr>() {
        return ip == peer.ip();
    }
    match (authorized_host, 0u16).to_socket_addrs() {
        Ok(addrs) => addrs.map(|addr| addr.ip()).any(|ip| {
            ip == peer.ip() || (ip.is_loopback() && peer.ip().is_loopback())
        }),
        Err(e) => {
            tracing::warn!(%authorized_host, error = %e, "could not resolve authorized host");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(addr: &str) -> SocketAddr {
        addr.parse().unwrap()
    }

    #[test]
    fn localhost_means_loopback() {
        assert!(peer_is_authorized("localhost", &peer("127.0.0.1:9999")));
        assert!(peer_is_authorized("LOCALHOST", &peer("[::1]:9999")));
        assert!(!peer_is_authorized("localhost", &peer("192.0.2.7:9999")));
    }

    #[test]
    fn address_literal_must_match_exactly() {
        assert!(peer_is_authorized("192.0.2.7", &peer("192.0.2.7:1")));
        assert!(!peer_is_authorized("192.0.2.7", &peer("192.0.2.8:1")));
    }

    #[test]
    fn unresolvable_host_authorizes_nobody() {
        assert!(!peer_is_authorized(
            "no-such-host.invalid",
            &peer("127.0.0.1:1")
        ));
    }
}
