//! One admitted client connection and the request loop serving it.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use transport::requests::Request;
use transport::responses::Response;
use transport::{Connection, Message, PROTOCOL_VERSION};

use crate::launcher::Launcher;
use crate::paths::PathTranslator;
use crate::THREAD_TIMEOUT;

/// Handle the listening loop keeps for the one live session.
pub(crate) struct Session {
    connection: Arc<Connection>,
    thread: JoinHandle<()>,
}

impl Session {
    pub(crate) fn spawn(
        connection: Arc<Connection>,
        translator: PathTranslator,
        windir: Option<String>,
    ) -> Self {
        let serving = Arc::clone(&connection);
        let thread = thread::spawn(move || {
            if let Err(e) = serve(&serving, translator, windir) {
                tracing::warn!(error = %e, "session ended with an error");
            }
            serving.close();
        });
        Self { connection, thread }
    }

    /// Liveness, not mere presence: a session whose peer has gone away (its
    /// serving thread saw EOF and closed the connection) is evictable.
    pub(crate) fn is_alive(&self) -> bool {
        !self.thread.is_finished() && self.connection.is_connected()
    }

    /// Close the connection and wait for the serving thread. Closing first
    /// breaks any blocked read, so the join is bounded in practice.
    pub(crate) fn finish(self) {
        self.connection.close();
        if self.thread.join().is_err() {
            tracing::warn!("serving thread panicked");
        }
    }
}

fn serve(
    connection: &Arc<Connection>,
    translator: PathTranslator,
    windir: Option<String>,
) -> eyre::Result<()> {
    connection.send(&Message::Response(Response::ok(PROTOCOL_VERSION)))?;

    let task_id = match connection.recv()? {
        Some(Message::Request(Request::TaskId(id))) => id,
        Some(other) => eyre::bail!("expected a task id after the handshake, got {other:?}"),
        None => {
            tracing::debug!("peer left before sending a task id");
            return Ok(());
        }
    };
    let span = tracing::info_span!("session", task = %task_id);
    let _guard = span.enter();
    tracing::info!("task accepted");

    let launcher = Launcher::start(Arc::clone(connection), translator, windir);
    let outcome = request_loop(connection, &launcher);
    launcher.shutdown();
    outcome
}

fn request_loop(connection: &Arc<Connection>, launcher: &Launcher) -> eyre::Result<()> {
    loop {
        let request = match connection.recv()? {
            Some(Message::Request(request)) => request,
            Some(Message::Response(response)) => {
                eyre::bail!("peer sent a response: {response:?}")
            }
            None => {
                tracing::info!("peer closed the connection");
                return Ok(());
            }
        };

        match request {
            Request::Disconnect => {
                tracing::info!("peer disconnected");
                return Ok(());
            }
            Request::TaskId(task) => {
                // a session may run several tasks back to back
                tracing::info!(%task, "new task on this session");
            }
            request => {
                tracing::debug!(?request, "dispatching request");
                let reply = match launcher.submit(request) {
                    Ok(receiver) => wait_for_reply(connection, receiver),
                    Err(request) => {
                        tracing::warn!(?request, "launch executor is busy");
                        Some(Response::failed(
                            "BindServer is busy: the previous request has not finished",
                        ))
                    }
                };
                match reply {
                    Some(response) => connection.send(&Message::Response(response))?,
                    // connection died while the request was executing
                    None => return Ok(()),
                }
            }
        }
    }
}

/// Block until the executor replies. Wakes up periodically to notice a dead
/// connection, so an abandoned session never waits on a reply nobody will
/// read.
fn wait_for_reply(
    connection: &Connection,
    receiver: oneshot::Receiver<Response>,
) -> Option<Response> {
    loop {
        match receiver.recv_timeout(THREAD_TIMEOUT) {
            Ok(response) => return Some(response),
            Err(oneshot::RecvTimeoutError::Timeout) => {
                if !connection.is_connected() {
                    return None;
                }
            }
            Err(oneshot::RecvTimeoutError::Disconnected) => {
                return Some(Response::caught("launch executor dropped the request"))
            }
        }
    }
}
