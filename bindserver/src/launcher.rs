//! The launch executor: the single owner of a session's debuggee process.
//!
//! Requests are handed over one at a time through a zero-capacity rendezvous
//! channel; a hand-off that cannot complete within [`crate::THREAD_TIMEOUT`]
//! means the executor is still busy with the previous request and the session
//! reports "busy" instead of queueing. Replies travel back on a per-request
//! oneshot channel, while redirected debuggee output goes straight to the
//! session connection as it appears.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use eyre::{ContextCompat, WrapErr};

use transport::requests::{LaunchDebugee, Request, WaitForDebugee};
use transport::responses::{Response, StreamKind};
use transport::{Connection, Message};

use crate::paths::{PathTranslator, Strictness};
use crate::THREAD_TIMEOUT;

const WAIT_POLL_DELAY: Duration = Duration::from_millis(100);

pub(crate) struct Job {
    request: Request,
    reply: oneshot::Sender<Response>,
}

pub(crate) struct Launcher {
    jobs: Sender<Job>,
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Launcher {
    pub(crate) fn start(
        connection: Arc<Connection>,
        translator: PathTranslator,
        windir: Option<String>,
    ) -> Self {
        let (jobs, incoming) = crossbeam_channel::bounded::<Job>(0);
        let cancel = Arc::new(AtomicBool::new(false));
        let executor_cancel = Arc::clone(&cancel);
        let thread = thread::spawn(move || {
            let mut executor = Executor {
                connection,
                translator,
                windir,
                cancel: executor_cancel,
                child: None,
                last_status: None,
            };
            executor.run(incoming);
        });
        Self {
            jobs,
            cancel,
            thread,
        }
    }

    /// Hand one request to the executor. `Err` means the executor did not
    /// become free within the busy window.
    pub(crate) fn submit(&self, request: Request) -> Result<oneshot::Receiver<Response>, Request> {
        let (reply, receiver) = oneshot::channel();
        match self.jobs.send_timeout(Job { request, reply }, THREAD_TIMEOUT) {
            Ok(()) => Ok(receiver),
            Err(SendTimeoutError::Timeout(job) | SendTimeoutError::Disconnected(job)) => {
                Err(job.request)
            }
        }
    }

    /// Stop the executor; any still-running debuggee is killed before the
    /// thread exits.
    pub(crate) fn shutdown(self) {
        self.cancel.store(true, Ordering::SeqCst);
        drop(self.jobs);
        if self.thread.join().is_err() {
            tracing::warn!("launch executor panicked");
        }
    }
}

struct Executor {
    connection: Arc<Connection>,
    translator: PathTranslator,
    windir: Option<String>,
    cancel: Arc<AtomicBool>,
    child: Option<LaunchedChild>,
    last_status: Option<i32>,
}

struct LaunchedChild {
    child: Child,
    redirectors: Vec<JoinHandle<()>>,
}

impl Executor {
    fn run(&mut self, incoming: Receiver<Job>) {
        while let Ok(job) = incoming.recv() {
            let response = match self.execute(job.request) {
                Ok(response) => response,
                Err(e) => Response::caught(format!("{e:#}")),
            };
            // the session may already be gone; the job just ends then
            let _ = job.reply.send(response);
        }

        // no launched debuggee survives its session
        if let Some(mut launched) = self.child.take() {
            tracing::warn!("session ended with a live debuggee, killing it");
            let _ = launched.child.kill();
            let _ = launched.child.wait();
        }
    }

    fn execute(&mut self, request: Request) -> eyre::Result<Response> {
        match request {
            Request::LaunchDebugee(launch) => self.launch(launch),
            Request::WaitForDebugee(hint) => self.wait_for(hint),
            Request::DebugeeExitCode => self.exit_code(),
            Request::KillDebugee => self.kill(),
            // the session layer never forwards these
            Request::TaskId(_) | Request::Disconnect => {
                Ok(Response::failed("request is not executable"))
            }
        }
    }

    fn launch(&mut self, launch: LaunchDebugee) -> eyre::Result<Response> {
        if self.child.is_some() {
            return Ok(Response::failed("debuggee process is already launched"));
        }
        if launch.command.is_empty() {
            return Ok(Response::failed("empty debuggee command"));
        }

        let program = self
            .translator
            .translate(&launch.command[0], Strictness::Strict)?;
        let args = launch.command[1..]
            .iter()
            .map(|arg| self.translator.translate(arg, Strictness::BestEffort))
            .collect::<eyre::Result<Vec<_>>>()?;
        let work_dir = self
            .translator
            .translate(&launch.work_dir, Strictness::Strict)?;
        let classpath = launch
            .classpath
            .iter()
            .map(|entry| self.translator.translate(entry, Strictness::Strict))
            .collect::<eyre::Result<Vec<_>>>()?
            .join(local_path_separator());

        tracing::info!(%program, ?args, %work_dir, %classpath, "launching debuggee");
        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(&work_dir)
            .env("CLASSPATH", &classpath)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(windir) = &self.windir {
            command.env("WINDIR", windir).env("SystemRoot", windir);
        }

        let mut child = command
            .spawn()
            .wrap_err_with(|| format!("spawning debuggee {program}"))?;

        let stdout = child.stdout.take().context("taking debuggee stdout")?;
        let stderr = child.stderr.take().context("taking debuggee stderr")?;
        let redirectors = vec![
            redirect(stdout, StreamKind::Stdout, Arc::clone(&self.connection)),
            redirect(stderr, StreamKind::Stderr, Arc::clone(&self.connection)),
        ];

        self.last_status = None;
        self.child = Some(LaunchedChild { child, redirectors });
        Ok(Response::ok(0))
    }

    fn wait_for(&mut self, hint: WaitForDebugee) -> eyre::Result<Response> {
        let Some(mut launched) = self.child.take() else {
            return Ok(Response::failed("No debuggee process to wait for"));
        };

        // std has no cancellable wait, so poll and watch the cancel flag
        let status = loop {
            if let Some(status) = launched.child.try_wait().wrap_err("polling debuggee")? {
                break status;
            }
            if self.cancel.load(Ordering::SeqCst) {
                let _ = launched.child.kill();
                let _ = launched.child.wait();
                eyre::bail!("session ended while waiting for the debuggee");
            }
            thread::sleep(WAIT_POLL_DELAY);
        };

        let drain = hint
            .drain_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(THREAD_TIMEOUT);
        drain_redirectors(launched.redirectors, drain);

        let code = status.code().unwrap_or(-1);
        self.last_status = Some(code);
        Ok(Response::ok(code))
    }

    fn exit_code(&mut self) -> eyre::Result<Response> {
        let Some(launched) = self.child.as_mut() else {
            return Ok(match self.last_status {
                Some(code) => Response::ok(code),
                None => Response::failed("No debuggee process"),
            });
        };

        match launched.child.try_wait().wrap_err("polling debuggee")? {
            Some(status) => {
                if let Some(launched) = self.child.take() {
                    drain_redirectors(launched.redirectors, THREAD_TIMEOUT);
                }
                let code = status.code().unwrap_or(-1);
                self.last_status = Some(code);
                Ok(Response::ok(code))
            }
            None => Ok(Response::failed("debuggee process has not exited yet")),
        }
    }

    fn kill(&mut self) -> eyre::Result<Response> {
        let Some(mut launched) = self.child.take() else {
            return Ok(Response::failed("No debuggee process to kill"));
        };

        launched.child.kill().wrap_err("killing debuggee")?;
        let status = launched.child.wait().wrap_err("reaping killed debuggee")?;
        drain_redirectors(launched.redirectors, THREAD_TIMEOUT);

        self.last_status = status.code();
        tracing::info!("debuggee killed");
        Ok(Response::ok(0))
    }
}

/// Forward each line of debuggee output as a RedirectedStream message the
/// moment it appears, concurrently with any in-flight request.
fn redirect(
    stream: impl Read + Send + 'static,
    kind: StreamKind,
    connection: Arc<Connection>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    let message = Message::Response(Response::redirected(kind, line));
                    if connection.send(&message).is_err() {
                        tracing::warn!(%kind, "dropping redirected output, connection gone");
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(%kind, error = %e, "debuggee output stream ended");
                    break;
                }
            }
        }
    })
}

/// Bounded wait for the redirector threads, so every output line is on the
/// wire before the reply that follows it. A redirector that keeps running
/// (a grandchild still holds the pipe) is abandoned, not joined forever.
fn drain_redirectors(redirectors: Vec<JoinHandle<()>>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    for redirector in redirectors {
        while !redirector.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if redirector.is_finished() {
            let _ = redirector.join();
        } else {
            tracing::warn!("abandoning redirector that did not drain in time");
        }
    }
}

fn local_path_separator() -> &'static str {
    if cfg!(windows) {
        ";"
    } else {
        ":"
    }
}
