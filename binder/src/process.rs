//! A locally-forked debuggee: the child handle plus the threads relaying its
//! output into the driver's log.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use eyre::{ContextCompat, WrapErr};

use crate::binder::LaunchCommand;

const WAIT_POLL_DELAY: Duration = Duration::from_millis(100);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug)]
pub struct DebugeeProcess {
    child: Child,
    redirectors: Vec<JoinHandle<()>>,
    status: Option<i32>,
    wait_timeout: Duration,
}

impl DebugeeProcess {
    pub(crate) fn launch(command: &LaunchCommand, wait_timeout: Duration) -> eyre::Result<Self> {
        let Some((program, args)) = command.argv.split_first() else {
            eyre::bail!("empty debuggee command");
        };

        tracing::info!(%program, ?args, "forking debuggee");
        let mut child = Command::new(program)
            .args(args)
            .current_dir(&command.work_dir)
            .env("CLASSPATH", command.classpath.join(local_path_separator()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .wrap_err_with(|| format!("forking debuggee {program}"))?;

        let stdout = child.stdout.take().context("taking debuggee stdout")?;
        let stderr = child.stderr.take().context("taking debuggee stderr")?;
        let redirectors = vec![
            redirect(stdout, "debugee.stdout"),
            redirect(stderr, "debugee.stderr"),
        ];

        Ok(Self {
            child,
            redirectors,
            status: None,
            wait_timeout,
        })
    }

    /// Block until the debuggee exits, bounded by the harness wait time.
    pub fn wait_for(&mut self) -> eyre::Result<i32> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let deadline = Instant::now() + self.wait_timeout;
        let status = loop {
            if let Some(status) = self.child.try_wait().wrap_err("polling debuggee")? {
                break status;
            }
            if Instant::now() >= deadline {
                eyre::bail!("debuggee did not exit within {:?}", self.wait_timeout);
            }
            thread::sleep(WAIT_POLL_DELAY);
        };
        self.drain();
        let code = status.code().unwrap_or(-1);
        self.status = Some(code);
        Ok(code)
    }

    /// Non-blocking probe; fails while the debuggee is still running.
    pub fn exit_code(&mut self) -> eyre::Result<i32> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        match self.child.try_wait().wrap_err("polling debuggee")? {
            Some(status) => {
                self.drain();
                let code = status.code().unwrap_or(-1);
                self.status = Some(code);
                Ok(code)
            }
            None => eyre::bail!("debuggee process has not exited yet"),
        }
    }

    pub fn kill(&mut self) -> eyre::Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        self.child.kill().wrap_err("killing debuggee")?;
        let status = self.child.wait().wrap_err("reaping killed debuggee")?;
        self.drain();
        self.status = status.code();
        tracing::info!("debuggee killed");
        Ok(())
    }

    /// Bounded wait for the output relays; a relay held open by a grandchild
    /// is abandoned rather than joined forever.
    fn drain(&mut self) {
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        for redirector in self.redirectors.drain(..) {
            while !redirector.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if redirector.is_finished() {
                let _ = redirector.join();
            } else {
                tracing::warn!("abandoning output relay that did not drain in time");
            }
        }
    }
}

impl Drop for DebugeeProcess {
    fn drop(&mut self) {
        // deterministic teardown: a dropped handle never leaks its debuggee
        if self.status.is_none() {
            if let Ok(None) = self.child.try_wait() {
                tracing::warn!("dropping a live debuggee, killing it");
                let _ = self.child.kill();
                let _ = self.child.wait();
            }
        }
    }
}

fn redirect(stream: impl Read + Send + 'static, label: &'static str) -> JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            match line {
                Ok(line) => tracing::info!("{label}> {line}"),
                Err(e) => {
                    tracing::debug!(%label, error = %e, "debuggee output stream ended");
                    break;
                }
            }
        }
    })
}

fn local_path_separator() -> &'static str {
    if cfg!(windows) {
        ";"
    } else {
        ":"
    }
}
