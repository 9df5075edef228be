//! DebugeeBinder: composes the debuggee command line and launches it either
//! as a local fork or through a remote BindServer session.

use eyre::{ContextCompat, WrapErr};

use transport::requests::{LaunchDebugee, Request, WaitForDebugee};
use transport::responses::Response;
use transport::{Connection, Message, PROTOCOL_VERSION};

use crate::options::HarnessOptions;
use crate::process::DebugeeProcess;

/// A fully-composed debuggee invocation, with every path in this host's
/// (the driver's) view.
#[derive(Debug, Clone)]
pub struct LaunchCommand {
    pub argv: Vec<String>,
    pub work_dir: String,
    pub classpath: Vec<String>,
}

pub struct DebugeeBinder {
    options: HarnessOptions,
}

impl DebugeeBinder {
    pub fn new(options: HarnessOptions) -> Self {
        Self { options }
    }

    /// Compose the debuggee command: VM executable joined from the tested
    /// JDK home, VM options, the debug transport argument, then the test's
    /// own class and arguments.
    pub fn make_command(&self, class_and_args: &[String]) -> eyre::Result<LaunchCommand> {
        let java_home = self
            .options
            .tested_java_home
            .as_ref()
            .context("tested.java.home option is required to compose a debuggee command")?;
        let vm = java_home.join("bin").join("java");

        let mut argv = vec![vm.to_string_lossy().into_owned()];
        argv.extend(self.options.vm_options.iter().cloned());
        if let Some(address) = &self.options.transport_address {
            argv.push(format!(
                "-agentlib:jdwp=transport=dt_socket,server=n,address={address}"
            ));
        }
        argv.extend(class_and_args.iter().cloned());

        Ok(LaunchCommand {
            argv,
            work_dir: self.work_dir(),
            classpath: self.options.classpath.clone(),
        })
    }

    /// Compose and launch in one step.
    pub fn launch(&self, task_id: &str, class_and_args: &[String]) -> eyre::Result<Debugee> {
        let command = self.make_command(class_and_args)?;
        self.launch_command(task_id, command)
    }

    /// Launch an explicitly-assembled command, local or remote depending on
    /// the configured mode.
    pub fn launch_command(&self, task_id: &str, command: LaunchCommand) -> eyre::Result<Debugee> {
        if self.options.is_local_launch() {
            let process = DebugeeProcess::launch(&command, self.options.wait_timeout())
                .wrap_err("launching local debuggee")?;
            return Ok(Debugee::Local(process));
        }

        let session = RemoteSession::open(
            &self.options.bind_host,
            self.options.bind_port(),
            task_id,
        )
        .wrap_err("opening BindServer session")?;
        session
            .launch(&command)
            .wrap_err("launching remote debuggee")?;
        Ok(Debugee::Remote(RemoteDebugee { session }))
    }

    fn work_dir(&self) -> String {
        self.options
            .work_dir
            .clone()
            .unwrap_or_else(|| ".".to_string())
    }
}

/// The launched debuggee, local or remote, behind one lifecycle surface.
#[derive(Debug)]
pub enum Debugee {
    Local(DebugeeProcess),
    Remote(RemoteDebugee),
}

impl Debugee {
    /// Block until the debuggee exits and return its exit status.
    pub fn wait_for(&mut self) -> eyre::Result<i32> {
        match self {
            Debugee::Local(process) => process.wait_for(),
            Debugee::Remote(remote) => remote.wait_for(),
        }
    }

    /// Non-blocking probe; fails while the debuggee is still running.
    pub fn exit_code(&mut self) -> eyre::Result<i32> {
        match self {
            Debugee::Local(process) => process.exit_code(),
            Debugee::Remote(remote) => remote.exit_code(),
        }
    }

    pub fn kill(&mut self) -> eyre::Result<()> {
        match self {
            Debugee::Local(process) => process.kill(),
            Debugee::Remote(remote) => remote.kill(),
        }
    }

    /// Best-effort teardown: a local debuggee is killed if still running, a
    /// remote session is told to disconnect.
    pub fn close(self) {
        match self {
            // Drop on the process handle does the killing
            Debugee::Local(_) => {}
            Debugee::Remote(remote) => remote.session.close(),
        }
    }
}

#[derive(Debug)]
pub struct RemoteDebugee {
    session: RemoteSession,
}

impl RemoteDebugee {
    fn wait_for(&mut self) -> eyre::Result<i32> {
        self.session
            .expect_ok(Request::WaitForDebugee(WaitForDebugee::default()))
    }

    fn exit_code(&mut self) -> eyre::Result<i32> {
        self.session.expect_ok(Request::DebugeeExitCode)
    }

    fn kill(&mut self) -> eyre::Result<()> {
        self.session.expect_ok(Request::KillDebugee).map(|_| ())
    }
}

/// One admitted connection to a BindServer: handshake checked, task id
/// registered, requests round-tripped strictly one at a time.
#[derive(Debug)]
struct RemoteSession {
    connection: Connection,
}

impl RemoteSession {
    fn open(host: &str, port: u16, task_id: &str) -> eyre::Result<Self> {
        let connection = Connection::attach(host, port)
            .wrap_err_with(|| format!("attaching to BindServer at {host}:{port}"))?;

        // version mismatch is fatal before anything else is sent
        match connection.recv().wrap_err("reading handshake")? {
            Some(Message::Response(Response::Ok(ack))) if ack.info == PROTOCOL_VERSION => {}
            Some(Message::Response(Response::Ok(ack))) => {
                connection.close();
                eyre::bail!(
                    "BindServer protocol version mismatch: expected {PROTOCOL_VERSION}, got {}",
                    ack.info
                );
            }
            Some(Message::Response(response)) if response.is_failure() => {
                let reason = response
                    .failure_reason()
                    .unwrap_or("no reason given")
                    .to_string();
                connection.close();
                eyre::bail!("BindServer rejected the connection: {reason}");
            }
            Some(other) => {
                connection.close();
                eyre::bail!("unexpected handshake message: {other:?}");
            }
            None => eyre::bail!("connection closed during the handshake"),
        }

        connection
            .send(&Message::Request(Request::TaskId(task_id.to_string())))
            .wrap_err("registering task id")?;
        tracing::debug!(%task_id, "BindServer session established");
        Ok(Self { connection })
    }

    /// Send one request and block for its reply, relaying any redirected
    /// debuggee output that arrives in between.
    fn request(&self, request: Request) -> eyre::Result<Response> {
        self.connection
            .send(&Message::Request(request))
            .wrap_err("sending request")?;
        loop {
            match self.connection.recv().wrap_err("awaiting reply")? {
                Some(Message::Response(Response::RedirectedStream(line))) => {
                    tracing::info!("debugee.{}> {}", line.kind, line.line);
                }
                Some(Message::Response(response)) => return Ok(response),
                Some(Message::Request(request)) => {
                    eyre::bail!("BindServer sent a request: {request:?}")
                }
                None => eyre::bail!("connection to BindServer lost while awaiting a reply"),
            }
        }
    }

    fn expect_ok(&self, request: Request) -> eyre::Result<i32> {
        match self.request(request)? {
            Response::Ok(ack) => Ok(ack.info),
            response => {
                let reason = response.failure_reason().unwrap_or("no reason given");
                eyre::bail!("BindServer refused the request: {reason}")
            }
        }
    }

    fn launch(&self, command: &LaunchCommand) -> eyre::Result<()> {
        self.expect_ok(Request::LaunchDebugee(LaunchDebugee {
            command: command.argv.clone(),
            work_dir: command.work_dir.clone(),
            classpath: command.classpath.clone(),
            path_separator: local_path_separator().to_string(),
        }))
        .map(|_| ())
    }

    /// Best-effort goodbye, then close.
    fn close(&self) {
        let _ = self
            .connection
            .send(&Message::Request(Request::Disconnect));
        self.connection.close();
    }
}

fn local_path_separator() -> &'static str {
    if cfg!(windows) {
        ";"
    } else {
        ":"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn options(args: &[&str]) -> HarnessOptions {
        HarnessOptions::parse_from(std::iter::once("driver").chain(args.iter().copied()))
    }

    #[test]
    fn command_is_vm_then_options_then_transport_then_test_args() {
        let binder = DebugeeBinder::new(options(&[
            "--tested.java.home",
            "/jdk",
            "--debugee.vm.option",
            "-Xmx64m",
            "--transport.address",
            "localhost:5555",
            "--debugee.workdir",
            "/work",
        ]));
        let command = binder
            .make_command(&["MyTest".to_string(), "arg1".to_string()])
            .unwrap();
        assert_eq!(
            command.argv,
            vec![
                "/jdk/bin/java",
                "-Xmx64m",
                "-agentlib:jdwp=transport=dt_socket,server=n,address=localhost:5555",
                "MyTest",
                "arg1",
            ]
        );
        assert_eq!(command.work_dir, "/work");
    }

    #[test]
    fn composing_without_a_java_home_fails() {
        let binder = DebugeeBinder::new(options(&[]));
        assert!(binder.make_command(&["MyTest".to_string()]).is_err());
    }
}
