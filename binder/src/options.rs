//! The harness option surface shared by test driver binaries.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use transport::{DEFAULT_BIND_PORT, DEFAULT_PIPE_PORT};

/// How the driver obtains its debuggee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LaunchMode {
    /// Fork the debuggee on this host.
    Local,
    /// Ask a BindServer on the debuggee host to fork it.
    Bind,
}

#[derive(Debug, Clone, Parser)]
pub struct HarnessOptions {
    #[arg(long = "debugee.launch", value_enum, default_value = "local")]
    pub launch_mode: LaunchMode,

    /// Host a BindServer runs on; only read in bind mode.
    #[arg(long = "bind.host", default_value = "localhost")]
    pub bind_host: String,

    #[arg(long = "bind.port", default_value_t = DEFAULT_BIND_PORT)]
    pub bind_port: u16,

    /// Port of the driver/debuggee synchronization pipe. Never the bind port.
    #[arg(long = "pipe.port", default_value_t = DEFAULT_PIPE_PORT)]
    pub pipe_port: u16,

    /// Root of the JDK under test, in this host's view.
    #[arg(long = "tested.java.home")]
    pub tested_java_home: Option<PathBuf>,

    /// Work directory for the debuggee, in this host's view.
    #[arg(long = "debugee.workdir")]
    pub work_dir: Option<String>,

    /// Classpath entries for the debuggee, in this host's view.
    #[arg(long = "debugee.classpath")]
    pub classpath: Vec<String>,

    /// Extra options placed before the debuggee class name.
    #[arg(long = "debugee.vm.option")]
    pub vm_options: Vec<String>,

    /// Debug transport address handed to the debuggee VM.
    #[arg(long = "transport.address")]
    pub transport_address: Option<String>,

    /// Multiplier, in minutes, for every blocking wait in the harness.
    #[arg(long = "waittime", default_value_t = 2)]
    pub waittime: u64,
}

impl HarnessOptions {
    pub fn is_local_launch(&self) -> bool {
        self.launch_mode == LaunchMode::Local
    }

    pub fn bind_port(&self) -> u16 {
        self.bind_port
    }

    pub fn pipe_port(&self) -> u16 {
        self.pipe_port
    }

    /// The standard bound for blocking harness waits.
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.waittime * 60)
    }
}
