//! The synchronization pipe between a test driver and its debuggee: a
//! line-oriented TCP channel on its own port, never proxied through a
//! BindServer.
//!
//! The driver side usually binds and the debuggee attaches, but either side
//! can take either role. Binding happens eagerly while the connection itself
//! is established lazily on first use, so a pipe created before the debuggee
//! is even forked cannot lose the race against a debuggee that connects
//! immediately.

use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use eyre::WrapErr;

use transport::{attach_stream, Listener, CONNECT_TIMEOUT};

/// Driver-side pipe: binds its port now, accepts the debuggee later.
pub fn driver_pipe(port: u16) -> eyre::Result<SocketIOPipe> {
    SocketIOPipe::listening(port)
}

/// Debuggee-side pipe: attaches to the driver on first use.
pub fn debugee_pipe(host: &str, port: u16) -> SocketIOPipe {
    SocketIOPipe::attaching(host, port)
}

pub struct SocketIOPipe {
    role: Role,
    stream: Option<LineStream>,
}

enum Role {
    Listening { listener: Listener, timeout: Duration },
    Attaching {
        host: String,
        port: u16,
        timeout: Duration,
    },
}

struct LineStream {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl SocketIOPipe {
    /// Bind now, accept lazily.
    pub fn listening(port: u16) -> eyre::Result<Self> {
        Self::listening_within(port, CONNECT_TIMEOUT)
    }

    pub fn listening_within(port: u16, timeout: Duration) -> eyre::Result<Self> {
        let listener = Listener::bind(port, timeout).wrap_err("binding pipe port")?;
        Ok(Self {
            role: Role::Listening { listener, timeout },
            stream: None,
        })
    }

    /// Connect lazily, retrying while the listening side is not up yet.
    pub fn attaching(host: &str, port: u16) -> Self {
        Self::attaching_within(host, port, CONNECT_TIMEOUT)
    }

    pub fn attaching_within(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            role: Role::Attaching {
                host: host.to_string(),
                port,
                timeout,
            },
            stream: None,
        }
    }

    /// Blocking line send; establishes the connection on first use.
    pub fn println(&mut self, line: &str) -> eyre::Result<()> {
        let stream = self.ensure_connected()?;
        writeln!(stream.writer, "{line}").wrap_err("writing pipe line")?;
        stream.writer.flush().wrap_err("flushing pipe line")
    }

    /// Blocking line receive; establishes the connection on first use. A
    /// closed pipe is an error: the peer hung up before the expected line.
    pub fn readln(&mut self) -> eyre::Result<String> {
        let stream = self.ensure_connected()?;
        let mut line = String::new();
        let n = stream
            .reader
            .read_line(&mut line)
            .wrap_err("reading pipe line")?;
        if n == 0 {
            eyre::bail!("pipe closed by peer");
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.writer.shutdown(Shutdown::Both) {
                tracing::debug!(error = %e, "shutting down pipe");
            }
        }
    }

    fn ensure_connected(&mut self) -> eyre::Result<&mut LineStream> {
        if self.stream.is_none() {
            let stream = match &self.role {
                Role::Listening { listener, timeout } => {
                    tracing::debug!("pipe waiting for its peer");
                    listener
                        .accept_stream(*timeout)
                        .wrap_err("accepting pipe peer")?
                }
                Role::Attaching {
                    host,
                    port,
                    timeout,
                } => attach_stream(host, *port, *timeout).wrap_err("attaching pipe")?,
            };
            stream.set_nodelay(true).wrap_err("disabling nagle")?;
            let reader = BufReader::new(stream.try_clone().wrap_err("cloning pipe stream")?);
            self.stream = Some(LineStream {
                reader,
                writer: stream,
            });
            tracing::debug!("pipe established");
        }
        // populated just above
        Ok(self.stream.as_mut().expect("pipe stream present"))
    }
}

impl Drop for SocketIOPipe {
    fn drop(&mut self) {
        self.close();
    }
}
