use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use eyre::WrapErr;

use crate::codec::{encode_message, FrameDecoder};
use crate::Message;

/// Overall deadline for establishing a connection, in either direction.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
/// Fixed delay between establishment attempts.
pub const CONNECT_TRY_DELAY: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 4096;

/// A bidirectional, message-oriented channel over one TCP socket.
///
/// Sends are atomic with respect to each other: the frame is written under a
/// lock, so a reply and an asynchronous redirected-output push from another
/// thread can never interleave. Receives hand back whole messages in the
/// order the peer sent them.
#[derive(Debug)]
pub struct Connection {
    reader: Mutex<ReadHalf>,
    writer: Mutex<TcpStream>,
    // unlocked clone used to break blocked reads/writes from close()
    shutdown_handle: TcpStream,
    peer: SocketAddr,
    closed: AtomicBool,
}

#[derive(Debug)]
struct ReadHalf {
    stream: TcpStream,
    buffer: BytesMut,
    decoder: FrameDecoder,
}

impl Connection {
    /// Adopt an already-established socket (the accepting side).
    pub fn from_stream(stream: TcpStream) -> eyre::Result<Self> {
        stream.set_nodelay(true).wrap_err("disabling nagle")?;
        let peer = stream.peer_addr().wrap_err("reading peer address")?;
        let read_stream = stream.try_clone().wrap_err("cloning stream for reading")?;
        let shutdown_handle = stream.try_clone().wrap_err("cloning stream for shutdown")?;
        Ok(Self {
            reader: Mutex::new(ReadHalf {
                stream: read_stream,
                buffer: BytesMut::new(),
                decoder: FrameDecoder::default(),
            }),
            writer: Mutex::new(stream),
            shutdown_handle,
            peer,
            closed: AtomicBool::new(false),
        })
    }

    /// Establish as a client, retrying refused attempts until [`CONNECT_TIMEOUT`].
    pub fn attach(host: &str, port: u16) -> eyre::Result<Self> {
        Self::attach_within(host, port, CONNECT_TIMEOUT)
    }

    /// [`Connection::attach`] with an explicit deadline.
    pub fn attach_within(host: &str, port: u16, timeout: Duration) -> eyre::Result<Self> {
        let stream = attach_stream(host, port, timeout)?;
        Self::from_stream(stream)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Serialize and transmit one message atomically.
    pub fn send(&self, message: &Message) -> eyre::Result<()> {
        if !self.is_connected() {
            eyre::bail!("connection is closed");
        }
        let bytes = encode_message(message).wrap_err("encoding message")?;
        let mut writer = self.writer.lock().unwrap();
        writer.write_all(&bytes).wrap_err("writing message")?;
        writer.flush().wrap_err("flushing message")?;
        Ok(())
    }

    /// Block until one whole message is available. `Ok(None)` means no more
    /// messages will arrive: the peer shut down cleanly between frames, or
    /// [`Connection::close`] was called locally.
    pub fn recv(&self) -> eyre::Result<Option<Message>> {
        let mut reader = self.reader.lock().unwrap();
        let ReadHalf {
            stream,
            buffer,
            decoder,
        } = &mut *reader;
        loop {
            if let Some(message) = decoder.decode(buffer).wrap_err("decoding frame")? {
                return Ok(Some(message));
            }

            let mut chunk = [0u8; READ_CHUNK];
            match stream.read(&mut chunk) {
                Ok(0) => {
                    if buffer.is_empty() {
                        return Ok(None);
                    }
                    eyre::bail!("peer closed the connection mid-frame");
                }
                Ok(n) => buffer.extend_from_slice(&chunk[..n]),
                Err(_) if !self.is_connected() => return Ok(None),
                Err(e) => return Err(e).wrap_err("reading from socket"),
            }
        }
    }

    /// Idempotent, safe from any thread. Blocked reads and writes on this
    /// connection fail fast afterwards. A closed connection is never reopened.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.shutdown_handle.shutdown(Shutdown::Both) {
                tracing::debug!(error = %e, "shutting down socket");
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Server-side listening socket with timeout-bounded bind and accept.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Bind the port, retrying while the address is still in use from a
    /// previous run.
    pub fn bind(port: u16, timeout: Duration) -> eyre::Result<Self> {
        let deadline = Instant::now() + timeout;
        loop {
            match TcpListener::bind(("0.0.0.0", port)) {
                Ok(inner) => return Ok(Self { inner }),
                Err(e) if e.kind() == io::ErrorKind::AddrInUse && Instant::now() < deadline => {
                    tracing::warn!(%port, "bind address in use, retrying");
                    thread::sleep(CONNECT_TRY_DELAY);
                }
                Err(e) => return Err(e).wrap_err_with(|| format!("binding port {port}")),
            }
        }
    }

    pub fn local_addr(&self) -> eyre::Result<SocketAddr> {
        self.inner.local_addr().wrap_err("reading local address")
    }

    /// Block until a peer connects or the timeout elapses.
    pub fn accept(&self, timeout: Duration) -> eyre::Result<Connection> {
        let stream = self.accept_stream(timeout)?;
        Connection::from_stream(stream)
    }

    /// [`Listener::accept`] without the message-framing wrapper; used where a
    /// raw byte stream is wanted.
    pub fn accept_stream(&self, timeout: Duration) -> eyre::Result<TcpStream> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(stream) = self.poll_accept()? {
                return Ok(stream);
            }
            if Instant::now() >= deadline {
                eyre::bail!("no connection accepted within {timeout:?}");
            }
            thread::sleep(CONNECT_TRY_DELAY);
        }
    }

    /// Non-blocking accept; `Ok(None)` when nobody is waiting. Lets a caller
    /// interleave accepts with its own shutdown checks.
    pub fn poll_accept(&self) -> eyre::Result<Option<TcpStream>> {
        self.inner
            .set_nonblocking(true)
            .wrap_err("marking listener non-blocking")?;
        match self.inner.accept() {
            Ok((stream, addr)) => {
                tracing::debug!(peer = %addr, "accepted connection");
                stream
                    .set_nonblocking(false)
                    .wrap_err("marking accepted stream blocking")?;
                Ok(Some(stream))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e).wrap_err("accepting connection"),
        }
    }
}

/// Connect to `host:port`, retrying refused or unreachable attempts every
/// [`CONNECT_TRY_DELAY`] until the timeout elapses. Covers the window where
/// the peer has been launched but is not yet listening.
pub fn attach_stream(host: &str, port: u16, timeout: Duration) -> eyre::Result<TcpStream> {
    let deadline = Instant::now() + timeout;
    loop {
        match TcpStream::connect((host, port)) {
            Ok(stream) => return Ok(stream),
            Err(e) if retryable(&e) && Instant::now() < deadline => {
                tracing::debug!(%host, %port, error = %e, "connect attempt failed, retrying");
                thread::sleep(CONNECT_TRY_DELAY);
            }
            Err(e) => return Err(e).wrap_err_with(|| format!("connecting to {host}:{port}")),
        }
    }
}

fn retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::AddrNotAvailable
    )
}
