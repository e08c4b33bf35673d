//! # Transport Seam
//!
//! Purpose: Abstract the byte stream the connection manager owns, so the
//! manager's failure paths can run against a fake transport in tests while
//! production dials real TCP or Unix sockets.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `Dialer` produces connected `Stream`s; the
//!    manager never knows which transport it is driving.
//! 2. **Split Handles**: A stream is cloned once per connection; the clone
//!    travels with the write permit, the original stays with the read loop.
//! 3. **Tuning at Dial Time**: Socket options are applied before the stream
//!    is handed out, so callers never observe an untuned socket.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, RecvTimeoutError};

#[cfg(unix)]
use socket2::SockAddr;
use socket2::{Domain, Protocol, Socket, Type};

use crate::address::Endpoint;

/// Default connection establishment limit.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Connected byte stream owned by the connection manager.
pub trait Stream: Read + Write + Send {
    /// Returns a second handle onto the same connection.
    fn try_clone_stream(&self) -> io::Result<Box<dyn Stream>>;

    /// Closes both directions; blocked reads and writes on any handle fail.
    fn shutdown(&self) -> io::Result<()>;

    /// Applies the read and write timeout; `None` disables it.
    fn set_timeouts(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl Stream for TcpStream {
    fn try_clone_stream(&self) -> io::Result<Box<dyn Stream>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }

    fn set_timeouts(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }
}

#[cfg(unix)]
impl Stream for UnixStream {
    fn try_clone_stream(&self) -> io::Result<Box<dyn Stream>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn shutdown(&self) -> io::Result<()> {
        UnixStream::shutdown(self, Shutdown::Both)
    }

    fn set_timeouts(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }
}

/// Establishes connections for the connection manager.
pub trait Dialer: Send + 'static {
    /// Opens a new connection. Called again after every failure.
    fn dial(&mut self) -> io::Result<Box<dyn Stream>>;

    /// Human readable target, used in errors and logs.
    fn target(&self) -> String;
}

/// Dials TCP or Unix sockets according to the endpoint.
#[derive(Debug, Clone)]
pub struct NetDialer {
    endpoint: Endpoint,
    connect_timeout: Duration,
    nodelay: bool,
    linger_zero: bool,
}

impl NetDialer {
    pub fn new(endpoint: Endpoint, connect_timeout: Duration) -> Self {
        NetDialer {
            endpoint,
            connect_timeout,
            nodelay: false,
            linger_zero: true,
        }
    }

    /// Sets TCP_NODELAY on new TCP connections (default off).
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }

    /// Sets a zero linger on new TCP connections, so close resets (default on).
    pub fn linger_zero(mut self, enabled: bool) -> Self {
        self.linger_zero = enabled;
        self
    }

    /// Resolves and connects within one `connect_timeout` budget; each
    /// resolved address gets whatever time is left.
    fn dial_tcp(&self, addr: &str) -> io::Result<Box<dyn Stream>> {
        let deadline = Instant::now() + self.connect_timeout;
        let addrs = resolve(addr, deadline)?;

        let mut last_err = None;
        for sock_addr in addrs {
            let remaining = time_left(deadline)?;
            let socket = Socket::new(Domain::for_address(sock_addr), Type::STREAM, Some(Protocol::TCP))?;
            match socket.connect_timeout(&sock_addr.into(), remaining) {
                Ok(()) => {
                    socket.set_nodelay(self.nodelay)?;
                    if self.linger_zero {
                        socket.set_linger(Some(Duration::ZERO))?;
                    }
                    let stream: TcpStream = socket.into();
                    return Ok(Box::new(stream));
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("no addresses for {addr}"))
        }))
    }

    #[cfg(unix)]
    fn dial_unix(&self, path: &std::path::Path) -> io::Result<Box<dyn Stream>> {
        let addr = SockAddr::unix(path)?;
        let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
        socket.connect_timeout(&addr, self.connect_timeout)?;
        let stream: UnixStream = socket.into();
        Ok(Box::new(stream))
    }

    #[cfg(not(unix))]
    fn dial_unix(&self, _path: &std::path::Path) -> io::Result<Box<dyn Stream>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "unix sockets are not available on this platform",
        ))
    }
}

/// Resolves `addr` before `deadline`. IP literals skip the resolver; host
/// names are looked up on a helper thread, abandoned if it overruns.
fn resolve(addr: &str, deadline: Instant) -> io::Result<Vec<SocketAddr>> {
    if let Ok(sock_addr) = addr.parse::<SocketAddr>() {
        return Ok(vec![sock_addr]);
    }

    let budget = time_left(deadline)?;
    let (tx, rx) = bounded::<io::Result<Vec<SocketAddr>>>(1);
    let host = addr.to_string();
    thread::Builder::new()
        .name("conduit-resolve".to_string())
        .spawn(move || {
            let _ = tx.send(host.to_socket_addrs().map(Iterator::collect));
        })?;

    match rx.recv_timeout(budget) {
        Ok(resolved) => resolved,
        Err(RecvTimeoutError::Timeout) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("resolving {addr} timed out"),
        )),
        Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
            io::ErrorKind::Other,
            format!("resolver for {addr} exited"),
        )),
    }
}

fn time_left(deadline: Instant) -> io::Result<Duration> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"));
    }
    Ok(remaining)
}

impl Dialer for NetDialer {
    fn dial(&mut self) -> io::Result<Box<dyn Stream>> {
        match &self.endpoint {
            Endpoint::Tcp(addr) => self.dial_tcp(addr),
            Endpoint::Unix(path) => self.dial_unix(path),
        }
    }

    fn target(&self) -> String {
        self.endpoint.to_string()
    }
}
