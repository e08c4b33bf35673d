//! # Pipelining Client API
//!
//! Purpose: Expose a blocking, thread-safe API over a single connection.
//! Concurrent callers share one socket; their requests are pipelined and
//! their responses matched back by order.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides the permit/queue protocol and the
//!    background connection manager.
//! 2. **Write Permit**: Exactly one sender writes at a time; the permit is
//!    released as soon as the request is queued, not when it is answered.
//! 3. **Backpressure**: The pending queue is bounded; a full queue blocks
//!    senders until the read loop catches up.
//! 4. **No Retries**: A command that hit a broken connection reports an
//!    error; resubmission is up to the caller.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, select, Receiver, SendError, Sender};
use parking_lot::Mutex;
use tracing::warn;

use crate::address::{Endpoint, QUEUE_SIZE_TCP};
use crate::error::{ClientError, ClientResult};
use crate::manager::{Manager, ManagerChannels, SocketSlot};
use crate::resp::{Reply, ResultKind};
use crate::ticket::{Pending, PooledTicket, Ticket, TicketPool, DEFAULT_MAX_IDLE_TICKETS};
use crate::transport::{Dialer, NetDialer, Stream, DEFAULT_CONNECT_TIMEOUT};

/// Configuration for the client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379" or "/var/run/redis.sock".
    pub addr: String,
    /// Read and write timeout for commands. `None` disables it.
    pub timeout: Option<Duration>,
    /// Limit for connection establishment, including reconnects.
    /// `None` defaults to one second.
    pub connect_timeout: Option<Duration>,
    /// TCP_NODELAY on the connection.
    pub nodelay: bool,
    /// Zero linger on TCP close.
    pub linger_zero: bool,
    /// Pending queue bound. `None` picks the transport default.
    pub queue_capacity: Option<usize>,
    /// Idle tickets kept for reuse.
    pub max_idle_tickets: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: String::new(),
            timeout: None,
            connect_timeout: None,
            nodelay: false,
            linger_zero: true,
            queue_capacity: None,
            max_idle_tickets: DEFAULT_MAX_IDLE_TICKETS,
        }
    }
}

/// Channel ends held on the caller side.
struct Gateway {
    permit_tx: Sender<Box<dyn Stream>>,
    permit_rx: Receiver<Box<dyn Stream>>,
    write_err_tx: Sender<()>,
    queue_tx: Sender<Pending>,
    offline_rx: Receiver<Arc<std::io::Error>>,
    quit_tx: Sender<()>,
}

/// Command execution for one server over one managed connection.
///
/// Multiple threads may invoke methods on a `Client` simultaneously.
pub struct Client {
    addr: String,
    gateway: Gateway,
    terminated: AtomicBool,
    socket: Arc<SocketSlot>,
    pool: Arc<TicketPool>,
    manager: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Launches a managed connection to `addr`.
    ///
    /// A zero `timeout` disables command timeouts; a zero `connect_timeout`
    /// defaults to one second. Returns without waiting for the connection.
    pub fn new(addr: &str, timeout: Duration, connect_timeout: Duration) -> ClientResult<Self> {
        Self::with_config(ClientConfig {
            addr: addr.to_string(),
            timeout: non_zero(timeout),
            connect_timeout: non_zero(connect_timeout),
            ..ClientConfig::default()
        })
    }

    /// Launches a managed connection with a custom configuration.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        let endpoint = Endpoint::parse(&config.addr);
        let connect_timeout = config.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let dialer = NetDialer::new(endpoint.clone(), connect_timeout)
            .nodelay(config.nodelay)
            .linger_zero(config.linger_zero);

        let config = ClientConfig {
            queue_capacity: Some(config.queue_capacity.unwrap_or_else(|| endpoint.queue_capacity())),
            ..config
        };
        Self::with_dialer(config, dialer)
    }

    /// Launches a managed connection over a caller-provided transport.
    ///
    /// `config.addr` is only used for reporting; the dialer decides where to
    /// connect. Without an explicit `queue_capacity` the TCP bound applies.
    pub fn with_dialer(config: ClientConfig, dialer: impl Dialer) -> ClientResult<Self> {
        let queue_capacity = config
            .queue_capacity
            .unwrap_or(QUEUE_SIZE_TCP)
            .max(1);
        let addr = dialer.target();

        let (permit_tx, permit_rx) = bounded(1);
        let (write_err_tx, write_err_rx) = bounded(1);
        let (queue_tx, queue_rx) = bounded(queue_capacity);
        let (offline_tx, offline_rx) = bounded(0);
        let (quit_tx, quit_rx) = bounded(1);
        let socket = Arc::new(SocketSlot::default());

        let manager = Manager::new(
            Box::new(dialer),
            config.timeout,
            ManagerChannels {
                permit_tx: permit_tx.clone(),
                permit_rx: permit_rx.clone(),
                write_err_rx,
                queue_rx,
                offline_tx,
                quit_rx,
            },
            Arc::clone(&socket),
        );
        let handle = thread::Builder::new()
            .name("conduit-manager".to_string())
            .spawn(move || manager.run())?;

        Ok(Client {
            addr,
            gateway: Gateway {
                permit_tx,
                permit_rx,
                write_err_tx,
                queue_tx,
                offline_rx,
                quit_tx,
            },
            terminated: AtomicBool::new(false),
            socket,
            pool: Arc::new(TicketPool::new(config.max_idle_tickets)),
            manager: Mutex::new(Some(handle)),
        })
    }

    /// Normalized server address in use.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Checks out a pooled ticket carrying the encoded command.
    pub fn ticket(&self, args: &[&[u8]]) -> PooledTicket {
        self.pool.checkout(args)
    }

    /// Stops the connection manager and closes the connection.
    ///
    /// Blocks until the manager has stopped. Commands are rejected with
    /// `ClientError::Terminated` afterwards. Calling it again is a no-op.
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
        // A full channel means a stop request is already pending.
        let _ = self.gateway.quit_tx.try_send(());
        // Wakes a read loop blocked on a response that may never come, and
        // any sender blocked in a write.
        self.socket.close();

        // Dial errors may still be relayed until the channel closes.
        while self.gateway.offline_rx.recv().is_ok() {}

        if let Some(handle) = self.manager.lock().take() {
            if handle.join().is_err() {
                warn!(addr = %self.addr, "connection manager panicked");
            }
        }
    }

    /// Executes a command that answers with a status reply.
    pub fn command_ok(&self, mut ticket: PooledTicket) -> ClientResult<()> {
        match self.dispatch(&mut ticket, ResultKind::Ok)? {
            Reply::Ok => Ok(()),
            _ => Err(ClientError::Protocol),
        }
    }

    /// Executes a command that answers with an integer.
    pub fn command_integer(&self, mut ticket: PooledTicket) -> ClientResult<i64> {
        match self.dispatch(&mut ticket, ResultKind::Integer)? {
            Reply::Integer(value) => Ok(value),
            _ => Err(ClientError::Protocol),
        }
    }

    /// Executes a command that answers with a bulk string.
    ///
    /// A null reply is reported as `ClientError::Null`.
    pub fn command_bulk(&self, mut ticket: PooledTicket) -> ClientResult<Vec<u8>> {
        match self.dispatch(&mut ticket, ResultKind::Bulk)? {
            Reply::Bulk(data) => Ok(data),
            _ => Err(ClientError::Protocol),
        }
    }

    /// Executes a command that answers with an array of bulk strings.
    ///
    /// Null elements are `None`; a null array is `ClientError::Null`.
    pub fn command_array(&self, mut ticket: PooledTicket) -> ClientResult<Vec<Option<Vec<u8>>>> {
        match self.dispatch(&mut ticket, ResultKind::Array)? {
            Reply::Array(items) => Ok(items),
            _ => Err(ClientError::Protocol),
        }
    }

    fn dispatch(&self, ticket: &mut PooledTicket, kind: ResultKind) -> ClientResult<Reply> {
        ticket.set_kind(kind);
        self.send(ticket)?;
        ticket.wait()
    }

    /// Writes the ticket's request and queues it for the read loop.
    ///
    /// Returns once the request is written; the response is awaited on the
    /// ticket separately.
    fn send(&self, ticket: &Ticket) -> ClientResult<()> {
        if self.is_terminated() {
            return Err(ClientError::Terminated);
        }

        let mut writer = select! {
            recv(self.gateway.permit_rx) -> msg => match msg {
                Ok(writer) => writer,
                Err(_) => return Err(ClientError::Terminated),
            },
            recv(self.gateway.offline_rx) -> msg => return Err(match msg {
                Ok(source) => ClientError::Connect { addr: self.addr.clone(), source },
                Err(_) => ClientError::Terminated,
            }),
        };
        if self.is_terminated() {
            return Err(ClientError::Terminated);
        }

        if let Err(err) = writer.write_all(ticket.request()).and_then(|()| writer.flush()) {
            // The permit is not released; the manager restores it after reconnect.
            drop(writer);
            let _ = self.gateway.write_err_tx.try_send(());
            return Err(ClientError::Io(err));
        }

        if let Err(SendError(pending)) = self.gateway.queue_tx.send(ticket.pending()) {
            pending.disarm();
            return Err(ClientError::Terminated);
        }

        let _ = self.gateway.permit_tx.send(writer);
        Ok(())
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn non_zero(duration: Duration) -> Option<Duration> {
    if duration.is_zero() {
        None
    } else {
        Some(duration)
    }
}
