//! # Connection Manager
//!
//! Purpose: Own the socket for one client. Dial and redial, publish the write
//! permit, answer queued tickets in order, and fail every queued ticket when
//! the connection breaks.
//!
//! ## Design Principles
//! 1. **Explicit State Machine**: Each state is a method returning the next
//!    state, so failure paths are auditable on their own.
//! 2. **Single Reader**: Only this thread reads the socket; responses are
//!    matched to tickets purely by queue order.
//! 3. **Permit Ownership**: While draining, the write permit is out of
//!    circulation, so nothing new can enter the queue.
//!
//! ## States
//!
//! ```text
//!            dial ok                read/write failure
//! Connecting ───────► Serving ─────────────────────────► Draining
//!     ▲  │ dial err                                         │
//!     │  └─ relay error to senders, back off ─┐             │
//!     └───────────────────────────────────────┴─────────────┘
//!
//! any state ── stop request ──► Terminated
//! ```

use std::io::{self, BufReader};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{after, select, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::resp::decode;
use crate::ticket::Pending;
use crate::transport::{Dialer, Stream};

/// IPv6 minimum MTU of 1280 bytes, minus a 40 byte IP header, minus a 32
/// byte TCP header (with timestamps).
pub const CONSERVATIVE_MSS: usize = 1208;

/// Window in which a dial error is handed to blocked senders before redial.
pub const RECONNECT_DELAY: Duration = Duration::from_micros(500);

type Reader = BufReader<Box<dyn Stream>>;

enum State {
    Connecting,
    Serving(Reader),
    Draining(Reader),
    Terminated(Option<Reader>),
}

/// Handle onto the live connection that lets `Client::terminate` close the
/// socket no matter who holds the write permit.
#[derive(Default)]
pub(crate) struct SocketSlot {
    inner: Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    closed: bool,
    stream: Option<Box<dyn Stream>>,
}

impl SocketSlot {
    /// Stores a handle for the new connection. Returns false once closed;
    /// the handle is then shut down immediately.
    fn publish(&self, stream: Box<dyn Stream>) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            let _ = stream.shutdown();
            return false;
        }
        inner.stream = Some(stream);
        true
    }

    fn clear(&self) {
        self.inner.lock().stream = None;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Shuts down the current connection, if any, and refuses new ones.
    /// Blocked reads and writes on every handle of that connection fail.
    pub(crate) fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        if let Some(stream) = inner.stream.take() {
            let _ = stream.shutdown();
        }
    }
}

/// Channel ends held by the manager thread.
pub(crate) struct ManagerChannels {
    pub(crate) permit_tx: Sender<Box<dyn Stream>>,
    pub(crate) permit_rx: Receiver<Box<dyn Stream>>,
    pub(crate) write_err_rx: Receiver<()>,
    pub(crate) queue_rx: Receiver<Pending>,
    pub(crate) offline_tx: Sender<Arc<io::Error>>,
    pub(crate) quit_rx: Receiver<()>,
}

pub(crate) struct Manager {
    dialer: Box<dyn Dialer>,
    timeout: Option<Duration>,
    channels: ManagerChannels,
    socket: Arc<SocketSlot>,
}

impl Manager {
    pub(crate) fn new(
        dialer: Box<dyn Dialer>,
        timeout: Option<Duration>,
        channels: ManagerChannels,
        socket: Arc<SocketSlot>,
    ) -> Self {
        Manager {
            dialer,
            timeout,
            channels,
            socket,
        }
    }

    /// Runs until a stop request; dropping `self` afterwards closes the
    /// offline channel, which every sender observes as termination.
    pub(crate) fn run(mut self) {
        let mut state = State::Connecting;
        loop {
            state = match state {
                State::Connecting => self.connect(),
                State::Serving(reader) => self.serve(reader),
                State::Draining(reader) => self.drain(reader),
                State::Terminated(reader) => {
                    self.terminate(reader);
                    return;
                }
            };
        }
    }

    fn connect(&mut self) -> State {
        if self.socket.is_closed() || self.channels.quit_rx.try_recv().is_ok() {
            return State::Terminated(None);
        }

        let timeout = self.timeout;
        let dialed = self.dialer.dial().and_then(|stream| {
            stream.set_timeouts(timeout)?;
            let writer = stream.try_clone_stream()?;
            let handle = stream.try_clone_stream()?;
            Ok((stream, writer, handle))
        });

        match dialed {
            Ok((stream, writer, handle)) => {
                if !self.socket.publish(handle) {
                    let _ = stream.shutdown();
                    return State::Terminated(None);
                }
                debug!(addr = %self.dialer.target(), "connection established");
                // Publishing the permit unblocks senders.
                let _ = self.channels.permit_tx.send(writer);
                State::Serving(BufReader::with_capacity(CONSERVATIVE_MSS, stream))
            }
            Err(err) => {
                warn!(addr = %self.dialer.target(), error = %err, "dial failed");
                self.relay_dial_error(Arc::new(err))
            }
        }
    }

    fn relay_dial_error(&self, err: Arc<io::Error>) -> State {
        let delay = after(RECONNECT_DELAY);
        loop {
            select! {
                send(self.channels.offline_tx, Arc::clone(&err)) -> _ => {}
                recv(delay) -> _ => return State::Connecting,
                recv(self.channels.quit_rx) -> _ => return State::Terminated(None),
            }
        }
    }

    fn serve(&self, mut reader: Reader) -> State {
        let mut line = Vec::with_capacity(128);
        loop {
            select! {
                recv(self.channels.quit_rx) -> _ => return State::Terminated(Some(reader)),
                recv(self.channels.queue_rx) -> msg => {
                    let pending = match msg {
                        Ok(pending) => pending,
                        Err(_) => return State::Terminated(Some(reader)),
                    };
                    match decode(&mut reader, pending.kind(), &mut line) {
                        Ok(result) => pending.complete(result),
                        Err(_) if self.socket.is_closed() => {
                            // Socket closed by `Client::terminate` to unblock this read.
                            pending.complete(Err(ClientError::Terminated));
                            return State::Terminated(Some(reader));
                        }
                        Err(err) => {
                            warn!(addr = %self.dialer.target(), error = %err, "read failed");
                            pending.complete(Err(read_failure(err)));
                            close(&reader);
                            if self.reclaim_permit() {
                                return State::Terminated(Some(reader));
                            }
                            return State::Draining(reader);
                        }
                    }
                }
                recv(self.channels.write_err_rx) -> _ => return State::Draining(reader),
            }
        }
    }

    /// Takes the write permit out of circulation after a read failure.
    /// Returns true when a stop request arrived instead.
    ///
    /// Either the permit is idle in its channel, or a sender holds it and
    /// will return it or report a write error. Queue entries arriving in the
    /// meantime are failed so a sender blocked on a full queue can finish.
    fn reclaim_permit(&self) -> bool {
        loop {
            select! {
                recv(self.channels.permit_rx) -> _ => return false,
                recv(self.channels.write_err_rx) -> _ => return false,
                recv(self.channels.quit_rx) -> _ => return true,
                recv(self.channels.queue_rx) -> msg => match msg {
                    Ok(pending) => pending.complete(Err(ClientError::ConnectionLost)),
                    Err(_) => return true,
                },
            }
        }
    }

    fn drain(&self, reader: Reader) -> State {
        close(&reader);
        drop(reader);
        self.socket.clear();

        let mut failed = 0usize;
        while let Ok(pending) = self.channels.queue_rx.try_recv() {
            pending.complete(Err(ClientError::ConnectionLost));
            failed += 1;
        }
        warn!(addr = %self.dialer.target(), failed, "connection lost; redialing");
        State::Connecting
    }

    fn terminate(&self, reader: Option<Reader>) {
        if let Some(reader) = reader {
            close(&reader);
        }
        self.socket.close();
        while self.channels.permit_rx.try_recv().is_ok() {}
        while let Ok(pending) = self.channels.queue_rx.try_recv() {
            pending.complete(Err(ClientError::Terminated));
        }
        debug!(addr = %self.dialer.target(), "connection manager terminated");
    }
}

fn close(reader: &Reader) {
    // Already-closed sockets report errors here; nothing to recover.
    let _ = reader.get_ref().shutdown();
}

/// Maps a failed decode onto the error reported to the ticket being read.
fn read_failure(err: io::Error) -> ClientError {
    match err.kind() {
        io::ErrorKind::InvalidData => ClientError::Protocol,
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ClientError::Io(err),
        _ => ClientError::ConnectionLost,
    }
}
