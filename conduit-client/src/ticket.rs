//! # Command Tickets
//!
//! Purpose: Carry the per-call state of one command (encoded request,
//! expected reply kind, completion signal) and recycle it through a shared
//! pool so steady-state calls do not allocate.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Tickets are checked out, used once, and
//!    returned on drop; returned tickets are cleared before reuse.
//! 2. **Single Completion**: Each queued `Pending` fills its ticket exactly
//!    once, either with a decoded reply or with an error.
//! 3. **No Lost Wakeups**: A `Pending` dropped without an answer completes
//!    its ticket with `Terminated`, so a caller never waits forever.
//!
//! ## Lifecycle
//!
//! ```text
//! TicketPool::checkout ─► PooledTicket ─► Client::send ─► Pending (queue)
//!                               ▲                              │
//!                               │          Completion::fill ◄──┘
//!        drop (reset + put) ◄── caller reads result
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::{Condvar, Mutex};

use crate::error::{ClientError, ClientResult};
use crate::resp::{encode_command, Reply, ResultKind};

/// Default number of idle tickets a pool keeps.
pub const DEFAULT_MAX_IDLE_TICKETS: usize = 1024;

/// Request buffers larger than this are released instead of pooled.
const MAX_RETAINED_REQUEST: usize = 16 * 1024;

/// One-shot result slot shared between a ticket and its queue entry.
struct Completion {
    slot: Mutex<Option<ClientResult<Reply>>>,
    ready: Condvar,
}

impl Completion {
    fn new() -> Self {
        Completion {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn fill(&self, result: ClientResult<Reply>) {
        let mut slot = self.slot.lock();
        *slot = Some(result);
        self.ready.notify_one();
    }

    fn wait(&self) -> ClientResult<Reply> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            self.ready.wait(&mut slot);
        }
    }

    fn clear(&self) {
        *self.slot.lock() = None;
    }
}

/// Per-call command state.
pub struct Ticket {
    request: BytesMut,
    kind: ResultKind,
    completion: Arc<Completion>,
}

impl Ticket {
    fn new() -> Self {
        Ticket {
            request: BytesMut::new(),
            kind: ResultKind::Ok,
            completion: Arc::new(Completion::new()),
        }
    }

    /// Encoded request bytes.
    pub fn request(&self) -> &[u8] {
        &self.request
    }

    /// Reply kind the ticket was last dispatched with.
    pub fn kind(&self) -> ResultKind {
        self.kind
    }

    pub(crate) fn set_kind(&mut self, kind: ResultKind) {
        self.kind = kind;
    }

    /// Creates the queue entry that will answer this ticket.
    pub(crate) fn pending(&self) -> Pending {
        Pending {
            kind: self.kind,
            completion: Some(Arc::clone(&self.completion)),
        }
    }

    /// Blocks until the queue entry for this ticket is answered.
    pub(crate) fn wait(&self) -> ClientResult<Reply> {
        self.completion.wait()
    }

    fn reset(&mut self) {
        if self.request.capacity() > MAX_RETAINED_REQUEST {
            self.request = BytesMut::new();
        }
        self.request.clear();
        self.kind = ResultKind::Ok;
        // A completion still referenced elsewhere is not reused.
        if Arc::strong_count(&self.completion) == 1 {
            self.completion.clear();
        } else {
            self.completion = Arc::new(Completion::new());
        }
    }
}

/// Queue entry for a sent command, answered by the read loop.
pub(crate) struct Pending {
    kind: ResultKind,
    completion: Option<Arc<Completion>>,
}

impl Pending {
    pub(crate) fn kind(&self) -> ResultKind {
        self.kind
    }

    /// Delivers the result and wakes the waiting caller.
    pub(crate) fn complete(mut self, result: ClientResult<Reply>) {
        if let Some(completion) = self.completion.take() {
            completion.fill(result);
        }
    }

    /// Drops the entry without answering; used when it never reached the queue.
    pub(crate) fn disarm(mut self) {
        self.completion = None;
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            completion.fill(Err(ClientError::Terminated));
        }
    }
}

/// Thread-safe free list of tickets.
pub struct TicketPool {
    idle: Mutex<Vec<Ticket>>,
    max_idle: usize,
}

impl TicketPool {
    pub fn new(max_idle: usize) -> Self {
        TicketPool {
            idle: Mutex::new(Vec::with_capacity(max_idle.min(64))),
            max_idle,
        }
    }

    /// Checks out a ticket with `args` encoded as its request.
    pub fn checkout(self: &Arc<Self>, args: &[&[u8]]) -> PooledTicket {
        let mut ticket = self.idle.lock().pop().unwrap_or_else(Ticket::new);
        encode_command(args, &mut ticket.request);
        PooledTicket {
            pool: Arc::clone(self),
            ticket,
        }
    }

    /// Number of tickets waiting for reuse.
    pub fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }

    fn put(&self, ticket: Ticket) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(ticket);
        }
    }
}

impl Default for TicketPool {
    fn default() -> Self {
        TicketPool::new(DEFAULT_MAX_IDLE_TICKETS)
    }
}

/// RAII wrapper returning the ticket to its pool on drop.
pub struct PooledTicket {
    pool: Arc<TicketPool>,
    ticket: Ticket,
}

impl Deref for PooledTicket {
    type Target = Ticket;

    fn deref(&self) -> &Ticket {
        &self.ticket
    }
}

impl DerefMut for PooledTicket {
    fn deref_mut(&mut self) -> &mut Ticket {
        &mut self.ticket
    }
}

impl Drop for PooledTicket {
    fn drop(&mut self) {
        self.ticket.reset();
        let ticket = Ticket {
            request: std::mem::take(&mut self.ticket.request),
            kind: ResultKind::Ok,
            completion: Arc::clone(&self.ticket.completion),
        };
        self.pool.put(ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn checkout_encodes_request() {
        let pool = Arc::new(TicketPool::new(4));
        let ticket = pool.checkout(&[b"PING"]);
        assert_eq!(ticket.request(), b"*1\r\n$4\r\nPING\r\n");
        assert_eq!(ticket.kind(), ResultKind::Ok);
    }

    #[test]
    fn returned_ticket_is_cleared_and_reused() {
        let pool = Arc::new(TicketPool::new(4));
        {
            let mut ticket = pool.checkout(&[b"GET", b"a"]);
            ticket.set_kind(ResultKind::Bulk);
            ticket.pending().complete(Ok(Reply::Bulk(b"stale".to_vec())));
        }
        assert_eq!(pool.idle_len(), 1);

        let ticket = pool.checkout(&[b"INCR", b"b"]);
        assert_eq!(pool.idle_len(), 0);
        assert_eq!(ticket.request(), b"*2\r\n$4\r\nINCR\r\n$1\r\nb\r\n");
        assert_eq!(ticket.kind(), ResultKind::Ok);

        ticket.pending().complete(Ok(Reply::Integer(3)));
        assert_eq!(ticket.wait().unwrap(), Reply::Integer(3));
    }

    #[test]
    fn oversized_request_buffer_is_not_retained() {
        let pool = Arc::new(TicketPool::new(2));
        let big = vec![b'v'; 4 * MAX_RETAINED_REQUEST];
        let large = pool.checkout(&[b"SET", b"k", &big]);
        let small = pool.checkout(&[b"GET", b"k"]);
        assert!(large.request.capacity() > MAX_RETAINED_REQUEST);
        drop(large);
        drop(small);

        let idle = pool.idle.lock();
        assert_eq!(idle.len(), 2);
        assert!(idle.iter().all(|ticket| ticket.request.capacity() <= MAX_RETAINED_REQUEST));
    }

    #[test]
    fn pool_keeps_at_most_max_idle() {
        let pool = Arc::new(TicketPool::new(2));
        let tickets: Vec<_> = (0..5).map(|_| pool.checkout(&[b"PING"])).collect();
        drop(tickets);
        assert_eq!(pool.idle_len(), 2);
    }

    #[test]
    fn dropped_pending_completes_with_terminated() {
        let pool = Arc::new(TicketPool::new(1));
        let ticket = pool.checkout(&[b"PING"]);
        drop(ticket.pending());
        assert!(matches!(ticket.wait(), Err(ClientError::Terminated)));
    }

    #[test]
    fn disarmed_pending_leaves_slot_empty() {
        let pool = Arc::new(TicketPool::new(1));
        let ticket = pool.checkout(&[b"PING"]);
        ticket.pending().disarm();
        assert!(ticket.completion.slot.lock().is_none());
    }

    #[test]
    fn wait_blocks_until_completed_from_another_thread() {
        let pool = Arc::new(TicketPool::new(1));
        let mut ticket = pool.checkout(&[b"DEL", b"k"]);
        ticket.set_kind(ResultKind::Integer);
        let pending = ticket.pending();
        assert_eq!(pending.kind(), ResultKind::Integer);

        let handle = thread::spawn(move || pending.complete(Ok(Reply::Integer(1))));
        assert_eq!(ticket.wait().unwrap(), Reply::Integer(1));
        handle.join().unwrap();
    }
}
