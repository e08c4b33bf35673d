//! # Conduit Pipelining Client
//!
//! Purpose: Provide a synchronous, thread-safe client for RESP servers that
//! pipelines every caller's commands over one managed connection.
//!
//! ## Design Principles
//! 1. **Single Connection**: One socket, one read loop, one reconnect state
//!    machine; callers see independent blocking calls.
//! 2. **Strict Ordering**: Responses are matched to requests by send order.
//! 3. **Object Pool Pattern**: Per-call state lives in pooled tickets.
//! 4. **Fail, Don't Retry**: A broken connection fails every in-flight
//!    command; the manager redials, callers decide whether to resubmit.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use conduit_client::Client;
//!
//! let client = Client::new("localhost:6379", Duration::from_secs(1), Duration::ZERO)?;
//! client.set(b"greeting", b"hello")?;
//! assert_eq!(client.get(b"greeting")?, Some(b"hello".to_vec()));
//!
//! let ticket = client.ticket(&[b"INCR", b"visits"]);
//! let visits = client.command_integer(ticket)?;
//! # let _ = visits;
//! client.terminate();
//! # Ok::<(), conduit_client::ClientError>(())
//! ```

mod address;
mod client;
mod commands;
mod error;
mod manager;
mod resp;
mod ticket;
mod transport;

pub use address::{Endpoint, QUEUE_SIZE_TCP, QUEUE_SIZE_UNIX};
pub use client::{Client, ClientConfig};
pub use commands::Ttl;
pub use error::{ClientError, ClientResult, ServerError};
pub use manager::{CONSERVATIVE_MSS, RECONNECT_DELAY};
pub use resp::{decode, encode_command, parse_int, Reply, ResultKind};
pub use ticket::{PooledTicket, Ticket, TicketPool};
pub use transport::{Dialer, NetDialer, Stream, DEFAULT_CONNECT_TIMEOUT};
