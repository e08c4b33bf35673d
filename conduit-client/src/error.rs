//! # Client Errors
//!
//! Purpose: Define the error taxonomy every command primitive reports, plus the
//! opaque server error type carried through from `-` replies.
//!
//! ## Design Principles
//! 1. **Explicit Outcomes**: Every primitive returns a `ClientResult`; a zero
//!    value is never a silent stand-in for a failure.
//! 2. **Shared Dial Errors**: One dial failure may be relayed to many blocked
//!    senders, so its source is reference counted rather than cloned.
//! 3. **No Local Recovery**: Connection loss is reported, never retried.

use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client has been shut down; no further commands are accepted.
    #[error("conduit: client terminated")]
    Terminated,

    /// The connection failed while the command was awaiting its response.
    #[error("conduit: connection lost while awaiting response")]
    ConnectionLost,

    /// Reply type inconsistent with the expected kind, or malformed framing.
    #[error("conduit: protocol violation")]
    Protocol,

    /// The server returned a null bulk string or null array.
    #[error("conduit: null")]
    Null,

    /// Application-level error reported by the server.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Read or write failure observed by this command.
    #[error("conduit: io error: {0}")]
    Io(#[from] io::Error),

    /// The connection is unavailable; the last dial attempt failed.
    #[error("conduit: connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: Arc<io::Error>,
    },
}

impl ClientError {
    /// Returns true when the error came from the server rather than the client.
    pub fn is_server(&self) -> bool {
        matches!(self, ClientError::Server(_))
    }
}

/// Error message sent by the server in a `-` reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerError(String);

impl ServerError {
    pub fn new(message: impl Into<String>) -> Self {
        ServerError(message.into())
    }

    /// Returns the first word, which represents the error kind.
    pub fn prefix(&self) -> &str {
        match self.0.find(char::is_whitespace) {
            Some(end) => &self.0[..end],
            None => &self.0,
        }
    }

    /// Full message as reported by the server.
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conduit: server error {:?}", self.0)
    }
}

impl std::error::Error for ServerError {}
