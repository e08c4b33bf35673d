//! # Command Builders
//!
//! Purpose: Thin, typed wrappers that format arguments and call one of the
//! four generic primitives on `Client`.
//!
//! Every wrapper borrows its arguments as `&[u8]`; keys and values are
//! binary-safe.

use std::time::Duration;

use crate::client::Client;
use crate::error::{ClientError, ClientResult};

/// TTL state returned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

impl Client {
    /// Fetches a value by key. Returns `Ok(None)` when the key is missing.
    pub fn get(&self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        match self.command_bulk(self.ticket(&[b"GET", key])) {
            Ok(value) => Ok(Some(value)),
            Err(ClientError::Null) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Sets a value for a key without expiration.
    pub fn set(&self, key: &[u8], value: &[u8]) -> ClientResult<()> {
        self.command_ok(self.ticket(&[b"SET", key, value]))
    }

    /// Sets a value and attaches an expiration in whole seconds.
    pub fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> ClientResult<()> {
        let (seconds, len) = encode_u64(ttl.as_secs());
        self.command_ok(self.ticket(&[b"SET", key, value, b"EX", &seconds[..len]]))
    }

    /// Deletes keys. Returns the number of keys removed.
    pub fn del(&self, keys: &[&[u8]]) -> ClientResult<i64> {
        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(b"DEL");
        args.extend_from_slice(keys);
        self.command_integer(self.ticket(&args))
    }

    /// Returns true when the key exists.
    pub fn exists(&self, key: &[u8]) -> ClientResult<bool> {
        Ok(self.command_integer(self.ticket(&[b"EXISTS", key]))? > 0)
    }

    /// Increments the integer stored at key by one.
    pub fn incr(&self, key: &[u8]) -> ClientResult<i64> {
        self.command_integer(self.ticket(&[b"INCR", key]))
    }

    /// Increments the integer stored at key by `delta`.
    pub fn incr_by(&self, key: &[u8], delta: i64) -> ClientResult<i64> {
        let digits = delta.to_string();
        self.command_integer(self.ticket(&[b"INCRBY", key, digits.as_bytes()]))
    }

    /// Sets a time-to-live on a key. Returns true when the TTL was set.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> ClientResult<bool> {
        let (seconds, len) = encode_u64(ttl.as_secs());
        Ok(self.command_integer(self.ticket(&[b"EXPIRE", key, &seconds[..len]]))? == 1)
    }

    /// Returns TTL status for a key.
    pub fn ttl(&self, key: &[u8]) -> ClientResult<Ttl> {
        match self.command_integer(self.ticket(&[b"TTL", key]))? {
            -2 => Ok(Ttl::Missing),
            -1 => Ok(Ttl::NoExpiry),
            value if value >= 0 => Ok(Ttl::ExpiresIn(Duration::from_secs(value as u64))),
            _ => Err(ClientError::Protocol),
        }
    }

    /// Pings the server.
    pub fn ping(&self) -> ClientResult<()> {
        self.command_ok(self.ticket(&[b"PING"]))
    }

    /// Fetches the values of all keys; missing keys are `None`.
    pub fn mget(&self, keys: &[&[u8]]) -> ClientResult<Vec<Option<Vec<u8>>>> {
        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(b"MGET");
        args.extend_from_slice(keys);
        self.command_array(self.ticket(&args))
    }

    /// Lists the keys matching a glob pattern.
    pub fn keys(&self, pattern: &[u8]) -> ClientResult<Vec<Vec<u8>>> {
        let items = self.command_array(self.ticket(&[b"KEYS", pattern]))?;
        Ok(items.into_iter().flatten().collect())
    }

    /// Removes all keys of the selected database.
    pub fn flushdb(&self) -> ClientResult<()> {
        self.command_ok(self.ticket(&[b"FLUSHDB"]))
    }
}

fn encode_u64(mut value: u64) -> ([u8; 20], usize) {
    // Stack buffer keeps conversion allocation-free.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        return (buf, 1);
    }
    while value > 0 {
        buf[len] = b'0' + (value % 10) as u8;
        value /= 10;
        len += 1;
    }
    buf[..len].reverse();
    (buf, len)
}
