//! # Address Normalization
//!
//! Purpose: Resolve a user supplied address string into the endpoint the
//! connection manager dials, and pick the transport that goes with it.
//!
//! ## Rules
//! - Empty string → `localhost:6379`.
//! - Leading `/` → Unix socket path, lexically cleaned.
//! - Otherwise `host:port`; a missing host is `localhost`, a missing port
//!   is `6379`. IPv6 hosts are bracketed on output.

use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: &str = "6379";

/// Pending request limit for TCP connections.
pub const QUEUE_SIZE_TCP: usize = 128;
/// Pending request limit for Unix socket connections.
pub const QUEUE_SIZE_UNIX: usize = 512;

/// Normalized server endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `host:port` form.
    Tcp(String),
    /// Absolute socket path.
    Unix(PathBuf),
}

impl Endpoint {
    /// Normalizes `addr` according to the module rules.
    pub fn parse(addr: &str) -> Endpoint {
        if addr.starts_with('/') {
            return Endpoint::Unix(clean_path(addr));
        }

        let (host, port) = split_host_port(addr).unwrap_or((addr, ""));
        let host = if host.is_empty() { DEFAULT_HOST } else { host };
        let port = if port.is_empty() { DEFAULT_PORT } else { port };
        Endpoint::Tcp(join_host_port(host, port))
    }

    /// Bound on outstanding requests for this transport.
    pub fn queue_capacity(&self) -> usize {
        match self {
            Endpoint::Tcp(_) => QUEUE_SIZE_TCP,
            Endpoint::Unix(_) => QUEUE_SIZE_UNIX,
        }
    }

    pub fn is_unix(&self) -> bool {
        matches!(self, Endpoint::Unix(_))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => f.write_str(addr),
            Endpoint::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Splits `host:port`; `None` when the string has no usable port separator.
fn split_host_port(addr: &str) -> Option<(&str, &str)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let end = rest.find(']')?;
        let host = &rest[..end];
        let port = rest[end + 1..].strip_prefix(':')?;
        return Some((host, port));
    }

    let idx = addr.rfind(':')?;
    let host = &addr[..idx];
    if host.contains(':') {
        // Bare IPv6 literal without brackets.
        return None;
    }
    Some((host, &addr[idx + 1..]))
}

fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Lexical cleanup of an absolute path: drops empty and `.` segments and
/// resolves `..` without touching the filesystem.
fn clean_path(path: &str) -> PathBuf {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    PathBuf::from(format!("/{}", parts.join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp(addr: &str) -> Endpoint {
        Endpoint::Tcp(addr.to_string())
    }

    #[test]
    fn empty_defaults_to_localhost() {
        assert_eq!(Endpoint::parse(""), tcp("localhost:6379"));
    }

    #[test]
    fn fills_missing_host_or_port() {
        assert_eq!(Endpoint::parse("example.com"), tcp("example.com:6379"));
        assert_eq!(Endpoint::parse(":7000"), tcp("localhost:7000"));
        assert_eq!(Endpoint::parse("10.0.0.1:"), tcp("10.0.0.1:6379"));
        assert_eq!(Endpoint::parse("10.0.0.1:7000"), tcp("10.0.0.1:7000"));
    }

    #[test]
    fn brackets_ipv6_hosts() {
        assert_eq!(Endpoint::parse("[::1]:7000"), tcp("[::1]:7000"));
        assert_eq!(Endpoint::parse("::1"), tcp("[::1]:6379"));
    }

    #[test]
    fn cleans_unix_paths() {
        let endpoint = Endpoint::parse("/var//run/./redis/../redis.sock");
        assert_eq!(endpoint, Endpoint::Unix(PathBuf::from("/var/run/redis.sock")));
        assert!(endpoint.is_unix());
        assert_eq!(Endpoint::parse("/"), Endpoint::Unix(PathBuf::from("/")));
    }

    #[test]
    fn queue_capacity_depends_on_transport() {
        assert_eq!(Endpoint::parse("").queue_capacity(), QUEUE_SIZE_TCP);
        assert_eq!(Endpoint::parse("/tmp/s.sock").queue_capacity(), QUEUE_SIZE_UNIX);
    }

    #[test]
    fn displays_normalized_form() {
        assert_eq!(Endpoint::parse("").to_string(), "localhost:6379");
        assert_eq!(Endpoint::parse("/tmp//s.sock").to_string(), "/tmp/s.sock");
    }
}
