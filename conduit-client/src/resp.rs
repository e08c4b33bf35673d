//! # RESP Encoding and Decoding
//!
//! Purpose: Encode outbound commands and decode exactly one reply per pending
//! ticket, validating the reply type against what the caller asked for.
//!
//! ## Design Principles
//! 1. **Typed Expectations**: The caller declares a `ResultKind` up front, so
//!    decoding produces the one result shape it needs and nothing else.
//! 2. **Two Failure Layers**: Transport failures (`io::Error`) end the
//!    connection; reply-level failures (`ClientError`) end only the call.
//! 3. **Stream Sync**: A well-framed reply of the wrong type is consumed in
//!    full before reporting the violation, keeping the next reply aligned.
//! 4. **Binary-Safe**: Bulk strings are treated as raw bytes.

use std::io::{self, BufRead, Read};

use bytes::{BufMut, BytesMut};

use crate::error::{ClientError, ClientResult, ServerError};

/// Largest bulk payload accepted from the server (matches the server default).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Upper bound for array preallocation; larger arrays grow on demand.
const MAX_ARRAY_PREALLOC: usize = 1024;

/// Result shape a command expects from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// `+OK` style status reply.
    Ok,
    /// `:123` reply.
    Integer,
    /// `$...` bulk string.
    Bulk,
    /// `*...` array of bulk strings.
    Array,
}

/// Decoded reply, shaped by the expected `ResultKind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Integer(i64),
    Bulk(Vec<u8>),
    /// Array elements; `None` marks a null element.
    Array(Vec<Option<Vec<u8>>>),
}

/// Encodes a command as an array of bulk strings into the provided buffer.
pub fn encode_command(args: &[&[u8]], out: &mut BytesMut) {
    let payload: usize = args.iter().map(|arg| arg.len() + 16).sum();
    out.reserve(payload + 16);

    out.put_u8(b'*');
    push_usize(out, args.len());
    out.put_slice(b"\r\n");
    for arg in args {
        out.put_u8(b'$');
        push_usize(out, arg.len());
        out.put_slice(b"\r\n");
        out.put_slice(arg);
        out.put_slice(b"\r\n");
    }
}

/// Reads exactly one reply from `reader`.
///
/// The outer `io::Result` reports whether a complete, well-framed reply was
/// read at all; an `Err` there means the connection is no longer usable. The
/// inner `ClientResult` is the per-call outcome, including server errors.
pub fn decode<R: BufRead>(
    reader: &mut R,
    kind: ResultKind,
    line: &mut Vec<u8>,
) -> io::Result<ClientResult<Reply>> {
    let (prefix, value) = read_header(reader, line)?;

    match prefix {
        b'-' => {
            let message = String::from_utf8_lossy(&line[1..]).into_owned();
            Ok(Err(ServerError::new(message).into()))
        }
        b'+' => Ok(match kind {
            ResultKind::Ok => Ok(Reply::Ok),
            _ => Err(ClientError::Protocol),
        }),
        b':' => Ok(match kind {
            ResultKind::Integer => Ok(Reply::Integer(value)),
            _ => Err(ClientError::Protocol),
        }),
        b'$' => {
            if kind != ResultKind::Bulk {
                skip_body(reader, prefix, value, line)?;
                return Ok(Err(ClientError::Protocol));
            }
            Ok(match read_bulk(reader, value)? {
                Some(data) => Ok(Reply::Bulk(data)),
                None => Err(ClientError::Null),
            })
        }
        b'*' => {
            if kind != ResultKind::Array {
                skip_body(reader, prefix, value, line)?;
                return Ok(Err(ClientError::Protocol));
            }
            if value < 0 {
                return Ok(Err(ClientError::Null));
            }
            read_array(reader, value, line)
        }
        _ => Err(framing_error()),
    }
}

/// Parses a decimal integer without validation.
///
/// Assumes an optional leading minus followed by ASCII digits. The empty
/// input yields zero. Overflow wraps instead of panicking.
pub fn parse_int(bytes: &[u8]) -> i64 {
    let (negative, digits) = match bytes.split_first() {
        None => return 0,
        Some((&b'-', rest)) => (true, rest),
        Some(_) => (false, bytes),
    };

    let mut value: u64 = 0;
    for &b in digits {
        value = value
            .wrapping_mul(10)
            .wrapping_add(u64::from(b.wrapping_sub(b'0')));
    }

    let value = value as i64;
    if negative {
        value.wrapping_neg()
    } else {
        value
    }
}

fn read_array<R: BufRead>(
    reader: &mut R,
    count: i64,
    line: &mut Vec<u8>,
) -> io::Result<ClientResult<Reply>> {
    let mut items = Vec::with_capacity((count as usize).min(MAX_ARRAY_PREALLOC));
    let mut violation = false;
    for _ in 0..count {
        let (prefix, value) = read_header(reader, line)?;
        if prefix == b'$' {
            items.push(read_bulk(reader, value)?);
        } else {
            // Only one level of bulk elements is expected.
            skip_body(reader, prefix, value, line)?;
            violation = true;
        }
    }

    if violation {
        Ok(Err(ClientError::Protocol))
    } else {
        Ok(Ok(Reply::Array(items)))
    }
}

fn read_bulk<R: BufRead>(reader: &mut R, len: i64) -> io::Result<Option<Vec<u8>>> {
    if len < 0 {
        return Ok(None);
    }
    if len > MAX_BULK_LEN {
        return Err(framing_error());
    }

    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data)?;
    read_crlf(reader)?;
    Ok(Some(data))
}

/// Consumes the remainder of a reply whose header line was already read.
///
/// Nested arrays are tracked with a counter of elements still owed rather
/// than by recursion, so nesting depth is bounded only by the stream.
fn skip_body<R: BufRead>(
    reader: &mut R,
    mut prefix: u8,
    mut value: i64,
    line: &mut Vec<u8>,
) -> io::Result<()> {
    let mut remaining: i64 = 0;
    loop {
        match prefix {
            b'+' | b'-' | b':' => {}
            b'$' => skip_bulk(reader, value)?,
            b'*' => remaining = remaining.saturating_add(value.max(0)),
            _ => return Err(framing_error()),
        }
        if remaining == 0 {
            return Ok(());
        }
        remaining -= 1;
        (prefix, value) = read_header(reader, line)?;
    }
}

fn skip_bulk<R: BufRead>(reader: &mut R, len: i64) -> io::Result<()> {
    if len < 0 {
        return Ok(());
    }
    if len > MAX_BULK_LEN {
        return Err(framing_error());
    }
    let want = len as u64;
    let skipped = io::copy(&mut reader.by_ref().take(want), &mut io::sink())?;
    if skipped != want {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    read_crlf(reader)
}

/// Reads a header line and returns its type byte with the parsed integer
/// payload (meaningful for `:`, `$` and `*` only).
fn read_header<R: BufRead>(reader: &mut R, line: &mut Vec<u8>) -> io::Result<(u8, i64)> {
    read_line(reader, line)?;
    match line.split_first() {
        Some((&prefix, rest)) => {
            let value = match prefix {
                b':' | b'$' | b'*' => parse_int(rest),
                _ => 0,
            };
            Ok((prefix, value))
        }
        None => Err(framing_error()),
    }
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(framing_error());
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn read_crlf<R: BufRead>(reader: &mut R) -> io::Result<()> {
    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != *b"\r\n" {
        return Err(framing_error());
    }
    Ok(())
}

fn framing_error() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "malformed reply framing")
}

fn push_usize(out: &mut BytesMut, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    buf[..len].reverse();
    out.put_slice(&buf[..len]);
}
