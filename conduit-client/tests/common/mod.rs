#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use conduit_client::{Client, ClientConfig, Dialer, Stream};

/// What the fake server does with one parsed command.
pub enum Action {
    /// Write these bytes back.
    Reply(Vec<u8>),
    /// Read the command but never answer it.
    Silent,
    /// Close the connection without answering.
    Close,
}

/// Handle to a fake server thread.
pub struct FakeServer {
    pub addr: String,
    /// Number of accepted connections so far.
    pub connections: Arc<AtomicUsize>,
}

/// Spawns a server that accepts connections forever and answers each
/// command through `handler(connection_index, args)`.
pub fn spawn_server<F>(handler: F) -> FakeServer
where
    F: Fn(usize, Vec<Vec<u8>>) -> Action + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let connections = Arc::new(AtomicUsize::new(0));
    let handler = Arc::new(handler);

    let accepted = Arc::clone(&connections);
    thread::spawn(move || {
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(_) => return,
            };
            let conn_idx = accepted.fetch_add(1, Ordering::SeqCst);
            let handler = Arc::clone(&handler);
            thread::spawn(move || serve_connection(stream, conn_idx, handler.as_ref()));
        }
    });

    FakeServer { addr, connections }
}

fn serve_connection<F>(mut stream: TcpStream, conn_idx: usize, handler: &F)
where
    F: Fn(usize, Vec<Vec<u8>>) -> Action,
{
    let mut reader = BufReader::new(stream.try_clone().expect("clone"));
    loop {
        let args = match read_command(&mut reader) {
            Ok(args) => args,
            Err(_) => return,
        };
        match handler(conn_idx, args) {
            Action::Reply(bytes) => {
                if stream.write_all(&bytes).is_err() {
                    return;
                }
            }
            Action::Silent => {}
            Action::Close => {
                let _ = stream.shutdown(std::net::Shutdown::Both);
                return;
            }
        }
    }
}

pub fn read_command<R: BufRead>(reader: &mut R) -> std::io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
    if line.first() != Some(&b'*') {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
        if line.first() != Some(&b'$') {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "missing crlf"));
        }
        args.push(data);
    }
    Ok(args)
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<()>> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Ok(None);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(Some(()))
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    if data.is_empty() {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "empty"));
    }
    let mut value = 0usize;
    for &b in data {
        if !b.is_ascii_digit() {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "digit"));
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as usize);
    }
    Ok(value)
}

pub fn simple(msg: &str) -> Action {
    Action::Reply(format!("+{msg}\r\n").into_bytes())
}

pub fn error(msg: &str) -> Action {
    Action::Reply(format!("-{msg}\r\n").into_bytes())
}

pub fn integer(value: i64) -> Action {
    Action::Reply(format!(":{value}\r\n").into_bytes())
}

pub fn bulk(data: &[u8]) -> Action {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    Action::Reply(out)
}

pub fn raw(bytes: &[u8]) -> Action {
    Action::Reply(bytes.to_vec())
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn client_with_addr(addr: &str) -> Client {
    init_tracing();
    let config = ClientConfig {
        addr: addr.to_string(),
        timeout: Some(Duration::from_secs(2)),
        connect_timeout: Some(Duration::from_secs(1)),
        nodelay: true,
        ..ClientConfig::default()
    };
    Client::with_config(config).expect("client")
}

/// In-memory connection shared by every handle a `WireStream` clones.
pub struct Wire {
    state: Mutex<WireState>,
    ready: Condvar,
}

struct WireState {
    inbound: VecDeque<u8>,
    broken: bool,
    writes: usize,
    writes_left: usize,
    answer: bool,
}

impl Wire {
    /// A connection that accepts `writes_left` requests, answering each with
    /// `+PONG` when `answer` is set. The next write fails and breaks it.
    pub fn new(writes_left: usize, answer: bool) -> Arc<Wire> {
        Arc::new(Wire {
            state: Mutex::new(WireState {
                inbound: VecDeque::new(),
                broken: false,
                writes: 0,
                writes_left,
                answer,
            }),
            ready: Condvar::new(),
        })
    }

    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    fn break_wire(&self, state: &mut WireState) {
        state.broken = true;
        self.ready.notify_all();
    }
}

pub struct WireStream(Arc<Wire>);

impl Read for WireStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.0.state.lock().unwrap();
        loop {
            if !state.inbound.is_empty() {
                let n = buf.len().min(state.inbound.len());
                for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if state.broken {
                return Err(io::ErrorKind::ConnectionReset.into());
            }
            state = self.0.ready.wait(state).unwrap();
        }
    }
}

impl Write for WireStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.0.state.lock().unwrap();
        if state.broken {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if state.writes_left == 0 {
            self.0.break_wire(&mut state);
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        state.writes_left -= 1;
        state.writes += 1;
        if state.answer {
            state.inbound.extend(b"+PONG\r\n");
            self.0.ready.notify_all();
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Stream for WireStream {
    fn try_clone_stream(&self) -> io::Result<Box<dyn Stream>> {
        Ok(Box::new(WireStream(Arc::clone(&self.0))))
    }

    fn shutdown(&self) -> io::Result<()> {
        let mut state = self.0.state.lock().unwrap();
        self.0.break_wire(&mut state);
        Ok(())
    }

    fn set_timeouts(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

/// Hands out the given wires in order, then refuses.
pub struct WireDialer {
    wires: VecDeque<Arc<Wire>>,
}

impl WireDialer {
    pub fn new(wires: Vec<Arc<Wire>>) -> Self {
        WireDialer {
            wires: wires.into(),
        }
    }
}

impl Dialer for WireDialer {
    fn dial(&mut self) -> io::Result<Box<dyn Stream>> {
        match self.wires.pop_front() {
            Some(wire) => Ok(Box::new(WireStream(wire))),
            None => Err(io::ErrorKind::ConnectionRefused.into()),
        }
    }

    fn target(&self) -> String {
        "wire".to_string()
    }
}
