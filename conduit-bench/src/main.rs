//! # Pipelining Client Benchmark
//!
//! Purpose: Drive a RESP server through one `conduit_client::Client` from many
//! threads at once, so pipelining throughput can be compared over time.
//!
//! ## Design Principles
//! 1. **Deterministic Workload**: Each worker uses a fixed PRNG seed.
//! 2. **Allocation Control**: Keys and values are pre-built before timing.
//! 3. **Shared Connection**: All workers share one client; the numbers reflect
//!    how well concurrent callers pipeline over a single socket.
//!
//! Usage: `conduit-bench [addr] [threads] [ops-per-thread] [keys] [value-size]`

use std::env;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use conduit_client::{Client, ClientConfig};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_ADDR: &str = "127.0.0.1:6379";
const DEFAULT_THREADS: usize = 8;
const DEFAULT_OPS_PER_THREAD: usize = 100_000;
const DEFAULT_KEY_COUNT: usize = 1 << 12;
const DEFAULT_VALUE_SIZE: usize = 64;

struct BenchConfig {
    addr: String,
    threads: usize,
    ops_per_thread: usize,
    key_count: usize,
    key_mask: usize,
    value_size: usize,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        let addr = args.next().unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let threads = parse_usize(args.next(), DEFAULT_THREADS).max(1);
        let ops_per_thread = parse_usize(args.next(), DEFAULT_OPS_PER_THREAD);
        let key_count = parse_usize(args.next(), DEFAULT_KEY_COUNT).max(1).next_power_of_two();
        let value_size = parse_usize(args.next(), DEFAULT_VALUE_SIZE);

        BenchConfig {
            addr,
            threads,
            ops_per_thread,
            key_count,
            key_mask: key_count - 1,
            value_size,
        }
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    #[inline]
    fn next_index(&mut self, mask: usize) -> usize {
        (self.next_u64() as usize) & mask
    }
}

/// Throughput and mean latency; `None` when nothing was measured.
fn rates(ops: usize, elapsed: Duration) -> Option<(f64, f64)> {
    let secs = elapsed.as_secs_f64();
    if ops == 0 || secs == 0.0 {
        return None;
    }
    Some(((ops as f64) / secs, (secs * 1e6) / (ops as f64)))
}

fn report(label: &str, ops: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    match rates(ops, elapsed) {
        Some((ops_per_sec, micros_per_op)) => println!(
            "{label}: {ops} ops in {secs:.3}s ({ops_per_sec:.0} ops/s, {micros_per_op:.2} us/op)"
        ),
        None => println!("{label}: {ops} ops in {secs:.3}s"),
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).init();

    if let Err(err) = run() {
        eprintln!("conduit-bench failed: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = BenchConfig::from_args();
    let client = Arc::new(
        Client::with_config(ClientConfig {
            addr: config.addr.clone(),
            timeout: Some(Duration::from_secs(5)),
            ..ClientConfig::default()
        })
        .context("starting client")?,
    );
    client.ping().with_context(|| format!("pinging {}", client.addr()))?;

    let keys: Arc<Vec<Vec<u8>>> =
        Arc::new((0..config.key_count).map(|i| format!("bench:{i:08}").into_bytes()).collect());
    let value = vec![b'x'; config.value_size];
    for key in keys.iter() {
        client.set(key, &value)?;
    }

    info!(
        addr = client.addr(),
        threads = config.threads,
        ops_per_thread = config.ops_per_thread,
        keys = config.key_count,
        value_size = config.value_size,
        "benchmark starting"
    );

    let total = config.threads * config.ops_per_thread;

    let elapsed = run_workers(&client, &keys, &config, |client, key| {
        client.get(key)?.ok_or_else(|| anyhow!("missing key {}", String::from_utf8_lossy(key)))?;
        Ok(())
    })?;
    report("get", total, elapsed);

    let elapsed = run_workers(&client, &keys, &config, move |client, key| {
        client.set(key, &value)?;
        Ok(())
    })?;
    report("set", total, elapsed);

    let elapsed = run_workers(&client, &keys, &config, |client, _| {
        client.ping()?;
        Ok(())
    })?;
    report("ping", total, elapsed);

    client.terminate();
    Ok(())
}

fn run_workers<F>(
    client: &Arc<Client>,
    keys: &Arc<Vec<Vec<u8>>>,
    config: &BenchConfig,
    op: F,
) -> Result<Duration>
where
    F: Fn(&Client, &[u8]) -> Result<()> + Send + Sync + 'static,
{
    let op = Arc::new(op);
    let start = Instant::now();
    let handles: Vec<_> = (0..config.threads)
        .map(|worker| {
            let client = Arc::clone(client);
            let keys = Arc::clone(keys);
            let op = Arc::clone(&op);
            let ops = config.ops_per_thread;
            let mask = config.key_mask;
            thread::spawn(move || -> Result<()> {
                let mut rng = XorShift64::new(0x1234_5678_9ABC_DEF0 ^ worker as u64);
                for _ in 0..ops {
                    op(&client, &keys[rng.next_index(mask)])?;
                }
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow!("benchmark worker panicked"))??;
    }
    Ok(start.elapsed())
}
