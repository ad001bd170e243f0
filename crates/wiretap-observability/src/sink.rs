//! Remote-sink exporter: a bounded, batching, retrying pusher to a
//! Loki-shaped push API, using the same retry-with-backoff shape as the
//! forwarding client's own retry wrapper.

use flate2::write::GzEncoder;
use flate2::Compression;
use rand::Rng as _;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// The fixed, low-cardinality label set a pusher entry is grouped by.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Labels {
    pub app: String,
    pub provider: String,
    pub environment: String,
    pub machine: String,
    pub log_type: String,
    pub model: String,
    pub status_bucket: String,
    pub stream: String,
    pub has_tools: String,
    pub stop_reason: String,
    pub ratelimit_status: String,
    pub tool_name: String,
    pub is_retry: String,
    pub error_type: String,
    pub transport: String,
}

impl Labels {
    fn as_map(&self) -> HashMap<&'static str, String> {
        let mut map = HashMap::new();
        macro_rules! put {
            ($field:ident, $key:literal) => {
                if !self.$field.is_empty() {
                    map.insert($key, self.$field.clone());
                }
            };
        }
        put!(app, "app");
        put!(provider, "provider");
        put!(environment, "environment");
        put!(machine, "machine");
        put!(log_type, "log_type");
        put!(model, "model");
        put!(status_bucket, "status_bucket");
        put!(stream, "stream");
        put!(has_tools, "has_tools");
        put!(stop_reason, "stop_reason");
        put!(ratelimit_status, "ratelimit_status");
        put!(tool_name, "tool_name");
        put!(is_retry, "is_retry");
        put!(error_type, "error_type");
        put!(transport, "transport");
        map
    }
}

/// One pusher entry: a fully-rendered log line plus its extracted labels.
#[derive(Debug, Clone)]
pub struct SinkEntry {
    pub ts_nanos: i128,
    pub line: Value,
    pub labels: Labels,
}

#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub url: String,
    pub token: Option<String>,
    pub batch_size: usize,
    pub batch_wait: Duration,
    pub channel_capacity: usize,
    pub retry_wait: Duration,
    pub retry_max: u32,
    pub shutdown_timeout: Duration,
    pub compress: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: None,
            batch_size: 100,
            batch_wait: Duration::from_secs(5),
            channel_capacity: 4096,
            retry_wait: Duration::from_millis(250),
            retry_max: 5,
            shutdown_timeout: Duration::from_secs(30),
            compress: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct SinkStats {
    pub entries_sent: AtomicU64,
    pub entries_failed: AtomicU64,
    pub entries_dropped: AtomicU64,
    pub batches_sent: AtomicU64,
}

impl SinkStats {
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.entries_sent.load(Ordering::Relaxed),
            self.entries_failed.load(Ordering::Relaxed),
            self.entries_dropped.load(Ordering::Relaxed),
            self.batches_sent.load(Ordering::Relaxed),
        )
    }
}

#[derive(Serialize)]
struct PushStream {
    stream: HashMap<&'static str, String>,
    values: Vec<[String; 2]>,
}

#[derive(Serialize)]
struct PushPayload {
    streams: Vec<PushStream>,
}

/// The non-blocking front end; cloning shares the same channel and stats.
#[derive(Clone)]
pub struct SinkHandle {
    tx: mpsc::Sender<SinkEntry>,
    stats: Arc<SinkStats>,
}

impl SinkHandle {
    /// Enqueues `entry`. Drops it and bumps `entries_dropped` if the
    /// channel is full; never awaits backpressure.
    pub fn push(&self, entry: SinkEntry) {
        match self.tx.try_send(entry) {
            Ok(()) => {}
            Err(_) => {
                self.stats.entries_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn stats(&self) -> Arc<SinkStats> {
        Arc::clone(&self.stats)
    }
}

/// Spawns the worker task and returns a cloneable handle plus a closer.
pub struct RemoteSink {
    handle: SinkHandle,
    worker: tokio::task::JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl RemoteSink {
    pub fn start(config: SinkConfig, client: reqwest::Client) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let stats = Arc::new(SinkStats::default());
        let shutdown_timeout = config.shutdown_timeout;
        let worker_stats = Arc::clone(&stats);
        let worker = tokio::spawn(run_worker(rx, config, client, worker_stats));
        Self { handle: SinkHandle { tx, stats }, worker, shutdown_timeout }
    }

    pub fn handle(&self) -> SinkHandle {
        self.handle.clone()
    }

    pub fn stats(&self) -> Arc<SinkStats> {
        self.handle.stats()
    }

    /// Drops the sender so the worker drains and exits, then waits up to
    /// `shutdown_timeout` for it to finish.
    pub async fn close(self) {
        drop(self.handle.tx);
        let _ = tokio::time::timeout(self.shutdown_timeout, self.worker).await;
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<SinkEntry>,
    config: SinkConfig,
    client: reqwest::Client,
    stats: Arc<SinkStats>,
) {
    let mut batch = Vec::with_capacity(config.batch_size);
    let mut deadline = Instant::now() + config.batch_wait;

    loop {
        tokio::select! {
            entry = rx.recv() => {
                match entry {
                    Some(entry) => {
                        batch.push(entry);
                        if batch.len() >= config.batch_size {
                            flush(&client, &config, &stats, std::mem::take(&mut batch)).await;
                            deadline = Instant::now() + config.batch_wait;
                        }
                    }
                    None => {
                        if !batch.is_empty() {
                            flush(&client, &config, &stats, std::mem::take(&mut batch)).await;
                        }
                        return;
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                if !batch.is_empty() {
                    flush(&client, &config, &stats, std::mem::take(&mut batch)).await;
                }
                deadline = Instant::now() + config.batch_wait;
            }
        }
    }
}

async fn flush(client: &reqwest::Client, config: &SinkConfig, stats: &Arc<SinkStats>, entries: Vec<SinkEntry>) {
    let count = entries.len() as u64;
    let payload = group_into_payload(entries);
    let body = match serde_json::to_vec(&payload) {
        Ok(b) => b,
        Err(err) => {
            warn!(error = %err, "failed to serialize sink batch");
            stats.entries_failed.fetch_add(count, Ordering::Relaxed);
            return;
        }
    };

    match send_with_retry(client, config, body).await {
        Ok(()) => {
            stats.entries_sent.fetch_add(count, Ordering::Relaxed);
            stats.batches_sent.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
            warn!(error = %err, "sink batch exhausted retries");
            stats.entries_failed.fetch_add(count, Ordering::Relaxed);
        }
    }
}

fn group_into_payload(entries: Vec<SinkEntry>) -> PushPayload {
    let mut streams: HashMap<Vec<(String, String)>, PushStream> = HashMap::new();
    for entry in entries {
        let map = entry.labels.as_map();
        let mut key: Vec<(String, String)> = map.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        key.sort();

        let line = entry.line.to_string();
        let stream = streams.entry(key).or_insert_with(|| PushStream { stream: map, values: Vec::new() });
        stream.values.push([entry.ts_nanos.to_string(), line]);
    }
    PushPayload { streams: streams.into_values().collect() }
}

async fn send_with_retry(client: &reqwest::Client, config: &SinkConfig, body: Vec<u8>) -> Result<(), String> {
    let mut last_error = String::new();

    for attempt in 0..config.retry_max {
        if attempt > 0 {
            let base_ms = config.retry_wait.as_millis() as u64 * 2u64.pow(attempt - 1);
            let capped_ms = base_ms.min(10_000);
            let jitter = rand::rng().random_range(0..=(capped_ms / 4).max(1));
            debug!(attempt, delay_ms = capped_ms + jitter, "retrying sink push");
            tokio::time::sleep(Duration::from_millis(capped_ms + jitter)).await;
        }

        match send_once(client, config, &body).await {
            Ok(()) => return Ok(()),
            Err(err) => last_error = err,
        }
    }

    Err(last_error)
}

async fn send_once(client: &reqwest::Client, config: &SinkConfig, body: &[u8]) -> Result<(), String> {
    let payload = if config.compress {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(body).map_err(|e| e.to_string())?;
        encoder.finish().map_err(|e| e.to_string())?
    } else {
        body.to_vec()
    };

    let mut req = client.post(&config.url).header("Content-Type", "application/json").body(payload);
    if config.compress {
        req = req.header("Content-Encoding", "gzip");
    }
    if let Some(token) = &config.token {
        req = req.header("Authorization", format!("Bearer {token}"));
    }

    let resp = req.send().await.map_err(|e| e.to_string())?;
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(format!("sink returned status {}", resp.status()))
    }
}
