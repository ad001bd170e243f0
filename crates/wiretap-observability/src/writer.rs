//! JSONL file writer with one cached handle per session, following the
//! common cache/eviction/flush-on-evict discipline for bounded file-handle
//! pools.

use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct FileWriterConfig {
    pub cache_size: usize,
    pub buffer_size: usize,
}

impl Default for FileWriterConfig {
    fn default() -> Self {
        Self {
            cache_size: 100,
            buffer_size: 64 * 1024,
        }
    }
}

fn sanitize_session_id(session_id: &str) -> String {
    session_id.chars().filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_').take(255).collect()
}

/// Appends one JSON object per line to `{base}/{upstream}/{YYYY-MM-DD}/{session}.jsonl`,
/// caching one open handle per (date, upstream, session) key in an LRU.
pub struct FileWriter {
    base: PathBuf,
    config: FileWriterConfig,
    cache: Mutex<LruCache<String, BufWriter<tokio::fs::File>>>,
}

impl FileWriter {
    pub fn new(base: PathBuf) -> Self {
        Self::with_config(base, FileWriterConfig::default())
    }

    pub fn with_config(base: PathBuf, config: FileWriterConfig) -> Self {
        let cache_size = NonZeroUsize::new(config.cache_size).expect("cache_size must be > 0");
        Self {
            base,
            config,
            cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    fn session_path(&self, upstream: &str, session_id: &str) -> PathBuf {
        let sanitized = sanitize_session_id(session_id);
        let today = chrono::Utc::now().format("%Y-%m-%d");
        self.base.join(upstream).join(today.to_string()).join(format!("{sanitized}.jsonl"))
    }

    fn cache_key(&self, upstream: &str, session_id: &str) -> String {
        let sanitized = sanitize_session_id(session_id);
        let today = chrono::Utc::now().format("%Y-%m-%d");
        format!("{today}:{upstream}:{sanitized}")
    }

    async fn open(&self, upstream: &str, session_id: &str) -> Result<BufWriter<tokio::fs::File>> {
        let path = self.session_path(upstream, session_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(BufWriter::with_capacity(self.config.buffer_size, file))
    }

    async fn ensure_cached(&self, upstream: &str, session_id: &str) -> Result<()> {
        let key = self.cache_key(upstream, session_id);
        let cache = self.cache.lock().await;
        if cache.contains(&key) {
            return Ok(());
        }
        drop(cache);

        let file = self.open(upstream, session_id).await?;
        let mut cache = self.cache.lock().await;
        if !cache.contains(&key) {
            if let Some((_, mut evicted)) = cache.push(key, file) {
                drop(cache);
                evicted.flush().await?;
            }
        }
        Ok(())
    }

    /// Appends one JSON-serialized record, newline-terminated, to the
    /// session's file.
    pub async fn append<T: Serialize>(&self, upstream: &str, session_id: &str, record: &T) -> Result<()> {
        self.ensure_cached(upstream, session_id).await?;
        let line = serde_json::to_string(record)?;

        let key = self.cache_key(upstream, session_id);
        let mut cache = self.cache.lock().await;
        if let Some(file) = cache.get_mut(&key) {
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }
        Ok(())
    }

    /// Appends a line that is already a serialized JSON record, verbatim.
    /// Used to replay records read back with [`Self::read_lines`] without
    /// a deserialize/reserialize round trip.
    pub async fn append_raw_line(&self, upstream: &str, session_id: &str, line: &str) -> Result<()> {
        self.ensure_cached(upstream, session_id).await?;
        let key = self.cache_key(upstream, session_id);
        let mut cache = self.cache.lock().await;
        if let Some(file) = cache.get_mut(&key) {
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }
        Ok(())
    }

    /// Flushes the session's cached handle (if any) and returns its file's
    /// lines verbatim, for replaying records into a forked session's file.
    pub async fn read_lines(&self, upstream: &str, session_id: &str) -> Result<Vec<String>> {
        let key = self.cache_key(upstream, session_id);
        let mut cache = self.cache.lock().await;
        if let Some(file) = cache.get_mut(&key) {
            file.flush().await?;
        }
        drop(cache);

        let path = self.session_path(upstream, session_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(contents.lines().map(str::to_string).collect()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Flushes and drops every cached handle.
    pub async fn close(&self) -> Result<()> {
        let mut cache = self.cache.lock().await;
        for (_, file) in cache.iter_mut() {
            file.flush().await?;
        }
        cache.clear();
        Ok(())
    }
}
