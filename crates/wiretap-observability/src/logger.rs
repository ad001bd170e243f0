//! `ProxyLogger`: the single trait every log-producing call site in the
//! proxy goes through, plus the file-backed implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use wiretap_core::{LogRecord, Provider, RecordMeta, ResponseBody, ResponseTiming};

use crate::error::Result;
use crate::obfuscate::obfuscate_header;
use crate::writer::FileWriter;

#[async_trait]
pub trait ProxyLogger: Send + Sync {
    async fn register_upstream(&self, session: &str, upstream: &str);

    async fn log_session_start(&self, session: &str, provider: Provider, upstream: &str, meta: RecordMeta) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    async fn log_request(
        &self,
        session: &str,
        provider: Provider,
        seq: u64,
        method: &str,
        path: &str,
        headers: &HashMap<String, String>,
        body: serde_json::Value,
        meta: RecordMeta,
    ) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    async fn log_response(
        &self,
        session: &str,
        provider: Provider,
        seq: u64,
        status: u16,
        headers: HashMap<String, String>,
        body: ResponseBody,
        timing: ResponseTiming,
        meta: RecordMeta,
    ) -> Result<()>;

    async fn log_fork(&self, session: &str, provider: Provider, from_seq: u64, parent_session: &str, meta: RecordMeta) -> Result<()>;

    /// Emits a pattern-tracker-derived record (`turn_start`/`turn_end`/
    /// `tool_call`/`tool_result`) already fully constructed by the caller.
    /// Not named in the operation table directly, but every such record
    /// still flows through this trait rather than writing files itself.
    async fn log_event(&self, session: &str, record: LogRecord) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

pub struct FileLogger {
    writer: FileWriter,
    upstreams: Mutex<HashMap<String, String>>,
}

impl FileLogger {
    pub fn new(writer: FileWriter) -> Self {
        Self { writer, upstreams: Mutex::new(HashMap::new()) }
    }

    async fn upstream_for(&self, session: &str) -> String {
        self.upstreams.lock().await.get(session).cloned().unwrap_or_default()
    }

    fn obfuscate_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
        headers.iter().map(|(k, v)| (k.clone(), obfuscate_header(k, v))).collect()
    }
}

#[async_trait]
impl ProxyLogger for FileLogger {
    async fn register_upstream(&self, session: &str, upstream: &str) {
        self.upstreams.lock().await.entry(session.to_string()).or_insert_with(|| upstream.to_string());
    }

    async fn log_session_start(&self, session: &str, provider: Provider, upstream: &str, meta: RecordMeta) -> Result<()> {
        self.register_upstream(session, upstream).await;
        let record = LogRecord::SessionStart { meta, provider };
        self.writer.append(upstream, session, &record).await
    }

    async fn log_request(
        &self,
        session: &str,
        provider: Provider,
        seq: u64,
        method: &str,
        path: &str,
        headers: &HashMap<String, String>,
        body: serde_json::Value,
        meta: RecordMeta,
    ) -> Result<()> {
        let upstream = self.upstream_for(session).await;
        let record = LogRecord::Request {
            meta,
            provider,
            seq,
            method: method.to_string(),
            path: path.to_string(),
            headers: Self::obfuscate_headers(headers),
            body,
        };
        self.writer.append(&upstream, session, &record).await
    }

    async fn log_response(
        &self,
        session: &str,
        provider: Provider,
        seq: u64,
        status: u16,
        headers: HashMap<String, String>,
        body: ResponseBody,
        timing: ResponseTiming,
        meta: RecordMeta,
    ) -> Result<()> {
        let upstream = self.upstream_for(session).await;
        let record = LogRecord::Response {
            meta,
            provider,
            seq,
            status,
            headers: Self::obfuscate_headers(&headers),
            body,
            timing,
        };
        self.writer.append(&upstream, session, &record).await
    }

    async fn log_fork(&self, session: &str, provider: Provider, from_seq: u64, parent_session: &str, meta: RecordMeta) -> Result<()> {
        let upstream = self.upstream_for(session).await;

        for line in self.writer.read_lines(&upstream, parent_session).await? {
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) else { continue };
            let keep = match value["type"].as_str() {
                Some("session_start") => true,
                Some("request") | Some("response") => value["seq"].as_u64().is_some_and(|seq| seq <= from_seq),
                _ => false,
            };
            if keep {
                self.writer.append_raw_line(&upstream, session, &line).await?;
            }
        }

        let record = LogRecord::Fork {
            meta,
            provider,
            from_seq,
            parent_session: parent_session.to_string(),
        };
        self.writer.append(&upstream, session, &record).await
    }

    async fn log_event(&self, session: &str, record: LogRecord) -> Result<()> {
        let upstream = self.upstream_for(session).await;
        self.writer.append(&upstream, session, &record).await
    }

    async fn close(&self) -> Result<()> {
        self.writer.close().await
    }
}
