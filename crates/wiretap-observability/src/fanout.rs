//! Fan-out writer: file writer plus an optional remote-sink pusher.

use async_trait::async_trait;
use std::collections::HashMap;

use wiretap_core::{LogRecord, Provider, RecordMeta, ResponseBody, ResponseTiming};

use crate::error::Result;
use crate::logger::{FileLogger, ProxyLogger};
use crate::sink::{Labels, SinkEntry, SinkHandle};

pub struct FanoutWriter {
    file: FileLogger,
    sink: Option<SinkHandle>,
    environment: String,
    app: String,
}

impl FanoutWriter {
    pub fn new(file: FileLogger, sink: Option<SinkHandle>, environment: impl Into<String>) -> Self {
        Self { file, sink, environment: environment.into(), app: "wiretap".to_string() }
    }

    fn push(&self, meta: &RecordMeta, log_type: &str, provider: Provider, mut labels: Labels, line: serde_json::Value) {
        let Some(sink) = &self.sink else { return };
        labels.app = self.app.clone();
        labels.environment = self.environment.clone();
        labels.machine = meta.machine.clone();
        labels.log_type = log_type.to_string();
        labels.provider = provider.to_string();

        let ts_nanos = meta.ts.timestamp_nanos_opt().unwrap_or_default() as i128;
        sink.push(SinkEntry { ts_nanos, line, labels });
    }
}

fn has_tools(body: &serde_json::Value) -> bool {
    body.get("tools").map(|t| t.as_array().is_some_and(|a| !a.is_empty())).unwrap_or(false)
}

fn request_model(body: &serde_json::Value) -> String {
    body.get("model").and_then(|v| v.as_str()).unwrap_or_default().to_string()
}

fn is_streaming(body: &serde_json::Value) -> bool {
    body.get("stream").and_then(|v| v.as_bool()).unwrap_or(false)
}

fn status_bucket(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

fn stop_reason_from_response(body: &ResponseBody) -> String {
    match body {
        ResponseBody::Buffered { body } => body
            .get("stop_reason")
            .or_else(|| body.get("choices").and_then(|c| c.get(0)).and_then(|c| c.get("finish_reason")))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        ResponseBody::Streamed { chunks } => chunks
            .iter()
            .rev()
            .find_map(|chunk| {
                let json = chunk.raw.strip_prefix("data: ").or_else(|| chunk.raw.strip_prefix("data:"))?;
                let value: serde_json::Value = serde_json::from_str(json.trim()).ok()?;
                value
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .or_else(|| value.get("choices").and_then(|c| c.get(0)).and_then(|c| c.get("finish_reason")))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
            })
            .unwrap_or_default(),
    }
}

fn ratelimit_status(headers: &HashMap<String, String>) -> String {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("x-ratelimit-status") || k.eq_ignore_ascii_case("anthropic-ratelimit-status"))
        .map(|(_, v)| v.to_lowercase())
        .unwrap_or_default()
}

#[async_trait]
impl ProxyLogger for FanoutWriter {
    async fn register_upstream(&self, session: &str, upstream: &str) {
        self.file.register_upstream(session, upstream).await;
    }

    async fn log_session_start(&self, session: &str, provider: Provider, upstream: &str, meta: RecordMeta) -> Result<()> {
        self.file.log_session_start(session, provider, upstream, meta.clone()).await?;
        self.push(&meta, "session_start", provider, Labels::default(), serde_json::json!({"type": "session_start"}));
        Ok(())
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
        let labels = Labels {
            model: request_model(&body),
            stream: is_streaming(&body).to_string(),
            has_tools: has_tools(&body).to_string(),
            ..Default::default()
        };
        let line = serde_json::json!({"type": "request", "seq": seq, "method": method, "path": path});
        self.file.log_request(session, provider, seq, method, path, headers, body, meta.clone()).await?;
        self.push(&meta, "request", provider, labels, line);
        Ok(())
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
        let labels = Labels {
            status_bucket: status_bucket(status).to_string(),
            ratelimit_status: ratelimit_status(&headers),
            stop_reason: stop_reason_from_response(&body),
            ..Default::default()
        };
        let line = serde_json::json!({"type": "response", "seq": seq, "status": status, "total_ms": timing.total_ms});
        self.file.log_response(session, provider, seq, status, headers, body, timing, meta.clone()).await?;
        self.push(&meta, "response", provider, labels, line);
        Ok(())
    }

    async fn log_fork(&self, session: &str, provider: Provider, from_seq: u64, parent_session: &str, meta: RecordMeta) -> Result<()> {
        self.file.log_fork(session, provider, from_seq, parent_session, meta.clone()).await?;
        let line = serde_json::json!({"type": "fork", "from_seq": from_seq, "parent_session": parent_session});
        self.push(&meta, "fork", provider, Labels::default(), line);
        Ok(())
    }

    async fn log_event(&self, session: &str, record: LogRecord) -> Result<()> {
        let meta = record.meta().clone();
        let kind = record.kind();
        let mut labels = Labels::default();
        if let LogRecord::ToolCall { tool_name, .. } | LogRecord::ToolResult { tool_name, .. } = &record {
            labels.tool_name = tool_name.clone();
        }
        if let LogRecord::TurnEnd { is_retry, error_type, .. } = &record {
            labels.is_retry = is_retry.to_string();
            labels.error_type = error_type.clone();
        }
        let line = serde_json::to_value(&record).unwrap_or(serde_json::Value::Null);

        self.file.log_event(session, record).await?;
        self.push(&meta, kind, Provider::Anthropic, labels, line);
        Ok(())
    }

    /// Closes the file writer only. This writer holds a `SinkHandle`, not
    /// the owning `RemoteSink`, so it cannot drain the sink itself: the
    /// caller holding the `RemoteSink` must close it first.
    async fn close(&self) -> Result<()> {
        self.file.close().await
    }
}
