//! The log record schema: the tagged union written to JSONL files and
//! handed to the remote-sink exporter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::provider::Provider;

/// Envelope carried by every record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMeta {
    pub ts: DateTime<Utc>,
    pub machine: String,
    pub host: String,
    pub session: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl RecordMeta {
    pub fn new(host: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            machine: crate::identity::machine_identity().to_string(),
            host: host.into(),
            session: session.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// A single line of the upstream's SSE stream, timestamped relative to the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub ts: DateTime<Utc>,
    pub delta_ms: u64,
    pub raw: String,
}

/// Exactly one of `body` or `chunks` is present, mirroring whether the
/// response was buffered or streamed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Buffered { body: Value },
    Streamed { chunks: Vec<StreamChunk> },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResponseTiming {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttfb_ms: Option<u64>,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
}

/// A snapshot of pattern-tracker counters, embedded in `turn_end` records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternSnapshot {
    pub turn_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tool_name: Option<String>,
    pub tool_streak: u64,
    pub retry_count: u64,
    pub session_tool_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogRecord {
    SessionStart {
        #[serde(flatten)]
        meta: RecordMeta,
        provider: Provider,
    },
    Request {
        #[serde(flatten)]
        meta: RecordMeta,
        provider: Provider,
        seq: u64,
        method: String,
        path: String,
        headers: HashMap<String, String>,
        body: Value,
    },
    Response {
        #[serde(flatten)]
        meta: RecordMeta,
        provider: Provider,
        seq: u64,
        status: u16,
        headers: HashMap<String, String>,
        #[serde(flatten)]
        body: ResponseBody,
        timing: ResponseTiming,
    },
    Fork {
        #[serde(flatten)]
        meta: RecordMeta,
        provider: Provider,
        from_seq: u64,
        parent_session: String,
    },
    TurnStart {
        #[serde(flatten)]
        meta: RecordMeta,
        turn_depth: u64,
        error_recovered: bool,
    },
    TurnEnd {
        #[serde(flatten)]
        meta: RecordMeta,
        stop_reason: String,
        is_retry: bool,
        error_type: String,
        pattern: PatternSnapshot,
        usage: TokenUsage,
    },
    ToolCall {
        #[serde(flatten)]
        meta: RecordMeta,
        tool_name: String,
        tool_index: u32,
        tool_use_id: String,
    },
    ToolResult {
        #[serde(flatten)]
        meta: RecordMeta,
        tool_name: String,
        tool_use_id: String,
        is_error: bool,
    },
}

impl LogRecord {
    pub fn meta(&self) -> &RecordMeta {
        match self {
            LogRecord::SessionStart { meta, .. }
            | LogRecord::Request { meta, .. }
            | LogRecord::Response { meta, .. }
            | LogRecord::Fork { meta, .. }
            | LogRecord::TurnStart { meta, .. }
            | LogRecord::TurnEnd { meta, .. }
            | LogRecord::ToolCall { meta, .. }
            | LogRecord::ToolResult { meta, .. } => meta,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LogRecord::SessionStart { .. } => "session_start",
            LogRecord::Request { .. } => "request",
            LogRecord::Response { .. } => "response",
            LogRecord::Fork { .. } => "fork",
            LogRecord::TurnStart { .. } => "turn_start",
            LogRecord::TurnEnd { .. } => "turn_end",
            LogRecord::ToolCall { .. } => "tool_call",
            LogRecord::ToolResult { .. } => "tool_result",
        }
    }
}
