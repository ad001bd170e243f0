//! Line-granular SSE tee: forwards upstream bytes to the client
//! line by line while building a parallel record of the stream for log
//! reconstruction. Byte-exact passthrough of line content is preserved;
//! only the unit of forwarding is a line rather than the raw TCP chunking.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use wiretap_core::{Provider, StreamChunk, TokenUsage};

#[derive(Debug, Clone)]
pub struct ReconstructedToolCall {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    /// Concatenated `input_json_delta` partials, JSON-parsed once the block closes.
    pub input: Value,
}

#[derive(Debug, Default)]
pub struct StreamOutcome {
    pub chunks: Vec<StreamChunk>,
    pub accumulated_text: String,
    pub tool_calls: Vec<ReconstructedToolCall>,
    pub usage: TokenUsage,
    pub stop_reason: Option<String>,
    pub ttfb_ms: Option<u64>,
}

impl StreamOutcome {
    /// Anthropic's minimal response-body reconstruction for `record_response`.
    pub fn as_anthropic_body(&self) -> Value {
        serde_json::json!({
            "content": [{"type": "text", "text": self.accumulated_text}],
            "stop_reason": self.stop_reason,
            "usage": {
                "input_tokens": self.usage.input_tokens,
                "output_tokens": self.usage.output_tokens,
            },
        })
    }

    pub fn as_openai_body(&self) -> Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": self.accumulated_text}}],
            "usage": {
                "input_tokens": self.usage.input_tokens,
                "output_tokens": self.usage.output_tokens,
            },
        })
    }
}

struct PartialToolBlock {
    index: u32,
    id: Option<String>,
    name: Option<String>,
    json_buf: String,
}

/// Splits an upstream byte stream into client-forwarded lines, recording a
/// timestamped `StreamChunk` per line and extracting provider-specific text
/// deltas as it goes. Returns the forwarding stream plus a receiver that
/// resolves to the final `StreamOutcome` once upstream reaches EOF.
///
/// Runs the split-and-record loop on a dedicated task so the forwarding
/// stream is driven purely by channel receives; the client side never waits
/// on JSON parsing or accumulation.
pub fn tee<S>(
    mut upstream: S,
    provider: Provider,
    start: Instant,
) -> (impl Stream<Item = std::io::Result<Bytes>>, oneshot::Receiver<StreamOutcome>)
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin + Send + 'static,
{
    let (line_tx, line_rx) = mpsc::channel::<std::io::Result<Bytes>>(64);
    let (outcome_tx, outcome_rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut buf = BytesMut::new();
        let mut outcome = StreamOutcome::default();
        let mut pending_tool: Option<PartialToolBlock> = None;

        while let Some(next) = upstream.next().await {
            let bytes = match next {
                Ok(b) => b,
                Err(e) => {
                    if line_tx.send(Err(std::io::Error::other(e))).await.is_err() {
                        return;
                    }
                    continue;
                }
            };
            buf.extend_from_slice(&bytes);

            while let Some(newline_idx) = buf.iter().position(|b| *b == b'\n') {
                let line = buf.split_to(newline_idx + 1).freeze();
                record_line(&line, provider, start, &mut outcome, &mut pending_tool);
                if line_tx.send(Ok(line)).await.is_err() {
                    return;
                }
            }
        }

        if !buf.is_empty() {
            let line = buf.freeze();
            record_line(&line, provider, start, &mut outcome, &mut pending_tool);
            let _ = line_tx.send(Ok(line)).await;
        }

        let _ = outcome_tx.send(outcome);
    });

    (ReceiverStream::new(line_rx), outcome_rx)
}

fn record_line(
    line: &Bytes,
    provider: Provider,
    start: Instant,
    outcome: &mut StreamOutcome,
    pending_tool: &mut Option<PartialToolBlock>,
) {
    let delta_ms = start.elapsed().as_millis() as u64;
    if outcome.ttfb_ms.is_none() {
        outcome.ttfb_ms = Some(delta_ms);
    }
    outcome.chunks.push(StreamChunk {
        ts: chrono::Utc::now(),
        delta_ms,
        raw: String::from_utf8_lossy(line).into_owned(),
    });

    let Some(payload) = line
        .strip_prefix(b"data: ")
        .or_else(|| line.strip_prefix(b"data:"))
    else {
        return;
    };
    let payload = std::str::from_utf8(payload).unwrap_or("").trim();
    if payload.is_empty() || payload == "[DONE]" {
        return;
    }
    let Ok(event) = serde_json::from_str::<Value>(payload) else {
        return;
    };

    match provider {
        Provider::Anthropic => record_anthropic_event(&event, outcome, pending_tool),
        Provider::Openai => record_openai_event(&event, outcome),
    }
}

fn record_anthropic_event(
    event: &Value,
    outcome: &mut StreamOutcome,
    pending_tool: &mut Option<PartialToolBlock>,
) {
    match event.get("type").and_then(Value::as_str) {
        Some("message_start") => {
            if let Some(usage) = event.get("message").and_then(|m| m.get("usage")) {
                outcome.usage.input_tokens = usage.get("input_tokens").and_then(Value::as_u64).map(|v| v as u32);
            }
        }
        Some("content_block_start") => {
            if event.get("content_block").and_then(|b| b.get("type")).and_then(Value::as_str) == Some("tool_use") {
                let block = event.get("content_block").unwrap();
                *pending_tool = Some(PartialToolBlock {
                    index: event.get("index").and_then(Value::as_u64).unwrap_or(0) as u32,
                    id: block.get("id").and_then(Value::as_str).map(str::to_string),
                    name: block.get("name").and_then(Value::as_str).map(str::to_string),
                    json_buf: String::new(),
                });
            }
        }
        Some("content_block_delta") => {
            if let Some(text) = event.get("delta").and_then(|d| d.get("text")).and_then(Value::as_str) {
                outcome.accumulated_text.push_str(text);
            }
            if let Some(partial) = event.get("delta").and_then(|d| d.get("partial_json")).and_then(Value::as_str) {
                if let Some(tool) = pending_tool.as_mut() {
                    tool.json_buf.push_str(partial);
                }
            }
        }
        Some("content_block_stop") => {
            if let Some(tool) = pending_tool.take() {
                let input = serde_json::from_str(&tool.json_buf).unwrap_or(Value::Object(Default::default()));
                outcome.tool_calls.push(ReconstructedToolCall {
                    index: tool.index,
                    id: tool.id,
                    name: tool.name,
                    input,
                });
            }
        }
        Some("message_delta") => {
            if let Some(reason) = event.get("delta").and_then(|d| d.get("stop_reason")).and_then(Value::as_str) {
                outcome.stop_reason = Some(reason.to_string());
            }
            if let Some(usage) = event.get("usage") {
                outcome.usage.output_tokens = usage.get("output_tokens").and_then(Value::as_u64).map(|v| v as u32);
            }
        }
        _ => {}
    }
}

fn record_openai_event(event: &Value, outcome: &mut StreamOutcome) {
    if let Some(content) = event
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(Value::as_str)
    {
        outcome.accumulated_text.push_str(content);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn body_stream(lines: Vec<&'static str>) -> impl Stream<Item = reqwest::Result<Bytes>> + Unpin + Send + 'static {
        stream::iter(lines.into_iter().map(|l| Ok(Bytes::from(l))))
    }

    #[tokio::test]
    async fn anthropic_text_deltas_accumulate_and_forward_lines() {
        let lines = vec![
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
        ];
        let (forwarded, rx) = tee(body_stream(lines), Provider::Anthropic, Instant::now());
        let collected: Vec<_> = forwarded.collect().await;
        assert!(collected.iter().all(|r| r.is_ok()));
        let outcome = rx.await.unwrap();
        assert_eq!(outcome.accumulated_text, "Hello");
        assert!(outcome.ttfb_ms.is_some());
    }

    #[tokio::test]
    async fn anthropic_tool_use_block_reconstructs_from_deltas() {
        let lines = vec![
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"bash\"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"cmd\\\"\"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\":\\\"ls\\\"}\"}}\n\n",
            "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
        ];
        let (forwarded, rx) = tee(body_stream(lines), Provider::Anthropic, Instant::now());
        let _: Vec<_> = forwarded.collect().await;
        let outcome = rx.await.unwrap();
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.tool_calls[0].name.as_deref(), Some("bash"));
        assert_eq!(outcome.tool_calls[0].input.get("cmd").and_then(Value::as_str), Some("ls"));
    }

    #[tokio::test]
    async fn openai_content_deltas_accumulate() {
        let lines = vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n",
        ];
        let (forwarded, rx) = tee(body_stream(lines), Provider::Openai, Instant::now());
        let _: Vec<_> = forwarded.collect().await;
        let outcome = rx.await.unwrap();
        assert_eq!(outcome.accumulated_text, "Hi there");
    }
}
