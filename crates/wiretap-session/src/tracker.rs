//! Pattern-tracker orchestration: turns the raw request/response
//! pair for a turn into the derived `turn_start` / `tool_call` /
//! `tool_result` / `turn_end` log records, driving `wiretap_core::PatternState`
//! through `compute_patterns`.

use serde_json::Value;

use wiretap_core::{compute_patterns, PatternState, Provider, RecordMeta, TokenUsage};

/// Tool calls and results found in one assistant turn, in emission order.
#[derive(Debug, Default)]
pub struct TurnEvents {
    pub tool_calls: Vec<ToolCallEvent>,
    pub tool_results: Vec<ToolResultEvent>,
    pub stop_reason: Option<String>,
    pub error_type: Option<String>,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone)]
pub struct ToolCallEvent {
    pub tool_name: String,
    pub tool_index: u32,
    pub tool_use_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ToolResultEvent {
    pub tool_name: Option<String>,
    pub tool_use_id: Option<String>,
    pub is_error: bool,
}

/// Scans the request body's trailing messages for `tool_result` blocks
/// (Anthropic) or `function_call_output` items (OpenAI), matching each back
/// to the tool name recorded for its `tool_use_id` by a previous turn.
pub fn tool_results_from_request(
    provider: Provider,
    body: &Value,
    pending_tool_ids: &std::collections::HashMap<String, String>,
) -> Vec<ToolResultEvent> {
    match provider {
        Provider::Anthropic => anthropic_tool_results(body, pending_tool_ids),
        Provider::Openai => openai_tool_results(body, pending_tool_ids),
    }
}

fn anthropic_tool_results(
    body: &Value,
    pending_tool_ids: &std::collections::HashMap<String, String>,
) -> Vec<ToolResultEvent> {
    let mut out = Vec::new();
    let Some(messages) = body.get("messages").and_then(Value::as_array) else {
        return out;
    };
    for message in messages {
        let Some(blocks) = message.get("content").and_then(Value::as_array) else {
            continue;
        };
        for block in blocks {
            if block.get("type").and_then(Value::as_str) != Some("tool_result") {
                continue;
            }
            let tool_use_id = block.get("tool_use_id").and_then(Value::as_str).map(str::to_string);
            let tool_name = tool_use_id.as_ref().and_then(|id| pending_tool_ids.get(id)).cloned();
            let is_error = block.get("is_error").and_then(Value::as_bool).unwrap_or(false);
            out.push(ToolResultEvent { tool_name, tool_use_id, is_error });
        }
    }
    out
}

fn openai_tool_results(
    body: &Value,
    pending_tool_ids: &std::collections::HashMap<String, String>,
) -> Vec<ToolResultEvent> {
    let mut out = Vec::new();
    let Some(input) = body.get("input").and_then(Value::as_array) else {
        return out;
    };
    for item in input {
        if item.get("type").and_then(Value::as_str) != Some("function_call_output") {
            continue;
        }
        let tool_use_id = item.get("call_id").and_then(Value::as_str).map(str::to_string);
        let tool_name = tool_use_id.as_ref().and_then(|id| pending_tool_ids.get(id)).cloned();
        out.push(ToolResultEvent { tool_name, tool_use_id, is_error: false });
    }
    out
}

/// Scans a buffered (non-streamed) response body for tool/function calls
/// the assistant issued this turn.
pub fn tool_calls_from_response(provider: Provider, body: &Value) -> Vec<ToolCallEvent> {
    match provider {
        Provider::Anthropic => anthropic_tool_calls(body),
        Provider::Openai => openai_tool_calls(body),
    }
}

fn anthropic_tool_calls(body: &Value) -> Vec<ToolCallEvent> {
    let mut out = Vec::new();
    let Some(blocks) = body.get("content").and_then(Value::as_array) else {
        return out;
    };
    for (index, block) in blocks.iter().enumerate() {
        if block.get("type").and_then(Value::as_str) != Some("tool_use") {
            continue;
        }
        let Some(tool_name) = block.get("name").and_then(Value::as_str) else {
            continue;
        };
        out.push(ToolCallEvent {
            tool_name: tool_name.to_string(),
            tool_index: index as u32,
            tool_use_id: block.get("id").and_then(Value::as_str).map(str::to_string),
        });
    }
    out
}

fn openai_tool_calls(body: &Value) -> Vec<ToolCallEvent> {
    let mut out = Vec::new();
    let Some(output) = body.get("output").and_then(Value::as_array) else {
        return out;
    };
    for (index, item) in output.iter().enumerate() {
        if item.get("type").and_then(Value::as_str) != Some("function_call") {
            continue;
        }
        let Some(tool_name) = item.get("name").and_then(Value::as_str) else {
            continue;
        };
        out.push(ToolCallEvent {
            tool_name: tool_name.to_string(),
            tool_index: index as u32,
            tool_use_id: item.get("call_id").and_then(Value::as_str).map(str::to_string),
        });
    }
    out
}

pub fn stop_reason(provider: Provider, body: &Value) -> Option<String> {
    match provider {
        Provider::Anthropic => body.get("stop_reason").and_then(Value::as_str).map(str::to_string),
        Provider::Openai => body
            .get("status")
            .or_else(|| body.get("incomplete_details").and_then(|d| d.get("reason")))
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

pub fn token_usage(provider: Provider, body: &Value) -> TokenUsage {
    match provider {
        Provider::Anthropic => TokenUsage {
            input_tokens: body.get("usage").and_then(|u| u.get("input_tokens")).and_then(Value::as_u64).map(|v| v as u32),
            output_tokens: body.get("usage").and_then(|u| u.get("output_tokens")).and_then(Value::as_u64).map(|v| v as u32),
        },
        Provider::Openai => TokenUsage {
            input_tokens: body.get("usage").and_then(|u| u.get("input_tokens")).and_then(Value::as_u64).map(|v| v as u32),
            output_tokens: body.get("usage").and_then(|u| u.get("output_tokens")).and_then(Value::as_u64).map(|v| v as u32),
        },
    }
}

/// Advances `state` for one turn using the tool-result information gathered
/// from the request and the tool calls/stop-reason gathered from the
/// response, returning whether this turn's first tool call is a retry and
/// registering its tool calls against `pending_tool_ids` for the next turn's
/// result lookup.
pub fn advance_turn(
    state: &mut PatternState,
    tool_results: &[ToolResultEvent],
    tool_calls: &[ToolCallEvent],
) -> bool {
    state.last_was_error = tool_results.iter().any(|r| r.is_error);

    let first_tool = tool_calls.first().map(|c| c.tool_name.as_str());
    let is_retry = compute_patterns(state, first_tool);

    state.session_tool_count += tool_calls.len() as u64;
    state.turn_count += 1;

    for call in tool_calls {
        if let Some(id) = &call.tool_use_id {
            state.pending_tool_ids.insert(id.clone(), call.tool_name.clone());
        }
    }

    is_retry
}

/// Classifies the turn's `error_type` from the response status and body:
/// empty for 2xx, `rate_limit` for 429, `server_error` for 5xx,
/// `context_length` for a 400 whose body mentions context length,
/// `invalid_request` for any other 4xx.
pub fn classify_error_type(status: u16, body: &Value) -> Option<String> {
    match status {
        200..=299 => None,
        429 => Some("rate_limit".to_string()),
        400 if mentions_context_length(body) => Some("context_length".to_string()),
        400..=499 => Some("invalid_request".to_string()),
        500..=599 => Some("server_error".to_string()),
        _ => Some("unknown_error".to_string()),
    }
}

fn mentions_context_length(body: &Value) -> bool {
    let message = body
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .or_else(|| body.get("message").and_then(Value::as_str))
        .unwrap_or_default()
        .to_lowercase();
    message.contains("context") || message.contains("too long")
}

/// `meta` is provided by the caller (request id, machine identity, session
/// id) and carried unchanged into every record this turn emits.
pub fn meta_for(base: &RecordMeta) -> RecordMeta {
    base.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn anthropic_tool_calls_skip_text_blocks() {
        let body = json!({
            "content": [
                {"type": "text", "text": "let me check"},
                {"type": "tool_use", "id": "toolu_1", "name": "bash", "input": {}}
            ]
        });
        let calls = tool_calls_from_response(Provider::Anthropic, &body);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "bash");
        assert_eq!(calls[0].tool_index, 1);
    }

    #[test]
    fn anthropic_tool_results_resolve_name_from_pending_map() {
        let mut pending = HashMap::new();
        pending.insert("toolu_1".to_string(), "bash".to_string());
        let body = json!({
            "messages": [{
                "role": "user",
                "content": [{"type": "tool_result", "tool_use_id": "toolu_1", "is_error": true, "content": "boom"}]
            }]
        });
        let results = tool_results_from_request(Provider::Anthropic, &body, &pending);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].tool_name.as_deref(), Some("bash"));
        assert!(results[0].is_error);
    }

    #[test]
    fn advance_turn_detects_retry_after_error() {
        let mut state = PatternState::default();
        let calls = vec![ToolCallEvent { tool_name: "bash".into(), tool_index: 0, tool_use_id: Some("t1".into()) }];
        assert!(!advance_turn(&mut state, &[], &calls));

        let error_result = vec![ToolResultEvent { tool_name: Some("bash".into()), tool_use_id: Some("t1".into()), is_error: true }];
        let retry_calls = vec![ToolCallEvent { tool_name: "bash".into(), tool_index: 0, tool_use_id: Some("t2".into()) }];
        assert!(advance_turn(&mut state, &error_result, &retry_calls));
        assert_eq!(state.retry_count, 1);
        assert_eq!(state.tool_streak, 2);
    }

    #[test]
    fn classify_error_type_buckets_by_status() {
        let empty = json!({});
        assert_eq!(classify_error_type(200, &empty), None);
        assert_eq!(classify_error_type(429, &empty).as_deref(), Some("rate_limit"));
        assert_eq!(classify_error_type(404, &empty).as_deref(), Some("invalid_request"));
        assert_eq!(classify_error_type(502, &empty).as_deref(), Some("server_error"));
    }

    #[test]
    fn classify_error_type_detects_context_length_from_body() {
        let body = json!({"error": {"message": "This request exceeds the maximum context length."}});
        assert_eq!(classify_error_type(400, &body).as_deref(), Some("context_length"));

        let other = json!({"error": {"message": "missing required field"}});
        assert_eq!(classify_error_type(400, &other).as_deref(), Some("invalid_request"));
    }
}
