//! Request handlers: the main proxy passthrough and the
//! Bedrock cloud-transport adapter.

use std::collections::HashMap;
use std::time::Instant;

use aws_credential_types::provider::ProvideCredentials;
use axum::body::{Body, Bytes};
use axum::extract::{OriginalUri, Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::Response;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use wiretap_core::{PatternState, Provider, RecordMeta, ResponseBody, ResponseTiming, StreamChunk, TokenUsage};
use wiretap_egress::bedrock;
use wiretap_egress::sse;
use wiretap_observability::ProxyLogger;
use wiretap_routing::{apply_auth_rewrite, is_conversation_path, parse as parse_route, scheme_for};
use wiretap_session::tracker::{self, ToolCallEvent, ToolResultEvent};
use wiretap_session::{identity, Resolution};

use crate::error::{Error, Result};
use crate::state::AppState;

const HOP_BY_HOP_INBOUND: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

const HOP_BY_HOP_OUTBOUND: &[&str] = &["connection", "keep-alive", "transfer-encoding", "upgrade", "trailers"];

static THREAD_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/v1/threads/([^/]+)/").unwrap());

fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect()
}

fn forward_headers(headers: &HeaderMap, skip: &[&str]) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers.iter() {
        if skip.iter().any(|s| name.as_str().eq_ignore_ascii_case(s)) {
            continue;
        }
        out.insert(name.clone(), value.clone());
    }
    out
}

fn content_type(headers: &HeaderMap) -> &str {
    headers.get(axum::http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("")
}

fn thread_id_from_path(path: &str) -> Option<&str> {
    THREAD_ID.captures(path).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// The conversation's message array, provider-agnostic: the Anthropic and
/// OpenAI chat-completions surfaces key it `messages`; the Responses API
/// keys it `input`.
fn messages_array(body: &Value) -> Vec<Value> {
    body.get("messages")
        .or_else(|| body.get("input"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// One turn's worth of context gathered from the request side, carried
/// across the upstream call to the response-side finish step.
struct TurnContext {
    session_id: String,
    seq: u64,
    provider: Provider,
    upstream: String,
    request_id: String,
    pattern_before: PatternState,
    tool_results: Vec<ToolResultEvent>,
    /// The full request message array (the posterior fingerprint input is
    /// this plus the assistant's reply).
    messages: Vec<Value>,
}

/// Resolves the session, runs the request-side pattern-tracker step, and
/// logs the request. Returns `None` when the path isn't a tracked
/// conversation or the body isn't valid JSON.
async fn prepare_turn(
    state: &AppState,
    provider: Provider,
    upstream: &str,
    method: &str,
    path: &str,
    header_map: &HashMap<String, String>,
    body: &Bytes,
) -> Result<Option<TurnContext>> {
    if !is_conversation_path(path) {
        return Ok(None);
    }
    let Ok(body_json) = serde_json::from_slice::<Value>(body) else {
        return Ok(None);
    };

    let messages = messages_array(&body_json);
    let prior_messages: Vec<Value> = if messages.is_empty() { Vec::new() } else { messages[..messages.len() - 1].to_vec() };

    let path_thread_id = thread_id_from_path(path);
    let client_session_id = identity::resolve_client_session_id(provider, &body_json, header_map, path_thread_id);

    let resolution = state
        .session_index
        .get_or_create(client_session_id, &prior_messages, provider, upstream)
        .await?;
    let session_id = resolution.session_id().to_string();
    let seq = resolution.seq();
    let request_id = Uuid::new_v4().to_string();

    state.logger.register_upstream(&session_id, upstream).await;

    if let Resolution::New { .. } = &resolution {
        let meta = RecordMeta::new(upstream, &session_id).with_request_id(request_id.clone());
        state.logger.log_session_start(&session_id, provider, upstream, meta).await?;
    }
    if let Resolution::Fork { parent_session_id, parent_up_to_seq, .. } = &resolution {
        let meta = RecordMeta::new(upstream, &session_id).with_request_id(request_id.clone());
        state.logger.log_fork(&session_id, provider, *parent_up_to_seq, parent_session_id, meta).await?;
    }

    let snapshot = state.session_index.snapshot(&session_id).await;
    let mut pattern_before = snapshot.map(|s| s.pattern).unwrap_or_default();

    let error_recovered = pattern_before.last_was_error;
    let tool_results = tracker::tool_results_from_request(provider, &body_json, &pattern_before.pending_tool_ids);
    for result in &tool_results {
        if let Some(id) = &result.tool_use_id {
            pattern_before.pending_tool_ids.remove(id);
        }
        let meta = RecordMeta::new(upstream, &session_id).with_request_id(request_id.clone());
        let record = wiretap_core::LogRecord::ToolResult {
            meta,
            tool_name: result.tool_name.clone().unwrap_or_else(|| "unknown".to_string()),
            tool_use_id: result.tool_use_id.clone().unwrap_or_default(),
            is_error: result.is_error,
        };
        state.logger.log_event(&session_id, record).await?;
    }

    let turn_start_meta = RecordMeta::new(upstream, &session_id).with_request_id(request_id.clone());
    let turn_start = wiretap_core::LogRecord::TurnStart {
        meta: turn_start_meta,
        turn_depth: pattern_before.turn_count + 1,
        error_recovered,
    };
    state.logger.log_event(&session_id, turn_start).await?;

    let req_meta = RecordMeta::new(upstream, &session_id).with_request_id(request_id.clone());
    state
        .logger
        .log_request(&session_id, provider, seq, method, path, header_map, body_json, req_meta)
        .await?;

    Ok(Some(TurnContext {
        session_id,
        seq,
        provider,
        upstream: upstream.to_string(),
        request_id,
        pattern_before,
        tool_results,
        messages,
    }))
}

/// The response side of the pattern tracker plus posterior fingerprint
/// recording.
#[allow(clippy::too_many_arguments)]
async fn finish_turn(
    state: &AppState,
    ctx: TurnContext,
    tool_calls: Vec<ToolCallEvent>,
    stop_reason: Option<String>,
    usage: TokenUsage,
    status: u16,
    classify_body: &Value,
    request_messages: Vec<Value>,
    assistant_message: Value,
) -> Result<()> {
    for call in &tool_calls {
        let meta = RecordMeta::new(&ctx.upstream, &ctx.session_id).with_request_id(ctx.request_id.clone());
        let record = wiretap_core::LogRecord::ToolCall {
            meta,
            tool_name: call.tool_name.clone(),
            tool_index: call.tool_index,
            tool_use_id: call.tool_use_id.clone().unwrap_or_default(),
        };
        state.logger.log_event(&ctx.session_id, record).await?;
    }

    let mut pattern = ctx.pattern_before.clone();
    let is_retry = tracker::advance_turn(&mut pattern, &ctx.tool_results, &tool_calls);
    let error_type = tracker::classify_error_type(status, classify_body).unwrap_or_default();

    let turn_end_meta = RecordMeta::new(&ctx.upstream, &ctx.session_id).with_request_id(ctx.request_id.clone());
    let turn_end = wiretap_core::LogRecord::TurnEnd {
        meta: turn_end_meta,
        stop_reason: stop_reason.unwrap_or_default(),
        is_retry,
        error_type,
        pattern: pattern.snapshot(),
        usage,
    };
    state.logger.log_event(&ctx.session_id, turn_end).await?;

    state.session_index.update_pattern(&ctx.session_id, pattern).await?;

    let mut messages_with_reply = request_messages;
    messages_with_reply.push(assistant_message);
    state.session_index.record_posterior(&ctx.session_id, &messages_with_reply, ctx.seq).await?;

    Ok(())
}

fn assistant_message_for_posterior(provider: Provider, body: &Value) -> Value {
    match provider {
        Provider::Anthropic => serde_json::json!({
            "role": "assistant",
            "content": body.get("content").cloned().unwrap_or_else(|| Value::Array(vec![])),
        }),
        Provider::Openai => serde_json::json!({
            "role": "assistant",
            "content": body.get("output").cloned().unwrap_or_else(|| Value::Array(vec![])),
        }),
    }
}

/// The main proxy passthrough handler. Registered as the
/// catch-all fallback so `/health` and the Bedrock routes, registered
/// separately, take precedence.
pub async fn proxy_handler(
    State(state): State<AppState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let route = parse_route(uri.path())?;
    let header_map = headers_to_map(&headers);
    let route = apply_auth_rewrite(route, &header_map);
    let scheme = scheme_for(&route.upstream);

    let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();
    let target_url = format!("{scheme}://{}{}{query}", route.upstream, route.path);

    let turn_ctx = prepare_turn(&state, route.provider, &route.upstream, method.as_str(), &route.path, &header_map, &body).await?;

    let start = Instant::now();
    let outbound_headers = forward_headers(&headers, HOP_BY_HOP_INBOUND);
    let response = state
        .client
        .request(method, &target_url)
        .headers(outbound_headers)
        .body(body.clone())
        .send()
        .await
        .map_err(Error::Dial)?;

    let status = response.status();
    let response_headers = forward_headers(response.headers(), HOP_BY_HOP_OUTBOUND);
    let is_streaming = content_type(&response_headers).starts_with("text/event-stream");

    if is_streaming {
        handle_streaming_response(state, turn_ctx, route.provider, status, response_headers, response, start).await
    } else {
        handle_buffered_response(state, turn_ctx, route.provider, status, response_headers, response).await
    }
}

async fn handle_buffered_response(
    state: AppState,
    turn_ctx: Option<TurnContext>,
    provider: Provider,
    status: StatusCode,
    response_headers: HeaderMap,
    response: reqwest::Response,
) -> Result<Response> {
    let bytes = response.bytes().await.map_err(Error::BodyRead)?;

    if let Some(ctx) = turn_ctx {
        let body_json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        let tool_calls = tracker::tool_calls_from_response(provider, &body_json);
        let stop_reason = tracker::stop_reason(provider, &body_json);
        let usage = tracker::token_usage(provider, &body_json);

        let resp_meta = RecordMeta::new(&ctx.upstream, &ctx.session_id).with_request_id(ctx.request_id.clone());
        state
            .logger
            .log_response(
                &ctx.session_id,
                provider,
                ctx.seq,
                status.as_u16(),
                headers_to_map(&response_headers),
                ResponseBody::Buffered { body: body_json.clone() },
                ResponseTiming::default(),
                resp_meta,
            )
            .await?;

        let request_messages = ctx.messages.clone();
        let assistant_message = assistant_message_for_posterior(provider, &body_json);
        finish_turn(&state, ctx, tool_calls, stop_reason, usage, status.as_u16(), &body_json, request_messages, assistant_message)
            .await?;
    }

    let mut builder = Response::builder().status(status);
    *builder.headers_mut().expect("builder has headers") = response_headers;
    Ok(builder.body(Body::from(bytes)).expect("valid response"))
}

async fn handle_streaming_response(
    state: AppState,
    turn_ctx: Option<TurnContext>,
    provider: Provider,
    status: StatusCode,
    response_headers: HeaderMap,
    response: reqwest::Response,
    start: Instant,
) -> Result<Response> {
    let byte_stream = response.bytes_stream();
    let (forward_stream, outcome_rx) = sse::tee(byte_stream, provider, start);

    if let Some(ctx) = turn_ctx {
        tokio::spawn(async move {
            let Ok(outcome) = outcome_rx.await else { return };
            let body_json = match provider {
                Provider::Anthropic => outcome.as_anthropic_body(),
                Provider::Openai => outcome.as_openai_body(),
            };
            let tool_calls: Vec<ToolCallEvent> = outcome
                .tool_calls
                .iter()
                .map(|t| ToolCallEvent { tool_name: t.name.clone().unwrap_or_default(), tool_index: t.index, tool_use_id: t.id.clone() })
                .collect();

            let resp_meta = RecordMeta::new(&ctx.upstream, &ctx.session_id).with_request_id(ctx.request_id.clone());
            let timing = ResponseTiming { ttfb_ms: outcome.ttfb_ms, total_ms: start.elapsed().as_millis() as u64 };
            let chunks: Vec<StreamChunk> = outcome.chunks.clone();
            if let Err(err) = state
                .logger
                .log_response(
                    &ctx.session_id,
                    provider,
                    ctx.seq,
                    status.as_u16(),
                    HashMap::new(),
                    ResponseBody::Streamed { chunks },
                    timing,
                    resp_meta,
                )
                .await
            {
                tracing::warn!(error = %err, "failed to log streamed response");
            }

            let stop_reason = outcome.stop_reason.clone();
            let usage = outcome.usage;
            let request_messages = ctx.messages.clone();
            let assistant_message = assistant_message_for_posterior(provider, &body_json);
            if let Err(err) =
                finish_turn(&state, ctx, tool_calls, stop_reason, usage, status.as_u16(), &body_json, request_messages, assistant_message).await
            {
                tracing::warn!(error = %err, "failed to finish streamed turn");
            }
        });
    }

    let body_stream = forward_stream;
    let mut builder = Response::builder().status(status);
    *builder.headers_mut().expect("builder has headers") = response_headers;
    Ok(builder.body(Body::from_stream(body_stream)).expect("valid response"))
}

/// Bedrock `/model/{model_id}/invoke` (buffered) and
/// `/model/{model_id}/invoke-with-response-stream` (streaming) handlers.
pub async fn bedrock_invoke(State(state): State<AppState>, Path(model_id): Path<String>, headers: HeaderMap, body: Bytes) -> Result<Response> {
    bedrock_dispatch(state, model_id, headers, body, false).await
}

pub async fn bedrock_invoke_streaming(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    bedrock_dispatch(state, model_id, headers, body, true).await
}

async fn bedrock_dispatch(state: AppState, model_id: String, headers: HeaderMap, body: Bytes, streaming: bool) -> Result<Response> {
    bedrock::validate_model_id(&model_id)?;
    let _permit = state.bedrock_gate.acquire().await;

    let content_type = headers.get(axum::http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let accept = headers.get(axum::http::header::ACCEPT).and_then(|v| v.to_str().ok());

    let credentials = state
        .bedrock_credentials
        .provide_credentials()
        .await
        .map_err(|e| wiretap_egress::Error::Credentials(e.to_string()))?;

    let path = if streaming {
        format!("/model/{model_id}/invoke-with-response-stream")
    } else {
        format!("/model/{model_id}/invoke")
    };
    let region = state.config.bedrock.region.clone();
    let uri = match &state.config.bedrock.endpoint_override {
        Some(base) => format!("{base}{path}"),
        None => format!("https://bedrock-runtime.{region}.amazonaws.com{path}"),
    };

    let signed_headers = bedrock::sign_request("POST", &uri, content_type, accept, &body, &region, &credentials).await?;

    let mut request = state.client.post(&uri).body(body);
    for (name, value) in signed_headers {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            request = request.header(name, value);
        }
    }

    let response = request.send().await.map_err(Error::Dial)?;
    let status = response.status();
    let response_headers = forward_headers(response.headers(), HOP_BY_HOP_OUTBOUND);

    if !status.is_success() {
        let capped = response.bytes().await.map_err(Error::BodyRead)?;
        let capped = if capped.len() > 1 << 20 { capped.slice(..1 << 20) } else { capped };
        let mut builder = Response::builder().status(status);
        *builder.headers_mut().expect("builder has headers") = response_headers;
        return Ok(builder.body(Body::from(capped)).expect("valid response"));
    }

    if !streaming {
        // Plain `/invoke` returns a single JSON body, not event-stream
        // framing; there is nothing to decode, so the bytes go to the
        // client exactly as Bedrock sent them.
        let bytes = response.bytes().await.map_err(Error::BodyRead)?;
        let mut builder = Response::builder().status(status);
        *builder.headers_mut().expect("builder has headers") = response_headers;
        return Ok(builder.body(Body::from(bytes)).expect("valid response"));
    }

    let buffer_capacity = state.config.bedrock.buffer_bytes;
    let (forward_stream, decoded_rx) = bedrock::tee_raw(response.bytes_stream(), buffer_capacity);
    tokio::spawn(async move {
        if let Ok(decoded) = decoded_rx.await {
            if decoded.truncated {
                tracing::warn!(model_id = %model_id, "bedrock event-stream decode truncated");
            }
        }
    });

    let mut builder = Response::builder().status(status);
    *builder.headers_mut().expect("builder has headers") = response_headers;
    Ok(builder.body(Body::from_stream(forward_stream)).expect("valid response"))
}
