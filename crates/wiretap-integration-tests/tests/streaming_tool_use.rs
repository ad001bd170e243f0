//! Scenario 4: a single-turn SSE response with one tool call produces
//! exactly one `turn_start`/`tool_call`/`turn_end` record set.

mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SSE_BODY: &str = concat!(
    "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":12}}}\n\n",
    "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"bash\"}}\n\n",
    "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"cmd\\\":\\\"ls\\\"}\"}}\n\n",
    "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
    "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"},\"usage\":{\"output_tokens\":8}}\n\n",
);

/// The logging side of a streaming turn runs in a detached task that
/// resolves only once the tee finishes; poll briefly rather than sleeping a
/// fixed guess.
async fn wait_for_turn_end(log_dir: &std::path::Path, timeout: Duration) -> Vec<serde_json::Value> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(entries) = std::fs::read_dir(log_dir) {
            for entry in entries.flatten() {
                if let Ok(contents) = std::fs::read_to_string(entry.path()) {
                    let lines: Vec<serde_json::Value> = contents.lines().filter_map(|l| serde_json::from_str(l).ok()).collect();
                    if lines.iter().any(|l| l["type"] == "turn_end") {
                        return lines;
                    }
                }
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for turn_end to be logged");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn streaming_tool_use_logs_one_turn_start_tool_call_turn_end() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/event-stream").set_body_raw(SSE_BODY, "text/event-stream"))
        .mount(&upstream)
        .await;

    let app = common::build_app().await;
    let upstream_host = upstream.address().to_string();

    let body = serde_json::json!({
        "model": "claude-3-haiku-20240307",
        "max_tokens": 10,
        "stream": true,
        "messages": [{"role": "user", "content": "list files"}],
    });

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/anthropic/{upstream_host}/v1/messages"))
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.status().is_success());

    let log_dir = common::session_log_dir(&app, &upstream_host);
    let lines = wait_for_turn_end(&log_dir, Duration::from_secs(5)).await;

    assert_eq!(lines.iter().filter(|l| l["type"] == "turn_start").count(), 1);
    assert_eq!(lines.iter().filter(|l| l["type"] == "tool_call").count(), 1);
    assert_eq!(lines.iter().filter(|l| l["type"] == "turn_end").count(), 1);

    let tool_call = lines.iter().find(|l| l["type"] == "tool_call").unwrap();
    assert_eq!(tool_call["tool_name"], "bash");
    assert_eq!(tool_call["tool_use_id"], "toolu_1");

    let turn_end = lines.iter().find(|l| l["type"] == "turn_end").unwrap();
    assert_eq!(turn_end["stop_reason"], "tool_use");
    assert_eq!(turn_end["is_retry"], false);
}
