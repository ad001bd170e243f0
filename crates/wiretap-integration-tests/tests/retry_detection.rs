//! Scenario 5: a failed tool call followed by a successful retry of the same
//! tool is flagged `is_retry` on the retrying turn, and `error_recovered` on
//! the turn after that.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use axum::body::Body;
use axum::http::Request;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

struct SeqResponder {
    calls: AtomicUsize,
    replies: Vec<serde_json::Value>,
}

impl Respond for SeqResponder {
    fn respond(&self, _: &wiremock::Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(200).set_body_json(self.replies[n].clone())
    }
}

async fn send(app: &common::TestApp, uri: &str, messages: serde_json::Value) {
    let body = serde_json::json!({"model": "claude-3-haiku-20240307", "max_tokens": 10, "messages": messages});
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.status().is_success());
}

#[tokio::test]
async fn retry_of_failed_tool_flags_is_retry_then_error_recovered() {
    let upstream = MockServer::start().await;
    let responder = SeqResponder {
        calls: AtomicUsize::new(0),
        replies: vec![
            serde_json::json!({
                "content": [{"type": "tool_use", "id": "toolu_1", "name": "bash", "input": {"cmd": "ls"}}],
                "stop_reason": "tool_use",
                "usage": {"input_tokens": 10, "output_tokens": 4},
            }),
            serde_json::json!({
                "content": [{"type": "tool_use", "id": "toolu_2", "name": "bash", "input": {"cmd": "ls -la"}}],
                "stop_reason": "tool_use",
                "usage": {"input_tokens": 15, "output_tokens": 4},
            }),
            serde_json::json!({
                "content": [{"type": "text", "text": "done"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 20, "output_tokens": 2},
            }),
        ],
    };
    Mock::given(method("POST")).and(path("/v1/messages")).respond_with(responder).mount(&upstream).await;

    let app = common::build_app().await;
    let upstream_host = upstream.address().to_string();
    let uri = format!("/anthropic/{upstream_host}/v1/messages");

    let turn1_user = serde_json::json!({"role": "user", "content": "run ls"});
    send(&app, &uri, serde_json::json!([turn1_user])).await;

    let turn1_assistant = serde_json::json!({
        "role": "assistant",
        "content": [{"type": "tool_use", "id": "toolu_1", "name": "bash", "input": {"cmd": "ls"}}],
    });
    let turn2_tool_result = serde_json::json!({
        "role": "user",
        "content": [{"type": "tool_result", "tool_use_id": "toolu_1", "is_error": true, "content": "permission denied"}],
    });
    send(&app, &uri, serde_json::json!([turn1_user, turn1_assistant, turn2_tool_result])).await;

    let turn2_assistant = serde_json::json!({
        "role": "assistant",
        "content": [{"type": "tool_use", "id": "toolu_2", "name": "bash", "input": {"cmd": "ls -la"}}],
    });
    let turn3_tool_result = serde_json::json!({
        "role": "user",
        "content": [{"type": "tool_result", "tool_use_id": "toolu_2", "is_error": false, "content": "file1 file2"}],
    });
    send(&app, &uri, serde_json::json!([turn1_user, turn1_assistant, turn2_tool_result, turn2_assistant, turn3_tool_result])).await;

    app.flush_logs().await;
    let log_dir = common::session_log_dir(&app, &upstream_host);
    let entries: Vec<_> = std::fs::read_dir(&log_dir).unwrap().collect();
    assert_eq!(entries.len(), 1, "fingerprint continuation must keep all three turns in one session");

    let contents = std::fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
    let lines: Vec<serde_json::Value> = contents.lines().map(|l| serde_json::from_str(l).unwrap()).collect();

    let turn_starts: Vec<&serde_json::Value> = lines.iter().filter(|l| l["type"] == "turn_start").collect();
    let turn_ends: Vec<&serde_json::Value> = lines.iter().filter(|l| l["type"] == "turn_end").collect();
    assert_eq!(turn_starts.len(), 3);
    assert_eq!(turn_ends.len(), 3);

    assert_eq!(turn_starts[0]["error_recovered"], false);
    assert_eq!(turn_starts[1]["error_recovered"], false);
    assert_eq!(turn_starts[2]["error_recovered"], true);

    assert_eq!(turn_ends[0]["is_retry"], false);
    assert_eq!(turn_ends[1]["is_retry"], true);
    assert_eq!(turn_ends[2]["is_retry"], false);
}
