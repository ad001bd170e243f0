//! Scenario 3: resubmitting an earlier conversation state with a different
//! next message forks into a new session via the fingerprint fallback.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use axum::body::Body;
use axum::http::Request;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

fn reply(text: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "msg_1",
        "content": [{"type": "text", "text": text}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 5, "output_tokens": 2},
    })
}

/// Returns each of `replies` in order, one per call, so each step of the
/// conversation gets the response it actually prompted.
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

async fn send(app: &common::TestApp, uri: &str, messages: serde_json::Value) -> serde_json::Value {
    let body = serde_json::json!({
        "model": "claude-3-haiku-20240307",
        "max_tokens": 10,
        "messages": messages,
    });
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
    serde_json::Value::Null
}

#[tokio::test]
async fn divergent_history_resubmission_forks_a_new_session() {
    let upstream = MockServer::start().await;
    let responder = SeqResponder {
        calls: AtomicUsize::new(0),
        replies: vec![reply("hi"), reply("you chose A"), reply("you chose B")],
    };
    Mock::given(method("POST")).and(path("/v1/messages")).respond_with(responder).mount(&upstream).await;

    let app = common::build_app().await;
    let upstream_host = upstream.address().to_string();
    let uri = format!("/anthropic/{upstream_host}/v1/messages");

    // Step (a): "hello" -> "hi"
    send(&app, &uri, serde_json::json!([{"role": "user", "content": "hello"}])).await;

    // Step (b): history + "option A" -> "you chose A"
    send(
        &app,
        &uri,
        serde_json::json!([
            {"role": "user", "content": "hello"},
            {"role": "assistant", "content": [{"type": "text", "text": "hi"}]},
            {"role": "user", "content": "option A"},
        ]),
    )
    .await;

    // Step (c): resubmit the state after (a) with a *different* next message.
    send(
        &app,
        &uri,
        serde_json::json!([
            {"role": "user", "content": "hello"},
            {"role": "assistant", "content": [{"type": "text", "text": "hi"}]},
            {"role": "user", "content": "option B"},
        ]),
    )
    .await;

    app.flush_logs().await;
    let date_dir = app.log_dir.path().join(&upstream_host).join(chrono::Utc::now().format("%Y-%m-%d").to_string());
    let files: Vec<_> = std::fs::read_dir(&date_dir).unwrap().collect();
    assert_eq!(files.len(), 2, "the fork must produce a second session file");

    let mut found_fork = false;
    for entry in &files {
        let contents = std::fs::read_to_string(entry.as_ref().unwrap().path()).unwrap();
        let lines: Vec<serde_json::Value> = contents.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        if let Some(fork_record) = lines.iter().find(|l| l["type"] == "fork") {
            found_fork = true;
            assert_eq!(fork_record["from_seq"].as_u64(), Some(1));

            assert_eq!(lines.iter().filter(|l| l["type"] == "session_start").count(), 1, "parent's session_start must be copied in");

            let requests: Vec<u64> = lines.iter().filter(|l| l["type"] == "request").map(|l| l["seq"].as_u64().unwrap()).collect();
            assert_eq!(requests, vec![1, 2], "seq=1 is copied from the parent, seq=2 is this session's own request");

            let responses: Vec<u64> = lines.iter().filter(|l| l["type"] == "response").map(|l| l["seq"].as_u64().unwrap()).collect();
            assert_eq!(responses, vec![1, 2], "seq=1 is copied from the parent, seq=2 is this session's own response");
        }
    }
    assert!(found_fork, "expected one session file to carry a fork record");
}
