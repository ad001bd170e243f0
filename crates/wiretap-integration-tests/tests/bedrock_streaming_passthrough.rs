//! Scenario 6: the Bedrock cloud-transport routes forward the upstream's
//! bytes to the client unchanged, for both the buffered `/invoke` path and
//! the streaming `/invoke-with-response-stream` path, even when the stream
//! body isn't valid event-stream framing.

mod common;

use axum::body::Body;
use axum::http::Request;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use wiretap_config::Config;

async fn app_against(upstream: &MockServer) -> common::TestApp {
    let log_dir = TempDir::new().unwrap();
    let config = Config {
        log_dir: log_dir.path().to_path_buf(),
        bedrock: wiretap_config::BedrockSettings { endpoint_override: Some(upstream.uri()), ..Default::default() },
        ..Config::default()
    };
    common::build_app_with_config(log_dir, config).await
}

#[tokio::test]
async fn invoke_forwards_json_body_byte_for_byte() {
    let upstream = MockServer::start().await;
    let model_reply = serde_json::json!({
        "id": "msg_1",
        "content": [{"type": "text", "text": "hi there"}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 3, "output_tokens": 2},
    });
    let reply_bytes = serde_json::to_vec(&model_reply).unwrap();

    Mock::given(method("POST"))
        .and(path("/model/anthropic.claude-3-haiku-20240307-v1:0/invoke"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(reply_bytes.clone(), "application/json"))
        .mount(&upstream)
        .await;

    let app = app_against(&upstream).await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/model/anthropic.claude-3-haiku-20240307-v1:0/invoke")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&serde_json::json!({"prompt": "hello"})).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_success());
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.as_ref(), reply_bytes.as_slice(), "the client must receive Bedrock's JSON body unchanged, not a reconstructed one");
}

#[tokio::test]
async fn invoke_with_response_stream_forwards_raw_bytes_even_when_undecodable() {
    let upstream = MockServer::start().await;

    // Deliberately not valid AWS event-stream framing: the handler must
    // still forward it byte-for-byte, decoding only a side copy for the log.
    let garbage = b"\x00\x00\x00\x10not-a-real-frame".to_vec();

    Mock::given(method("POST"))
        .and(path("/model/anthropic.claude-3-haiku-20240307-v1:0/invoke-with-response-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(garbage.clone(), "application/vnd.amazon.eventstream"))
        .mount(&upstream)
        .await;

    let app = app_against(&upstream).await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/model/anthropic.claude-3-haiku-20240307-v1:0/invoke-with-response-stream")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&serde_json::json!({"prompt": "hello"})).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_success());
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.as_ref(), garbage.as_slice(), "the client must receive the exact upstream bytes even when the frames can't be decoded");
}
