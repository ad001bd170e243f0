//! Health endpoints: `/health` and `/health/<subsystem>`, built on the same
//! router/state shape as a typical liveness/readiness pair, but reporting
//! JSON subsystem status instead of Prometheus text.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::sink::SinkStats;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SinkHealth {
    pub status: String,
    pub entries_sent: u64,
    pub entries_failed: u64,
    pub entries_dropped: u64,
    pub batches_sent: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BedrockHealth {
    pub status: String,
    pub capacity: usize,
    pub available: usize,
}

#[derive(Clone)]
pub struct HealthState {
    pub sink_stats: Option<Arc<SinkStats>>,
    pub bedrock_gate: Option<Arc<tokio::sync::Semaphore>>,
    pub bedrock_capacity: usize,
}

impl HealthState {
    pub fn new() -> Self {
        Self { sink_stats: None, bedrock_gate: None, bedrock_capacity: 0 }
    }

    pub fn with_sink(mut self, stats: Arc<SinkStats>) -> Self {
        self.sink_stats = Some(stats);
        self
    }

    pub fn with_bedrock_gate(mut self, gate: Arc<tokio::sync::Semaphore>, capacity: usize) -> Self {
        self.bedrock_gate = Some(gate);
        self.bedrock_capacity = capacity;
        self
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/{subsystem}", get(health_subsystem))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok".to_string() })
}

async fn health_subsystem(State(state): State<HealthState>, Path(subsystem): Path<String>) -> Response {
    match subsystem.as_str() {
        "sink" => match &state.sink_stats {
            Some(stats) => {
                let (sent, failed, dropped, batches) = stats.snapshot();
                Json(SinkHealth { status: "ok".to_string(), entries_sent: sent, entries_failed: failed, entries_dropped: dropped, batches_sent: batches })
                    .into_response()
            }
            None => Json(serde_json::json!({"status": "disabled"})).into_response(),
        },
        "bedrock" => match &state.bedrock_gate {
            Some(gate) => Json(BedrockHealth {
                status: "ok".to_string(),
                capacity: state.bedrock_capacity,
                available: gate.available_permits(),
            })
            .into_response(),
            None => Json(serde_json::json!({"status": "disabled"})).into_response(),
        },
        _ => (StatusCode::NOT_FOUND, Json(serde_json::json!({"status": "unknown_subsystem"}))).into_response(),
    }
}
