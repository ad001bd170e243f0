//! Axum router wiring: health endpoints, the Bedrock cloud-transport
//! routes, and the passthrough catch-all.

use axum::routing::{any, post};
use axum::Router;
use std::sync::Arc;

use wiretap_observability::{health_router, HealthState};

use crate::handlers;
use crate::state::AppState;

/// Builds the full router. `/health` and the Bedrock routes are matched
/// before the passthrough catch-all, which otherwise claims every path.
///
/// `health_router` carries its own state and is merged in as a fully-built
/// `Router<()>`, so it composes with the `AppState` router regardless of
/// merge order.
pub fn build(state: AppState, sink_stats: Option<Arc<wiretap_observability::SinkStats>>) -> Router {
    let mut health_state = HealthState::new().with_bedrock_gate(state.bedrock_gate.clone(), state.config.bedrock.concurrency);
    if let Some(stats) = sink_stats {
        health_state = health_state.with_sink(stats);
    }

    let proxy_routes = Router::new()
        .route("/model/{model_id}/invoke", post(handlers::bedrock_invoke))
        .route("/model/{model_id}/invoke-with-response-stream", post(handlers::bedrock_invoke_streaming))
        .fallback(any(handlers::proxy_handler))
        .with_state(state);

    Router::new().merge(health_router(health_state)).merge(proxy_routes)
}
