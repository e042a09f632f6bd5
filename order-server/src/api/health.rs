//! Health check endpoint

use axum::{Json, Router, extract::State, routing::get};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().route("/health", get(health_check))
}

/// `status` is "degraded" once any background task has stopped
pub async fn health_check(State(state): State<ServerState>) -> Json<serde_json::Value> {
    let stopped = state.tasks.stopped();
    if !stopped.is_empty() {
        tracing::error!(tasks = ?stopped, "Background tasks are no longer running");
    }
    Json(serde_json::json!({
        "status": if stopped.is_empty() { "ok" } else { "degraded" },
        "service": "order-server",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_ms": shared::util::now_millis() - state.started_at,
        "consumer": {
            "state": state.consumer.state(),
            "stats": state.consumer.stats(),
        },
        "tasks": state.tasks.snapshot(),
        "cache": {
            "backend": state.cache.backend_name(),
            "capacity": state.cache.capacity(),
            "stats": state.cache.stats(),
        },
    }))
}
