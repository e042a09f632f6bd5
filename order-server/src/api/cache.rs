use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::cache::CacheStatsSnapshot;
use crate::core::ServerState;

#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub backend: &'static str,
    pub capacity: usize,
    /// None when the backing store did not answer
    pub size: Option<usize>,
    pub stats: CacheStatsSnapshot,
}

pub fn router() -> Router<ServerState> {
    Router::new().route("/cache/stats", get(stats))
}

pub async fn stats(State(state): State<ServerState>) -> Json<CacheStatsResponse> {
    let size = match state.cache.len().await {
        Ok(n) => Some(n),
        Err(e) => {
            tracing::warn!(error = %e, "Cache size unavailable");
            None
        }
    };
    Json(CacheStatsResponse {
        backend: state.cache.backend_name(),
        capacity: state.cache.capacity(),
        size,
        stats: state.cache.stats(),
    })
}
