//! HTTP routes

pub mod cache;
pub mod health;
pub mod orders;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::core::ServerState;

/// Routes without state or middleware
pub fn build_router() -> Router<ServerState> {
    Router::new()
        .merge(health::router())
        .merge(orders::router())
        .merge(cache::router())
}

/// Complete application, used by the server and by tests
pub fn router(state: ServerState) -> Router {
    build_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
