//! Router configuration for the web server.

use axum::extract::DefaultBodyLimit;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    // One byte over the limit still reaches the gateway, which answers with
    // its own size error; anything bigger is cut off by axum.
    let body_limit = state
        .gateway
        .options()
        .max_request_bytes
        .saturating_add(1);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/query", post(handlers::submit_query))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
