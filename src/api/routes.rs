//! Router assembly for both front-ends

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::api::handlers;
use crate::mcp;
use crate::AppState;

/// Build the HTTP router with the MCP service mounted at `/mcp`
pub fn create_router(state: Arc<AppState>) -> Router {
    let tool_service = mcp::streamable_http_service(state.queue.clone());

    Router::new()
        .route("/settings/model-path", post(handlers::update_settings))
        .route("/settings", get(handlers::get_settings))
        .route("/system-info", get(handlers::system_info))
        .route("/generate", post(handlers::generate))
        .route("/health", get(handlers::health))
        .nest_service("/mcp", tool_service)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
