//! API Routes
//!
//! Configures the Axum router with all RPC endpoints.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers::{
    get_blob_handler, health_handler, last_commit_handler, stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `POST /v1/blob` - Stream a blob as framed binary
/// - `GET /v1/last-commit` - Last commit touching a path
/// - `GET /stats` - Last-commit cache statistics
/// - `GET /health` - Health check endpoint
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/blob", post(get_blob_handler))
        .route("/v1/last-commit", get(last_commit_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
