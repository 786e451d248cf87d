//! Route definitions

use super::handlers::*;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Operator-facing platform endpoints
        .route("/launch", post(launch_handler))
        // Per-aggregator surface; `:identity` is the configured callback
        // identity, not the aggregator kind
        .route("/:identity/webhook", post(webhook_handler))
        .route("/:identity/games", get(games_handler))
        .route("/:identity/freespins", post(freespin_create_handler))
        .route("/:identity/freespins/:reference/cancel", post(freespin_cancel_handler))
        .with_state(state)
}
