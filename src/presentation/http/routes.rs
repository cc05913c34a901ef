//! Route Configuration
//!
//! Configures all HTTP routes for the API.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;
use crate::presentation::websocket::ws_handler;
use crate::startup::AppState;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_routes())
        // WebSocket endpoint
        .route("/ws", get(ws_handler))
        // Health check endpoint
        .route("/health", get(handlers::health::health_check))
        .with_state(state)
}

/// API routes
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/rooms", post(handlers::room::create_room))
        .route("/rooms/{id}/messages", get(handlers::room::list_messages))
        .route("/movies", get(handlers::movie::list_recent))
        .route("/movies/{id}", get(handlers::movie::get_movie))
}
