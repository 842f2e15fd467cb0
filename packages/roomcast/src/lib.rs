//! Real-time room chat: authenticated WebSocket sessions, a connection
//! registry, per-room broadcast and presence.

use axum::{Router, routing::get};
use std::sync::Arc;

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod ids;
pub mod metrics;
pub mod models;
pub mod repository;
pub mod services;
pub mod ws;

#[cfg(test)]
pub(crate) mod test_helpers;

use crate::db::Database;
use crate::ws::ChatHub;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<ChatHub>,
    pub db: Arc<Database>,
}

/// Routes served by the chat server, without middleware layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/ws/rooms/{room_id}",
            get(handlers::room_websocket_handler),
        )
        // Health endpoints
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(state)
}
