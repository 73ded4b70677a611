//! API Routes
//!
//! This module organizes all HTTP endpoints for the application:
//! - `/api/chat/message` - Queue a chat job
//! - `/api/chat/stream/{job_id}` - Server-Sent-Events stream of a job's results
//! - `/api/chat/job/{job_id}` - Job status and cancellation
//! - `/api/chat/stream` - Answer inline without the queue
//! - `/`, `/health`, `/api/health` - Health checks

pub mod chat;
pub mod health;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::middleware::cors_layer;
use crate::models::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let cors = cors_layer(&state.config.server.cors_allowed_origins);

    Router::new()
        .merge(chat::router(state.clone()))
        .merge(health::router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
