use axum::{extract::State, routing::get, Json, Router};

use crate::models::{AppState, HealthResponse, HealthServices};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/api/health", get(health_check))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let accepting = state.queue.is_accepting();

    let response = HealthResponse {
        status: if accepting { "healthy" } else { "degraded" }.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services: HealthServices {
            api: "running".to_string(),
            queue: if accepting { "running" } else { "stopped" }.to_string(),
        },
        queue: state.queue.stats().await,
    };

    Json(response)
}
