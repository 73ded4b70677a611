// Chat Assistant - queued chat generation with live Server-Sent-Events result streaming

pub mod agents;
pub mod config;
pub mod events;
pub mod llm;
pub mod middleware;
pub mod models;
pub mod queue;
pub mod routes;
pub mod search;
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;
// Note: import specific items from types instead of a glob; llm re-exports them too
// e.g., use chat_assistant::types::{AppError, AppResult};

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
