use axum::Router;

pub mod chat;
pub mod stats;

/// Create the main API router
pub fn create_router() -> Router {
    Router::new()
        .merge(chat::create_router())
        .merge(stats::create_router())
}
