use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use serde_json::{json, Value};
use tracing::warn;

use classchat_core::{ChatError, ChatRequest, ChatResponse, NoopSink};

use crate::service::AppContext;

/// Create chat router
pub fn create_router() -> Router {
    Router::new().route("/chat", post(chat))
}

/// One synchronous chat turn: the pipeline runs with a no-op status sink
/// and the caller sees only the final response
async fn chat(
    Extension(ctx): Extension<Arc<AppContext>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<Value>)> {
    match ctx.pipeline.run(request, &NoopSink).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            warn!(error = %e, "chat request failed");
            Err((status_for(&e), Json(json!({"detail": e.to_string()}))))
        }
    }
}

/// Map an error kind to an externally visible status code
///
/// This is the only place the closed error set meets HTTP.
pub fn status_for(error: &ChatError) -> StatusCode {
    match error {
        ChatError::InvalidRequest { .. } | ChatError::Config { .. } => StatusCode::BAD_REQUEST,
        ChatError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ChatError::Upstream { .. } | ChatError::UpstreamEmpty | ChatError::Search { .. } => {
            StatusCode::BAD_GATEWAY
        }
    }
}
