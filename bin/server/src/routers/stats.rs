use std::sync::Arc;

use axum::{extract::Extension, response::Json, routing::get, Router};

use classchat_core::StatsSnapshot;

use crate::service::AppContext;

/// Create stats router
pub fn create_router() -> Router {
    Router::new().route("/stats", get(stats))
}

/// Live usage counters and derived rates
async fn stats(Extension(ctx): Extension<Arc<AppContext>>) -> Json<StatsSnapshot> {
    Json(ctx.stats_snapshot())
}
