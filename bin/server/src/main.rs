use std::sync::Arc;

use axum::{
    extract::Extension,
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod routers;
mod service;
mod ws;

use config::Settings;
use service::AppContext;

/// Health check endpoint: configuration flags only, never key material
async fn health(Extension(ctx): Extension<Arc<AppContext>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "openai_configured": ctx.openai_configured(),
        "tavily_configured": ctx.tavily_configured(),
        "model": ctx.model(),
    }))
}

/// Initialize the Axum web server
fn create_app(settings: &Settings) -> Result<Router, anyhow::Error> {
    let ctx = Arc::new(AppContext::new(settings)?);

    let app = Router::new()
        .route("/health", get(health))
        .route("/ws/chat", get(ws::ws_handler))
        .nest("/api", routers::create_router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
                .layer(CorsLayer::permissive())
                .layer(Extension(ctx)),
        );

    Ok(app)
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "classchat_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let settings = Settings::load()?;
    info!(
        model = %settings.model(),
        max_history = settings.max_history,
        cache_ttl_secs = settings.cache_ttl_secs,
        "starting classchat server"
    );

    // Create the app
    let app = create_app(&settings)?;

    // Start the server
    let listener = tokio::net::TcpListener::bind(&settings.server_address()).await?;
    info!("Server listening on {}", settings.server_address());

    axum::serve(listener, app).await?;

    Ok(())
}
