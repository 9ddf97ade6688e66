//! Router configuration for the web surface.

use std::path::Path;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use super::cors::create_cors_layer;
use super::handlers::{
    delete_reservation, get_inbox, get_reservation, get_runtime_config, list_domains,
    reserve_mailbox, AppState,
};
use super::ws::viewer_ws_handler;

/// Create the API and viewer stream router.
pub fn create_router(app_state: Arc<AppState>, cors_origins: &[String]) -> Router {
    let api_routes = Router::new()
        .route("/config", get(get_runtime_config))
        .route("/inbox/reserve", post(reserve_mailbox))
        .route(
            "/inbox/:email/reservation",
            get(get_reservation).delete(delete_reservation),
        );

    Router::new()
        .route("/ws", get(viewer_ws_handler))
        .route("/domains", get(list_domains))
        .route("/inbox/:email", get(get_inbox))
        .nest("/api", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer(cors_origins)),
        )
        .with_state(app_state)
}

/// Create a health check router.
pub fn create_health_router() -> Router {
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check() -> &'static str {
    "OK"
}

/// Serve the frontend build from `static_path`, falling back to its
/// `index.html` for client-side routes.
///
/// Returns `None` when the directory does not exist.
pub fn create_static_router(static_path: &str) -> Option<Router> {
    let root = Path::new(static_path);
    if !root.is_dir() {
        tracing::warn!("Static path {} not found, frontend disabled", static_path);
        return None;
    }

    let index = root.join("index.html");
    let serve_dir = ServeDir::new(root).fallback(ServeFile::new(index));
    Some(Router::new().fallback_service(serve_dir))
}
