//! API route definitions

use axum::routing::get;
use axum::Router;

use super::handlers;
use super::server::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/status", get(handlers::health::status))
        .route("/api/stats", get(handlers::stats::get_stats))
        .route("/api/proxies", get(handlers::proxy::list_proxies))
        .route("/api/proxies.txt", get(handlers::proxy::export_text))
        .route("/api/proxies/random", get(handlers::proxy::random_proxy))
        .route("/api/proxies/:key", get(handlers::proxy::get_proxy))
        .with_state(state)
}
