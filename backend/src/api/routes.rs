//! Route definitions for the API.

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::SharedState;

/// Create the main API router
pub fn create_router(state: SharedState) -> Router {
    let api_v1 = Router::new()
        .nest("/gateways", handlers::gateways::router())
        .nest("/repairs", handlers::repairs::router())
        .merge(handlers::content::router());

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/healthz", get(handlers::health::health_check))
        .nest("/api/v1", api_v1)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
