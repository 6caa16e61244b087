//! Route definitions for web server.

use axum::{
    routing::{get, patch, post},
    Router,
};

use super::{dashboard, handlers, AppState};

/// Create the API router.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/status", get(handlers::api_status))
        .route(
            "/accounts",
            get(handlers::list_accounts).post(handlers::create_account),
        )
        .route("/accounts/:id", patch(handlers::update_account))
        .route("/notify", post(handlers::notify))
}

/// Create the full app router.
pub fn create_app_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", create_api_router())
        .route("/ingest", post(handlers::ingest))
        .route("/web", get(dashboard::dashboard_page))
        .route("/health", get(health_check))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
