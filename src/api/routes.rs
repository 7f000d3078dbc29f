//! Route definitions

use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use super::server::AppState;

/// Create the router with every control-plane and streaming route
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))
        // Token issuance
        .route("/token", post(handlers::auth::login_for_access_token))
        // Pool operations
        .route("/proxies/refresh", get(handlers::pools::refresh_pools))
        .route(
            "/proxies/pools/:source_id/add",
            post(handlers::pools::add_to_pool),
        )
        .route("/debug/pools", get(handlers::pools::debug_pools))
        // Report inspection
        .route(
            "/proxies/:proxy_id/reports",
            get(handlers::reports::get_proxy_reports),
        )
        // Streaming endpoints
        .route("/ws/proxies", get(handlers::ws::proxies_ws))
        .route("/ws/proxy_multi", get(handlers::ws::proxy_multi_ws))
        .with_state(state)
}
