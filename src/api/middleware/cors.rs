//! CORS layer with an explicit origin whitelist

use axum::http::header;
use axum::http::{HeaderValue, Method};
use tower_http::cors::CorsLayer;
use tracing::debug;

const METHODS: [Method; 4] = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];

/// Create a CORS layer for the configured origins; an empty list allows
/// localhost only
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let headers = [header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT];

    let origins: Vec<HeaderValue> = if allowed_origins.is_empty() {
        debug!("CORS: no origins configured, allowing localhost only");
        vec![
            "http://localhost:3000".parse().expect("static origin"),
            "http://127.0.0.1:3000".parse().expect("static origin"),
        ]
    } else {
        debug!("CORS: allowing origins: {:?}", allowed_origins);
        allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect()
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(METHODS)
        .allow_headers(headers)
        .allow_credentials(true)
}
