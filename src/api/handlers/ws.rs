//! WebSocket streaming endpoints

use std::collections::HashMap;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;

use crate::api::server::AppState;
use crate::broker::session::{handle_session, SessionKind};

/// Handle `GET /ws/proxies`: expects a bare `{"source_ids": [...]}` frame,
/// loads the sources and then streams leases
pub async fn proxies_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let token = bearer_token(&params, &headers);
    let deps = state.session_deps();

    ws.on_upgrade(move |socket| handle_session(socket, deps, token, SessionKind::LoadSources))
}

/// Handle `GET /ws/proxy_multi`: expects `{"action": "start", "source_ids":
/// [...]}` and then streams leases
pub async fn proxy_multi_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let token = bearer_token(&params, &headers);
    let deps = state.session_deps();

    ws.on_upgrade(move |socket| handle_session(socket, deps, token, SessionKind::StartFrame))
}

/// The bearer token from the `token` query parameter or the Authorization
/// header
fn bearer_token(params: &HashMap<String, String>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = params.get("token") {
        return Some(token.clone());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}
