//! Pool operations: refresh, out-of-band insertion and inspection

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::info;

use crate::api::server::AppState;
use crate::broker::protocol::ServerFrame;
use crate::error::Result;
use crate::models::ProxyRecord;
use crate::repository::ProxyRepository;

/// Handle `GET /proxies/refresh`: reload the warm cache from the store and
/// rebuild every pool
pub async fn refresh_pools(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let repo = ProxyRepository::new(state.db.pool().clone());
    let records = repo.get_all().await?;

    if let Some(cache) = &state.cache {
        cache.clear().await?;
        cache.load_all(&records).await?;
    }

    let count = state.pools.rebuild(records);
    info!(proxies = count, pools = state.pools.pool_count(), "Refreshed proxy pools");

    Ok(Json(json!({
        "message": "Proxy pools refreshed",
        "pools": state.pools.pool_count(),
    })))
}

/// Handle `POST /proxies/pools/{source_id}/add`: append a record to a pool
/// and notify the source's sessions
pub async fn add_to_pool(
    State(state): State<AppState>,
    Path(source_id): Path<i64>,
    Json(record): Json<ProxyRecord>,
) -> impl IntoResponse {
    let mut record = record;
    record.source_id = source_id;

    state.pools.push(source_id, record);
    let pool_size = state.pools.len(source_id);

    state.registry.broadcast(
        &source_id.to_string(),
        ServerFrame::PoolUpdated { count: pool_size },
    );

    Json(json!({
        "message": format!("Proxy added to pool {}", source_id),
        "pool_size": pool_size,
    }))
}

/// Handle `GET /debug/pools`: per-source pool sizes
pub async fn debug_pools(State(state): State<AppState>) -> impl IntoResponse {
    let sizes = state.pools.sizes();

    let pools: serde_json::Map<String, serde_json::Value> = sizes
        .iter()
        .map(|(source_id, len)| (source_id.to_string(), json!(len)))
        .collect();
    let pool_keys: Vec<String> = sizes
        .iter()
        .map(|(source_id, _)| source_id.to_string())
        .collect();

    Json(json!({
        "pools": pools,
        "pool_keys": pool_keys,
    }))
}
