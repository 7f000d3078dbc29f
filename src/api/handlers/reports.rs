//! Report inspection

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;
use crate::error::Result;
use crate::models::ReportEntry;
use crate::repository::ReportRepository;

/// Handle `GET /proxies/{proxy_id}/reports`: every stored report for a proxy
pub async fn get_proxy_reports(
    State(state): State<AppState>,
    Path(proxy_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let repo = ReportRepository::new(state.db.pool().clone());
    let reports: Vec<ReportEntry> = repo
        .list_for_proxy(proxy_id)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(json!({
        "proxy_id": proxy_id,
        "reports": reports,
    })))
}
