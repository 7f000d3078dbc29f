//! Health check endpoint

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_health_check_response_shape() {
        let response = health_check().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response
            .into_body()
            .collect()
            .await
            .expect("failed to collect body")
            .to_bytes();
        let payload: serde_json::Value =
            serde_json::from_slice(&body).expect("body must be valid json");

        assert_eq!(
            payload.get("status").and_then(|v| v.as_str()),
            Some("healthy")
        );
    }
}
