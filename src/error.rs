use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the Lessor application
#[derive(Error, Debug)]
pub enum LessorError {
    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    // Cache errors
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    // Lease engine errors
    #[error("Proxy with ID {id} does not exist")]
    ProxyNotFound { id: i64 },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Refill attempts exhausted for source {source_id}")]
    RefillExhausted { source_id: i64 },

    // Protocol errors
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid source id: {0}")]
    InvalidSourceId(String),

    // Authentication errors
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    // Payload codec errors
    #[error("Encryption failed: {0}")]
    Encryption(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Lessor operations
pub type Result<T> = std::result::Result<T, LessorError>;

impl LessorError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            LessorError::InvalidFrame(_)
            | LessorError::InvalidSourceId(_)
            | LessorError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            LessorError::AuthenticationFailed
            | LessorError::InvalidCredentials
            | LessorError::JwtError(_) => StatusCode::UNAUTHORIZED,

            // 404 Not Found
            LessorError::ProxyNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            LessorError::Conflict(_) => StatusCode::CONFLICT,

            // 503 Service Unavailable
            LessorError::Unavailable(_)
            | LessorError::DatabaseConnection(_)
            | LessorError::RefillExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            LessorError::Database(_)
            | LessorError::Cache(_)
            | LessorError::Encryption(_)
            | LessorError::Io(_)
            | LessorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the error is transient: the caller may retry on the next demand
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LessorError::Unavailable(_)
                | LessorError::DatabaseConnection(_)
                | LessorError::Cache(_)
                | LessorError::Database(sqlx::Error::PoolTimedOut)
                | LessorError::Database(sqlx::Error::Io(_))
        )
    }
}

// Implement IntoResponse for API error responses
impl IntoResponse for LessorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}
