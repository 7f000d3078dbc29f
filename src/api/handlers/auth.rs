//! Token issuance

use axum::extract::State;
use axum::response::IntoResponse;
use axum::{Form, Json};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::server::AppState;
use crate::error::{LessorError, Result};
use crate::models::{TokenRequest, TokenResponse};
use crate::repository::UserRepository;

/// JWT claims carried by issued access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (username)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

impl Claims {
    pub fn new(username: &str, expire_minutes: i64) -> Self {
        let now = Utc::now();
        Self {
            sub: username.to_string(),
            exp: (now + Duration::minutes(expire_minutes)).timestamp(),
            iat: now.timestamp(),
        }
    }
}

/// Handle `POST /token`: validate the root credentials, mint a bearer token
/// and persist it
pub async fn login_for_access_token(
    State(state): State<AppState>,
    Form(form): Form<TokenRequest>,
) -> Result<impl IntoResponse> {
    let auth = &state.config.auth;

    if auth.root_password.is_empty()
        || form.username != auth.root_user
        || form.password != auth.root_password
    {
        warn!(username = %form.username, "Login failed");
        return Err(LessorError::InvalidCredentials);
    }

    let users = UserRepository::new(state.db.pool().clone());
    if let Some(user) = users.get_by_username(&form.username).await? {
        if !user.is_active {
            warn!(username = %form.username, "Login rejected for inactive user");
            return Err(LessorError::InvalidCredentials);
        }
    }

    let claims = Claims::new(&form.username, auth.access_token_expire_minutes);
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(auth.secret.as_bytes()),
    )?;

    let user_id = users.ensure_user(&form.username).await?;
    users.store_token(&token, user_id).await?;

    info!(username = %form.username, "Issued access token");

    Ok(Json(TokenResponse {
        access_token: token,
        token_type: "bearer".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    #[test]
    fn test_claims_round_trip() {
        let claims = Claims::new("root", 30);
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        let decoded = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"secret"),
            &Validation::default(),
        )
        .unwrap();

        assert_eq!(decoded.claims.sub, "root");
        assert!(decoded.claims.exp > decoded.claims.iat);
    }
}
