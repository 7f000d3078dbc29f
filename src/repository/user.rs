use crate::error::Result;
use crate::models::User;
use sqlx::PgPool;
use tracing::info;

/// Repository for user accounts and issued tokens
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a user by username
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, hashed_password, is_active, created_at, updated_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Create the user row if it does not exist yet, returning its id
    pub async fn ensure_user(&self, username: &str) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO users (username)
            VALUES ($1)
            ON CONFLICT (username) DO UPDATE SET username = EXCLUDED.username
            RETURNING id
            "#,
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Persist an issued access token
    pub async fn store_token(&self, token: &str, user_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tokens (token, user_id)
            VALUES ($1, $2)
            ON CONFLICT (token) DO NOTHING
            "#,
        )
        .bind(token)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        info!(user_id = user_id, "Stored access token");
        Ok(())
    }
}
