use crate::error::{LessorError, Result};
use sqlx::PgPool;
use tracing::info;

/// Run all database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    // Create migrations table if not exists
    create_migrations_table(pool).await?;

    // Run each migration in order
    let migrations = get_migrations();

    for (version, name, sql) in migrations {
        if !is_migration_applied(pool, version).await? {
            info!(version = version, name = name, "Applying migration");

            sqlx::query(sql)
                .execute(pool)
                .await
                .map_err(LessorError::Database)?;

            record_migration(pool, version, name).await?;

            info!(version = version, name = name, "Migration applied successfully");
        }
    }

    Ok(())
}

/// Create the migrations tracking table
async fn create_migrations_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(LessorError::Database)?;

    Ok(())
}

/// Check if a migration has been applied
async fn is_migration_applied(pool: &PgPool, version: i32) -> Result<bool> {
    let result = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = $1",
    )
    .bind(version)
    .fetch_one(pool)
    .await
    .map_err(LessorError::Database)?;

    Ok(result > 0)
}

/// Record a migration as applied
async fn record_migration(pool: &PgPool, version: i32, name: &str) -> Result<()> {
    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
        .bind(version)
        .bind(name)
        .execute(pool)
        .await
        .map_err(LessorError::Database)?;

    Ok(())
}

/// Get all migrations in order
fn get_migrations() -> Vec<(i32, &'static str, &'static str)> {
    vec![
        (1, "proxies_schema", MIGRATION_001_PROXIES_SCHEMA),
        (2, "statistics_schema", MIGRATION_002_STATISTICS_SCHEMA),
        (3, "users_schema", MIGRATION_003_USERS_SCHEMA),
    ]
}

// Migration 1: sources, providers, proxies
const MIGRATION_001_PROXIES_SCHEMA: &str = r#"
-- Sources: upstream sites proxies are partitioned by
CREATE TABLE IF NOT EXISTS sources (
    id BIGSERIAL PRIMARY KEY,
    source VARCHAR(50) NOT NULL UNIQUE
);

-- Proxy providers
CREATE TABLE IF NOT EXISTS providers (
    id BIGSERIAL PRIMARY KEY,
    provider VARCHAR(50) NOT NULL UNIQUE
);

-- Proxies
CREATE TABLE IF NOT EXISTS proxies (
    id BIGSERIAL PRIMARY KEY,
    proxy VARCHAR(100) NOT NULL,
    sourceid BIGINT REFERENCES sources(id),
    priority INTEGER NOT NULL DEFAULT 0,
    blocked BOOLEAN NOT NULL DEFAULT FALSE,
    provider BIGINT REFERENCES providers(id),
    usage_interval BIGINT NOT NULL DEFAULT 30,
    updatedat TIMESTAMPTZ DEFAULT NOW()
);

-- Indexes for the refill query
CREATE INDEX IF NOT EXISTS idx_proxies_sourceid ON proxies(sourceid);
CREATE INDEX IF NOT EXISTS idx_proxies_blocked ON proxies(blocked);
CREATE INDEX IF NOT EXISTS idx_proxies_priority ON proxies(priority DESC);

-- updatedat trigger
CREATE OR REPLACE FUNCTION update_updatedat_column()
RETURNS TRIGGER AS $$
BEGIN
    NEW.updatedat = NOW();
    RETURN NEW;
END;
$$ language 'plpgsql';

DROP TRIGGER IF EXISTS update_proxies_updatedat ON proxies;
CREATE TRIGGER update_proxies_updatedat
    BEFORE UPDATE ON proxies
    FOR EACH ROW
    EXECUTE FUNCTION update_updatedat_column();
"#;

// Migration 2: statuses (reference data) and statistics (append-only reports).
// statistics.statusid deliberately carries no foreign key: unknown status
// codes are accepted and stored verbatim.
const MIGRATION_002_STATISTICS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS statuses (
    "statusCode" INTEGER PRIMARY KEY,
    "shortDescription" VARCHAR(300) NOT NULL UNIQUE
);

INSERT INTO statuses ("statusCode", "shortDescription") VALUES
    (200, 'OK'),
    (403, 'Forbidden'),
    (407, 'Proxy Authentication Required'),
    (429, 'Too Many Requests'),
    (500, 'Internal Server Error'),
    (502, 'Bad Gateway'),
    (503, 'Service Unavailable')
ON CONFLICT ("statusCode") DO NOTHING;

CREATE TABLE IF NOT EXISTS statistics (
    id BIGSERIAL PRIMARY KEY,
    proxyid BIGINT NOT NULL REFERENCES proxies(id),
    statusid INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_statistics_proxyid ON statistics(proxyid);
"#;

// Migration 3: users and issued tokens
const MIGRATION_003_USERS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id BIGSERIAL PRIMARY KEY,
    username VARCHAR(255) NOT NULL UNIQUE,
    hashed_password VARCHAR(255),
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS tokens (
    id BIGSERIAL PRIMARY KEY,
    token VARCHAR(1024) NOT NULL UNIQUE,
    user_id BIGINT NOT NULL REFERENCES users(id),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_tokens_user_id ON tokens(user_id);
"#;
