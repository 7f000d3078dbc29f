use crate::error::{LessorError, Result};
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP/WebSocket server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Warm cache configuration
    pub cache: CacheConfig,
    /// Authentication and crypto configuration
    pub auth: AuthConfig,
    /// Lease engine tuning
    pub broker: BrokerConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port for the broker server (default: 8000)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Allowed CORS origins (comma-separated, empty = localhost only)
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Database name
    pub name: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Minimum connections in pool
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis host
    pub host: String,
    /// Redis port
    pub port: u16,
    /// Redis password (empty = no auth)
    pub password: String,
    /// Redis database index
    pub db: u32,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Shared bearer secret for streaming sessions (`SECRETS`, falling back to `SECRET`)
    pub secret: String,
    /// Key material for the payload codec (falls back to the shared secret)
    pub encryption_key: String,
    /// Root username for token issuance
    pub root_user: String,
    /// Root password for token issuance
    pub root_password: String,
    /// Access token lifetime in minutes
    pub access_token_expire_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Rows fetched from the store per refill batch
    pub refill_batch_size: i64,
    /// Seconds before a cached source list expires after a store refill
    pub cache_ttl_secs: u64,
    /// Backoff in seconds between repeated store attempts within one refill
    pub refill_backoff_secs: u64,
    /// Milliseconds the session loop waits on inbound frames per tick
    pub inbound_poll_ms: u64,
    /// Seconds a session idles when every subscribed pool is empty
    pub idle_wait_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let secret = env::var("SECRETS")
            .or_else(|_| env::var("SECRET"))
            .unwrap_or_default();
        let encryption_key = {
            let key = get_env_or("ENCRYPTION_KEY", "");
            if key.is_empty() {
                secret.clone()
            } else {
                key
            }
        };

        Ok(Config {
            server: ServerConfig {
                port: get_env_or("SERVER_PORT", "8000").parse().map_err(|_| {
                    LessorError::InvalidConfig("SERVER_PORT must be a valid port number".into())
                })?,
                host: get_env_or("SERVER_HOST", "0.0.0.0"),
                cors_origins: get_env_or("CORS_ORIGINS", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            database: DatabaseConfig {
                host: get_env_or("POSTGRES_HOST", "localhost"),
                port: get_env_or("POSTGRES_PORT", "5432").parse().map_err(|_| {
                    LessorError::InvalidConfig("POSTGRES_PORT must be a valid port number".into())
                })?,
                user: get_env_or("POSTGRES_USER", "lessor"),
                password: get_env_or("POSTGRES_PASSWORD", "lessor_password"),
                name: get_env_or("POSTGRES_DB", "lessor"),
                max_connections: get_env_or("POSTGRES_MAX_CONNECTIONS", "50")
                    .parse()
                    .map_err(|_| {
                        LessorError::InvalidConfig(
                            "POSTGRES_MAX_CONNECTIONS must be a valid number".into(),
                        )
                    })?,
                min_connections: get_env_or("POSTGRES_MIN_CONNECTIONS", "5")
                    .parse()
                    .map_err(|_| {
                        LessorError::InvalidConfig(
                            "POSTGRES_MIN_CONNECTIONS must be a valid number".into(),
                        )
                    })?,
            },
            cache: CacheConfig {
                host: get_env_or("REDIS_HOST", "localhost"),
                port: get_env_or("REDIS_PORT", "6379").parse().map_err(|_| {
                    LessorError::InvalidConfig("REDIS_PORT must be a valid port number".into())
                })?,
                password: get_env_or("REDIS_PASSWORD", ""),
                db: get_env_or("REDIS_DB", "0").parse().unwrap_or(0),
            },
            auth: AuthConfig {
                secret,
                encryption_key,
                root_user: get_env_or("ROOT_USER", "root"),
                root_password: get_env_or("ROOT_PASSWORD", ""),
                access_token_expire_minutes: get_env_or("ACCESS_TOKEN_EXPIRE_MINUTES", "30")
                    .parse()
                    .unwrap_or(30),
            },
            broker: BrokerConfig {
                refill_batch_size: get_env_or("REFILL_BATCH_SIZE", "10").parse().unwrap_or(10),
                cache_ttl_secs: get_env_or("CACHE_TTL", "360").parse().unwrap_or(360),
                refill_backoff_secs: get_env_or("RATE_LIMIT", "5").parse().unwrap_or(5),
                inbound_poll_ms: get_env_or("INBOUND_POLL_MS", "100").parse().unwrap_or(100),
                idle_wait_secs: get_env_or("IDLE_WAIT_SECS", "1").parse().unwrap_or(1),
            },
        })
    }

    /// Get the database connection URL
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.database.user,
            self.database.password,
            self.database.host,
            self.database.port,
            self.database.name,
        )
    }

    /// Get the warm cache connection URL
    pub fn cache_url(&self) -> String {
        if self.cache.password.is_empty() {
            format!("redis://{}:{}/{}", self.cache.host, self.cache.port, self.cache.db)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                self.cache.password, self.cache.host, self.cache.port, self.cache.db
            )
        }
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::from_env().unwrap();

        assert_eq!(config.server.port, 8000);
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.cache.port, 6379);
        assert_eq!(config.broker.refill_batch_size, 10);
        assert_eq!(config.broker.cache_ttl_secs, 360);
        assert_eq!(config.auth.access_token_expire_minutes, 30);
    }

    #[test]
    fn test_cache_url_without_password() {
        let config = Config::from_env().unwrap();
        assert!(config.cache_url().starts_with("redis://"));
        assert!(!config.cache_url().contains('@'));
    }
}
