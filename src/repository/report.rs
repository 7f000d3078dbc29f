use crate::error::{LessorError, Result};
use crate::models::UsageReport;
use sqlx::PgPool;
use tracing::{debug, warn};

/// Repository for usage report persistence (`statistics` table)
#[derive(Clone)]
pub struct ReportRepository {
    pool: PgPool,
}

impl ReportRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one report row.
    ///
    /// Fails with `ProxyNotFound` when the proxy does not exist, `Conflict`
    /// on an integrity violation and `Unavailable` on transport errors.
    pub async fn insert(&self, proxy_id: i64, status_code: i32) -> Result<()> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM proxies WHERE id = $1)")
                .bind(proxy_id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_report_err)?;

        if !exists {
            return Err(LessorError::ProxyNotFound { id: proxy_id });
        }

        sqlx::query("INSERT INTO statistics (proxyid, statusid) VALUES ($1, $2)")
            .bind(proxy_id)
            .bind(status_code)
            .execute(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.code().as_deref() == Some("23503") => {
                    // The proxy vanished between the existence check and the insert.
                    LessorError::ProxyNotFound { id: proxy_id }
                }
                _ => map_report_err(e),
            })?;

        debug!(proxy_id = proxy_id, status_code = status_code, "Stored usage report");
        Ok(())
    }

    /// List every report for a proxy
    pub async fn list_for_proxy(&self, proxy_id: i64) -> Result<Vec<UsageReport>> {
        let reports = sqlx::query_as::<_, UsageReport>(
            "SELECT id, proxyid, statusid FROM statistics WHERE proxyid = $1 ORDER BY id",
        )
        .bind(proxy_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(reports)
    }
}

/// Classify report persistence failures per the error policy
fn map_report_err(err: sqlx::Error) -> LessorError {
    match err {
        // Integrity violations (SQLSTATE class 23)
        sqlx::Error::Database(db) => {
            if db.code().map_or(false, |code| code.starts_with("23")) {
                LessorError::Conflict(db.to_string())
            } else {
                LessorError::Database(sqlx::Error::Database(db))
            }
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            warn!(error = %err, "Report store transport failure");
            LessorError::Unavailable(err.to_string())
        }
        other => LessorError::Database(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_report_err_transport() {
        let mapped = map_report_err(sqlx::Error::PoolTimedOut);
        assert!(matches!(mapped, LessorError::Unavailable(_)));
    }
}
