use crate::error::{LessorError, Result};
use crate::models::ProxyRecord;
use sqlx::PgPool;
use tracing::{debug, info, warn};

/// Column list shared by every record query
const RECORD_COLUMNS: &str = r#"
    p.id, p.proxy, p.sourceid, p.priority, p.blocked, p.provider,
    pr.provider AS provider_name, p.updatedat, p.usage_interval
"#;

/// Repository for proxy database operations
#[derive(Clone)]
pub struct ProxyRepository {
    pool: PgPool,
}

impl ProxyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get every proxy, used for warming the cache
    pub async fn get_all(&self) -> Result<Vec<ProxyRecord>> {
        let records = sqlx::query_as::<_, ProxyRecord>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM proxies p
            LEFT JOIN providers pr ON pr.id = p.provider
            ORDER BY p.id
            "#,
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Get every proxy of one source, blocked or not
    pub async fn get_by_source(&self, source_id: i64) -> Result<Vec<ProxyRecord>> {
        let records = sqlx::query_as::<_, ProxyRecord>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM proxies p
            LEFT JOIN providers pr ON pr.id = p.provider
            WHERE p.sourceid = $1
            ORDER BY p.id
            "#,
        ))
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Check out up to `limit` unblocked records for a source.
    ///
    /// The select and the `blocked = TRUE` update run in one repeatable-read
    /// transaction so two brokers racing on the same rows cannot both take
    /// them: the loser hits a serialization failure, the batch rolls back and
    /// this returns an empty vec, which the refill path treats as "no rows".
    pub async fn fetch_unblocked(&self, source_id: i64, limit: i64) -> Result<Vec<ProxyRecord>> {
        let mut tx = self.pool.begin().await.map_err(map_transient)?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(map_transient)?;

        let records = sqlx::query_as::<_, ProxyRecord>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM proxies p
            LEFT JOIN providers pr ON pr.id = p.provider
            WHERE p.blocked = FALSE AND p.sourceid = $1
            ORDER BY p.priority DESC, p.id ASC
            LIMIT $2
            "#,
        ))
        .bind(source_id)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await;

        let records = match records {
            Ok(records) => records,
            Err(e) if is_serialization_failure(&e) => {
                debug!(source_id = source_id, "Serialization failure fetching batch");
                let _ = tx.rollback().await;
                return Ok(Vec::new());
            }
            Err(e) => return Err(map_transient(e)),
        };

        if records.is_empty() {
            let _ = tx.rollback().await;
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        let marked = sqlx::query("UPDATE proxies SET blocked = TRUE WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await;

        if let Err(e) = marked {
            if is_serialization_failure(&e) {
                debug!(source_id = source_id, "Serialization failure marking batch taken");
                let _ = tx.rollback().await;
                return Ok(Vec::new());
            }
            return Err(map_transient(e));
        }

        match tx.commit().await {
            Ok(()) => {}
            Err(e) if is_serialization_failure(&e) => {
                debug!(source_id = source_id, "Serialization failure committing batch");
                return Ok(Vec::new());
            }
            Err(e) => return Err(map_transient(e)),
        }

        info!(
            source_id = source_id,
            count = records.len(),
            "Checked out proxy batch"
        );
        Ok(records)
    }

    /// Resolve the source a proxy belongs to
    pub async fn source_of(&self, proxy_id: i64) -> Result<Option<i64>> {
        let source_id =
            sqlx::query_scalar::<_, Option<i64>>("SELECT sourceid FROM proxies WHERE id = $1")
                .bind(proxy_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(source_id.flatten())
    }

    /// Flip `blocked` back to false for rows not updated within the cut-off.
    ///
    /// Invoked by the external unblock job; the lease engine only relies on
    /// its effect on the next fetch.
    pub async fn unblock_stale(&self, older_than_secs: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE proxies
            SET blocked = FALSE
            WHERE blocked = TRUE
              AND updatedat < NOW() - make_interval(secs => $1::double precision)
            "#,
        )
        .bind(older_than_secs)
        .execute(&self.pool)
        .await?;

        let unblocked = result.rows_affected();
        if unblocked > 0 {
            info!(count = unblocked, "Unblocked stale proxies");
        }

        Ok(unblocked)
    }
}

/// True when the error is a PostgreSQL serialization failure (SQLSTATE 40001)
fn is_serialization_failure(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("40001"),
        _ => false,
    }
}

/// Map transport-level failures to `Unavailable` so callers treat them as
/// transient; everything else stays a database error
fn map_transient(err: sqlx::Error) -> LessorError {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            warn!(error = %err, "Store transport failure");
            LessorError::Unavailable(err.to_string())
        }
        other => LessorError::Database(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_transient_classifies_pool_timeout() {
        let mapped = map_transient(sqlx::Error::PoolTimedOut);
        assert!(matches!(mapped, LessorError::Unavailable(_)));

        let mapped = map_transient(sqlx::Error::RowNotFound);
        assert!(matches!(mapped, LessorError::Database(_)));
    }
}
