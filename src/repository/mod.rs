//! Store adapter: authoritative persistence over PostgreSQL

pub mod proxy;
pub mod report;
pub mod user;

pub use proxy::ProxyRepository;
pub use report::ReportRepository;
pub use user::UserRepository;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::Result;
use crate::models::ProxyRecord;

/// The store operations the lease engine depends on.
///
/// `fetch_unblocked` marks the returned rows taken inside the same
/// transaction, so two refills can never check out the same row.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Check out up to `limit` unblocked records for a source, best first
    async fn fetch_unblocked(&self, source_id: i64, limit: i64) -> Result<Vec<ProxyRecord>>;

    /// Append one usage report row
    async fn insert_report(&self, proxy_id: i64, status_code: i32) -> Result<()>;

    /// Resolve the source a proxy belongs to
    async fn source_of(&self, proxy_id: i64) -> Result<Option<i64>>;

    /// Every record of one source, blocked or not, for the subscribe-time load
    async fn records_for_source(&self, source_id: i64) -> Result<Vec<ProxyRecord>>;
}

/// PostgreSQL-backed [`LeaseStore`]
#[derive(Clone)]
pub struct PgStore {
    proxies: ProxyRepository,
    reports: ReportRepository,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            proxies: ProxyRepository::new(pool.clone()),
            reports: ReportRepository::new(pool),
        }
    }
}

#[async_trait]
impl LeaseStore for PgStore {
    async fn fetch_unblocked(&self, source_id: i64, limit: i64) -> Result<Vec<ProxyRecord>> {
        self.proxies.fetch_unblocked(source_id, limit).await
    }

    async fn insert_report(&self, proxy_id: i64, status_code: i32) -> Result<()> {
        self.reports.insert(proxy_id, status_code).await
    }

    async fn source_of(&self, proxy_id: i64) -> Result<Option<i64>> {
        self.proxies.source_of(proxy_id).await
    }

    async fn records_for_source(&self, source_id: i64) -> Result<Vec<ProxyRecord>> {
        self.proxies.get_by_source(source_id).await
    }
}
