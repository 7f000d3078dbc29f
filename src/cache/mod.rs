//! Warm cache: a near-store mirror of proxy records in Redis
//!
//! The cache is authoritative only for hot reads. When it is unavailable the
//! refill path falls through to the store directly.

pub mod proxy_cache;

pub use proxy_cache::ProxyCache;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::models::ProxyRecord;

/// The cache operations the lease engine depends on.
///
/// `take_source` consumes the cached source list so records copied into a
/// pool can never be copied twice while leased or cooling. Checked-out store
/// batches are mirrored as expiring point keys only, never as a source list.
#[async_trait]
pub trait LeaseCache: Send + Sync {
    /// Drain and return the cached records for a source
    async fn take_source(&self, source_id: i64) -> Result<Vec<ProxyRecord>>;

    /// Mirror a checked-out batch as point keys expiring after `ttl`
    async fn store_batch(&self, records: &[ProxyRecord], ttl: Duration) -> Result<()>;

    /// Replace the cached source list and point keys for one source
    async fn refresh_source(&self, source_id: i64, records: &[ProxyRecord]) -> Result<()>;

    /// Point lookup by proxy id
    async fn get_by_id(&self, proxy_id: i64) -> Result<Option<ProxyRecord>>;
}
