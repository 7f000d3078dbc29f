//! Refill coordinator: repopulating empty pools from the cache or the store
//!
//! Refill is serialized per source with try-lock semantics: the first caller
//! proceeds while concurrent callers observe "refill in progress" and go
//! straight back to waiting. Attempts are bounded so a permanently empty
//! store can never produce a runaway loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::pool::PoolManager;
use crate::cache::LeaseCache;
use crate::config::BrokerConfig;
use crate::repository::LeaseStore;

/// Maximum emptiness-then-refill attempts per call
const MAX_REFILL_ATTEMPTS: usize = 10;

/// Outcome of one refill call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillOutcome {
    /// Records were added to the pool
    Filled(usize),
    /// Neither the cache nor the store had anything to give
    Empty,
    /// Another caller is already refilling this source
    InProgress,
}

pub struct RefillCoordinator {
    pools: Arc<PoolManager>,
    store: Arc<dyn LeaseStore>,
    cache: Option<Arc<dyn LeaseCache>>,
    locks: DashMap<i64, Arc<Mutex<()>>>,
    batch_size: i64,
    cache_ttl: Duration,
    backoff: Duration,
    cache_warned: AtomicBool,
}

impl RefillCoordinator {
    pub fn new(
        pools: Arc<PoolManager>,
        store: Arc<dyn LeaseStore>,
        cache: Option<Arc<dyn LeaseCache>>,
        config: &BrokerConfig,
    ) -> Self {
        Self {
            pools,
            store,
            cache,
            locks: DashMap::new(),
            batch_size: config.refill_batch_size,
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            backoff: Duration::from_secs(config.refill_backoff_secs),
            cache_warned: AtomicBool::new(false),
        }
    }

    fn lock_for(&self, source_id: i64) -> Arc<Mutex<()>> {
        self.locks.entry(source_id).or_default().value().clone()
    }

    /// Refill the pool for one source
    pub async fn refill(&self, source_id: i64) -> RefillOutcome {
        let lock = self.lock_for(source_id);
        let Ok(_guard) = lock.try_lock() else {
            debug!(source_id = source_id, "Refill already in progress");
            return RefillOutcome::InProgress;
        };

        for attempt in 1..=MAX_REFILL_ATTEMPTS {
            // 1. Warm cache first: consume the cached source list
            if let Some(added) = self.refill_from_cache(source_id).await {
                if added > 0 {
                    debug!(source_id = source_id, count = added, "Refilled pool from warm cache");
                    return RefillOutcome::Filled(added);
                }
            }

            // 2. Authoritative store: check out a batch and mark it taken
            match self.store.fetch_unblocked(source_id, self.batch_size).await {
                Ok(records) if records.is_empty() => {
                    debug!(source_id = source_id, "Store has no unblocked rows");
                    return RefillOutcome::Empty;
                }
                Ok(records) => {
                    self.mirror_batch(&records).await;

                    let added = self.pools.refill(source_id, records);
                    if added > 0 {
                        info!(source_id = source_id, count = added, "Refilled pool from store");
                        return RefillOutcome::Filled(added);
                    }

                    // Every fetched row was already pooled or out on lease;
                    // back off before asking the store again.
                    warn!(
                        source_id = source_id,
                        attempt = attempt,
                        "Store batch contained only in-flight records"
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) if e.is_transient() => {
                    warn!(source_id = source_id, error = %e, "Store unavailable during refill");
                    return RefillOutcome::Empty;
                }
                Err(e) => {
                    error!(source_id = source_id, error = %e, "Refill failed");
                    return RefillOutcome::Empty;
                }
            }
        }

        let exhausted = crate::error::LessorError::RefillExhausted { source_id };
        error!(error = %exhausted, "Refill gave up");
        RefillOutcome::Empty
    }

    /// Try the warm cache; `None` means the cache is absent or unavailable
    async fn refill_from_cache(&self, source_id: i64) -> Option<usize> {
        let cache = self.cache.as_ref()?;

        match cache.take_source(source_id).await {
            Ok(records) if records.is_empty() => Some(0),
            Ok(records) => Some(self.pools.refill(source_id, records)),
            Err(e) => {
                if !self.cache_warned.swap(true, Ordering::Relaxed) {
                    warn!(error = %e, "Warm cache unavailable, falling through to store");
                }
                None
            }
        }
    }

    /// Mirror a checked-out batch as expiring point keys so peer notices can
    /// resolve the proxy's source without touching the store
    async fn mirror_batch(&self, records: &[crate::models::ProxyRecord]) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };

        if let Err(e) = cache.store_batch(records, self.cache_ttl).await {
            debug!(error = %e, "Failed to mirror batch into warm cache");
        }
    }
}
