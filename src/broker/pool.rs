//! Pool manager: per-source FIFOs of available proxy records
//!
//! A record lives in exactly one place at a time: a pool (available), a
//! session between pop and dispatch (leased), or the return worker's delay
//! queue (cooling). The manager tracks popped ids in a lease ledger so refill
//! can never re-admit a record that is currently out.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use tracing::debug;

use crate::models::ProxyRecord;

/// Per-source FIFO pools, each protected by its own mutex
#[derive(Default)]
pub struct PoolManager {
    pools: DashMap<i64, Arc<Mutex<VecDeque<ProxyRecord>>>>,
    leased: DashSet<i64>,
}

impl PoolManager {
    pub fn new() -> Self {
        Self {
            pools: DashMap::new(),
            leased: DashSet::new(),
        }
    }

    fn pool(&self, source_id: i64) -> Arc<Mutex<VecDeque<ProxyRecord>>> {
        self.pools
            .entry(source_id)
            .or_default()
            .value()
            .clone()
    }

    /// Create the pool for a source if it does not exist yet
    pub fn ensure(&self, source_id: i64) {
        let _ = self.pool(source_id);
    }

    /// Remove and return the head of a source's pool
    pub fn pop(&self, source_id: i64) -> Option<ProxyRecord> {
        let pool = self.pool(source_id);
        let record = pool.lock().pop_front();

        if let Some(record) = &record {
            self.leased.insert(record.id);
        }
        record
    }

    /// Append a returning record to the tail of its pool.
    ///
    /// Skips the append when the id is already pooled, which can only happen
    /// after an out-of-band pool rebuild raced a pending return.
    pub fn push(&self, source_id: i64, record: ProxyRecord) -> bool {
        self.leased.remove(&record.id);

        let pool = self.pool(source_id);
        let mut guard = pool.lock();
        if guard.iter().any(|r| r.id == record.id) {
            debug!(proxy_id = record.id, source_id = source_id, "Skipping duplicate pool return");
            return false;
        }
        guard.push_back(record);
        true
    }

    /// Restore a record to the head of its pool after a failed dispatch
    pub fn push_front(&self, source_id: i64, record: ProxyRecord) {
        self.leased.remove(&record.id);

        let pool = self.pool(source_id);
        let mut guard = pool.lock();
        if guard.iter().any(|r| r.id == record.id) {
            debug!(proxy_id = record.id, source_id = source_id, "Skipping duplicate pool restore");
            return;
        }
        guard.push_front(record);
    }

    /// Bulk-append refill records, filtering ids that are already pooled or
    /// out on lease. Returns how many were added.
    pub fn refill(&self, source_id: i64, records: Vec<ProxyRecord>) -> usize {
        let pool = self.pool(source_id);
        let mut guard = pool.lock();
        let mut added = 0;

        for record in records {
            if self.leased.contains(&record.id) || guard.iter().any(|r| r.id == record.id) {
                continue;
            }
            guard.push_back(record);
            added += 1;
        }
        added
    }

    /// Number of available records for a source
    pub fn len(&self, source_id: i64) -> usize {
        self.pools
            .get(&source_id)
            .map(|pool| pool.lock().len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, source_id: i64) -> bool {
        self.len(source_id) == 0
    }

    /// Read-only copy of a source's pool
    pub fn snapshot(&self, source_id: i64) -> Vec<ProxyRecord> {
        self.pools
            .get(&source_id)
            .map(|pool| pool.lock().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Sizes of every pool, ordered by source id
    pub fn sizes(&self) -> Vec<(i64, usize)> {
        let mut sizes: Vec<(i64, usize)> = self
            .pools
            .iter()
            .map(|entry| (*entry.key(), entry.value().lock().len()))
            .collect();
        sizes.sort_unstable_by_key(|(source_id, _)| *source_id);
        sizes
    }

    /// Scan pools for the source currently holding a proxy id
    pub fn source_of(&self, proxy_id: i64) -> Option<i64> {
        for entry in self.pools.iter() {
            if entry.value().lock().iter().any(|r| r.id == proxy_id) {
                return Some(*entry.key());
            }
        }
        None
    }

    /// Replace every pool from a fresh snapshot, grouped by source.
    ///
    /// Drops the lease ledger: a rebuild resets the world and pending returns
    /// for pre-rebuild leases are de-duplicated on push.
    pub fn rebuild(&self, records: Vec<ProxyRecord>) -> usize {
        self.pools.clear();
        self.leased.clear();

        let count = records.len();
        for record in records {
            let pool = self.pool(record.source_id);
            pool.lock().push_back(record);
        }
        count
    }

    /// Number of pools currently materialized
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, source_id: i64) -> ProxyRecord {
        ProxyRecord {
            id,
            credential: format!("10.0.0.{}:3128", id),
            source_id,
            priority: 0,
            blocked: false,
            provider_id: None,
            provider_name: None,
            updated_at: None,
            usage_interval: 30,
        }
    }

    #[test]
    fn test_pop_is_fifo() {
        let pools = PoolManager::new();
        pools.push(1, record(10, 1));
        pools.push(1, record(11, 1));
        pools.push(1, record(12, 1));

        assert_eq!(pools.pop(1).unwrap().id, 10);
        assert_eq!(pools.pop(1).unwrap().id, 11);
        assert_eq!(pools.pop(1).unwrap().id, 12);
        assert!(pools.pop(1).is_none());
    }

    #[test]
    fn test_pop_empty_or_unknown_source() {
        let pools = PoolManager::new();
        assert!(pools.pop(99).is_none());
        assert_eq!(pools.len(99), 0);
        assert!(pools.snapshot(99).is_empty());
    }

    #[test]
    fn test_push_front_restores_head() {
        let pools = PoolManager::new();
        pools.push(1, record(10, 1));
        pools.push(1, record(11, 1));

        let popped = pools.pop(1).unwrap();
        pools.push_front(1, popped);

        assert_eq!(pools.pop(1).unwrap().id, 10);
    }

    #[test]
    fn test_refill_filters_duplicates() {
        let pools = PoolManager::new();
        pools.push(1, record(10, 1));

        let added = pools.refill(1, vec![record(10, 1), record(11, 1), record(11, 1)]);

        assert_eq!(added, 1);
        assert_eq!(pools.len(1), 2);
    }

    #[test]
    fn test_refill_excludes_leased_records() {
        let pools = PoolManager::new();
        pools.push(1, record(10, 1));
        let leased = pools.pop(1).unwrap();

        // The record is out on lease: a cache copy must not re-enter the pool.
        assert_eq!(pools.refill(1, vec![record(10, 1), record(11, 1)]), 1);
        assert_eq!(pools.snapshot(1).len(), 1);
        assert_eq!(pools.snapshot(1)[0].id, 11);

        // Once returned it can circulate again.
        pools.push(1, leased);
        assert_eq!(pools.len(1), 2);
    }

    #[test]
    fn test_push_skips_duplicate_after_rebuild() {
        let pools = PoolManager::new();
        pools.push(1, record(10, 1));
        let leased = pools.pop(1).unwrap();

        pools.rebuild(vec![record(10, 1), record(11, 1)]);

        // The pending return arrives after the rebuild already restored id 10.
        assert!(!pools.push(1, leased));
        assert_eq!(pools.len(1), 2);
    }

    #[test]
    fn test_sizes_and_pool_count() {
        let pools = PoolManager::new();
        pools.push(2, record(20, 2));
        pools.push(1, record(10, 1));
        pools.push(1, record(11, 1));
        pools.ensure(3);

        assert_eq!(pools.sizes(), vec![(1, 2), (2, 1), (3, 0)]);
        assert_eq!(pools.pool_count(), 3);
    }

    #[test]
    fn test_source_of_scans_pools() {
        let pools = PoolManager::new();
        pools.push(1, record(10, 1));
        pools.push(2, record(20, 2));

        assert_eq!(pools.source_of(20), Some(2));
        assert_eq!(pools.source_of(99), None);
    }

    #[test]
    fn test_rebuild_groups_by_source() {
        let pools = PoolManager::new();
        pools.push(9, record(90, 9));

        let count = pools.rebuild(vec![record(10, 1), record(11, 1), record(20, 2)]);

        assert_eq!(count, 3);
        assert_eq!(pools.len(1), 2);
        assert_eq!(pools.len(2), 1);
        assert_eq!(pools.len(9), 0);
    }
}
