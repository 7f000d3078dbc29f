use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{info, warn};

use super::LeaseCache;
use crate::config::Config;
use crate::error::Result;
use crate::models::ProxyRecord;

/// Key for the full snapshot list
const KEY_ALL: &str = "proxies:all";

fn key_proxy(proxy_id: i64) -> String {
    format!("proxy:{}", proxy_id)
}

fn key_source(source_id: i64) -> String {
    format!("proxies:source:{}", source_id)
}

fn key_priority(band: i32) -> String {
    format!("proxies:priority:{}", band)
}

/// Redis-backed mirror of proxy records.
///
/// Records are stored three ways: a point key per id, an ordered list per
/// source, and a list per priority band of width 10. All multi-key writes go
/// through a single pipeline so concurrent readers never observe a
/// half-written source list.
#[derive(Clone)]
pub struct ProxyCache {
    conn: MultiplexedConnection,
}

impl ProxyCache {
    /// Connect to Redis and verify the connection with a ping
    pub async fn connect(config: &Config) -> Result<Self> {
        let client = redis::Client::open(config.cache_url())?;
        let mut conn = client.get_multiplexed_tokio_connection().await?;

        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        info!(host = %config.cache.host, port = %config.cache.port, "Connected to warm cache");

        Ok(Self { conn })
    }

    /// Load a full store snapshot into the cache, replacing previous contents
    pub async fn load_all(&self, records: &[ProxyRecord]) -> Result<usize> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();

        pipe.del(KEY_ALL).ignore();
        for key in touched_keys(records) {
            pipe.del(key).ignore();
        }

        for record in records {
            let payload = serde_json::to_string(record)
                .map_err(|e| crate::error::LessorError::Internal(e.to_string()))?;

            pipe.rpush(KEY_ALL, &payload).ignore();
            pipe.set(key_proxy(record.id), &payload).ignore();
            pipe.rpush(key_source(record.source_id), &payload).ignore();
            pipe.rpush(key_priority(record.priority_band()), &payload)
                .ignore();
        }

        pipe.query_async::<_, ()>(&mut conn).await?;

        info!(count = records.len(), "Loaded proxies into warm cache");
        Ok(records.len())
    }

    /// Replace the cached list for one source with fresh store records
    pub async fn refresh_source(&self, source_id: i64, records: &[ProxyRecord]) -> Result<usize> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();

        pipe.del(key_source(source_id)).ignore();
        for record in records {
            let payload = serde_json::to_string(record)
                .map_err(|e| crate::error::LessorError::Internal(e.to_string()))?;

            pipe.rpush(key_source(source_id), &payload).ignore();
            pipe.set(key_proxy(record.id), &payload).ignore();
        }

        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(records.len())
    }

    /// Get every cached record from the full snapshot
    pub async fn get_all(&self) -> Result<Vec<ProxyRecord>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(KEY_ALL, 0, -1).await?;
        Ok(parse_records(raw))
    }

    /// Get the cached records for one source, leaving the list in place
    pub async fn get_by_source(&self, source_id: i64) -> Result<Vec<ProxyRecord>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(key_source(source_id), 0, -1).await?;
        Ok(parse_records(raw))
    }

    /// Get records whose priority is at least `min_priority`
    pub async fn get_high_priority(&self, min_priority: i32) -> Result<Vec<ProxyRecord>> {
        let mut conn = self.conn.clone();
        let mut result = Vec::new();

        let mut band = min_priority / 10 * 10;
        while band <= 100 {
            let raw: Vec<String> = conn.lrange(key_priority(band), 0, -1).await?;
            result.extend(parse_records(raw));
            band += 10;
        }

        result.retain(|record| record.priority >= min_priority);
        Ok(result)
    }

    /// Merge a JSON patch into a cached record and rewrite its source list
    pub async fn update_fields(&self, proxy_id: i64, patch: serde_json::Value) -> Result<bool> {
        let Some(record) = self.get_by_id(proxy_id).await? else {
            warn!(proxy_id = proxy_id, "Proxy not found in cache for update");
            return Ok(false);
        };

        let mut value = serde_json::to_value(&record)
            .map_err(|e| crate::error::LessorError::Internal(e.to_string()))?;
        if let (Some(target), Some(fields)) = (value.as_object_mut(), patch.as_object()) {
            for (k, v) in fields {
                target.insert(k.clone(), v.clone());
            }
        }

        let updated: ProxyRecord = match serde_json::from_value(value) {
            Ok(updated) => updated,
            Err(e) => {
                warn!(proxy_id = proxy_id, error = %e, "Rejected cache patch");
                return Ok(false);
            }
        };

        let source_records = self.get_by_source(updated.source_id).await?;

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        let payload = serde_json::to_string(&updated)
            .map_err(|e| crate::error::LessorError::Internal(e.to_string()))?;

        pipe.set(key_proxy(proxy_id), &payload).ignore();
        pipe.del(key_source(updated.source_id)).ignore();
        for existing in &source_records {
            let entry = if existing.id == proxy_id {
                payload.clone()
            } else {
                serde_json::to_string(existing)
                    .map_err(|e| crate::error::LessorError::Internal(e.to_string()))?
            };
            pipe.rpush(key_source(updated.source_id), entry).ignore();
        }

        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(true)
    }

    /// Remove a record from the point keys and its source list
    pub async fn delete(&self, proxy_id: i64, source_id: Option<i64>) -> Result<bool> {
        let record = self.get_by_id(proxy_id).await?;
        let source_id = source_id.or(record.as_ref().map(|r| r.source_id));

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.del(key_proxy(proxy_id)).ignore();

        if let Some(source_id) = source_id {
            let remaining: Vec<String> = self
                .get_by_source(source_id)
                .await?
                .into_iter()
                .filter(|r| r.id != proxy_id)
                .map(|r| serde_json::to_string(&r).unwrap_or_default())
                .filter(|s| !s.is_empty())
                .collect();

            pipe.del(key_source(source_id)).ignore();
            for entry in remaining {
                pipe.rpush(key_source(source_id), entry).ignore();
            }
        }

        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(record.is_some())
    }

    /// Drop every proxy key from the cache
    pub async fn clear(&self) -> Result<()> {
        let mut conn = self.conn.clone();

        let mut keys: Vec<String> = conn.keys("proxy:*").await?;
        let more: Vec<String> = conn.keys("proxies:*").await?;
        keys.extend(more);

        if !keys.is_empty() {
            conn.del::<_, ()>(keys).await?;
        }

        info!("Cleared warm cache");
        Ok(())
    }
}

#[async_trait]
impl LeaseCache for ProxyCache {
    async fn take_source(&self, source_id: i64) -> Result<Vec<ProxyRecord>> {
        let mut conn = self.conn.clone();

        let (raw, _): (Vec<String>, i64) = redis::pipe()
            .atomic()
            .lrange(key_source(source_id), 0, -1)
            .del(key_source(source_id))
            .query_async(&mut conn)
            .await?;

        Ok(parse_records(raw))
    }

    async fn store_batch(&self, records: &[ProxyRecord], ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();

        for record in records {
            let payload = serde_json::to_string(record)
                .map_err(|e| crate::error::LessorError::Internal(e.to_string()))?;

            pipe.set_ex(key_proxy(record.id), &payload, ttl.as_secs())
                .ignore();
        }

        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn refresh_source(&self, source_id: i64, records: &[ProxyRecord]) -> Result<()> {
        ProxyCache::refresh_source(self, source_id, records).await?;
        Ok(())
    }

    async fn get_by_id(&self, proxy_id: i64) -> Result<Option<ProxyRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key_proxy(proxy_id)).await?;

        Ok(raw.and_then(|payload| match serde_json::from_str(&payload) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(proxy_id = proxy_id, error = %e, "Dropping malformed cache entry");
                None
            }
        }))
    }
}

/// Parse raw cache payloads, dropping entries that fail to decode
fn parse_records(raw: Vec<String>) -> Vec<ProxyRecord> {
    raw.into_iter()
        .filter_map(|payload| match serde_json::from_str(&payload) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "Dropping malformed cache entry");
                None
            }
        })
        .collect()
}

/// The source and priority keys a snapshot load writes
fn touched_keys(records: &[ProxyRecord]) -> Vec<String> {
    let mut keys = BTreeSet::new();
    for record in records {
        keys.insert(key_source(record.source_id));
        keys.insert(key_priority(record.priority_band()));
    }
    keys.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, source_id: i64, priority: i32) -> ProxyRecord {
        ProxyRecord {
            id,
            credential: format!("10.0.0.{}:3128", id),
            source_id,
            priority,
            blocked: false,
            provider_id: None,
            provider_name: None,
            updated_at: None,
            usage_interval: 30,
        }
    }

    #[test]
    fn test_key_formats() {
        assert_eq!(key_proxy(7), "proxy:7");
        assert_eq!(key_source(3), "proxies:source:3");
        assert_eq!(key_priority(90), "proxies:priority:90");
    }

    #[test]
    fn test_touched_keys_dedupes() {
        let records = vec![record(1, 1, 95), record(2, 1, 91), record(3, 2, 50)];
        let keys = touched_keys(&records);

        assert_eq!(
            keys,
            vec![
                "proxies:priority:50".to_string(),
                "proxies:priority:90".to_string(),
                "proxies:source:1".to_string(),
                "proxies:source:2".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_records_skips_malformed() {
        let good = serde_json::to_string(&record(1, 1, 10)).unwrap();
        let parsed = parse_records(vec![good, "not json".to_string()]);

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, 1);
    }
}
