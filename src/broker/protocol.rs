//! Wire protocol: JSON text frames exchanged over a streaming session

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LessorError, Result};
use crate::models::{WireProxy, DEFAULT_USAGE_INTERVAL};

fn default_usage_interval() -> i64 {
    DEFAULT_USAGE_INTERVAL
}

/// Initial frame on `/ws/proxies`: a bare source list without an action tag
#[derive(Debug, Clone, Deserialize)]
pub struct InitFrame {
    pub source_ids: Vec<Value>,
}

/// Frames a client may send
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Subscribe to a set of sources
    Start { source_ids: Vec<Value> },
    /// Report the outcome of using a proxy
    ReportProxy { proxy_id: i64, status_code: i32 },
    /// Advisory notice that the client started using a proxy
    ProxyTaken {
        proxy_id: i64,
        #[serde(default = "default_usage_interval")]
        usage_interval: i64,
    },
    /// Hint that the client wants the next lease immediately
    RequestProxy,
}

/// Frames the broker sends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A lease: the proxy payload with its encrypted credential
    ProxyAvailable {
        #[serde(skip_serializing_if = "Option::is_none")]
        source_id: Option<String>,
        proxy: WireProxy,
        key: String,
        usage_interval: i64,
    },
    /// Advisory peer notice that a proxy is in use
    ProxyInUse {
        proxy_id: i64,
        usage_interval: i64,
        key: String,
    },
    /// Every subscribed pool is empty
    Waiting { message: String, key: String },
    /// Outcome of a `report_proxy` frame
    ReportAcknowledged {
        proxy_id: i64,
        success: bool,
        message: String,
    },
    /// Subscribe-time load summary on `/ws/proxies`
    SourcesLoaded {
        loaded_sources: Vec<LoadedSource>,
        message: String,
    },
    /// A record was appended to a pool out of band
    PoolUpdated { count: usize },
    /// Protocol or server error
    Error { message: String },
}

/// One entry of a `sources_loaded` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedSource {
    pub source_id: String,
    pub proxy_count: usize,
}

/// A session's subscription: the sorted, deduplicated source-id set and the
/// comma-joined key it is grouped under in the connection registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    ids: Vec<i64>,
    key: String,
}

impl Subscription {
    /// Build a subscription from raw frame values, coercing strings and
    /// numbers to source ids
    pub fn from_values(values: &[Value]) -> Result<Self> {
        if values.is_empty() {
            return Err(LessorError::InvalidFrame(
                "No source_ids provided. Please specify at least one source_id.".to_string(),
            ));
        }

        let mut ids = Vec::with_capacity(values.len());
        for value in values {
            ids.push(coerce_source_id(value)?);
        }
        ids.sort_unstable();
        ids.dedup();

        let key = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        Ok(Self { ids, key })
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn contains(&self, source_id: i64) -> bool {
        self.ids.binary_search(&source_id).is_ok()
    }
}

/// Whether a registry key's comma-joined source set contains `source_id`
pub fn key_contains_source(key: &str, source_id: i64) -> bool {
    let needle = source_id.to_string();
    key.split(',').any(|part| part == needle)
}

fn coerce_source_id(value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| LessorError::InvalidSourceId(n.to_string())),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| LessorError::InvalidSourceId(s.clone())),
        other => Err(LessorError::InvalidSourceId(other.to_string())),
    }
}
