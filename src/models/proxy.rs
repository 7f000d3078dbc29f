use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Default hold interval in seconds when a record carries none
pub const DEFAULT_USAGE_INTERVAL: i64 = 30;

fn default_usage_interval() -> i64 {
    DEFAULT_USAGE_INTERVAL
}

/// A leasable proxy record.
///
/// This is the per-lease snapshot handed between the store, the warm cache,
/// the pools and the sessions. The serde names match the wire and cache
/// representation (`proxy`, `sourceId`, `updatedAt`); the `credential` field
/// is the sensitive `host:port[:user:pass]` string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ProxyRecord {
    pub id: i64,
    #[serde(rename = "proxy")]
    #[sqlx(rename = "proxy")]
    pub credential: String,
    #[serde(rename = "sourceId", default)]
    #[sqlx(rename = "sourceid")]
    pub source_id: i64,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub blocked: bool,
    #[serde(rename = "provider", default)]
    #[sqlx(rename = "provider")]
    pub provider_id: Option<i64>,
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(rename = "updatedAt", default)]
    #[sqlx(rename = "updatedat")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default = "default_usage_interval")]
    pub usage_interval: i64,
}

impl ProxyRecord {
    /// Priority band of width 10 used by the warm cache (0, 10, .., 100)
    pub fn priority_band(&self) -> i32 {
        self.priority / 10 * 10
    }
}

/// Outbound proxy payload: the record plus the encryption marker.
///
/// When the credential was encrypted the flag is serialized as
/// `"_encrypted": true`; on the plaintext fallback path the flag is omitted
/// entirely so the frame matches an unencrypted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireProxy {
    #[serde(flatten)]
    pub record: ProxyRecord,
    #[serde(
        rename = "_encrypted",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub encrypted: bool,
}

impl WireProxy {
    pub fn plaintext(record: ProxyRecord) -> Self {
        Self {
            record,
            encrypted: false,
        }
    }

    pub fn encrypted(mut record: ProxyRecord, ciphertext: String) -> Self {
        record.credential = ciphertext;
        Self {
            record,
            encrypted: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_record() -> ProxyRecord {
        ProxyRecord {
            id: 7,
            credential: "10.0.0.1:3128:user:pass".to_string(),
            source_id: 1,
            priority: 85,
            blocked: false,
            provider_id: Some(2),
            provider_name: Some("acme".to_string()),
            updated_at: None,
            usage_interval: 30,
        }
    }

    #[test]
    fn test_priority_band() {
        let mut record = base_record();
        assert_eq!(record.priority_band(), 80);

        record.priority = 0;
        assert_eq!(record.priority_band(), 0);

        record.priority = 100;
        assert_eq!(record.priority_band(), 100);

        record.priority = 9;
        assert_eq!(record.priority_band(), 0);
    }

    #[test]
    fn test_record_wire_field_names() {
        let value = serde_json::to_value(base_record()).unwrap();

        assert_eq!(value["id"], 7);
        assert_eq!(value["proxy"], "10.0.0.1:3128:user:pass");
        assert_eq!(value["sourceId"], 1);
        assert_eq!(value["priority"], 85);
        assert_eq!(value["blocked"], false);
        assert_eq!(value["provider"], 2);
        assert_eq!(value["provider_name"], "acme");
        assert_eq!(value["usage_interval"], 30);
        assert!(value.get("credential").is_none());
        assert!(value.get("source_id").is_none());
    }

    #[test]
    fn test_record_deserializes_with_defaults() {
        let record: ProxyRecord =
            serde_json::from_str(r#"{"id": 3, "proxy": "h:p", "sourceId": 9}"#).unwrap();

        assert_eq!(record.id, 3);
        assert_eq!(record.credential, "h:p");
        assert_eq!(record.source_id, 9);
        assert_eq!(record.priority, 0);
        assert!(!record.blocked);
        assert_eq!(record.usage_interval, DEFAULT_USAGE_INTERVAL);
    }

    #[test]
    fn test_wire_proxy_encrypted_flag() {
        let plain = serde_json::to_value(WireProxy::plaintext(base_record())).unwrap();
        assert!(plain.get("_encrypted").is_none());

        let wire = WireProxy::encrypted(base_record(), "Y2lwaGVydGV4dA==".to_string());
        let value = serde_json::to_value(&wire).unwrap();
        assert_eq!(value["_encrypted"], true);
        assert_eq!(value["proxy"], "Y2lwaGVydGV4dA==");
    }
}
