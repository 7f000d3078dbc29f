use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A persisted usage report row (`statistics` table)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageReport {
    pub id: i64,
    #[serde(rename = "proxy_id")]
    #[sqlx(rename = "proxyid")]
    pub proxy_id: i64,
    #[serde(rename = "status_code")]
    #[sqlx(rename = "statusid")]
    pub status_code: i32,
}

/// Report listing entry returned by the control plane
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub id: i64,
    pub status_code: i32,
    pub reported_at: Option<DateTime<Utc>>,
}

impl From<UsageReport> for ReportEntry {
    fn from(report: UsageReport) -> Self {
        ReportEntry {
            id: report.id,
            status_code: report.status_code,
            // The statistics table carries no timestamp column.
            reported_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_entry_from_usage_report() {
        let entry: ReportEntry = UsageReport {
            id: 11,
            proxy_id: 42,
            status_code: 429,
        }
        .into();

        assert_eq!(entry.id, 11);
        assert_eq!(entry.status_code, 429);
        assert!(entry.reported_at.is_none());
    }
}
