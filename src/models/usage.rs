use std::collections::BTreeMap;

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};

use super::session::SessionRecord;

/// Aggregate for one site on one calendar day. `total_used_minutes` is the
/// committed-usage figure; it only ever grows, via
/// `QuotaStore::add_session_record`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteDailyUsage {
    pub site_id: String,
    pub total_used_minutes: u32,
    pub sessions: Vec<SessionRecord>,
}

impl SiteDailyUsage {
    pub fn empty(site_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            total_used_minutes: 0,
            sessions: Vec::new(),
        }
    }
}

/// One calendar day of usage, keyed by local-TZ date string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    pub date: String,
    pub site_usage: BTreeMap<String, SiteDailyUsage>,
}

impl DailyUsage {
    pub fn empty(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            site_usage: BTreeMap::new(),
        }
    }

    pub fn total_used_minutes(&self) -> u32 {
        self.site_usage
            .values()
            .map(|usage| usage.total_used_minutes)
            .sum()
    }
}

/// Local-TZ `YYYY-MM-DD` for an epoch-millisecond timestamp. Quotas reset at
/// the user's own midnight, so this is never computed from UTC.
pub fn date_string_for_ms(epoch_ms: i64) -> Option<String> {
    Local
        .timestamp_millis_opt(epoch_ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
}

pub fn today_string() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}
