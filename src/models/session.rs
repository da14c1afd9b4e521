use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::usage::{date_string_for_ms, today_string};

/// One in-progress (or just-ended) timed access window. At most one exists
/// at a time; `commands::SessionService::start_session` enforces that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    /// Epoch milliseconds.
    pub start_time: i64,
    pub duration_minutes: u32,
    pub remaining_seconds: u32,
    pub is_active: bool,
    pub site_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,
}

impl Session {
    pub fn begin(
        duration_minutes: u32,
        site_id: impl Into<String>,
        site_url: Option<String>,
    ) -> Self {
        Self::begin_at(
            Utc::now().timestamp_millis(),
            duration_minutes,
            site_id,
            site_url,
        )
    }

    pub fn begin_at(
        now_ms: i64,
        duration_minutes: u32,
        site_id: impl Into<String>,
        site_url: Option<String>,
    ) -> Self {
        Self {
            id: format!("session_{now_ms}"),
            start_time: now_ms,
            duration_minutes,
            remaining_seconds: duration_minutes * 60,
            is_active: true,
            site_id: site_id.into(),
            site_url,
        }
    }

    /// One countdown step. Floored at zero; a second call on an expired
    /// session changes nothing.
    pub fn decrement(&mut self) {
        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_seconds == 0
    }

    /// Whether the session started on the current local-TZ calendar day.
    /// Sessions that crossed midnight are stale.
    pub fn is_today(&self) -> bool {
        date_string_for_ms(self.start_time).as_deref() == Some(&*today_string())
    }

    pub fn elapsed_seconds(&self) -> u32 {
        (self.duration_minutes * 60).saturating_sub(self.remaining_seconds)
    }

    pub fn elapsed_minutes(&self) -> u32 {
        self.elapsed_seconds() / 60
    }
}

/// Immutable historical artifact, created exactly once per reflected-upon
/// session. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub duration_minutes: u32,
    pub reflection: String,
    pub site_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,
}

/// Zero-padded MM:SS for the countdown display. Sessions are bounded by
/// per-day minute budgets, so there is no hour component.
pub fn format_mm_ss(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
