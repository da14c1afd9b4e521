//! Schema-on-read migration for the persisted roots.
//!
//! Older installs wrote three legacy shapes: settings without `siteRules`
//! (one implicit site with a single `dailyLimitMinutes`), sessions without
//! `siteId`, and flat daily usage (`totalUsedMinutes`/`sessions` at the top
//! level instead of a per-site map). Each root decodes through an untagged
//! shape enum (the current shape first, then the known legacy shape) and
//! normalizes to the current representation.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::models::settings::{
    default_exclude_patterns, default_preset_minutes, default_site_rule, DEFAULT_DAILY_LIMIT_MINUTES,
};
use crate::models::{DailyUsage, Session, SessionRecord, Settings, SiteDailyUsage};

#[derive(Deserialize)]
#[serde(untagged)]
enum SettingsShape {
    Current(Settings),
    Legacy(LegacySettings),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacySettings {
    #[serde(default)]
    preset_minutes: Option<Vec<u32>>,
    #[serde(default)]
    daily_limit_minutes: Option<u32>,
}

/// Total: any undecodable value falls back to the built-in defaults, the
/// same way the original treated arbitrary stored junk.
pub(crate) fn normalize_settings(raw: Option<&Value>) -> Settings {
    let Some(raw) = raw else {
        return Settings::default();
    };
    match serde_json::from_value::<SettingsShape>(raw.clone()) {
        Ok(SettingsShape::Current(settings)) => settings,
        Ok(SettingsShape::Legacy(legacy)) => Settings {
            preset_minutes: legacy
                .preset_minutes
                .filter(|presets| !presets.is_empty())
                .unwrap_or_else(default_preset_minutes),
            site_rules: vec![default_site_rule(
                legacy.daily_limit_minutes.unwrap_or(DEFAULT_DAILY_LIMIT_MINUTES),
            )],
            global_exclude_patterns: default_exclude_patterns(),
        },
        Err(_) => Settings::default(),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum SessionShape {
    Current(Session),
    Legacy(LegacySession),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LegacySession {
    id: String,
    start_time: i64,
    duration_minutes: u32,
    remaining_seconds: u32,
    is_active: bool,
    #[serde(default)]
    site_url: Option<String>,
}

pub(crate) fn decode_session(raw: &Value) -> Result<SessionShape> {
    serde_json::from_value(raw.clone()).context("corrupt currentSession value")
}

pub(crate) fn session_from_legacy(
    legacy: LegacySession,
    site_id: String,
    fallback_url: Option<String>,
) -> Session {
    Session {
        id: legacy.id,
        start_time: legacy.start_time,
        duration_minutes: legacy.duration_minutes,
        remaining_seconds: legacy.remaining_seconds,
        is_active: legacy.is_active,
        site_id,
        site_url: legacy.site_url.or(fallback_url),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DailyUsageShape {
    Current(RawDailyUsage),
    Legacy(LegacyDailyUsage),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDailyUsage {
    #[serde(default)]
    date: Option<String>,
    site_usage: BTreeMap<String, RawSiteUsage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSiteUsage {
    #[serde(default)]
    total_used_minutes: u32,
    #[serde(default)]
    sessions: Vec<RawRecord>,
}

/// Records written before the multi-site schema carry no `siteId`; it is
/// filled from the containing entry (or the default site) on read.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    id: String,
    start_time: i64,
    end_time: i64,
    duration_minutes: u32,
    #[serde(default)]
    reflection: String,
    #[serde(default)]
    site_id: Option<String>,
    #[serde(default)]
    site_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyDailyUsage {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    total_used_minutes: u32,
    #[serde(default)]
    sessions: Vec<RawRecord>,
}

impl RawRecord {
    fn into_record(self, site_id: &str) -> SessionRecord {
        SessionRecord {
            site_id: self.site_id.unwrap_or_else(|| site_id.to_string()),
            id: self.id,
            start_time: self.start_time,
            end_time: self.end_time,
            duration_minutes: self.duration_minutes,
            reflection: self.reflection,
            site_url: self.site_url,
        }
    }
}

pub(crate) fn normalize_daily_usage(
    raw: Option<&Value>,
    default_site_id: &str,
    date: &str,
) -> Result<DailyUsage> {
    let Some(raw) = raw else {
        return Ok(DailyUsage::empty(date));
    };

    let shape: DailyUsageShape = serde_json::from_value(raw.clone())
        .with_context(|| format!("corrupt dailyUsage entry for {date}"))?;

    match shape {
        DailyUsageShape::Current(current) => {
            let mut site_usage = BTreeMap::new();
            for (site_id, usage) in current.site_usage {
                let sessions = usage
                    .sessions
                    .into_iter()
                    .map(|record| record.into_record(&site_id))
                    .collect();
                site_usage.insert(
                    site_id.clone(),
                    SiteDailyUsage {
                        site_id,
                        total_used_minutes: usage.total_used_minutes,
                        sessions,
                    },
                );
            }
            Ok(DailyUsage {
                date: current.date.unwrap_or_else(|| date.to_string()),
                site_usage,
            })
        }
        DailyUsageShape::Legacy(legacy) => {
            let sessions: Vec<SessionRecord> = legacy
                .sessions
                .into_iter()
                .map(|record| record.into_record(default_site_id))
                .collect();
            let mut site_usage = BTreeMap::new();
            site_usage.insert(
                default_site_id.to_string(),
                SiteDailyUsage {
                    site_id: default_site_id.to_string(),
                    total_used_minutes: legacy.total_used_minutes,
                    sessions,
                },
            );
            Ok(DailyUsage {
                date: legacy.date.unwrap_or_else(|| date.to_string()),
                site_usage,
            })
        }
    }
}
