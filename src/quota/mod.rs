use anyhow::{anyhow, Result};
use serde_json::Value;

mod migrate;

use migrate::SessionShape;

use crate::models::{
    today_string, DailyUsage, Session, SessionRecord, Settings, SiteDailyUsage,
};
use crate::store::Store;

pub const SETTINGS_KEY: &str = "settings";
pub const CURRENT_SESSION_KEY: &str = "currentSession";
pub const DAILY_USAGE_KEY: &str = "dailyUsage";

/// Typed access to the three persisted roots, with schema-on-read migration.
///
/// Reads normalize legacy shapes and persist the normalized form back only
/// when it differs from what was stored, so a second read with no
/// intervening writes returns byte-identical data without touching the
/// store.
#[derive(Clone)]
pub struct QuotaStore {
    store: Store,
}

impl QuotaStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Writes default settings if none exist. Idempotent, safe on every
    /// process start.
    pub async fn initialize(&self) -> Result<()> {
        if self.store.get(SETTINGS_KEY).await?.is_none() {
            self.save_settings(&Settings::default()).await?;
        }
        Ok(())
    }

    pub async fn get_settings(&self) -> Result<Settings> {
        let raw = self.store.get(SETTINGS_KEY).await?;
        let normalized = migrate::normalize_settings(raw.as_ref());
        let normalized_value = serde_json::to_value(&normalized)?;
        if raw.as_ref() != Some(&normalized_value) {
            self.store.set(SETTINGS_KEY, normalized_value).await?;
        }
        Ok(normalized)
    }

    /// Unconditional overwrite; callers validate first
    /// (`models::validate_settings`).
    pub async fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.store
            .set(SETTINGS_KEY, serde_json::to_value(settings)?)
            .await
    }

    pub async fn get_current_session(&self) -> Result<Option<Session>> {
        let Some(raw) = self.store.get(CURRENT_SESSION_KEY).await? else {
            return Ok(None);
        };

        match migrate::decode_session(&raw)? {
            SessionShape::Current(session) => Ok(Some(session)),
            SessionShape::Legacy(legacy) => {
                let settings = self.get_settings().await?;
                let site_id = settings.default_site_id();
                let fallback_url = settings
                    .site_rules
                    .first()
                    .and_then(|rule| rule.site_url.clone());
                let migrated = migrate::session_from_legacy(legacy, site_id, fallback_url);
                self.save_current_session(Some(&migrated)).await?;
                Ok(Some(migrated))
            }
        }
    }

    /// `None` removes the key entirely. "No active session" is key-absence,
    /// not a null record, so watchers see the removal event.
    pub async fn save_current_session(&self, session: Option<&Session>) -> Result<()> {
        match session {
            Some(session) => {
                self.store
                    .set(CURRENT_SESSION_KEY, serde_json::to_value(session)?)
                    .await
            }
            None => self.store.remove(CURRENT_SESSION_KEY).await,
        }
    }

    pub async fn get_daily_usage(&self, date: &str) -> Result<DailyUsage> {
        let mut map = self.read_usage_map().await?;
        let settings = self.get_settings().await?;
        let default_site_id = settings.default_site_id();

        let raw_entry = map.get(date).cloned();
        let normalized = migrate::normalize_daily_usage(raw_entry.as_ref(), &default_site_id, date)?;
        let normalized_value = serde_json::to_value(&normalized)?;

        if raw_entry.as_ref() != Some(&normalized_value) {
            map.insert(date.to_string(), normalized_value);
            self.store.set(DAILY_USAGE_KEY, Value::Object(map)).await?;
        }

        Ok(normalized)
    }

    pub async fn get_today_usage(&self) -> Result<DailyUsage> {
        self.get_daily_usage(&today_string()).await
    }

    /// Merges into the map at the entry's `date` key.
    pub async fn save_daily_usage(&self, usage: &DailyUsage) -> Result<()> {
        let mut map = self.read_usage_map().await?;
        map.insert(usage.date.clone(), serde_json::to_value(usage)?);
        self.store.set(DAILY_USAGE_KEY, Value::Object(map)).await
    }

    /// The only way committed usage increases. Called at most once per
    /// session lifecycle, when its reflection is saved.
    pub async fn add_session_record(&self, record: &SessionRecord) -> Result<()> {
        let mut usage = self.get_today_usage().await?;
        let entry = usage
            .site_usage
            .entry(record.site_id.clone())
            .or_insert_with(|| SiteDailyUsage::empty(record.site_id.clone()));
        entry.sessions.push(record.clone());
        entry.total_used_minutes += record.duration_minutes;
        self.save_daily_usage(&usage).await
    }

    /// Every day ever recorded, normalized, newest first. `YYYY-MM-DD`
    /// sorts chronologically as text.
    pub async fn get_all_daily_usage(&self) -> Result<Vec<DailyUsage>> {
        let map = self.read_usage_map().await?;
        let settings = self.get_settings().await?;
        let default_site_id = settings.default_site_id();

        let mut normalized_map = serde_json::Map::new();
        let mut entries = Vec::new();
        for (date, value) in &map {
            let normalized = migrate::normalize_daily_usage(Some(value), &default_site_id, date)?;
            normalized_map.insert(date.clone(), serde_json::to_value(&normalized)?);
            entries.push(normalized);
        }

        if normalized_map != map {
            self.store
                .set(DAILY_USAGE_KEY, Value::Object(normalized_map))
                .await?;
        }

        entries.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(entries)
    }

    /// Minutes still available today for one site: the rule's daily limit
    /// minus committed usage minus the elapsed share of an in-flight active
    /// session on the same site. Never negative; a since-deleted rule has a
    /// zero limit.
    pub async fn get_remaining_minutes(&self, site_id: &str) -> Result<u32> {
        let settings = self.get_settings().await?;
        let usage = self.get_today_usage().await?;
        let session = self.get_current_session().await?;

        let daily_limit = settings
            .rule(site_id)
            .map(|rule| rule.daily_limit_minutes)
            .unwrap_or(0);

        let mut used_minutes = usage
            .site_usage
            .get(site_id)
            .map(|site| site.total_used_minutes)
            .unwrap_or(0);

        if let Some(session) = session {
            if session.is_active && session.site_id == site_id {
                used_minutes += session.elapsed_minutes();
            }
        }

        Ok(daily_limit.saturating_sub(used_minutes))
    }

    async fn read_usage_map(&self) -> Result<serde_json::Map<String, Value>> {
        match self.store.get(DAILY_USAGE_KEY).await? {
            Some(Value::Object(map)) => Ok(map),
            Some(_) => Err(anyhow!("dailyUsage root is not an object")),
            None => Ok(serde_json::Map::new()),
        }
    }
}
