use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GateError;
use crate::matcher;

/// One governed site: URL patterns plus its own daily minute budget.
///
/// `id` is stable for the lifetime of the historical data. Deleting a rule
/// orphans its usage records by id; they stay valid but unlabeled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteRule {
    pub id: String,
    pub label: String,
    pub include_patterns: Vec<String>,
    pub daily_limit_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,
}

impl SiteRule {
    pub fn new(
        label: impl Into<String>,
        include_patterns: Vec<String>,
        daily_limit_minutes: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            include_patterns,
            daily_limit_minutes,
            site_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_preset_minutes")]
    pub preset_minutes: Vec<u32>,
    pub site_rules: Vec<SiteRule>,
    #[serde(default = "default_exclude_patterns")]
    pub global_exclude_patterns: Vec<String>,
}

pub(crate) fn default_preset_minutes() -> Vec<u32> {
    vec![1, 5, 10, 20]
}

pub(crate) fn default_exclude_patterns() -> Vec<String> {
    vec![
        r"^https?://(twitter|x)\.com/compose".to_string(),
        r"^https?://(twitter|x)\.com/messages/compose".to_string(),
        r"^https?://(twitter|x)\.com/messages".to_string(),
    ]
}

pub(crate) fn default_site_rule(daily_limit_minutes: u32) -> SiteRule {
    SiteRule {
        id: "default".to_string(),
        label: "X".to_string(),
        include_patterns: vec![r"^https?://(twitter|x)\.com(/|$)".to_string()],
        daily_limit_minutes,
        site_url: Some("https://x.com".to_string()),
    }
}

pub(crate) const DEFAULT_DAILY_LIMIT_MINUTES: u32 = 30;

impl Default for Settings {
    fn default() -> Self {
        Self {
            preset_minutes: default_preset_minutes(),
            site_rules: vec![default_site_rule(DEFAULT_DAILY_LIMIT_MINUTES)],
            global_exclude_patterns: default_exclude_patterns(),
        }
    }
}

impl Settings {
    pub fn rule(&self, site_id: &str) -> Option<&SiteRule> {
        self.site_rules.iter().find(|rule| rule.id == site_id)
    }

    pub(crate) fn default_site_id(&self) -> String {
        self.site_rules
            .first()
            .map(|rule| rule.id.clone())
            .unwrap_or_else(|| "default".to_string())
    }

    /// Where to send the user back after starting or resuming a session:
    /// the explicit return URL if the start screen carried one, else the
    /// session's own URL, else the rule's home URL.
    pub fn redirect_url_for(
        &self,
        site_id: &str,
        return_url: Option<&str>,
        session_url: Option<&str>,
    ) -> Option<String> {
        return_url
            .map(str::to_string)
            .or_else(|| session_url.map(str::to_string))
            .or_else(|| self.rule(site_id).and_then(|rule| rule.site_url.clone()))
    }
}

/// Settings-form validation. `QuotaStore::save_settings` is an unconditional
/// overwrite; callers run this first. First failure wins.
pub fn validate_settings(settings: &Settings) -> Result<(), GateError> {
    if settings.preset_minutes.is_empty() {
        return Err(GateError::EmptyPresets);
    }
    for (index, preset) in settings.preset_minutes.iter().enumerate() {
        if *preset == 0 {
            return Err(GateError::ZeroPreset);
        }
        if settings.preset_minutes[..index].contains(preset) {
            return Err(GateError::DuplicatePreset(*preset));
        }
    }

    if settings.site_rules.is_empty() {
        return Err(GateError::NoSiteRules);
    }
    for rule in &settings.site_rules {
        if rule.daily_limit_minutes == 0 {
            return Err(GateError::ZeroDailyLimit(rule.label.clone()));
        }
        if rule.include_patterns.is_empty() {
            return Err(GateError::NoPatterns(rule.label.clone()));
        }
        if let Some(bad) = matcher::find_invalid(&rule.include_patterns).first() {
            return Err(GateError::InvalidPattern(bad.clone()));
        }
    }

    if let Some(bad) = matcher::find_invalid(&settings.global_exclude_patterns).first() {
        return Err(GateError::InvalidPattern(bad.clone()));
    }

    Ok(())
}
