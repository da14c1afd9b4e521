use std::sync::Arc;

use anyhow::Result;
use log::debug;

use crate::matcher;
use crate::quota::QuotaStore;
use crate::tabs::{ScreenTarget, TabHost, TabInfo};
use crate::timer::CountdownController;

/// Gate on every navigation into governed territory.
///
/// Unmatched URLs pass untouched. A matched URL needs an active,
/// positive-remaining session on the same site; anything else sends the tab
/// to the session-start screen carrying the matched rule and the original
/// destination for redirect-back.
#[derive(Clone)]
pub struct NavigationGuard {
    quota: QuotaStore,
    countdown: CountdownController,
    tabs: Arc<dyn TabHost>,
}

impl NavigationGuard {
    pub fn new(
        quota: QuotaStore,
        countdown: CountdownController,
        tabs: Arc<dyn TabHost>,
    ) -> Self {
        Self {
            quota,
            countdown,
            tabs,
        }
    }

    /// Navigation-completed hook, fired by the embedder for every tab whose
    /// URL changed or finished loading.
    pub async fn on_navigation(&self, tab: &TabInfo) -> Result<()> {
        let settings = self.quota.get_settings().await?;
        let Some(rule) = matcher::match_rule(
            &tab.url,
            &settings.site_rules,
            &settings.global_exclude_patterns,
        ) else {
            return Ok(());
        };

        debug!("Governed navigation in tab {}: {}", tab.id, tab.url);

        let session = self.quota.get_current_session().await?;
        let usable = session.as_ref().is_some_and(|session| {
            session.is_active && session.remaining_seconds > 0 && session.site_id == rule.id
        });

        if usable {
            // The background context may have been unloaded since the last
            // tick; a live session must always re-arm the countdown.
            self.countdown.ensure_running().await;
            return Ok(());
        }

        self.tabs.navigate(
            tab.id,
            &ScreenTarget::SessionStart {
                site_id: rule.id.clone(),
                return_url: Some(tab.url.clone()),
            },
        )?;
        Ok(())
    }

    /// Tab-creation hook; covers links opened in new tabs.
    pub async fn on_tab_created(&self, tab: &TabInfo) -> Result<()> {
        self.on_navigation(tab).await
    }
}
