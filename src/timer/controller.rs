use std::{sync::Arc, time::Duration};

use anyhow::Result;
use log::{error, info, warn};
use tokio::{sync::Mutex, task::JoinHandle, time};

use crate::matcher;
use crate::models::Session;
use crate::quota::QuotaStore;
use crate::tabs::{ScreenTarget, TabHost};

/// Result of advancing the countdown by one second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Session still active; keep ticking.
    Continue,
    /// Nothing to advance; the ticker stops itself.
    Stop,
    /// The session just ran out; a reflection is now pending.
    Expired,
}

/// The singleton 1 Hz countdown.
///
/// The ticker is an owned task handle, not an ambient static: `ensure_running`
/// is a no-op while a live ticker exists, `stop` aborts and clears it. The
/// background context can be torn down at any time, so the principal restart
/// path is the storage watch on `currentSession` (wired in `Gatekeeper`), with
/// explicit restarts after session start and startup restore.
#[derive(Clone)]
pub struct CountdownController {
    quota: QuotaStore,
    tabs: Arc<dyn TabHost>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    tick_interval: Duration,
}

impl CountdownController {
    pub fn new(quota: QuotaStore, tabs: Arc<dyn TabHost>) -> Self {
        Self {
            quota,
            tabs,
            ticker: Arc::new(Mutex::new(None)),
            tick_interval: Duration::from_secs(1),
        }
    }

    pub async fn ensure_running(&self) {
        let mut guard = self.ticker.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }

        let controller = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = time::interval(controller.tick_interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            // The first interval tick completes immediately; consume it so
            // the first decrement lands a full second after start.
            interval.tick().await;

            loop {
                interval.tick().await;
                match controller.tick().await {
                    Ok(TickOutcome::Continue) => {}
                    Ok(TickOutcome::Stop) | Ok(TickOutcome::Expired) => break,
                    // A failed tick skips a second but does not kill the
                    // countdown; the next tick re-reads ground truth.
                    Err(err) => error!("Countdown tick failed: {err:#}"),
                }
            }
        });

        *guard = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }

    pub async fn is_running(&self) -> bool {
        self.ticker
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// One full countdown transition against the persisted session.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let Some(mut session) = self.quota.get_current_session().await? else {
            return Ok(TickOutcome::Stop);
        };
        if !session.is_active {
            return Ok(TickOutcome::Stop);
        }

        // A session that crossed midnight is cleared outright. The rollover
        // scheduler does the same; this path covers it even if that task
        // never fired.
        if !session.is_today() {
            self.quota.save_current_session(None).await?;
            return Ok(TickOutcome::Stop);
        }

        session.decrement();

        if session.is_expired() {
            session.is_active = false;
            session.remaining_seconds = 0;
            self.quota.save_current_session(Some(&session)).await?;
            info!("Session {} expired; reflection pending", session.id);
            self.redirect_expired_tabs(&session).await;
            return Ok(TickOutcome::Expired);
        }

        self.quota.save_current_session(Some(&session)).await?;
        Ok(TickOutcome::Continue)
    }

    /// Send every tab on the expired session's site to the reflection
    /// screen. Failures are logged, never fatal to the tick.
    async fn redirect_expired_tabs(&self, session: &Session) {
        let settings = match self.quota.get_settings().await {
            Ok(settings) => settings,
            Err(err) => {
                error!("Failed to load settings for expiry redirect: {err:#}");
                return;
            }
        };

        let Some(rule) = settings.rule(&session.site_id) else {
            warn!(
                "Expired session {} references unknown site rule {}",
                session.id, session.site_id
            );
            return;
        };

        let tabs = match self.tabs.tabs() {
            Ok(tabs) => tabs,
            Err(err) => {
                error!("Failed to enumerate tabs: {err:#}");
                return;
            }
        };

        for tab in tabs {
            if matcher::rule_matches(&tab.url, rule, &settings.global_exclude_patterns) {
                if let Err(err) = self.tabs.navigate(tab.id, &ScreenTarget::Reflection) {
                    error!("Failed to redirect tab {}: {err:#}", tab.id);
                }
            }
        }
    }
}
