use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::{DateTime, Local, TimeZone};
use log::{error, info};
use tokio::{sync::Mutex, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

use super::CountdownController;
use crate::matcher;
use crate::models::today_string;
use crate::quota::QuotaStore;
use crate::tabs::{ScreenTarget, TabHost};

const FALLBACK_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Fallback delay when the next local midnight cannot be computed (a DST
/// transition that skips it); the 60 s poll then carries the reset.
const DST_FALLBACK_MS: u64 = 60_000;

/// Resets session state at the local day boundary.
///
/// Two triggers share one owned task: a sleep until the next local midnight,
/// and a 60 s poll comparing the remembered date string, which catches
/// wake-ups the sleep missed (device suspend). Both run the identical reset:
/// clear the session, stop the countdown, send the cleared session's tabs
/// back to the session-start screen.
#[derive(Clone)]
pub struct RolloverScheduler {
    quota: QuotaStore,
    tabs: Arc<dyn TabHost>,
    countdown: CountdownController,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    shutdown: CancellationToken,
}

/// Milliseconds from `now` until the next local midnight.
pub fn ms_until_next_local_midnight(now: DateTime<Local>) -> u64 {
    let Some(tomorrow) = now.date_naive().succ_opt() else {
        return DST_FALLBACK_MS;
    };
    let Some(midnight) = tomorrow.and_hms_opt(0, 0, 0) else {
        return DST_FALLBACK_MS;
    };
    match Local.from_local_datetime(&midnight).earliest() {
        Some(target) => (target - now).num_milliseconds().max(0) as u64,
        None => DST_FALLBACK_MS,
    }
}

impl RolloverScheduler {
    pub fn new(
        quota: QuotaStore,
        tabs: Arc<dyn TabHost>,
        countdown: CountdownController,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            quota,
            tabs,
            countdown,
            handle: Arc::new(Mutex::new(None)),
            shutdown,
        }
    }

    pub async fn start(&self) {
        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }

        let scheduler = self.clone();
        *guard = Some(tokio::spawn(async move { scheduler.run().await }));
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
    }

    async fn run(self) {
        let mut last_seen_date = today_string();
        let mut poll = time::interval(FALLBACK_POLL_INTERVAL);
        poll.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // Consume the immediate first poll tick.
        poll.tick().await;

        loop {
            let until_midnight =
                Duration::from_millis(ms_until_next_local_midnight(Local::now()));

            let crossed = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = time::sleep(until_midnight) => true,
                _ = poll.tick() => today_string() != last_seen_date,
            };

            if crossed {
                info!("Local day boundary crossed; resetting session state");
                if let Err(err) = self.reset_day().await {
                    error!("Day rollover reset failed: {err:#}");
                }
                last_seen_date = today_string();
            }
        }
    }

    /// Forced reset, distinct from normal expiry: the session is discarded
    /// with no reflection owed.
    pub(crate) async fn reset_day(&self) -> Result<()> {
        let Some(session) = self.quota.get_current_session().await? else {
            return Ok(());
        };

        self.quota.save_current_session(None).await?;
        self.countdown.stop().await;

        let settings = self.quota.get_settings().await?;
        let Some(rule) = settings.rule(&session.site_id) else {
            return Ok(());
        };

        let target = ScreenTarget::SessionStart {
            site_id: rule.id.clone(),
            return_url: None,
        };
        for tab in self.tabs.tabs()? {
            if matcher::rule_matches(&tab.url, rule, &settings.global_exclude_patterns) {
                if let Err(err) = self.tabs.navigate(tab.id, &target) {
                    error!("Failed to redirect tab {} after rollover: {err:#}", tab.id);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Session, Settings, SiteRule};
    use crate::store::Store;
    use crate::tabs::testing::RecordingTabHost;
    use crate::tabs::TabInfo;

    fn fixture(
        tabs: Vec<TabInfo>,
    ) -> (tempfile::TempDir, QuotaStore, Arc<RecordingTabHost>, RolloverScheduler) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("test.sqlite3")).unwrap();
        let quota = QuotaStore::new(store);
        let host = Arc::new(RecordingTabHost::with_tabs(tabs));
        let countdown = CountdownController::new(quota.clone(), host.clone());
        let scheduler = RolloverScheduler::new(
            quota.clone(),
            host.clone(),
            countdown,
            CancellationToken::new(),
        );
        (dir, quota, host, scheduler)
    }

    fn x_settings() -> Settings {
        Settings {
            preset_minutes: vec![1, 5, 10, 20],
            site_rules: vec![SiteRule {
                id: "x".into(),
                label: "X".into(),
                include_patterns: vec![r"^https?://x\.com".into()],
                daily_limit_minutes: 30,
                site_url: None,
            }],
            global_exclude_patterns: Vec::new(),
        }
    }

    #[test]
    fn midnight_is_at_most_a_day_away() {
        let ms = ms_until_next_local_midnight(Local::now());
        assert!(ms > 0);
        assert!(ms <= 24 * 60 * 60 * 1000);
    }

    #[tokio::test]
    async fn reset_clears_session_and_redirects_to_start() {
        let (_dir, quota, host, scheduler) = fixture(vec![
            TabInfo { id: 7, url: "https://x.com/home".into() },
            TabInfo { id: 8, url: "https://example.com".into() },
        ]);
        quota.save_settings(&x_settings()).await.unwrap();
        let session = Session::begin(5, "x", None);
        quota.save_current_session(Some(&session)).await.unwrap();

        scheduler.reset_day().await.unwrap();

        assert!(quota.get_current_session().await.unwrap().is_none());
        assert_eq!(
            host.recorded(),
            vec![(
                7,
                ScreenTarget::SessionStart {
                    site_id: "x".into(),
                    return_url: None,
                }
            )]
        );
    }

    #[tokio::test]
    async fn reset_without_session_is_a_noop() {
        let (_dir, quota, host, scheduler) = fixture(vec![TabInfo {
            id: 7,
            url: "https://x.com/home".into(),
        }]);
        quota.save_settings(&x_settings()).await.unwrap();

        scheduler.reset_day().await.unwrap();
        assert!(host.recorded().is_empty());
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (_dir, _quota, _host, scheduler) = fixture(vec![]);
        scheduler.start().await;
        scheduler.start().await;
        scheduler.stop().await;
    }
}
