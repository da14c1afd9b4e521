//! Self-limiting timed access control for designated websites.
//!
//! The core tracks a daily minute budget per governed site, gates navigation
//! behind an explicit "start a timed session" step, counts the session down
//! at 1 Hz, and demands a written reflection before a new session may follow
//! an expired one. Everything observable lives in a watchable key-value
//! store; the embedding browser bridge supplies tab enumeration and
//! navigation through [`TabHost`].

pub mod commands;
pub mod error;
pub mod guard;
pub mod matcher;
pub mod models;
pub mod quota;
pub mod store;
pub mod tabs;
pub mod timer;

pub use commands::{AckResponse, SessionService, SessionStateResponse, StartSessionResponse};
pub use error::GateError;
pub use guard::NavigationGuard;
pub use models::{
    format_mm_ss, validate_settings, DailyUsage, Session, SessionRecord, Settings, SiteDailyUsage,
    SiteRule,
};
pub use quota::QuotaStore;
pub use store::{Store, StoreEvent};
pub use tabs::{ScreenTarget, TabHost, TabInfo};
pub use timer::{CountdownController, RolloverScheduler, TickOutcome};

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default SQLite location under the platform data directory.
pub fn default_db_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("sitegate").join("sitegate.sqlite3"))
}

/// Owns the background half of the system: quota store, countdown,
/// navigation guard, rollover scheduler, and the watch bridge that restarts
/// or stops the countdown whenever the persisted session changes.
///
/// The watch bridge is the principal countdown (re)start path: the ticking
/// context can be unloaded at any time and keeps no memory across unloads,
/// so any write that leaves an active session with time remaining must be
/// able to re-arm the timer on its own.
pub struct Gatekeeper {
    store: Store,
    quota: QuotaStore,
    countdown: CountdownController,
    guard: NavigationGuard,
    rollover: RolloverScheduler,
    watch_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl Gatekeeper {
    /// Wires the components over an open store and writes default settings
    /// if none exist.
    pub async fn new(store: Store, tabs: Arc<dyn TabHost>) -> Result<Self> {
        let quota = QuotaStore::new(store.clone());
        quota.initialize().await?;

        let countdown = CountdownController::new(quota.clone(), tabs.clone());
        let guard = NavigationGuard::new(quota.clone(), countdown.clone(), tabs.clone());
        let shutdown = CancellationToken::new();
        let rollover = RolloverScheduler::new(
            quota.clone(),
            tabs,
            countdown.clone(),
            shutdown.clone(),
        );

        Ok(Self {
            store,
            quota,
            countdown,
            guard,
            rollover,
            watch_task: Mutex::new(None),
            shutdown,
        })
    }

    /// Reconcile the persisted session with wall clock, then start the
    /// watch bridge and the rollover scheduler. Call once per process start.
    pub async fn startup(&self) -> Result<()> {
        self.service().restore_on_startup().await?;
        self.spawn_watch_bridge().await;
        self.rollover.start().await;
        info!("sitegate core started");
        Ok(())
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn quota(&self) -> &QuotaStore {
        &self.quota
    }

    pub fn countdown(&self) -> &CountdownController {
        &self.countdown
    }

    pub fn guard(&self) -> &NavigationGuard {
        &self.guard
    }

    pub fn service(&self) -> SessionService {
        SessionService::new(self.quota.clone(), self.countdown.clone())
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.rollover.stop().await;
        self.countdown.stop().await;
        if let Some(handle) = self.watch_task.lock().await.take() {
            handle.abort();
        }
        info!("sitegate core stopped");
    }

    async fn spawn_watch_bridge(&self) {
        let mut guard = self.watch_task.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }

        let mut events = self.store.watch();
        let countdown = self.countdown.clone();
        let shutdown = self.shutdown.clone();

        *guard = Some(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => event,
                };

                match event {
                    Ok(event) if event.key == quota::CURRENT_SESSION_KEY => {
                        if session_is_live(event.value.as_ref()) {
                            countdown.ensure_running().await;
                        } else {
                            countdown.stop().await;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Lagging only costs redundant ensure/stop calls;
                        // the next event re-reads the ground truth.
                        warn!("Watch bridge lagged, skipped {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }
}

/// Whether a raw `currentSession` value should keep the countdown alive.
/// Field-level reads so legacy shapes behave the same as migrated ones.
fn session_is_live(value: Option<&Value>) -> bool {
    value.is_some_and(|value| {
        let active = value
            .get("isActive")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let remaining = value
            .get("remainingSeconds")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        active && remaining > 0
    })
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::time::Duration;

    use super::*;
    use crate::tabs::testing::RecordingTabHost;

    async fn eventually<F, Fut>(mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..150 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    async fn open_gatekeeper(dir: &tempfile::TempDir) -> Gatekeeper {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = Store::open(dir.path().join("test.sqlite3")).unwrap();
        let gatekeeper = Gatekeeper::new(store, Arc::new(RecordingTabHost::default()))
            .await
            .unwrap();
        gatekeeper.startup().await.unwrap();
        gatekeeper
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
    fn default_db_path_is_namespaced() {
        if let Some(path) = default_db_path() {
            assert!(path.ends_with("sitegate/sitegate.sqlite3"));
        }
    }

    #[test]
    fn live_session_detection_reads_raw_fields() {
        let live = serde_json::json!({"isActive": true, "remainingSeconds": 10});
        let spent = serde_json::json!({"isActive": true, "remainingSeconds": 0});
        let inactive = serde_json::json!({"isActive": false, "remainingSeconds": 10});
        assert!(session_is_live(Some(&live)));
        assert!(!session_is_live(Some(&spent)));
        assert!(!session_is_live(Some(&inactive)));
        assert!(!session_is_live(None));
    }

    #[tokio::test]
    async fn watch_bridge_arms_and_disarms_the_countdown() {
        let dir = tempfile::tempdir().unwrap();
        let gatekeeper = open_gatekeeper(&dir).await;
        gatekeeper.quota().save_settings(&x_settings()).await.unwrap();

        // A live session written by any context must arm the ticker.
        let session = Session::begin(5, "x", None);
        gatekeeper
            .quota()
            .save_current_session(Some(&session))
            .await
            .unwrap();
        assert!(
            eventually(|| async { gatekeeper.countdown().is_running().await }).await,
            "countdown never started"
        );

        // Deactivating it must disarm the ticker again.
        let mut ended = session.clone();
        ended.is_active = false;
        gatekeeper
            .quota()
            .save_current_session(Some(&ended))
            .await
            .unwrap();
        assert!(
            eventually(|| async { !gatekeeper.countdown().is_running().await }).await,
            "countdown never stopped"
        );

        gatekeeper.shutdown().await;
    }

    #[tokio::test]
    async fn startup_restores_a_live_session_into_a_running_countdown() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = Store::open(dir.path().join("test.sqlite3")).unwrap();
            let quota = QuotaStore::new(store);
            quota.save_settings(&x_settings()).await.unwrap();
            let session = Session::begin(5, "x", None);
            quota.save_current_session(Some(&session)).await.unwrap();
        }

        let gatekeeper = open_gatekeeper(&dir).await;
        assert!(gatekeeper.countdown().is_running().await);

        let restored = gatekeeper.service().get_session_state().await.unwrap();
        assert!(restored.is_active);

        gatekeeper.shutdown().await;
    }

    #[tokio::test]
    async fn start_command_flows_through_to_a_ticking_session() {
        let dir = tempfile::tempdir().unwrap();
        let gatekeeper = open_gatekeeper(&dir).await;
        gatekeeper.quota().save_settings(&x_settings()).await.unwrap();

        let session = gatekeeper
            .service()
            .start_session(5, "x", None)
            .await
            .unwrap();
        assert!(gatekeeper.countdown().is_running().await);

        // The 1 Hz tick must actually advance the persisted session.
        assert!(
            eventually(|| async {
                gatekeeper
                    .service()
                    .get_session_state()
                    .await
                    .map(|current| current.remaining_seconds < session.remaining_seconds)
                    .unwrap_or(false)
            })
            .await,
            "countdown never advanced the session"
        );

        gatekeeper.shutdown().await;
    }
}
