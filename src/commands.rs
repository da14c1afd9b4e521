//! User-initiated commands: start/end a session, save a reflection, query
//! session state. This is the request/response surface the UI consumes;
//! each method has a serializable envelope mirror for bridges that forward
//! raw messages.

use chrono::Utc;
use log::{error, info};
use serde::Serialize;

use crate::error::GateError;
use crate::models::{Session, SessionRecord};
use crate::quota::QuotaStore;
use crate::timer::CountdownController;

#[derive(Clone)]
pub struct SessionService {
    quota: QuotaStore,
    countdown: CountdownController,
}

impl SessionService {
    pub fn new(quota: QuotaStore, countdown: CountdownController) -> Self {
        Self { quota, countdown }
    }

    /// Start a timed session. Preconditions, first failure wins: positive
    /// duration, no active session, a configured site, and enough budget
    /// left today.
    pub async fn start_session(
        &self,
        duration_minutes: u32,
        site_id: &str,
        site_url: Option<String>,
    ) -> Result<Session, GateError> {
        if duration_minutes == 0 {
            return Err(GateError::InvalidDuration);
        }

        if let Some(existing) = self.quota.get_current_session().await? {
            if existing.is_active {
                return Err(GateError::SessionActive);
            }
        }

        let settings = self.quota.get_settings().await?;
        let Some(rule) = settings.rule(site_id) else {
            return Err(GateError::UnknownSite(site_id.to_string()));
        };

        let remaining = self.quota.get_remaining_minutes(site_id).await?;
        if duration_minutes > remaining {
            return Err(GateError::QuotaExceeded { remaining });
        }

        let session = Session::begin(
            duration_minutes,
            site_id,
            site_url.or_else(|| rule.site_url.clone()),
        );
        self.quota.save_current_session(Some(&session)).await?;
        self.countdown.ensure_running().await;

        info!(
            "Started {duration_minutes}-minute session {} for site {site_id}",
            session.id
        );
        Ok(session)
    }

    /// End the session early. Deliberately asymmetric with expiry: no
    /// reflection owed and no `SessionRecord` committed. The elapsed time
    /// counted against quota only while the session was in flight.
    pub async fn end_session(&self) -> Result<(), GateError> {
        let Some(mut session) = self.quota.get_current_session().await? else {
            return Err(GateError::NoSession);
        };

        session.is_active = false;
        self.quota.save_current_session(Some(&session)).await?;
        info!("Session {} ended by user", session.id);
        Ok(())
    }

    /// Close out an expired session with the mandatory reflection. Builds
    /// the one `SessionRecord` of the session's lifecycle, commits it, then
    /// clears the session.
    pub async fn save_reflection(&self, reflection: &str) -> Result<(), GateError> {
        let text = reflection.trim();
        if text.is_empty() {
            return Err(GateError::EmptyReflection);
        }

        let Some(session) = self.quota.get_current_session().await? else {
            return Err(GateError::NoSession);
        };

        let record = SessionRecord {
            id: session.id.clone(),
            start_time: session.start_time,
            end_time: Utc::now().timestamp_millis(),
            duration_minutes: session.elapsed_minutes(),
            reflection: text.to_string(),
            site_id: session.site_id.clone(),
            site_url: session.site_url.clone(),
        };

        self.quota.add_session_record(&record).await?;
        self.quota.save_current_session(None).await?;
        info!("Reflection saved for session {}", record.id);
        Ok(())
    }

    /// Never errors: a storage fault reads as "no session" (the UI treats
    /// both the same) and is logged here.
    pub async fn get_session_state(&self) -> Option<Session> {
        match self.quota.get_current_session().await {
            Ok(session) => session,
            Err(err) => {
                error!("Failed to read session state: {err:#}");
                None
            }
        }
    }

    /// Startup reconciliation. The stored `remaining_seconds` is whatever
    /// the last tick wrote before the process unloaded, so the remaining
    /// time is recomputed from wall clock; a session from a previous day is
    /// discarded outright.
    pub async fn restore_on_startup(&self) -> Result<(), GateError> {
        let Some(mut session) = self.quota.get_current_session().await? else {
            return Ok(());
        };

        if !session.is_today() {
            self.quota.save_current_session(None).await?;
            return Ok(());
        }

        let now_ms = Utc::now().timestamp_millis();
        let elapsed_seconds = ((now_ms - session.start_time) / 1000).max(0) as u64;
        let total_seconds = u64::from(session.duration_minutes) * 60;
        session.remaining_seconds = total_seconds.saturating_sub(elapsed_seconds) as u32;
        session.is_active = session.remaining_seconds > 0 && session.is_active;

        self.quota.save_current_session(Some(&session)).await?;

        if session.is_active {
            self.countdown.ensure_running().await;
        }
        Ok(())
    }
}

// Wire envelopes matching the original message handlers; camelCase, with a
// `success` flag and an optional error string.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<Session, GateError>> for StartSessionResponse {
    fn from(result: Result<Session, GateError>) -> Self {
        match result {
            Ok(session) => Self {
                success: true,
                session: Some(session),
                error: None,
            },
            Err(err) => Self {
                success: false,
                session: None,
                error: Some(err.to_string()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AckResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<(), GateError>> for AckResponse {
    fn from(result: Result<(), GateError>) -> Self {
        match result {
            Ok(()) => Self {
                success: true,
                error: None,
            },
            Err(err) => Self {
                success: false,
                error: Some(err.to_string()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStateResponse {
    pub session: Option<Session>,
}
