use thiserror::Error;

/// Command-level failures surfaced to the UI.
///
/// Every variant except `Storage` is a validation or state-conflict
/// rejection: the requested transition did not happen and persisted state is
/// unchanged. `Storage` wraps a fault from the key-value service; callers
/// must re-query state rather than trust an optimistic local update.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("session duration must be a positive number of minutes")]
    InvalidDuration,

    #[error("an active session already exists")]
    SessionActive,

    #[error("no site rule with id {0}")]
    UnknownSite(String),

    #[error("only {remaining} minutes of today's budget remain")]
    QuotaExceeded { remaining: u32 },

    #[error("no current session")]
    NoSession,

    #[error("reflection text must not be empty")]
    EmptyReflection,

    #[error("at least one preset duration is required")]
    EmptyPresets,

    #[error("preset durations must be greater than zero")]
    ZeroPreset,

    #[error("preset {0} is already registered")]
    DuplicatePreset(u32),

    #[error("at least one site rule is required")]
    NoSiteRules,

    #[error("daily limit for '{0}' must be greater than zero")]
    ZeroDailyLimit(String),

    #[error("site rule '{0}' needs at least one URL pattern")]
    NoPatterns(String),

    #[error("invalid URL pattern: {0}")]
    InvalidPattern(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<anyhow::Error> for GateError {
    fn from(err: anyhow::Error) -> Self {
        GateError::Storage(format!("{err:#}"))
    }
}

impl GateError {
    /// True for the arms a UI should treat as bad input rather than a fault.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, GateError::Storage(_))
    }
}
