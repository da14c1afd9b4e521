//! The interface the embedding browser bridge presents to the core.
//!
//! The core never talks to a browser directly; it enumerates tabs and asks
//! for navigations through `TabHost`, and the embedder maps `ScreenTarget`
//! variants onto its own screens.

use anyhow::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct TabInfo {
    pub id: u64,
    pub url: String,
}

/// Extension-owned destinations a tab can be sent to.
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenTarget {
    /// The "start a timed session" screen, parameterized with the matched
    /// rule and the originally requested URL for redirect-back.
    SessionStart {
        site_id: String,
        return_url: Option<String>,
    },
    /// The mandatory post-expiry reflection screen.
    Reflection,
}

pub trait TabHost: Send + Sync {
    fn tabs(&self) -> Result<Vec<TabInfo>>;
    fn navigate(&self, tab_id: u64, target: &ScreenTarget) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// In-memory `TabHost` that records every navigation request.
    #[derive(Default)]
    pub(crate) struct RecordingTabHost {
        pub tabs: Mutex<Vec<TabInfo>>,
        pub navigations: Mutex<Vec<(u64, ScreenTarget)>>,
    }

    impl RecordingTabHost {
        pub fn with_tabs(tabs: Vec<TabInfo>) -> Self {
            Self {
                tabs: Mutex::new(tabs),
                navigations: Mutex::new(Vec::new()),
            }
        }

        pub fn recorded(&self) -> Vec<(u64, ScreenTarget)> {
            self.navigations.lock().unwrap().clone()
        }
    }

    impl TabHost for RecordingTabHost {
        fn tabs(&self) -> Result<Vec<TabInfo>> {
            Ok(self.tabs.lock().unwrap().clone())
        }

        fn navigate(&self, tab_id: u64, target: &ScreenTarget) -> Result<()> {
            self.navigations
                .lock()
                .unwrap()
                .push((tab_id, target.clone()));
            Ok(())
        }
    }
}
