pub mod session;
pub mod settings;
pub mod usage;

pub use session::{format_mm_ss, Session, SessionRecord};
pub use settings::{validate_settings, Settings, SiteRule};
pub use usage::{date_string_for_ms, today_string, DailyUsage, SiteDailyUsage};
