//! # campus-types
//!
//! Shared domain types used across the Campus workspace: site identity and
//! metadata, typed session events, cache policy enums and LMS release
//! arithmetic.

pub mod cache;
pub mod context;
pub mod events;
pub mod site;
pub mod version;

pub use cache::{ReadingStrategy, UpdateFrequency};
pub use context::SessionContext;
pub use events::{Event, EventKind, RedirectPayload};
pub use site::{SiteBasicInfo, SiteConfig, SiteFunction, SiteId, SiteInfo, SitePublicConfig};

/// Prefix of web service functions provided by the extended mobile service plugin.
pub const EXTENDED_SERVICE_WS_PREFIX: &str = "local_mobile_";

/// Name of the default mobile web service.
pub const DEFAULT_SERVICE: &str = "moodle_mobile_app";

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Current time in seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
