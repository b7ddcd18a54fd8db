//! # campus-session
//!
//! Site registry and session management for the Campus client.
//!
//! [`SessionManager`] owns the app database, the per-site databases and the
//! single current site. Each stored account is reached through a [`Site`]
//! handle that issues web service calls through a [`RemoteService`] and
//! caches their responses in the site database.
//!
//! Session state changes are published on the [`EventBus`].

pub mod config;
pub mod context;
pub mod events;
pub mod manager;
pub mod remote;
pub mod schemas;
pub mod site;
pub mod urls;

pub use config::SessionConfig;
pub use context::CurrentSite;
pub use events::{Delivery, EventBus, Subscription};
pub use manager::{LogoutOptions, SessionManager};
pub use remote::{HttpRemote, RemoteError, RemoteService, ScriptedRemote};
pub use site::{ReadOptions, Site};

use campus_cache::{CacheError, CacheFallback};
use campus_db::DbError;
use campus_types::SiteId;

/// Session error types.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("storage error: {0}")]
    Db(#[from] DbError),

    #[error("site not found: {0}")]
    NotFound(SiteId),

    #[error("no current site")]
    NoCurrentSite,

    #[error("session expired for site {0}")]
    SessionExpired(SiteId),

    #[error("schema '{schema}' failed to migrate: {reason}")]
    SchemaMigrationFailed { schema: String, reason: String },

    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("remote call failed ({errorcode}): {message}")]
    RemoteCallFailed { errorcode: String, message: String },

    #[error("web service function not available: {0}")]
    FunctionNotAvailable(String),

    #[error("invalid response from site: {0}")]
    InvalidResponse(String),

    #[error("site version is not supported")]
    InvalidSiteVersion,

    #[error("site needs the legacy app")]
    LegacySiteVersion,

    #[error("app update required: site requires version {required}")]
    AppUpdateRequired { required: String },

    #[error("no cached response available")]
    NotCached,

    #[error("invalid site url: {0}")]
    InvalidSiteUrl(String),
}

impl From<CacheError> for SessionError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::NotCached => SessionError::NotCached,
            CacheError::Db(e) => SessionError::Db(e),
            CacheError::Serialization(e) => SessionError::Db(DbError::Serialization(e)),
        }
    }
}

impl From<remote::RemoteError> for SessionError {
    fn from(err: remote::RemoteError) -> Self {
        match err {
            remote::RemoteError::Network(e) => SessionError::NetworkUnavailable(e),
            remote::RemoteError::Ws { errorcode, message } => {
                SessionError::RemoteCallFailed { errorcode, message }
            }
            remote::RemoteError::InvalidResponse(e) => SessionError::InvalidResponse(e),
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::InvalidResponse(err.to_string())
    }
}

/// Remote errors that describe the request itself rather than connectivity.
const HARD_ERRORCODES: &[&str] = &[
    "userdeleted",
    "sitepolicynotagreed",
    "forcepasswordchangenotice",
    "usernotfullysetup",
    "wsaccessuserdeleted",
    "wsaccessusersuspended",
    "wsaccessusernologin",
];

impl CacheFallback for SessionError {
    fn allows_cache_fallback(&self) -> bool {
        match self {
            SessionError::NetworkUnavailable(_) | SessionError::SessionExpired(_) => true,
            SessionError::RemoteCallFailed { errorcode, .. } => {
                !HARD_ERRORCODES.contains(&errorcode.as_str())
            }
            _ => false,
        }
    }
}

impl SessionError {
    /// Whether the error only says the record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SessionError::NotFound(_))
            || matches!(self, SessionError::Db(e) if e.is_not_found())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Derive the id of an account at a site.
pub fn create_site_id(site_url: &str, username: &str) -> SiteId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(site_url.as_bytes());
    hasher.update(username.as_bytes());
    SiteId::new(hex::encode(hasher.finalize().as_bytes()))
}
