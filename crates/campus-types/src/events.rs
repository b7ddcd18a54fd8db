//! Session event types.
//!
//! Every event is delivered together with the id of the site it concerns
//! (if any). Listeners subscribe by [`EventKind`].

use serde::{Deserialize, Serialize};

use crate::{SiteId, SiteInfo};

/// Where to take the user once a session is re-established.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RedirectPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_options: Option<serde_json::Value>,
}

/// All session events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    Login,
    Logout,
    SiteAdded(SiteInfo),
    SiteUpdated(SiteInfo),
    SiteDeleted { site_url: String },
    SessionExpired(RedirectPayload),
    WsCacheInvalidated,
    SessionRestored { site_id: Option<SiteId> },
}

/// Subscription key for [`Event`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Login,
    Logout,
    SiteAdded,
    SiteUpdated,
    SiteDeleted,
    SessionExpired,
    WsCacheInvalidated,
    SessionRestored,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Login => EventKind::Login,
            Event::Logout => EventKind::Logout,
            Event::SiteAdded(_) => EventKind::SiteAdded,
            Event::SiteUpdated(_) => EventKind::SiteUpdated,
            Event::SiteDeleted { .. } => EventKind::SiteDeleted,
            Event::SessionExpired(_) => EventKind::SessionExpired,
            Event::WsCacheInvalidated => EventKind::WsCacheInvalidated,
            Event::SessionRestored { .. } => EventKind::SessionRestored,
        }
    }
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Login => "login",
            EventKind::Logout => "logout",
            EventKind::SiteAdded => "site_added",
            EventKind::SiteUpdated => "site_updated",
            EventKind::SiteDeleted => "site_deleted",
            EventKind::SessionExpired => "session_expired",
            EventKind::WsCacheInvalidated => "ws_cache_invalidated",
            EventKind::SessionRestored => "session_restored",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_matches_variant() {
        assert_eq!(Event::Login.kind(), EventKind::Login);
        assert_eq!(
            Event::SiteDeleted {
                site_url: "https://school.example".into()
            }
            .kind(),
            EventKind::SiteDeleted
        );
        assert_eq!(EventKind::SessionExpired.as_str(), "session_expired");
    }

    #[test]
    fn test_event_serialization_tagged() {
        let json = serde_json::to_value(Event::SessionExpired(RedirectPayload::default()))
            .expect("serialize");
        assert_eq!(json["event"], "session_expired");

        let kind: EventKind = serde_json::from_str("\"site_updated\"").expect("parse");
        assert_eq!(kind, EventKind::SiteUpdated);
    }
}
