//! Integration tests for the Campus session stack.
//!
//! The scenarios under `tests/` drive the session manager end to end: site
//! records, schema migration, the WS cache and sync blocks, with a scripted
//! remote in place of a real LMS server. This library only holds the
//! fixtures they share.

use std::sync::{Arc, Mutex};

use campus_db::{SiteSchema, StorageLocation};
use campus_session::{EventBus, ScriptedRemote, SessionConfig, SessionManager, Subscription};
use campus_types::{EventKind, SiteFunction, SiteId, SiteInfo};

pub const SITE_URL: &str = "https://school.example";

pub const SITE_INFO_WS: &str = "core_webservice_get_site_info";
pub const SITE_CONFIG_WS: &str = "tool_mobile_get_config";
pub const COURSES_WS: &str = "core_enrol_get_users_courses";

/// Site info of `username` at [`SITE_URL`] on a supported release.
pub fn site_info(username: &str) -> SiteInfo {
    SiteInfo {
        sitename: "School".into(),
        username: username.into(),
        fullname: format!("{username} fullname"),
        siteurl: SITE_URL.into(),
        userid: 7,
        version: Some("2023100900".into()),
        functions: [SITE_CONFIG_WS, COURSES_WS]
            .iter()
            .map(|name| SiteFunction {
                name: name.to_string(),
                version: "2023100900".into(),
            })
            .collect(),
        ..SiteInfo::default()
    }
}

/// A remote that answers the login calls for `username` and lists one course.
pub fn scripted_remote(username: &str) -> Arc<ScriptedRemote> {
    let remote = Arc::new(ScriptedRemote::new());
    remote.respond(SITE_INFO_WS, serde_json::json!(site_info(username)));
    remote.respond(
        SITE_CONFIG_WS,
        serde_json::json!({"settings": [{"name": "tool_mobile_forcelogout", "value": "0"}]}),
    );
    remote.respond(COURSES_WS, serde_json::json!([{"id": 2, "fullname": "Biology"}]));
    remote
}

/// Session settings without background refreshes, so tests stay deterministic.
pub fn quiet_config() -> SessionConfig {
    SessionConfig {
        refresh_info_on_load: false,
        ..SessionConfig::default()
    }
}

pub fn manager_at(
    location: StorageLocation,
    remote: Arc<ScriptedRemote>,
    schemas: Vec<SiteSchema>,
) -> campus_session::Result<SessionManager> {
    SessionManager::new(location, remote, quiet_config(), schemas)
}

pub fn memory_manager(remote: Arc<ScriptedRemote>) -> campus_session::Result<SessionManager> {
    manager_at(StorageLocation::Memory, remote, Vec::new())
}

/// Site ids delivered with each event of one kind.
#[derive(Clone, Default)]
pub struct EventLog {
    seen: Arc<Mutex<Vec<Option<SiteId>>>>,
}

impl EventLog {
    pub fn record(bus: &EventBus, kind: EventKind) -> (Self, Subscription) {
        let log = Self::default();
        let sink = log.clone();
        let subscription = bus.on(
            kind,
            move |_, site_id| {
                sink.seen
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(site_id.cloned())
            },
            None,
        );
        (log, subscription)
    }

    pub fn site_ids(&self) -> Vec<Option<SiteId>> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
