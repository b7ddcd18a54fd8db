//! Site identity and metadata.
//!
//! A site is one account at one LMS instance. Its metadata comes from two
//! remote calls: the site info (who the user is, which functions the
//! service exposes, which release the server runs) and the site config
//! (feature toggles set by the administrator).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a site record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(String);

impl SiteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SiteId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SiteId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SiteId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A web service function available to the user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteFunction {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Account and site metadata returned by the site info call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteInfo {
    pub sitename: String,
    pub username: String,
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    #[serde(default)]
    pub fullname: String,
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub userid: i64,
    pub siteurl: String,
    #[serde(default)]
    pub userpictureurl: String,
    #[serde(default)]
    pub functions: Vec<SiteFunction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub siteid: Option<i64>,
    /// Fields this client does not interpret, kept so they survive a round trip.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SiteInfo {
    /// Whether the user can call a function with the given name.
    pub fn has_function(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f.name == name)
    }

    /// Whether any available function comes from the given plugin prefix.
    pub fn uses_functions_with_prefix(&self, prefix: &str) -> bool {
        self.functions.iter().any(|f| f.name.contains(prefix))
    }

    /// Site home course id, defaulting to 1 as the server does.
    pub fn site_home_id(&self) -> i64 {
        self.siteid.unwrap_or(1)
    }
}

/// Administrator-controlled site configuration (`name -> value`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteConfig(pub BTreeMap<String, String>);

impl SiteConfig {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Whether the site requires the token to be discarded on logout.
    pub fn forces_logout(&self) -> bool {
        self.get("tool_mobile_forcelogout") == Some("1")
    }

    /// Comma separated list of features the administrator disabled.
    pub fn disabled_features(&self) -> &str {
        self.get("tool_mobile_disabledfeatures").unwrap_or_default()
    }
}

/// Configuration readable without authentication.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SitePublicConfig {
    #[serde(default)]
    pub wwwroot: String,
    #[serde(default)]
    pub httpswwwroot: String,
    #[serde(default)]
    pub sitename: String,
    #[serde(default)]
    pub typeoflogin: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launchurl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenanceenabled: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_mobile_disabledfeatures: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_mobile_minimumversion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_mobile_setuplink: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Summary of a stored site, suitable for account lists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SiteBasicInfo {
    pub id: SiteId,
    pub site_url: String,
    pub fullname: Option<String>,
    pub sitename: Option<String>,
    pub avatar: Option<String>,
    pub site_home_id: i64,
    pub logged_out: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_info_keeps_unknown_fields() {
        let raw = serde_json::json!({
            "sitename": "School",
            "username": "student",
            "siteurl": "https://school.example",
            "functions": [{"name": "core_course_get_courses", "version": "2020061500"}],
            "theme": "boost",
        });
        let info: SiteInfo = serde_json::from_value(raw).expect("parse");
        assert!(info.has_function("core_course_get_courses"));
        assert_eq!(info.extra.get("theme"), Some(&serde_json::json!("boost")));
        assert_eq!(info.site_home_id(), 1);

        let back = serde_json::to_value(&info).expect("serialize");
        assert_eq!(back["theme"], "boost");
    }

    #[test]
    fn test_site_config_flags() {
        let mut config = SiteConfig::default();
        assert!(!config.forces_logout());
        assert_eq!(config.disabled_features(), "");

        config.set("tool_mobile_forcelogout", "1");
        config.set("tool_mobile_disabledfeatures", "CoreMainMenuDelegate_AddonCalendar");
        assert!(config.forces_logout());
        assert_eq!(
            config.disabled_features(),
            "CoreMainMenuDelegate_AddonCalendar"
        );
    }

    #[test]
    fn test_site_id_transparent_serde() {
        let id = SiteId::new("abc");
        assert_eq!(serde_json::to_string(&id).expect("ser"), "\"abc\"");
        assert_eq!(id.to_string(), "abc");
    }
}
