//! Session manager settings.

use campus_cache::CachePolicy;
use serde::{Deserialize, Serialize};

/// Settings of a [`SessionManager`](crate::SessionManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Version name of this app, compared with the minimum a site requires.
    pub app_version: String,
    /// Web service name checked for the extended mobile plugin; `None` skips the check.
    pub extended_service: Option<String>,
    /// Refresh site info in the background after a site is loaded.
    pub refresh_info_on_load: bool,
    pub cache: CachePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            extended_service: Some("local_mobile".to_string()),
            refresh_info_on_load: true,
            cache: CachePolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"app_version": "4.4.0"}"#).expect("parse");
        assert_eq!(config.app_version, "4.4.0");
        assert!(config.refresh_info_on_load);
        assert_eq!(config.extended_service.as_deref(), Some("local_mobile"));
        assert_eq!(config.cache, CachePolicy::default());
    }
}
