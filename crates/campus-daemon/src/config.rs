//! Configuration file management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use campus_cache::CachePolicy;
use campus_session::SessionConfig;
use serde::{Deserialize, Serialize};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "CAMPUS_DATA_DIR";

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub session: SessionSection,
    /// Expiration delays of the cache update-frequency buckets.
    #[serde(default)]
    pub cache: CachePolicy,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of `app.db` and `sites/`. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

/// Session behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    /// Version name compared with the minimum version sites require.
    #[serde(default = "default_app_version")]
    pub app_version: String,
    /// Extended mobile service to check on load. Empty disables the check.
    #[serde(default = "default_extended_service")]
    pub extended_service: String,
    #[serde(default = "default_true")]
    pub refresh_info_on_load: bool,
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "trace" | "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log file path. Empty = stderr.
    #[serde(default)]
    pub log_file: String,
}

// Default value functions

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_extended_service() -> String {
    "local_mobile".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("CampusDaemon/{}", env!("CARGO_PKG_VERSION"))
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            app_version: default_app_version(),
            extended_service: default_extended_service(),
            refresh_info_on_load: true,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: String::new(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            let config: DaemonConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    /// Settings handed to the session manager.
    pub fn session_config(&self) -> SessionConfig {
        let extended_service = Some(self.session.extended_service.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        SessionConfig {
            app_version: self.session.app_version.clone(),
            extended_service,
            refresh_info_on_load: self.session.refresh_info_on_load,
            cache: self.cache.clone(),
        }
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.timeout_secs)
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/Campus")
        }
        #[cfg(target_os = "windows")]
        {
            dirs_fallback("Campus")
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            dirs_fallback(".campus")
        }
    }
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/campus"))
}
