//! Router settings and their JSON file IO.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use dirs_next::config_dir;
use relay_types::ProviderId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding the settings file location.
pub const CONFIG_PATH_ENV: &str = "RELAY_CONFIG_PATH";

pub const DEFAULT_HISTORY_CAPACITY: usize = 64;
pub const DEFAULT_CHANGE_STREAM_CAPACITY: usize = 256;
pub const DEFAULT_DEBOUNCE_INTERVAL_MS: u64 = 800;

/// Tunables for a [`crate::ContractRouter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct RouterSettings {
    /// Number of slots in the execution history ring.
    pub history_capacity: usize,
    /// Buffer size of the change stream before slow subscribers lag.
    pub change_stream_capacity: usize,
    /// Try the default provider before scanning the others.
    pub prefer_default: bool,
    /// Provider used when nothing else claims a contract.
    pub default_provider: ProviderId,
    /// Debounce window applied to paths without an explicit interval.
    pub debounce_interval_ms: u64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            change_stream_capacity: DEFAULT_CHANGE_STREAM_CAPACITY,
            prefer_default: false,
            default_provider: ProviderId::default(),
            debounce_interval_ms: DEFAULT_DEBOUNCE_INTERVAL_MS,
        }
    }
}

impl RouterSettings {
    pub fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.debounce_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "historyCapacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.change_stream_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "changeStreamCapacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Errors raised while loading or validating settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid setting '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Returns the default path of the settings file.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return PathBuf::from(path);
    }

    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("relay").join("router.json")
}

/// Loads settings from the default path.
pub fn load_settings() -> Result<RouterSettings, ConfigError> {
    load_settings_from_path(&default_config_path())
}

/// Loads settings from `path`; a missing file yields the defaults.
pub fn load_settings_from_path(path: &Path) -> Result<RouterSettings, ConfigError> {
    if !path.exists() {
        return Ok(RouterSettings::default());
    }

    let content = fs::read_to_string(path)?;
    let settings: RouterSettings = serde_json::from_str(&content)?;
    settings.validate()?;
    Ok(settings)
}

/// Saves settings to `path`, creating parent directories as needed.
pub fn save_settings_to_path(settings: &RouterSettings, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent_directory) = path.parent() {
        fs::create_dir_all(parent_directory)?;
    }
    let content = serde_json::to_string_pretty(settings)?;
    fs::write(path, content)?;
    Ok(())
}
