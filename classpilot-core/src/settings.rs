//! Settings for credential resolution and API access.
//!
//! Loaded from `<config_dir>/settings.toml`; a missing file means defaults.
//! The config directory itself is injected through [`Paths`] so tests can
//! point everything at a temporary directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::model::StorageType;
use crate::retry::RetryPolicy;

pub const SETTINGS_FILE_NAME: &str = "settings.toml";

/// Upper bound on `expiry_warning_days` (ten years).
pub const MAX_EXPIRY_WARNING_DAYS: i64 = 3650;

/// Error type for loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// No home/config directory could be determined for this user.
    #[error("configuration directory not available")]
    ConfigDirUnavailable,

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid setting: {message}")]
    Invalid { message: String },
}

/// Locations of classpilot's user-scoped files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub config_dir: PathBuf,
}

impl Paths {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// The platform config directory, e.g. `~/.config/classpilot` on Linux.
    pub fn user() -> Result<Self, SettingsError> {
        let dirs = ProjectDirs::from("", "", "classpilot").ok_or(SettingsError::ConfigDirUnavailable)?;
        Ok(Self::new(dirs.config_dir()))
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join(SETTINGS_FILE_NAME)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// REST API root. Point at `https://HOST/api/v3` for GitHub Enterprise.
    pub api_base_url: Url,

    /// Scopes a token must carry to be saved.
    pub required_scopes: Vec<String>,

    /// Warn when a token expires within this many days.
    pub expiry_warning_days: i64,

    /// Environment variable consulted last during resolution.
    pub token_env_var: String,

    /// Service name for OS credential store entries.
    pub keyring_service: String,

    /// Backend `save_token` writes to when none is given.
    pub default_storage: StorageType,

    pub request_timeout_secs: u64,

    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            required_scopes: vec![
                "repo".to_string(),
                "read:org".to_string(),
                "workflow".to_string(),
            ],
            expiry_warning_days: 7,
            token_env_var: "GITHUB_TOKEN".to_string(),
            keyring_service: "classpilot".to_string(),
            default_storage: StorageType::ConfigFile,
            request_timeout_secs: 30,
            retry: RetryPolicy::default(),
        }
    }
}

fn default_api_base_url() -> Url {
    Url::parse("https://api.github.com").expect("default API URL is valid")
}

impl Settings {
    /// Load `settings.toml` from the given paths, or defaults if absent.
    pub fn load(paths: &Paths) -> Result<Self, SettingsError> {
        Self::load_from_path(&paths.settings_file())
    }

    pub fn load_from_path(path: &Path) -> Result<Self, SettingsError> {
        let settings = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
                path: path.display().to_string(),
                source,
            })?;
            toml::from_str(&contents).map_err(|source| SettingsError::Parse {
                path: path.display().to_string(),
                source,
            })?
        } else {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            Settings::default()
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |message: &str| -> Result<(), SettingsError> {
            Err(SettingsError::Invalid {
                message: message.to_string(),
            })
        };

        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if !matches!(self.api_base_url.scheme(), "http" | "https") {
            return invalid("api_base_url must be an http(s) URL");
        }
        if !(0..=MAX_EXPIRY_WARNING_DAYS).contains(&self.expiry_warning_days) {
            return invalid("expiry_warning_days must be between 0 and 3650");
        }
        if self.token_env_var.trim().is_empty() {
            return invalid("token_env_var must not be empty");
        }
        if self.keyring_service.trim().is_empty() {
            return invalid("keyring_service must not be empty");
        }
        if self.required_scopes.iter().any(|s| s.trim().is_empty()) {
            return invalid("required_scopes must not contain empty entries");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The warning window, clamped to what [`validate`](Self::validate) accepts.
    pub fn expiry_warning(&self) -> chrono::Duration {
        chrono::Duration::days(self.expiry_warning_days.clamp(0, MAX_EXPIRY_WARNING_DAYS))
    }
}
