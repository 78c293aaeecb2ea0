//! Restore configuration.
//!
//! Stored as JSON in the user's config directory:
//! - macOS: ~/Library/Application Support/widget-restore/config.json
//! - Linux: ~/.config/widget-restore/config.json
//! - Windows: C:\Users\<User>\AppData\Roaming\widget-restore\config.json
//!
//! Every field is optional in the file. `WIDGET_RESTORE_*` environment
//! variables override what the file says.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::batch::{BatchError, BatchLimits};
use crate::model_builder::{BuilderOptions, DEFAULT_FETCH_TIMEOUT, DEFAULT_RATE, DEFAULT_ROOM};
use crate::{CONFIG_ELEMENT_ID, WIDGET_COMM_TARGET, WIDGET_VIEW_MIMETYPE};

pub const ENV_ROOM: &str = "WIDGET_RESTORE_ROOM";
pub const ENV_RATE: &str = "WIDGET_RESTORE_RATE";
pub const ENV_FETCH_TIMEOUT_MS: &str = "WIDGET_RESTORE_FETCH_TIMEOUT_MS";
pub const ENV_SERVER_URL: &str = "WIDGET_RESTORE_SERVER_URL";
pub const ENV_TOKEN: &str = "WIDGET_RESTORE_TOKEN";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] BatchError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Most state requests in flight at once
    pub room: usize,
    /// Most state requests started per second
    pub rate: usize,
    /// Per-widget reply deadline; 0 waits forever
    pub fetch_timeout_ms: u64,
    pub comm_target: String,
    pub marker_mime_type: String,
    pub config_element_id: String,
    /// Jupyter server base URL, for kernel lookup and shutdown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            room: DEFAULT_ROOM,
            rate: DEFAULT_RATE,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT.as_millis() as u64,
            comm_target: WIDGET_COMM_TARGET.to_string(),
            marker_mime_type: WIDGET_VIEW_MIMETYPE.to_string(),
            config_element_id: CONFIG_ELEMENT_ID.to_string(),
            server_url: None,
            token: None,
        }
    }
}

/// Default location of the config file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("widget-restore")
        .join("config.json")
}

impl RestoreConfig {
    /// Load from `path`, or from [`config_path`] when `None`, then apply
    /// environment overrides.
    ///
    /// An explicit path must exist; a missing default file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = config_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    debug!("[config] No config at {}, using defaults", path.display());
                    Self::default()
                }
            }
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("[config] Loaded {}", path.display());
        Ok(config)
    }

    /// Override fields from variables found by `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(room) = parse_var(&lookup, ENV_ROOM)? {
            self.room = room;
        }
        if let Some(rate) = parse_var(&lookup, ENV_RATE)? {
            self.rate = rate;
        }
        if let Some(timeout) = parse_var(&lookup, ENV_FETCH_TIMEOUT_MS)? {
            self.fetch_timeout_ms = timeout;
        }
        if let Some(url) = lookup(ENV_SERVER_URL).filter(|v| !v.is_empty()) {
            self.server_url = Some(url);
        }
        if let Some(token) = lookup(ENV_TOKEN).filter(|v| !v.is_empty()) {
            self.token = Some(token);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        BatchLimits::new(self.room, self.rate)?;
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetch_timeout_ms > 0).then(|| Duration::from_millis(self.fetch_timeout_ms))
    }

    pub fn builder_options(&self) -> Result<BuilderOptions, ConfigError> {
        Ok(BuilderOptions {
            comm_target: self.comm_target.clone(),
            limits: BatchLimits::new(self.room, self.rate)?,
            fetch_timeout: self.fetch_timeout(),
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"room": 10, "server_url": "http://localhost:8866"}}"#).unwrap();

        let config = RestoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.room, 10);
        assert_eq!(config.rate, 500);
        assert_eq!(config.comm_target, "jupyter.widget");
        assert_eq!(config.server_url.as_deref(), Some("http://localhost:8866"));
        assert_eq!(config.fetch_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(
            RestoreConfig::load(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ room: ").unwrap();
        assert!(matches!(
            RestoreConfig::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RestoreConfig::default();
        config
            .apply_env(env(&[
                (ENV_ROOM, "8"),
                (ENV_RATE, " 40 "),
                (ENV_FETCH_TIMEOUT_MS, "0"),
                (ENV_TOKEN, "abc"),
                (ENV_SERVER_URL, ""),
            ]))
            .unwrap();

        assert_eq!(config.room, 8);
        assert_eq!(config.rate, 40);
        assert_eq!(config.fetch_timeout(), None);
        assert_eq!(config.token.as_deref(), Some("abc"));
        assert_eq!(config.server_url, None);
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = RestoreConfig::default();
        let err = config.apply_env(env(&[(ENV_RATE, "fast")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: ENV_RATE, .. }));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let config = RestoreConfig {
            room: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid(BatchError::ZeroRoom))
        ));
        assert!(config.builder_options().is_err());
    }

    #[test]
    fn test_builder_options_follow_config() {
        let config = RestoreConfig {
            room: 3,
            rate: 7,
            fetch_timeout_ms: 250,
            comm_target: "custom.target".into(),
            ..Default::default()
        };
        let options = config.builder_options().unwrap();
        assert_eq!(options.limits.room.get(), 3);
        assert_eq!(options.limits.rate.get(), 7);
        assert_eq!(options.fetch_timeout, Some(Duration::from_millis(250)));
        assert_eq!(options.comm_target, "custom.target");
    }
}
