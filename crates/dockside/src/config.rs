//! Settings for reaching the engine and running sessions.
//!
//! Read from `config.toml` under the platform config directory
//! (`~/.config/dockside/config.toml` on Linux), then overlaid with
//! environment variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detach::{DetachKeys, DEFAULT_DETACH_KEYS};
use crate::transport::{EngineHost, DEFAULT_HOST};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("host must start with unix://, tcp:// or http://, got {0}")]
    InvalidHost(String),

    #[error("api_version must look like 1.43, got {0}")]
    InvalidApiVersion(String),

    #[error("request_timeout_secs must be between 1 and 3600, got {0}")]
    InvalidRequestTimeout(u64),

    #[error("exec_poll_interval_ms must be between 10 and 60000, got {0}")]
    InvalidPollInterval(u64),

    #[error("invalid detach_keys {keys:?}: {reason}")]
    InvalidDetachKeys { keys: String, reason: String },

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// How to reach the container engine.
    pub engine: EngineConfig,

    /// Attach and exec session settings.
    pub session: SessionConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Engine endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine address (`unix:///path`, `tcp://host:port` or `http://host:port`).
    pub host: String,

    /// Engine API version to pin requests to. Unversioned paths when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Deadline in seconds for ordinary requests and connection upgrades.
    pub request_timeout_secs: u64,
}

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Key sequence that detaches from an interactive session.
    pub detach_keys: String,

    /// How often to poll an exec instance while waiting for it to exit.
    pub exec_poll_interval_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            api_version: None,
            request_timeout_secs: 30,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            detach_keys: DEFAULT_DETACH_KEYS.to_string(),
            exec_poll_interval_ms: 100,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SessionConfig {
    /// Exec poll interval as a [`Duration`].
    pub fn exec_poll_interval(&self) -> Duration {
        Duration::from_millis(self.exec_poll_interval_ms)
    }
}

/// `<config dir>/dockside/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dockside")
        .join("config.toml")
}

fn is_valid_api_version(version: &str) -> bool {
    let version = version.strip_prefix('v').unwrap_or(version);
    match version.split_once('.') {
        Some((major, minor)) => {
            !major.is_empty()
                && !minor.is_empty()
                && major.bytes().all(|b| b.is_ascii_digit())
                && minor.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// Non-empty value of an environment variable.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

impl Config {
    /// Overlay `DOCKER_HOST`, `DOCKER_API_VERSION`, `DOCKSIDE_LOG_LEVEL`
    /// and `DOCKSIDE_DETACH_KEYS` on top of the file values. Empty
    /// variables are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(host) = env_value("DOCKER_HOST") {
            tracing::info!(%host, "Engine host set from DOCKER_HOST");
            self.engine.host = host;
        }
        if let Some(version) = env_value("DOCKER_API_VERSION") {
            tracing::info!(%version, "API version pinned from DOCKER_API_VERSION");
            self.engine.api_version = Some(version);
        }
        if let Some(level) = env_value("DOCKSIDE_LOG_LEVEL") {
            tracing::info!(%level, "Log level set from DOCKSIDE_LOG_LEVEL");
            self.logging.level = level;
        }
        if let Some(keys) = env_value("DOCKSIDE_DETACH_KEYS") {
            tracing::info!(%keys, "Detach keys set from DOCKSIDE_DETACH_KEYS");
            self.session.detach_keys = keys;
        }
    }

    /// Check every value against its accepted range or syntax.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;
        if engine.host.parse::<EngineHost>().is_err() {
            return Err(ConfigError::InvalidHost(engine.host.clone()));
        }
        if let Some(version) = engine.api_version.as_ref().filter(|v| !is_valid_api_version(v)) {
            return Err(ConfigError::InvalidApiVersion(version.clone()));
        }
        if !(1..=3600).contains(&engine.request_timeout_secs) {
            return Err(ConfigError::InvalidRequestTimeout(engine.request_timeout_secs));
        }

        let session = &self.session;
        if !(10..=60_000).contains(&session.exec_poll_interval_ms) {
            return Err(ConfigError::InvalidPollInterval(session.exec_poll_interval_ms));
        }
        session
            .detach_keys
            .parse::<DetachKeys>()
            .map_err(|e| ConfigError::InvalidDetachKeys {
                keys: session.detach_keys.clone(),
                reason: e.to_string(),
            })?;

        if !VALID_LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        Ok(())
    }

    /// Read `path`. A missing file yields the defaults; unreadable or
    /// malformed files are errors naming the path.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("Cannot parse {}", path.display()))
    }

    /// [`Config::load`] from [`default_config_path`].
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse TOML text. Missing sections and keys take their defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Bad config: {}", format_toml_error(&e)))
    }

    /// Write the config to `path`, creating its directory as needed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("Cannot create {}", dir.display()))?;
        }

        fs::write(path, self.to_toml()?)
            .with_context(|| format!("Cannot write {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Render as pretty TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Cannot serialize config")
    }
}

/// TOML error message with the byte span it refers to, if any.
fn format_toml_error(error: &toml::de::Error) -> String {
    match error.span() {
        Some(span) => format!("{} (bytes {}..{})", error.message(), span.start, span.end),
        None => error.message().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        "DOCKER_HOST",
        "DOCKER_API_VERSION",
        "DOCKSIDE_LOG_LEVEL",
        "DOCKSIDE_DETACH_KEYS",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.engine.host, "unix:///var/run/docker.sock");
        assert_eq!(config.engine.api_version, None);
        assert_eq!(config.engine.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.session.detach_keys, "ctrl-p,ctrl-q");
        assert_eq!(config.session.exec_poll_interval(), Duration::from_millis(100));
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[engine]
host = "tcp://10.0.0.5:2376"
api_version = "1.43"

[logging]
level = "debug"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.engine.host, "tcp://10.0.0.5:2376");
        assert_eq!(config.engine.api_version.as_deref(), Some("1.43"));
        assert_eq!(config.engine.request_timeout_secs, 30);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_from_toml_invalid() {
        let err = Config::from_toml("[engine\nhost = 1").unwrap_err();
        assert!(err.to_string().starts_with("Bad config: "));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.engine.api_version = Some("1.41".to_string());
        config.session.detach_keys = "ctrl-x".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_to_toml_omits_unset_api_version() {
        let toml = Config::default().to_toml().unwrap();
        assert!(!toml.contains("api_version"));
        assert!(toml.contains("[engine]"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("dockside/config.toml"));
    }

    #[test]
    fn test_validate_host() {
        let mut config = Config::default();
        config.engine.host = "ssh://builder".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidHost("ssh://builder".to_string()))
        );

        config.engine.host = "http://127.0.0.1:2375".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_api_version() {
        let mut config = Config::default();
        for good in ["1.43", "v1.41"] {
            config.engine.api_version = Some(good.to_string());
            assert!(config.validate().is_ok(), "{good} should be valid");
        }
        for bad in ["1", "latest", "1.x", ".4"] {
            config.engine.api_version = Some(bad.to_string());
            assert_eq!(
                config.validate(),
                Err(ConfigError::InvalidApiVersion(bad.to_string()))
            );
        }
    }

    #[test]
    fn test_validate_ranges() {
        let mut config = Config::default();
        config.engine.request_timeout_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidRequestTimeout(0)));

        config.engine.request_timeout_secs = 3600;
        config.session.exec_poll_interval_ms = 5;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPollInterval(5)));

        config.session.exec_poll_interval_ms = 60_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_detach_keys() {
        let mut config = Config::default();
        config.session.detach_keys = "ctrl-1".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDetachKeys { .. })
        ));
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.logging.level = "WARN".to_string();
        assert!(config.validate().is_ok());

        config.logging.level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("DOCKER_HOST", "tcp://192.168.1.10:2375");
        std::env::set_var("DOCKER_API_VERSION", "1.44");
        std::env::set_var("DOCKSIDE_LOG_LEVEL", "trace");
        std::env::set_var("DOCKSIDE_DETACH_KEYS", "ctrl-a,d");

        let mut config = Config::default();
        config.apply_env_overrides();
        clear_env();

        assert_eq!(config.engine.host, "tcp://192.168.1.10:2375");
        assert_eq!(config.engine.api_version.as_deref(), Some("1.44"));
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.session.detach_keys, "ctrl-a,d");
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_empty_env_vars_are_ignored() {
        clear_env();
        std::env::set_var("DOCKER_HOST", "");
        std::env::set_var("DOCKSIDE_LOG_LEVEL", "");

        let mut config = Config::default();
        config.apply_env_overrides();
        clear_env();

        assert_eq!(config, Config::default());
    }
}
