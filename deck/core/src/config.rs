//! TOML Configuration File Support
//!
//! Startup configuration for the client, read from
//! `$XDG_CONFIG_HOME/llamadeck/config.toml`.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! Runtime preferences that the user changes while the client runs
//! (default model, auto-reconnect, retention days) are not configured here;
//! they live in [`crate::store::Settings`] and persist through storage.
//!
//! # Environment Variables
//!
//! - `LLAMADECK_BASE_URL` - full API root, e.g. `http://gpu-box:11434/api`
//! - `OLLAMA_HOST` - host, `host:port` or URL of the service
//! - `OLLAMA_PORT` - port, when `OLLAMA_HOST` has none
//! - `LLAMADECK_DATA_DIR` - where snapshots are stored
//!
//! # Example Configuration
//!
//! ```toml
//! [service]
//! base_url = "http://localhost:11434/api"
//! connect_timeout_secs = 10
//! request_timeout_secs = 120
//!
//! [connectivity]
//! health_check_interval_secs = 30
//! reconnect_interval_ms = 3000
//! max_reconnect_attempts = 5
//! probe_timeout_ms = 5000
//!
//! [session]
//! cleanup_interval_hours = 24
//!
//! [storage]
//! data_dir = "/home/me/.local/share/llamadeck"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::DEFAULT_BASE_URL;
use crate::supervisor::SupervisorConfig;

const DEFAULT_OLLAMA_PORT: &str = "11434";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[service]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceToml {
    /// API root of the inference service
    pub base_url: Option<String>,
    /// Connect timeout in seconds
    pub connect_timeout_secs: Option<u64>,
    /// Timeout of non-streaming calls in seconds
    pub request_timeout_secs: Option<u64>,
}

/// `[connectivity]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityToml {
    /// Seconds between health probes
    pub health_check_interval_secs: Option<u64>,
    /// Milliseconds slept before each reconnect probe
    pub reconnect_interval_ms: Option<u64>,
    /// Probes per reconnect cycle
    pub max_reconnect_attempts: Option<u32>,
    /// Upper bound on one probe in milliseconds
    pub probe_timeout_ms: Option<u64>,
}

/// `[session]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionToml {
    /// Hours between expiration sweeps
    pub cleanup_interval_hours: Option<u64>,
}

/// `[storage]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageToml {
    /// Directory for persisted snapshots
    pub data_dir: Option<PathBuf>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlamadeckToml {
    /// Service section
    pub service: ServiceToml,
    /// Connectivity section
    pub connectivity: ConnectivityToml,
    /// Session section
    pub session: SessionToml,
    /// Storage section
    pub storage: StorageToml,
}

// =============================================================================
// Main Configuration Structs
// =============================================================================

/// How to reach the inference service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    /// API root, e.g. `http://localhost:11434/api`
    pub base_url: String,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Timeout of non-streaming calls in seconds
    pub request_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 120,
        }
    }
}

/// Resolved startup configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Service endpoint
    pub service: ServiceConfig,
    /// Health checking and reconnection
    pub supervisor: SupervisorConfig,
    /// Interval between expiration sweeps
    pub cleanup_interval: Duration,
    /// Directory for persisted snapshots
    pub data_dir: PathBuf,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    /// Source of configuration values
    source: ConfigSource,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            supervisor: SupervisorConfig::default(),
            cleanup_interval: Duration::from_secs(24 * 60 * 60),
            data_dir: default_data_dir(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ClientConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Reject values that would make the client spin or never retry
    ///
    /// # Errors
    ///
    /// [`ConfigError::ValidationError`] naming the offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = &self.service.base_url;
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "base_url must be an http(s) URL, got {base:?}"
            )));
        }
        if self.supervisor.max_reconnect_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "max_reconnect_attempts must be at least 1".to_string(),
            ));
        }
        let intervals = [
            ("health_check_interval", self.supervisor.health_check_interval),
            ("reconnect_interval", self.supervisor.reconnect_interval),
            ("probe_timeout", self.supervisor.probe_timeout),
            ("cleanup_interval", self.cleanup_interval),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/llamadeck/config.toml` or
/// `~/.config/llamadeck/config.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("llamadeck").join("config.toml"))
}

/// Default directory for persisted snapshots
///
/// `$XDG_DATA_HOME/llamadeck`, or `./.llamadeck` when no data dir is known.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir().map_or_else(|| PathBuf::from(".llamadeck"), |p| p.join("llamadeck"))
}

/// Load configuration from the default path, environment and defaults
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path plus the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClientConfig, ConfigError> {
    load_config_with_env(path, |name| std::env::var(name).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_with_env(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ClientConfig, ConfigError> {
    let mut config = ClientConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: LlamadeckToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ClientConfig, toml: &LlamadeckToml) {
    if let Some(ref url) = toml.service.base_url {
        config.service.base_url.clone_from(url);
    }
    if let Some(secs) = toml.service.connect_timeout_secs {
        config.service.connect_timeout_secs = secs;
    }
    if let Some(secs) = toml.service.request_timeout_secs {
        config.service.request_timeout_secs = secs;
    }

    if let Some(secs) = toml.connectivity.health_check_interval_secs {
        config.supervisor.health_check_interval = Duration::from_secs(secs);
    }
    if let Some(ms) = toml.connectivity.reconnect_interval_ms {
        config.supervisor.reconnect_interval = Duration::from_millis(ms);
    }
    if let Some(attempts) = toml.connectivity.max_reconnect_attempts {
        config.supervisor.max_reconnect_attempts = attempts;
    }
    if let Some(ms) = toml.connectivity.probe_timeout_ms {
        config.supervisor.probe_timeout = Duration::from_millis(ms);
    }

    if let Some(hours) = toml.session.cleanup_interval_hours {
        config.cleanup_interval = Duration::from_secs(hours * 60 * 60);
    }

    if let Some(ref dir) = toml.storage.data_dir {
        config.data_dir.clone_from(dir);
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut ClientConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(url) = env("LLAMADECK_BASE_URL") {
        config.service.base_url = url;
        config.source = ConfigSource::Env;
    } else {
        let host = env("OLLAMA_HOST");
        let port = env("OLLAMA_PORT");
        if host.is_some() || port.is_some() {
            config.service.base_url = base_url_from_host(
                host.as_deref().unwrap_or("localhost"),
                port.as_deref().unwrap_or(DEFAULT_OLLAMA_PORT),
            );
            config.source = ConfigSource::Env;
        }
    }

    if let Some(dir) = env("LLAMADECK_DATA_DIR") {
        config.data_dir = PathBuf::from(dir);
        config.source = ConfigSource::Env;
    }
}

/// Build an API root from an `OLLAMA_HOST`-style value.
///
/// Accepts `host`, `host:port`, or a URL with scheme; `port` is used only
/// when the host carries none.
#[must_use]
pub fn base_url_from_host(host: &str, port: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    let (scheme, authority) = match host.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("http", host),
    };
    if authority.contains(':') {
        format!("{scheme}://{authority}/api")
    } else {
        format!("{scheme}://{authority}:{port}/api")
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// API root override
    pub base_url: Option<String>,

    /// Data directory override
    pub data_dir: Option<PathBuf>,

    /// Reconnect attempt budget override
    pub max_reconnect_attempts: Option<u32>,

    /// Health check interval override (seconds)
    pub health_check_interval_secs: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set API root override
    #[must_use]
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = Some(url);
        self
    }

    /// Set data directory override
    #[must_use]
    pub fn with_data_dir(mut self, dir: PathBuf) -> Self {
        self.data_dir = Some(dir);
        self
    }

    /// Set reconnect attempt budget override
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Set health check interval override
    #[must_use]
    pub fn with_health_check_interval_secs(mut self, secs: u64) -> Self {
        self.health_check_interval_secs = Some(secs);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ClientConfig) {
        if self.base_url.is_some()
            || self.data_dir.is_some()
            || self.max_reconnect_attempts.is_some()
            || self.health_check_interval_secs.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref url) = self.base_url {
            config.service.base_url.clone_from(url);
        }
        if let Some(ref dir) = self.data_dir {
            config.data_dir.clone_from(dir);
        }
        if let Some(attempts) = self.max_reconnect_attempts {
            config.supervisor.max_reconnect_attempts = attempts;
        }
        if let Some(secs) = self.health_check_interval_secs {
            config.supervisor.health_check_interval = Duration::from_secs(secs);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();

        assert_eq!(config.service.base_url, "http://localhost:11434/api");
        assert_eq!(config.supervisor.max_reconnect_attempts, 5);
        assert_eq!(config.cleanup_interval, Duration::from_secs(86_400));
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config =
            load_config_with_env(Some(PathBuf::from("/nonexistent/config.toml")), no_env).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[service]
base_url = "http://gpu-box:11434/api"
request_timeout_secs = 30

[connectivity]
reconnect_interval_ms = 1000
max_reconnect_attempts = 3

[session]
cleanup_interval_hours = 6

[storage]
data_dir = "/tmp/deck-data"
"#
        )
        .unwrap();

        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.service.base_url, "http://gpu-box:11434/api");
        assert_eq!(config.service.request_timeout_secs, 30);
        assert_eq!(config.service.connect_timeout_secs, 10);
        assert_eq!(
            config.supervisor.reconnect_interval,
            Duration::from_millis(1000)
        );
        assert_eq!(config.supervisor.max_reconnect_attempts, 3);
        assert_eq!(config.cleanup_interval, Duration::from_secs(6 * 3600));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/deck-data"));
    }

    #[test]
    fn test_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[service\nbase_url = ").unwrap();
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[service]\nbase_url = \"http://from-file:1/api\"").unwrap();

        let env = env_from(&[("OLLAMA_HOST", "10.0.0.5"), ("OLLAMA_PORT", "9999")]);
        let config = load_config_with_env(Some(file.path().to_path_buf()), env).unwrap();
        assert_eq!(config.service.base_url, "http://10.0.0.5:9999/api");
        assert_eq!(config.source(), ConfigSource::Env);

        let env = env_from(&[
            ("OLLAMA_HOST", "10.0.0.5"),
            ("LLAMADECK_BASE_URL", "https://llm.example.com/api"),
        ]);
        let config = load_config_with_env(None, env).unwrap();
        assert_eq!(config.service.base_url, "https://llm.example.com/api");
    }

    #[test]
    fn test_base_url_from_host() {
        assert_eq!(
            base_url_from_host("localhost", "11434"),
            "http://localhost:11434/api"
        );
        assert_eq!(
            base_url_from_host("0.0.0.0:8080", "11434"),
            "http://0.0.0.0:8080/api"
        );
        assert_eq!(
            base_url_from_host("https://llm.example.com/", "443"),
            "https://llm.example.com:443/api"
        );
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = ClientConfig::default();
        ConfigOverrides::new()
            .with_base_url("http://cli:1/api".to_string())
            .with_max_reconnect_attempts(9)
            .apply(&mut config);

        assert_eq!(config.source(), ConfigSource::Cli);
        assert_eq!(config.service.base_url, "http://cli:1/api");
        assert_eq!(config.supervisor.max_reconnect_attempts, 9);
    }

    #[test]
    fn test_empty_overrides_keep_source() {
        let mut config = ClientConfig::default();
        ConfigOverrides::new().apply(&mut config);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = ClientConfig::default();
        config.supervisor.max_reconnect_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = ClientConfig::default();
        config.supervisor.reconnect_interval = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reconnect_interval"));

        let mut config = ClientConfig::default();
        config.service.base_url = "localhost:11434".to_string();
        assert!(config.validate().is_err());
    }
}
