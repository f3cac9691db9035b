//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::manager::ManagerConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub manager: ManagerSection,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection manager configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerSection {
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,

    #[serde(default = "default_stop_grace")]
    pub stop_grace_ms: u64,

    #[serde(default = "default_auto_connect")]
    pub auto_connect: bool,
}

fn default_lock_timeout() -> u64 {
    5000 // 5 seconds
}

fn default_stop_grace() -> u64 {
    1000
}

fn default_auto_connect() -> bool {
    true
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout(),
            stop_grace_ms: default_stop_grace(),
            auto_connect: default_auto_connect(),
        }
    }
}

impl From<&ManagerSection> for ManagerConfig {
    fn from(section: &ManagerSection) -> Self {
        ManagerConfig {
            lock_timeout: Duration::from_millis(section.lock_timeout_ms),
            stop_grace: Duration::from_millis(section.stop_grace_ms),
            auto_connect: section.auto_connect,
        }
    }
}

/// Configuration store
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_database() -> String {
    dirs::data_local_dir()
        .map(|p| {
            p.join("process-link")
                .join("process_link.db")
                .to_string_lossy()
                .to_string()
        })
        .unwrap_or_else(|| "./process_link.db".to_string())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                error,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            error: e.to_string(),
        })
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("process-link").join("config.toml")),
            Some(PathBuf::from("/etc/process-link/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Manager tuning derived from the `[manager]` section
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig::from(&self.manager)
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(database) = var("PROCESS_LINK_DATABASE") {
            self.storage.database = database;
        }

        if let Some(timeout) = var("PROCESS_LINK_LOCK_TIMEOUT_MS") {
            match timeout.parse() {
                Ok(ms) => self.manager.lock_timeout_ms = ms,
                Err(_) => tracing::warn!("Ignoring invalid PROCESS_LINK_LOCK_TIMEOUT_MS: {}", timeout),
            }
        }

        if let Some(level) = var("PROCESS_LINK_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("PROCESS_LINK_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# process-link Configuration
#
# Environment variables override these settings:
# - PROCESS_LINK_DATABASE
# - PROCESS_LINK_LOCK_TIMEOUT_MS
# - PROCESS_LINK_LOG_LEVEL
# - PROCESS_LINK_LOG_FORMAT

[manager]
# How long a polling cycle or tag-set update waits for the polled-tag lock (ms)
lock_timeout_ms = 5000

# Extra time allowed on top of a connection's pollrate when disconnecting (ms)
stop_grace_ms = 1000

# Connect restored connections that have auto_connect set
auto_connect = true

[storage]
# SQLite database holding connection and tag definitions
database = "~/.local/share/process-link/process_link.db"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/process-link/process-link.log"
"#
    .to_string()
}
