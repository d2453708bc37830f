//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub groups: GroupsConfig,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Group maintenance configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GroupsConfig {
    /// Full membership scans allowed to run at once
    #[serde(default = "default_scan_concurrency")]
    pub scan_concurrency: usize,

    /// Rows returned by `list series` without an explicit limit
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,

    /// Edits a replication subscriber may lag behind
    #[serde(default = "default_edit_channel_capacity")]
    pub edit_channel_capacity: usize,
}

fn default_scan_concurrency() -> usize {
    4
}

fn default_list_limit() -> usize {
    10_000
}

fn default_edit_channel_capacity() -> usize {
    256
}

impl Default for GroupsConfig {
    fn default() -> Self {
        Self {
            scan_concurrency: default_scan_concurrency(),
            list_limit: default_list_limit(),
            edit_channel_capacity: default_edit_channel_capacity(),
        }
    }
}

/// Cluster topology configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub local_pool: u16,

    #[serde(default = "default_pool_count")]
    pub pool_count: u16,

    /// How often the coordinator checks convergence while rebalancing
    #[serde(default = "default_convergence_poll")]
    pub convergence_poll_ms: u64,
}

fn default_pool_count() -> u16 {
    1
}

fn default_convergence_poll() -> u64 {
    500
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            local_pool: 0,
            pool_count: default_pool_count(),
            convergence_poll_ms: default_convergence_poll(),
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

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    ///
    /// Overrides that leave the config invalid are ignored as a whole.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Config::default();
        config.apply_overrides(var);
        match config.validate() {
            Ok(()) => config,
            Err(e) => {
                tracing::warn!("Ignoring environment overrides: {}", e);
                Config::default()
            }
        }
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("series-groups").join("config.toml")),
            Some(PathBuf::from("/etc/series-groups/config.toml")),
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

    /// Check values that deserialize fine but cannot work
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.groups.scan_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "groups.scan_concurrency must be at least 1".to_string(),
            ));
        }
        if self.groups.list_limit == 0 {
            return Err(ConfigError::Invalid(
                "groups.list_limit must be at least 1".to_string(),
            ));
        }
        if self.cluster.pool_count == 0 || self.cluster.local_pool >= self.cluster.pool_count {
            return Err(ConfigError::Invalid(format!(
                "cluster.local_pool {} is outside pool_count {}",
                self.cluster.local_pool, self.cluster.pool_count
            )));
        }
        Ok(())
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Group overrides
        if let Some(n) = var("SERIES_GROUPS_SCAN_CONCURRENCY").and_then(|v| v.parse().ok()) {
            self.groups.scan_concurrency = n;
        }
        if let Some(n) = var("SERIES_GROUPS_LIST_LIMIT").and_then(|v| v.parse().ok()) {
            self.groups.list_limit = n;
        }

        // Cluster overrides
        if let Some(pool) = var("SERIES_GROUPS_LOCAL_POOL").and_then(|v| v.parse().ok()) {
            self.cluster.local_pool = pool;
        }
        if let Some(count) = var("SERIES_GROUPS_POOL_COUNT").and_then(|v| v.parse().ok()) {
            self.cluster.pool_count = count;
        }
        if let Some(ms) = var("SERIES_GROUPS_CONVERGENCE_POLL_MS").and_then(|v| v.parse().ok()) {
            self.cluster.convergence_poll_ms = ms;
        }

        // Logging overrides
        if let Some(level) = var("SERIES_GROUPS_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("SERIES_GROUPS_LOG_FORMAT") {
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

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Series Groups Configuration
#
# Environment variables override these settings:
# - SERIES_GROUPS_SCAN_CONCURRENCY
# - SERIES_GROUPS_LIST_LIMIT
# - SERIES_GROUPS_LOCAL_POOL
# - SERIES_GROUPS_POOL_COUNT
# - SERIES_GROUPS_CONVERGENCE_POLL_MS
# - SERIES_GROUPS_LOG_LEVEL
# - SERIES_GROUPS_LOG_FORMAT

[groups]
# Full membership scans allowed to run at once
scan_concurrency = 4

# Rows returned by `list series` when no limit is given
list_limit = 10000

# Group edits buffered for replication subscribers
edit_channel_capacity = 256

[cluster]
# Pool this node belongs to
local_pool = 0

# Number of pools in the cluster
pool_count = 1

# How often to check convergence while rebalancing (ms)
convergence_poll_ms = 500

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/series-groups/series-groups.log"
"#
    .to_string()
}
