//! Configuration system for the Magellan executor
//!
//! Supports multiple configuration sources with the following precedence
//! (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (MAGELLAN_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Main executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Executor identity and concurrency settings
    pub executor: ExecutorSettings,

    /// Scheduler connection settings
    pub scheduler: SchedulerSettings,

    /// Problem package provisioning settings
    pub provisioning: ProvisioningSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Executor identity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Unique executor identifier (assigned by the scheduler if not set)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Human-readable executor name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Executor tags for task routing
    #[serde(default)]
    pub tags: Vec<String>,

    /// Maximum concurrent search tasks
    pub max_concurrent_tasks: u32,

    /// Outbound message queue size
    pub queue_size: usize,
}

/// Scheduler connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Scheduler WebSocket URL
    pub url: String,

    /// Reconnection interval in milliseconds
    pub reconnect_interval_ms: u64,

    /// Maximum reconnection attempts (0 = infinite)
    pub max_reconnect_attempts: u32,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Heartbeat interval in milliseconds
    pub heartbeat_interval_ms: u64,
}

/// Provisioning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningSettings {
    /// Package cache root; one subdirectory per package name
    pub cache_dir: String,

    /// Archive download timeout in seconds
    pub download_timeout_secs: u64,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorSettings::default(),
            scheduler: SchedulerSettings::default(),
            provisioning: ProvisioningSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            id: None,
            name: None,
            tags: vec![],
            max_concurrent_tasks: 4,
            queue_size: 100,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            url: "wss://scheduler.magellan.network".to_string(),
            reconnect_interval_ms: 5000,
            max_reconnect_attempts: 0, // Infinite
            connect_timeout_ms: 30000,
            heartbeat_interval_ms: 30000,
        }
    }
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            cache_dir: "~/.magellan/executor/packages".to_string(),
            download_timeout_secs: 300,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

impl ExecutorConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        let config_file = Self::find_config_file(config_path)?;
        if let Some(path) = config_file {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path)
                .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
            config = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let expanded = shellexpand::tilde(path);
            let path = PathBuf::from(expanded.as_ref());
            if path.exists() {
                return Ok(Some(path));
            } else {
                return Err(Error::Config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
        }

        // Search in standard locations
        let search_paths = [
            // Current directory
            PathBuf::from("magellan-executor.toml"),
            PathBuf::from("config.toml"),
            // User config directory
            dirs::config_dir()
                .map(|p| p.join("magellan").join("executor.toml"))
                .unwrap_or_default(),
            // Home directory
            dirs::home_dir()
                .map(|p| p.join(".magellan").join("executor.toml"))
                .unwrap_or_default(),
            // System config (Linux)
            PathBuf::from("/etc/magellan/executor.toml"),
        ];

        for path in &search_paths {
            if path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Executor settings
        if let Ok(val) = std::env::var("MAGELLAN_EXECUTOR_ID") {
            self.executor.id = Some(val);
        }
        if let Ok(val) = std::env::var("MAGELLAN_EXECUTOR_NAME") {
            self.executor.name = Some(val);
        }
        if let Ok(val) = std::env::var("MAGELLAN_MAX_CONCURRENT_TASKS") {
            if let Ok(n) = val.parse() {
                self.executor.max_concurrent_tasks = n;
            }
        }

        // Scheduler settings
        if let Ok(val) = std::env::var("MAGELLAN_SCHEDULER_URL") {
            self.scheduler.url = val;
        }
        if let Ok(val) = std::env::var("MAGELLAN_RECONNECT_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                self.scheduler.reconnect_interval_ms = n;
            }
        }
        if let Ok(val) = std::env::var("MAGELLAN_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                self.scheduler.max_reconnect_attempts = n;
            }
        }
        if let Ok(val) = std::env::var("MAGELLAN_HEARTBEAT_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                self.scheduler.heartbeat_interval_ms = n;
            }
        }

        // Provisioning settings
        if let Ok(val) = std::env::var("MAGELLAN_CACHE_DIR") {
            self.provisioning.cache_dir = val;
        }
        if let Ok(val) = std::env::var("MAGELLAN_DOWNLOAD_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                self.provisioning.download_timeout_secs = n;
            }
        }

        // Logging settings
        if let Ok(val) = std::env::var("MAGELLAN_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("MAGELLAN_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("MAGELLAN_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        self.provisioning.cache_dir = expand_path(&self.provisioning.cache_dir);

        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        // Validate scheduler URL
        if self.scheduler.url.is_empty() {
            return Err(Error::Config("Scheduler URL cannot be empty".to_string()));
        }
        if !self.scheduler.url.starts_with("ws://") && !self.scheduler.url.starts_with("wss://") {
            return Err(Error::Config(
                "Scheduler URL must start with ws:// or wss://".to_string(),
            ));
        }

        // Validate concurrency
        if self.executor.max_concurrent_tasks == 0 {
            return Err(Error::Config(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }

        // Validate cache directory
        if self.provisioning.cache_dir.is_empty() {
            return Err(Error::Config(
                "Provisioning cache_dir cannot be empty".to_string(),
            ));
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }

    /// Get the provisioning cache directory as a PathBuf
    pub fn cache_dir(&self) -> PathBuf {
        PathBuf::from(&self.provisioning.cache_dir)
    }
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<()> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".magellan")
                .join("executor.toml")
        });

    // Check if file exists
    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    // Create parent directories
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
    }

    // Generate default config with comments
    let config_content = generate_default_config();

    // Write the file
    fs::write(&config_path, config_content)
        .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

    println!("Configuration file created: {}", config_path.display());
    Ok(())
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# Magellan Executor Configuration
# https://github.com/magellan/executor

[executor]
# Unique executor identifier (assigned by the scheduler if not set)
# id = "executor-abc123"

# Human-readable executor name
# name = "My Executor"

# Tags for task routing
tags = []

# Maximum concurrent search tasks
max_concurrent_tasks = 4

# Outbound message queue size
queue_size = 100

[scheduler]
# Scheduler WebSocket URL
url = "wss://scheduler.magellan.network"

# Reconnection interval in milliseconds
reconnect_interval_ms = 5000

# Maximum reconnection attempts (0 = infinite)
max_reconnect_attempts = 0

# Connection timeout in milliseconds
connect_timeout_ms = 30000

# Heartbeat interval in milliseconds
heartbeat_interval_ms = 30000

[provisioning]
# Package cache root; one subdirectory per package name
cache_dir = "~/.magellan/executor/packages"

# Archive download timeout in seconds
download_timeout_secs = 300

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.magellan/executor/logs/executor.log"

# Maximum log file size in MB before rotation
max_file_size_mb = 100

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ExecutorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.executor.max_concurrent_tasks, 4);
        assert_eq!(config.scheduler.heartbeat_interval_ms, 30000);
    }

    #[test]
    fn test_default_config_template_parses() {
        let content = generate_default_config();
        let config: ExecutorConfig = toml::from_str(&content).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.provisioning.download_timeout_secs, 300);
    }

    #[test]
    fn test_validate_rejects_bad_scheme() {
        let mut config = ExecutorConfig::default();
        config.scheduler.url = "https://scheduler.example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = ExecutorConfig::default();
        config.executor.max_concurrent_tasks = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let mut config = ExecutorConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let content = r#"
[scheduler]
url = "ws://localhost:5050"
"#;
        let config: ExecutorConfig = toml::from_str(content).unwrap();
        assert_eq!(config.scheduler.url, "ws://localhost:5050");
        assert_eq!(config.executor.max_concurrent_tasks, 4);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_roundtrip_serialization() {
        let config = ExecutorConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: ExecutorConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.scheduler.url, config.scheduler.url);
        assert_eq!(parsed.provisioning.cache_dir, config.provisioning.cache_dir);
    }
}
