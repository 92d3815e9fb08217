//! Configuration management for Sitescan.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Main application configuration.
///
/// This is loaded from `~/.config/sitescan/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Job queue settings
    pub queue: QueueConfig,
    /// Worker polling loop settings
    pub worker: WorkerConfig,
    /// Browser automation settings
    pub browser: BrowserConfig,
    /// Capability execution settings
    pub scanning: ScanningConfig,
    /// Persistence settings
    pub storage: StorageConfig,
    /// Real-time notification settings
    pub notifications: NotificationConfig,
    /// Inbound URL safety settings
    pub security: SecurityConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            tracing::debug!("Loading config from {}", config_path.display());
            let contents = fs::read_to_string(&config_path)?;
            let config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `SITESCAN_SKIP_DB`: swap the record store for the ephemeral stub (true/false)
    /// - `SITESCAN_HEADLESS`: override browser headless mode (true/false)
    /// - `SITESCAN_QUEUE_BACKEND`: `memory`, `backoff` or `sqlite`
    /// - `SITESCAN_MAX_ATTEMPTS`: override queue attempt bound
    /// - `SITESCAN_POLL_INTERVAL_MS`: override worker polling interval
    /// - `SITESCAN_DATABASE_PATH`: override the SQLite database file
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.normalize();
        Ok(config)
    }

    /// Apply overrides from a variable lookup function.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` for an unknown queue backend.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("SITESCAN_SKIP_DB") {
            if let Ok(skip) = val.parse() {
                self.storage.skip_persistence = skip;
                tracing::debug!("Override storage.skip_persistence from env: {}", skip);
            }
        }

        if let Some(val) = lookup("SITESCAN_HEADLESS") {
            if let Ok(headless) = val.parse() {
                self.browser.headless = headless;
                tracing::debug!("Override browser.headless from env: {}", headless);
            }
        }

        if let Some(val) = lookup("SITESCAN_QUEUE_BACKEND") {
            self.queue.backend = match val.as_str() {
                "memory" => QueueBackend::Memory,
                "backoff" => QueueBackend::Backoff,
                "sqlite" => QueueBackend::Sqlite,
                other => {
                    return Err(ConfigError::InvalidValue {
                        field: "queue.backend".to_string(),
                        reason: format!("unknown backend '{other}'"),
                    })
                }
            };
            tracing::debug!("Override queue.backend from env: {:?}", self.queue.backend);
        }

        if let Some(val) = lookup("SITESCAN_MAX_ATTEMPTS") {
            if let Ok(attempts) = val.parse() {
                self.queue.max_attempts = attempts;
                tracing::debug!("Override queue.max_attempts from env: {}", attempts);
            }
        }

        if let Some(val) = lookup("SITESCAN_POLL_INTERVAL_MS") {
            if let Ok(interval) = val.parse() {
                self.worker.poll_interval_ms = interval;
                tracing::debug!("Override worker.poll_interval_ms from env: {}", interval);
            }
        }

        if let Some(val) = lookup("SITESCAN_DATABASE_PATH") {
            tracing::debug!("Override storage.database_path from env: {}", val);
            self.storage.database_path = Some(PathBuf::from(val));
        }

        Ok(())
    }

    /// Resolve combinations that cannot work together.
    ///
    /// The SQLite queue lives in the record database, so skipping persistence
    /// forces an in-process queue.
    pub fn normalize(&mut self) {
        if self.storage.skip_persistence && self.queue.backend == QueueBackend::Sqlite {
            tracing::warn!("Persistence disabled, falling back to in-process backoff queue");
            self.queue.backend = QueueBackend::Backoff;
        }
        if self.queue.max_attempts == 0 {
            self.queue.max_attempts = 1;
        }
        if self.worker.batch_size == 0 {
            self.worker.batch_size = 1;
        }
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "config_path".to_string(),
                reason: "no parent directory".to_string(),
            })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/sitescan/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("com", "sitescan", "sitescan").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/sitescan`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("com", "sitescan", "sitescan").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Database file to open, defaulting to `sitescan.db` in the data directory.
    pub fn database_path(&self) -> ConfigResult<PathBuf> {
        match &self.storage.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("sitescan.db")),
        }
    }
}

/// Which job queue implementation backs the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// Plain FIFO list, no durability, no retry
    Memory,
    /// In-process FIFO with delayed retries
    Backoff,
    /// Durable SQLite table with leases
    Sqlite,
}

/// Job queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue implementation
    pub backend: QueueBackend,
    /// Attempts before a job is abandoned
    pub max_attempts: u32,
    /// First retry delay in milliseconds; doubles on each retry
    pub backoff_base_ms: u64,
    /// Seconds a claimed job stays invisible before it is redelivered
    pub lease_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Sqlite,
            max_attempts: 3,
            backoff_base_ms: 5000,
            lease_secs: 300,
        }
    }
}

/// Worker polling loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Milliseconds between queue polls
    pub poll_interval_ms: u64,
    /// Jobs claimed per tick
    pub batch_size: usize,
    /// Process a batch concurrently instead of one after another
    pub parallel: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            batch_size: 1,
            parallel: false,
        }
    }
}

/// Browser automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,
    /// Browser window width
    pub window_width: u32,
    /// Browser window height
    pub window_height: u32,
    /// Navigation timeout in seconds
    pub navigation_timeout_secs: u64,
    /// Sessions that may be checked out at once
    pub max_sessions: usize,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1366,
            window_height: 768,
            navigation_timeout_secs: 30,
            max_sessions: 1,
        }
    }
}

/// Capability execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanningConfig {
    /// Upper bound on a single capability run, in seconds
    pub capability_timeout_secs: u64,
    /// Timeout for the robots.txt fetch, in seconds
    pub robots_timeout_secs: u64,
    /// Timeout for plain HTTP requests made by capabilities, in seconds
    pub http_timeout_secs: u64,
    /// User agent for plain HTTP requests
    pub user_agent: String,
}

impl Default for ScanningConfig {
    fn default() -> Self {
        Self {
            capability_timeout_secs: 60,
            robots_timeout_secs: 5,
            http_timeout_secs: 10,
            user_agent: "Sitescan/0.1.0 (+https://github.com/sitescan/sitescan)".to_string(),
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Use the in-process stub store instead of SQLite
    pub skip_persistence: bool,
    /// SQLite database file (defaults to the data directory)
    pub database_path: Option<PathBuf>,
    /// Days a recent-result summary is kept
    pub recent_retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            skip_persistence: false,
            database_path: None,
            recent_retention_days: 30,
        }
    }
}

/// Real-time notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Publish completion events at all
    pub enabled: bool,
    /// Events buffered per slow subscriber before it starts lagging
    pub channel_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel_capacity: 256,
        }
    }
}

/// Inbound URL safety settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Longest accepted URL, in characters
    pub max_url_length: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_url_length: 2000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.queue.backend, QueueBackend::Sqlite);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.queue.backoff_base_ms, 5000);
        assert_eq!(config.worker.poll_interval_ms, 5000);
        assert_eq!(config.worker.batch_size, 1);
        assert!(!config.worker.parallel);
        assert!(config.browser.headless);
        assert_eq!(config.storage.recent_retention_days, 30);
        assert_eq!(config.security.max_url_length, 2000);
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("[queue]"));
        assert!(toml_str.contains("[worker]"));
        assert!(toml_str.contains("[storage]"));

        let parsed: AppConfig = toml::from_str(&toml_str).expect("parse serialized config");
        assert_eq!(parsed.queue.max_attempts, config.queue.max_attempts);
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("config.toml");

        let mut config = AppConfig::default();
        config.queue.backend = QueueBackend::Memory;
        config.worker.batch_size = 4;

        let contents = toml::to_string_pretty(&config).expect("serialize config");
        fs::write(&config_path, contents).expect("write config file");

        let loaded_contents = fs::read_to_string(&config_path).expect("read config file");
        let loaded: AppConfig = toml::from_str(&loaded_contents).expect("parse loaded config");

        assert_eq!(loaded.queue.backend, QueueBackend::Memory);
        assert_eq!(loaded.worker.batch_size, 4);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SITESCAN_SKIP_DB", "true"),
            ("SITESCAN_HEADLESS", "false"),
            ("SITESCAN_MAX_ATTEMPTS", "5"),
            ("SITESCAN_POLL_INTERVAL_MS", "250"),
            ("SITESCAN_DATABASE_PATH", "/tmp/sitescan-test.db"),
        ]);

        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|key| vars.get(key).map(|v| (*v).to_string()))
            .expect("apply overrides");

        assert!(config.storage.skip_persistence);
        assert!(!config.browser.headless);
        assert_eq!(config.queue.max_attempts, 5);
        assert_eq!(config.worker.poll_interval_ms, 250);
        assert_eq!(
            config.database_path().expect("database path"),
            PathBuf::from("/tmp/sitescan-test.db")
        );
    }

    #[test]
    fn test_unknown_queue_backend_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_env_overrides(|key| {
            (key == "SITESCAN_QUEUE_BACKEND").then(|| "kafka".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_skip_persistence_forces_in_process_queue() {
        let mut config = AppConfig::default();
        config.storage.skip_persistence = true;
        config.normalize();
        assert_eq!(config.queue.backend, QueueBackend::Backoff);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[queue]
backend = "backoff"

[worker]
parallel = true
"#;

        let config: AppConfig = toml::from_str(toml_str).expect("parse partial config");
        assert_eq!(config.queue.backend, QueueBackend::Backoff);
        assert!(config.worker.parallel);
        // These should be defaults
        assert_eq!(config.queue.max_attempts, 3);
        assert!(config.browser.headless);
    }
}
