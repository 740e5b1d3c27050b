//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/omoscope/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/omoscope/` (~/.config/omoscope/)
//! - State/Logs: `$XDG_STATE_HOME/omoscope/` (~/.local/state/omoscope/)
//!
//! OpenCode's own data lives under `$XDG_DATA_HOME/opencode/` and is only
//! ever read, never written.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Where OpenCode session data is read from
    #[serde(default)]
    pub storage: StorageConfig,

    /// Derivation parameters
    #[serde(default)]
    pub dashboard: DashboardConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage location overrides
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// OpenCode data directory (defaults to `$XDG_DATA_HOME/opencode`)
    pub data_dir: Option<PathBuf>,
    /// Directory-of-JSON storage root (defaults to `<data_dir>/storage`)
    pub storage_root: Option<PathBuf>,
    /// SQLite database path (defaults to `<data_dir>/opencode.db`)
    pub sqlite_path: Option<PathBuf>,
    /// Try the SQLite backend before the files backend
    #[serde(default = "default_prefer_sqlite")]
    pub prefer_sqlite: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            storage_root: None,
            sqlite_path: None,
            prefer_sqlite: default_prefer_sqlite(),
        }
    }
}

impl StorageConfig {
    /// Resolved OpenCode data directory
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| xdg_data_home().join("opencode"))
    }

    /// Resolved files-backend root
    pub fn storage_root(&self) -> PathBuf {
        self.storage_root
            .clone()
            .unwrap_or_else(|| self.data_dir().join("storage"))
    }

    /// Resolved SQLite database path
    pub fn sqlite_path(&self) -> PathBuf {
        self.sqlite_path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("opencode.db"))
    }
}

fn default_prefer_sqlite() -> bool {
    true
}

/// Derivation parameters
#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    /// Width of the activity histogram window in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: i64,

    /// Width of one histogram bucket in milliseconds
    #[serde(default = "default_bucket_ms")]
    pub bucket_ms: i64,

    /// Message cap for the tool-call listing
    #[serde(default = "default_tool_call_max_messages")]
    pub tool_call_max_messages: usize,

    /// Row cap for the tool-call listing
    #[serde(default = "default_tool_call_max_calls")]
    pub tool_call_max_calls: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            bucket_ms: default_bucket_ms(),
            tool_call_max_messages: default_tool_call_max_messages(),
            tool_call_max_calls: default_tool_call_max_calls(),
        }
    }
}

impl DashboardConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.bucket_ms <= 0 {
            return Err(Error::Config(
                "dashboard.bucket_ms must be positive".to_string(),
            ));
        }
        if self.window_ms < self.bucket_ms {
            return Err(Error::Config(
                "dashboard.window_ms must be at least one bucket wide".to_string(),
            ));
        }
        if self.tool_call_max_messages == 0 || self.tool_call_max_calls == 0 {
            return Err(Error::Config(
                "dashboard tool call limits must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_window_ms() -> i64 {
    300_000
}

fn default_bucket_ms() -> i64 {
    2_000
}

fn default_tool_call_max_messages() -> usize {
    200
}

fn default_tool_call_max_calls() -> usize {
    300
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.dashboard.validate()?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/omoscope/config.toml` (~/.config/omoscope/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("omoscope").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/omoscope/` (~/.local/state/omoscope/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("omoscope")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/omoscope/omoscope.log` (~/.local/state/omoscope/omoscope.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("omoscope.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.storage.prefer_sqlite);
        assert_eq!(config.dashboard.window_ms, 300_000);
        assert_eq!(config.dashboard.bucket_ms, 2_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[storage]
data_dir = "/tmp/opencode"
prefer_sqlite = false

[dashboard]
window_ms = 60000
bucket_ms = 1000

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert!(!config.storage.prefer_sqlite);
        assert_eq!(
            config.storage.storage_root(),
            PathBuf::from("/tmp/opencode/storage")
        );
        assert_eq!(
            config.storage.sqlite_path(),
            PathBuf::from("/tmp/opencode/opencode.db")
        );
        assert_eq!(config.dashboard.window_ms, 60_000);
        assert_eq!(config.dashboard.tool_call_max_calls, 300);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_explicit_paths_win_over_data_dir() {
        let toml = r#"
[storage]
data_dir = "/tmp/opencode"
storage_root = "/srv/storage"
sqlite_path = "/srv/db.sqlite"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.storage.storage_root(), PathBuf::from("/srv/storage"));
        assert_eq!(config.storage.sqlite_path(), PathBuf::from("/srv/db.sqlite"));
    }

    #[test]
    fn test_dashboard_config_validation() {
        assert!(DashboardConfig::default().validate().is_ok());

        let config = DashboardConfig {
            bucket_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DashboardConfig {
            window_ms: 500,
            bucket_ms: 1000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_rejects_bad_dashboard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[dashboard]\nbucket_ms = -5\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }
}
