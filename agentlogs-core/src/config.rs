//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/agentlogs/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/agentlogs/` (~/.config/agentlogs/)
//! - Data: `$XDG_DATA_HOME/agentlogs/` (~/.local/share/agentlogs/)
//! - State/Logs: `$XDG_STATE_HOME/agentlogs/` (~/.local/state/agentlogs/)
//!
//! Provider storage locations default to the conventions each agent runtime
//! uses and can be overridden under `[paths]`.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
pub(crate) fn home_dir() -> PathBuf {
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
    /// Provider storage path overrides
    #[serde(default)]
    pub paths: PathOverrides,

    /// Archived session discovery
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Live scan tuning
    #[serde(default)]
    pub scan: ScanConfig,

    /// Incremental monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Override paths for provider and registry directories
#[derive(Debug, Deserialize, Default)]
pub struct PathOverrides {
    /// Override path for Claude data (default `~/.claude`)
    pub claude_path: Option<PathBuf>,
    /// Override path for Codex data (default `~/.codex`)
    pub codex_path: Option<PathBuf>,
    /// Override path for OpenCode storage (default `~/.local/share/opencode/storage`)
    pub opencode_storage_path: Option<PathBuf>,
    /// Override path for the session registry (default `~/.grove/hooks/sessions`)
    pub registry_path: Option<PathBuf>,
}

impl PathOverrides {
    pub fn claude_root(&self) -> PathBuf {
        self.claude_path
            .clone()
            .unwrap_or_else(|| home_dir().join(".claude"))
    }

    pub fn codex_root(&self) -> PathBuf {
        self.codex_path
            .clone()
            .unwrap_or_else(|| home_dir().join(".codex"))
    }

    pub fn opencode_storage(&self) -> PathBuf {
        self.opencode_storage_path
            .clone()
            .unwrap_or_else(|| home_dir().join(".local/share/opencode/storage"))
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.registry_path
            .clone()
            .unwrap_or_else(|| home_dir().join(".grove/hooks/sessions"))
    }
}

/// Where to look for plan directories holding archived sessions
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ArchiveConfig {
    /// Each root's immediate sub-directories are treated as plan directories
    #[serde(default)]
    pub plan_roots: Vec<PathBuf>,
}

/// Live filesystem scan settings
#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    /// Number of records read from each transcript when probing metadata
    #[serde(default = "default_probe_line_limit")]
    pub probe_line_limit: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            probe_line_limit: default_probe_line_limit(),
        }
    }
}

fn default_probe_line_limit() -> usize {
    100
}

/// Incremental monitor settings
#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    /// Seconds between monitor ticks
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// A session counts as active while its artifact changed within this window
    #[serde(default = "default_active_window_minutes")]
    pub active_window_minutes: u64,

    /// Override for the message store location
    pub database_path: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            active_window_minutes: default_active_window_minutes(),
            database_path: None,
        }
    }
}

fn default_interval_secs() -> u64 {
    10
}

fn default_active_window_minutes() -> u64 {
    5
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

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall the scanner or the monitor
    pub fn validate(&self) -> Result<()> {
        if self.scan.probe_line_limit == 0 {
            return Err(Error::Config(
                "scan.probe_line_limit must be at least 1".to_string(),
            ));
        }
        if self.monitor.interval_secs == 0 {
            return Err(Error::Config(
                "monitor.interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/agentlogs/config.toml` (~/.config/agentlogs/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("agentlogs").join("config.toml")
    }

    /// Returns the data directory path (for the message store)
    ///
    /// `$XDG_DATA_HOME/agentlogs/` (~/.local/share/agentlogs/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("agentlogs")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/agentlogs/` (~/.local/state/agentlogs/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("agentlogs")
    }

    /// Returns the message store path, honoring `monitor.database_path`
    pub fn database_path(&self) -> PathBuf {
        self.monitor
            .database_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("messages.db"))
    }
}
