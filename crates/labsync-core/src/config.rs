//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/labsync/config.toml)
//! 3. Environment variables (LABSYNC_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable prefix
const ENV_PREFIX: &str = "LABSYNC";

/// Port the experiment server listens on unless told otherwise
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Fixed delay between a close and the next connection attempt
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 2000;

/// How long a transport error may go without a close before we force one
pub const DEFAULT_ERROR_GRACE_MS: u64 = 5000;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for local state (session identity, logs)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Experiment server host or IP (optional, usually entered at startup)
    #[serde(default)]
    pub server_host: Option<String>,

    /// Experiment server port
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Use `wss://` instead of `ws://`
    #[serde(default)]
    pub secure: bool,

    /// Delay before reconnecting after a close, in milliseconds
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Grace period for a close to follow a transport error, in milliseconds
    #[serde(default = "default_error_grace_ms")]
    pub error_grace_ms: u64,

    /// Log file used when LABSYNC_LOG is set (defaults to {data_dir}/debug.log)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            server_host: None,
            server_port: DEFAULT_SERVER_PORT,
            secure: false,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            error_grace_ms: DEFAULT_ERROR_GRACE_MS,
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (LABSYNC_DATA_DIR, LABSYNC_HOST, LABSYNC_PORT, LABSYNC_SECURE)
    /// 2. Config file (~/.config/labsync/config.toml or LABSYNC_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring a path given on the command line
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // Empty string clears the host
        if let Ok(val) = std::env::var(format!("{}_HOST", ENV_PREFIX)) {
            self.server_host = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_PORT", ENV_PREFIX)) {
            match val.parse() {
                Ok(port) => self.server_port = port,
                Err(_) => tracing::warn!("Ignoring invalid {}_PORT: {}", ENV_PREFIX, val),
            }
        }

        if let Ok(val) = std::env::var(format!("{}_SECURE", ENV_PREFIX)) {
            self.secure = val.eq_ignore_ascii_case("true") || val == "1";
        }
    }

    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default config file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with LABSYNC_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("labsync")
            .join("config.toml")
    }

    /// Get the path to the persisted session identity
    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    /// Get the log file path, falling back to the data directory
    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("debug.log"))
    }

    /// WebSocket URL of the experiment server, if a host is configured
    pub fn server_url(&self) -> Option<String> {
        self.server_host
            .as_deref()
            .map(|host| server_url(host, self.server_port, self.secure))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn error_grace(&self) -> Duration {
        Duration::from_millis(self.error_grace_ms)
    }
}

/// Build the experiment server WebSocket URL
pub fn server_url(host: &str, port: u16, secure: bool) -> String {
    let scheme = if secure { "wss" } else { "ws" };
    format!("{}://{}:{}/ws", scheme, host, port)
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("labsync")
}

fn default_server_port() -> u16 {
    DEFAULT_SERVER_PORT
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

fn default_error_grace_ms() -> u64 {
    DEFAULT_ERROR_GRACE_MS
}
