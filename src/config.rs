//! Configuration for realtime-link
//!
//! Sources, highest precedence first:
//! 1. CLI arguments
//! 2. Environment variables (REALTIME_LINK_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::client::ClientConfig;
use crate::error::{Error, Result};

/// File name searched for in the working directory
pub const LOCAL_CONFIG_FILE: &str = "realtime-link.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Connection behaviour
    pub client: ClientSettings,

    /// Session credentials
    pub auth: AuthSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Connection settings, durations in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Realtime endpoint (ws:// or wss://)
    pub url: String,

    /// Sub-protocols offered in the handshake
    #[serde(default)]
    pub protocols: Vec<String>,

    /// Maximum automatic reconnect attempts (0 = never retry)
    pub reconnect_attempts: u32,

    /// Base reconnect delay, doubled per attempt
    pub reconnect_interval_ms: u64,

    /// Cap for a single reconnect delay
    pub max_reconnect_interval_ms: u64,

    /// Interval between pings
    pub heartbeat_interval_ms: u64,

    /// Pong deadline; defaults to the heartbeat interval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_timeout_ms: Option<u64>,

    /// Handshake deadline
    pub connect_timeout_ms: u64,

    /// Frames held while disconnected
    pub message_queue_size: usize,

    /// Connect as soon as the client is created
    pub auto_connect: bool,
}

/// Credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Session token sent in the `authenticate` frame
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
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

    /// Rotate hourly below this size, daily otherwise
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        let defaults = ClientConfig::default();
        Self {
            url: defaults.url,
            protocols: defaults.protocols,
            reconnect_attempts: defaults.reconnect_attempts,
            reconnect_interval_ms: defaults.reconnect_interval.as_millis() as u64,
            max_reconnect_interval_ms: defaults.max_reconnect_interval.as_millis() as u64,
            heartbeat_interval_ms: defaults.heartbeat_interval.as_millis() as u64,
            heartbeat_timeout_ms: None,
            connect_timeout_ms: defaults.connect_timeout.as_millis() as u64,
            message_queue_size: defaults.message_queue_size,
            auto_connect: defaults.auto_connect,
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

impl ClientSettings {
    /// Runtime config for a client
    pub fn to_client_config(&self) -> ClientConfig {
        let heartbeat_interval = Duration::from_millis(self.heartbeat_interval_ms);
        ClientConfig {
            url: self.url.clone(),
            protocols: self.protocols.clone(),
            reconnect_attempts: self.reconnect_attempts,
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            max_reconnect_interval: Duration::from_millis(self.max_reconnect_interval_ms),
            heartbeat_interval,
            heartbeat_timeout: self
                .heartbeat_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(heartbeat_interval),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            message_queue_size: self.message_queue_size,
            auto_connect: self.auto_connect,
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = match Self::find_config_file(config_path)? {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.expand_paths();
        config.validate()?;

        Ok(config)
    }

    /// Parse one TOML file without applying overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading configuration file");
        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content).map_err(|e| Error::ConfigParse {
            message: format!("{}: {}", path.display(), e.message()),
            source: Some(e),
        })?;
        info!(path = %path.display(), "Configuration loaded from file");
        Ok(config)
    }

    /// Locate the configuration file.
    ///
    /// An explicit path must exist; otherwise the standard locations are
    /// searched and `None` means defaults.
    pub fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::ConfigNotFound { path });
        }

        for path in search_paths() {
            if path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    fn apply_env_overrides(&mut self) {
        // Client settings
        if let Ok(val) = std::env::var("REALTIME_LINK_URL") {
            self.client.url = val;
        }
        if let Ok(val) = std::env::var("REALTIME_LINK_PROTOCOLS") {
            self.client.protocols = val
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
        }
        if let Ok(val) = std::env::var("REALTIME_LINK_RECONNECT_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                self.client.reconnect_attempts = n;
            }
        }
        if let Ok(val) = std::env::var("REALTIME_LINK_RECONNECT_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                self.client.reconnect_interval_ms = n;
            }
        }
        if let Ok(val) = std::env::var("REALTIME_LINK_MAX_RECONNECT_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                self.client.max_reconnect_interval_ms = n;
            }
        }
        if let Ok(val) = std::env::var("REALTIME_LINK_HEARTBEAT_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                self.client.heartbeat_interval_ms = n;
            }
        }
        if let Ok(val) = std::env::var("REALTIME_LINK_HEARTBEAT_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.client.heartbeat_timeout_ms = Some(n);
            }
        }
        if let Ok(val) = std::env::var("REALTIME_LINK_MESSAGE_QUEUE_SIZE") {
            if let Ok(n) = val.parse() {
                self.client.message_queue_size = n;
            }
        }

        // Auth
        if let Ok(val) = std::env::var("REALTIME_LINK_TOKEN") {
            self.auth.token = Some(val).filter(|t| !t.is_empty());
        }

        // Logging settings
        if let Ok(val) = std::env::var("REALTIME_LINK_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("REALTIME_LINK_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("REALTIME_LINK_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }
    }

    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let client = &self.client;

        let url = Url::parse(&client.url).map_err(|e| {
            Error::config_field_invalid("client.url", format!("'{}' is not a valid URL: {}", client.url, e))
        })?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(Error::config_field_invalid(
                "client.url",
                "URL must start with ws:// or wss://",
            ));
        }

        if client.reconnect_interval_ms == 0 {
            return Err(Error::config_field_invalid(
                "client.reconnect_interval_ms",
                "reconnect_interval_ms must be greater than zero",
            ));
        }
        if client.max_reconnect_interval_ms < client.reconnect_interval_ms {
            return Err(Error::config_field_invalid(
                "client.max_reconnect_interval_ms",
                "max_reconnect_interval_ms must not be smaller than reconnect_interval_ms",
            ));
        }
        if client.heartbeat_interval_ms == 0 || client.heartbeat_timeout_ms == Some(0) {
            return Err(Error::config_field_invalid(
                "client.heartbeat_interval_ms",
                "heartbeat interval and timeout must be greater than zero",
            ));
        }
        if client.connect_timeout_ms == 0 {
            return Err(Error::config_field_invalid(
                "client.connect_timeout_ms",
                "connect_timeout_ms must be greater than zero",
            ));
        }
        if client.message_queue_size == 0 {
            return Err(Error::config_field_invalid(
                "client.message_queue_size",
                "message_queue_size must be at least 1",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }
}

/// Standard configuration locations, in search order
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("realtime-link").join("config.toml"));
    }
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".realtime-link").join("config.toml"));
    }
    paths
}

/// Where `config init` writes when no path is given
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("realtime-link"))
        .or_else(|| dirs::home_dir().map(|h| h.join(".realtime-link")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config.toml")
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or(std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Write a commented default configuration file; returns its path
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(default_config_path);

    if config_path.exists() && !force {
        return Err(Error::config_validation(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Default configuration with comments
pub fn generate_default_config() -> String {
    r#"# realtime-link configuration

[client]
# Realtime endpoint
url = "ws://localhost:3001/realtime"

# Sub-protocols offered during the handshake
protocols = []

# Automatic reconnect attempts after an unexpected close (0 = never retry)
reconnect_attempts = 5

# Base reconnect delay in milliseconds; attempt n waits base * 2^(n-1)
reconnect_interval_ms = 3000

# Upper bound for a single reconnect delay in milliseconds
max_reconnect_interval_ms = 60000

# Ping interval in milliseconds
heartbeat_interval_ms = 30000

# Pong deadline in milliseconds (defaults to the heartbeat interval)
# heartbeat_timeout_ms = 30000

# Handshake deadline in milliseconds
connect_timeout_ms = 30000

# Messages held while disconnected; further sends are rejected
message_queue_size = 100

# Connect as soon as the client starts
auto_connect = true

[auth]
# Session token sent after every connect
# token = "..."

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.realtime-link/logs/client.log"

# Rotate hourly below 10 MB, daily otherwise
max_file_size_mb = 100

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}
