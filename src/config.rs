//! Configuration system for the Atom worker
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (ATOM_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Main worker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker identity
    pub worker: WorkerSettings,

    /// Auth service settings
    pub auth: AuthSettings,

    /// Coordinator connection settings
    pub coordinator: CoordinatorSettings,

    /// Job dispatch settings
    pub dispatch: DispatchSettings,

    /// Per-handler settings
    pub handlers: HandlerSettings,

    /// Credential store location
    pub session: SessionSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Worker identity settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Human-readable worker name (defaults to the hostname)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Auth service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Base URL of the HTTP API that exposes `/users/login`
    pub api_url: String,

    /// Login request timeout in seconds
    pub timeout_secs: u64,
}

/// Coordinator connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    /// Coordinator WebSocket URL
    pub url: String,

    /// Handshake timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Reconnect after transport loss
    pub auto_reconnect: bool,

    /// Initial reconnect delay in milliseconds
    pub reconnect_interval_ms: u64,

    /// Upper bound for the reconnect delay in milliseconds
    pub max_reconnect_delay_ms: u64,

    /// Maximum reconnection attempts (0 = infinite)
    pub max_reconnect_attempts: u32,

    /// WebSocket ping interval in milliseconds (0 = disabled)
    pub ping_interval_ms: u64,

    /// Greeting sent after connecting (empty = none)
    pub greeting: String,
}

/// Job dispatch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Jobs allowed in flight at once (1 = strictly sequential)
    pub max_concurrent_jobs: usize,

    /// Per-job timeout in seconds (0 = no timeout)
    pub job_timeout_secs: u64,

    /// Inbound job queue size
    pub queue_size: usize,

    /// Responses kept while disconnected (0 = drop immediately)
    pub outbox_capacity: usize,
}

/// Per-handler settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerSettings {
    pub seo: SeoSettings,
}

/// SEO lookup handler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeoSettings {
    /// Register the "SEO" handler
    pub enabled: bool,

    /// Search results page; the term is sent as the `q` query parameter
    pub search_url: String,

    /// User agent for the search request
    pub user_agent: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// CSS selector matching result links
    pub link_selector: String,
}

/// Credential store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Path of the JSON session file
    pub store_path: String,
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

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            api_url: "http://atom.atomnetwork.xyz:3000/api".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            url: "ws://atom.atomnetwork.xyz:3000".to_string(),
            connect_timeout_ms: 30000,
            auto_reconnect: true,
            reconnect_interval_ms: 5000,
            max_reconnect_delay_ms: 60000,
            max_reconnect_attempts: 0, // Infinite
            ping_interval_ms: 20000,
            greeting: "Hello WebSocket server!".to_string(),
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 1,
            job_timeout_secs: 0,
            queue_size: 100,
            outbox_capacity: 32,
        }
    }
}

impl Default for SeoSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            search_url: "https://www.google.com/search".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/85.0.4183.121 Safari/537.36".to_string(),
            timeout_secs: 30,
            link_selector: r#"a[jsname="UWckNb"]"#.to_string(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            store_path: "~/.atom/worker/sessions.json".to_string(),
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

impl CoordinatorSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_ms > 0).then(|| Duration::from_millis(self.ping_interval_ms))
    }
}

impl DispatchSettings {
    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_secs > 0).then(|| Duration::from_secs(self.job_timeout_secs))
    }
}

impl WorkerConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path).map_err(|e| Error::IoRead {
                path: path.clone(),
                source: e,
            })?;
            config = toml::from_str(&content).map_err(|e| Error::ConfigParse {
                message: format!("{}: {}", path.display(), e.message()),
                source: Some(e),
            })?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        config.apply_env_overrides();
        config.expand_paths();
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::ConfigNotFound { path });
        }

        let search_paths = [
            Some(PathBuf::from("atom-worker.toml")),
            Some(PathBuf::from("config.toml")),
            dirs::config_dir().map(|p| p.join("atom").join("worker.toml")),
            dirs::home_dir().map(|p| p.join(".atom").join("worker.toml")),
            Some(PathBuf::from("/etc/atom/worker.toml")),
        ];

        for path in search_paths.iter().flatten() {
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
        if let Ok(val) = std::env::var("ATOM_WORKER_NAME") {
            self.worker.name = Some(val);
        }

        if let Ok(val) = std::env::var("ATOM_API_URL") {
            self.auth.api_url = val;
        }

        if let Ok(val) = std::env::var("ATOM_COORDINATOR_URL") {
            self.coordinator.url = val;
        }
        if let Some(flag) = env_flag("ATOM_AUTO_RECONNECT") {
            self.coordinator.auto_reconnect = flag;
        }
        if let Some(n) = env_parse("ATOM_RECONNECT_INTERVAL_MS") {
            self.coordinator.reconnect_interval_ms = n;
        }
        if let Some(n) = env_parse("ATOM_MAX_RECONNECT_ATTEMPTS") {
            self.coordinator.max_reconnect_attempts = n;
        }

        if let Some(n) = env_parse("ATOM_MAX_CONCURRENT_JOBS") {
            self.dispatch.max_concurrent_jobs = n;
        }
        if let Some(n) = env_parse("ATOM_JOB_TIMEOUT_SECS") {
            self.dispatch.job_timeout_secs = n;
        }

        if let Some(flag) = env_flag("ATOM_SEO_ENABLED") {
            self.handlers.seo.enabled = flag;
        }

        if let Ok(val) = std::env::var("ATOM_SESSION_STORE") {
            self.session.store_path = val;
        }

        if let Ok(val) = std::env::var("ATOM_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("ATOM_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Some(flag) = env_flag("ATOM_LOG_JSON") {
            self.logging.json_format = flag;
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        self.session.store_path = expand_path(&self.session.store_path);

        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let url = &self.coordinator.url;
        if url.is_empty() {
            return Err(Error::config_field_invalid(
                "coordinator.url",
                "Coordinator URL cannot be empty",
            ));
        }
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(Error::config_field_invalid(
                "coordinator.url",
                "Coordinator URL must start with ws:// or wss://",
            ));
        }

        let api = &self.auth.api_url;
        if !api.starts_with("http://") && !api.starts_with("https://") {
            return Err(Error::config_field_invalid(
                "auth.api_url",
                "Auth API URL must start with http:// or https://",
            ));
        }

        if self.dispatch.max_concurrent_jobs == 0 {
            return Err(Error::config_field_invalid(
                "dispatch.max_concurrent_jobs",
                "max_concurrent_jobs must be at least 1",
            ));
        }

        if self.dispatch.queue_size == 0 {
            return Err(Error::config_field_invalid(
                "dispatch.queue_size",
                "queue_size must be at least 1",
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

    /// Worker name, falling back to the hostname
    pub fn worker_name(&self) -> String {
        self.worker.name.clone().unwrap_or_else(|| {
            let host = hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string());
            format!("Atom Worker ({})", host)
        })
    }

    pub fn session_store_path(&self) -> PathBuf {
        PathBuf::from(&self.session.store_path)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".atom")
                .join("worker.toml")
        });

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
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

    write_default_config(&config_path)?;
    Ok(config_path)
}

fn write_default_config(path: &Path) -> Result<()> {
    fs::write(path, DEFAULT_CONFIG).map_err(|e| Error::IoWrite {
        path: path.to_path_buf(),
        source: e,
    })
}

const DEFAULT_CONFIG: &str = r#"# Atom Worker Configuration

[worker]
# Human-readable worker name (defaults to the hostname)
# name = "My Worker"

[auth]
# HTTP API used by `atom-worker login`
api_url = "http://atom.atomnetwork.xyz:3000/api"
timeout_secs = 30

[coordinator]
# Coordinator WebSocket URL
url = "ws://atom.atomnetwork.xyz:3000"

# Handshake timeout in milliseconds
connect_timeout_ms = 30000

# Reconnect after the connection drops (a rejected token is never retried)
auto_reconnect = true
reconnect_interval_ms = 5000
max_reconnect_delay_ms = 60000

# Maximum reconnection attempts (0 = infinite)
max_reconnect_attempts = 0

# WebSocket ping interval in milliseconds (0 = disabled)
ping_interval_ms = 20000

# Greeting sent after connecting (empty = none)
greeting = "Hello WebSocket server!"

[dispatch]
# Jobs in flight at once (1 = one job at a time, in arrival order)
max_concurrent_jobs = 1

# Per-job timeout in seconds (0 = none)
job_timeout_secs = 0

queue_size = 100

# Responses kept while disconnected and flushed on reconnect (0 = drop)
outbox_capacity = 32

[handlers.seo]
enabled = true
search_url = "https://www.google.com/search"
timeout_secs = 30
link_selector = 'a[jsname="UWckNb"]'

[session]
# Where login tokens are stored
store_path = "~/.atom/worker/sessions.json"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.atom/worker/logs/worker.log"

max_file_size_mb = 100
max_files = 5
json_format = false
"#;
