//! Error types for the Atom worker
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - User-friendly messages with suggestions
//! - Exit codes for the CLI
//!
//! Job-local failures (unsupported job, handler failure, closed channel)
//! share this type but are never propagated out of the dispatcher.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for worker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Connection errors (3xx)
    ConnectionFailed = 300,
    ConnectionTimeout = 301,
    ConnectionLost = 303,
    ChannelUnavailable = 305,

    // Protocol and authentication errors (4xx)
    ProtocolMalformed = 401,
    AuthenticationFailed = 403,
    HandshakeRejected = 404,

    // Job execution errors (5xx)
    ExecutionFailed = 500,
    ExecutionTimeout = 501,
    UnsupportedJob = 504,
    InvalidJobPayload = 505,

    // Session errors (6xx)
    NoSession = 600,
    SessionStoreCorrupt = 601,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10,
            200..=299 => 20,
            300..=399 => 30,
            400..=499 => 40,
            500..=599 => 50,
            600..=699 => 60,
            900..=999 => 90,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for the worker
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // ─────────────────────────────────────────────────────────────
    // Connection Errors
    // ─────────────────────────────────────────────────────────────

    /// Connection failed
    #[error("Failed to connect to {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    /// Connection timeout
    #[error("Connection to {url} timed out after {timeout_secs}s")]
    ConnectionTimeout { url: String, timeout_secs: u64 },

    /// Connection lost
    #[error("Lost connection to coordinator: {message}")]
    ConnectionLost { message: String },

    /// Emit attempted while the channel is not connected
    #[error("Channel unavailable: connection is {state}")]
    ChannelUnavailable { state: String },

    // ─────────────────────────────────────────────────────────────
    // Protocol / Authentication Errors
    // ─────────────────────────────────────────────────────────────

    /// Malformed message
    #[error("Malformed protocol message: {message}")]
    ProtocolMalformed { message: String },

    /// Login rejected or auth service unreachable
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Coordinator refused the websocket handshake
    #[error("Coordinator rejected the handshake (HTTP {status}): {message}")]
    HandshakeRejected { status: u16, message: String },

    // ─────────────────────────────────────────────────────────────
    // Job Errors
    // ─────────────────────────────────────────────────────────────

    /// No handler registered for the job type
    #[error("Unsupported service request type: {service_name:?}")]
    UnsupportedJob { service_name: String },

    /// Request details could not be interpreted by the handler
    #[error("Invalid job payload: {message}")]
    InvalidJobPayload { message: String },

    /// A handler reported failure
    #[error("Handler {service_name} failed: {message}")]
    HandlerFailed { service_name: String, message: String },

    /// Job exceeded the configured timeout
    #[error("Job {service_id} timed out after {timeout_secs}s")]
    JobTimeout { service_id: String, timeout_secs: u64 },

    // ─────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────

    /// No stored session to connect with
    #[error("No login found")]
    NoSession,

    /// Session file exists but cannot be decoded
    #[error("Session store {path} is corrupt: {message}")]
    SessionStoreCorrupt { path: PathBuf, message: String },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,
            Error::Config(_) => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,
            Error::Json(_) => ErrorCode::ProtocolMalformed,
            Error::WebSocket(_) => ErrorCode::ConnectionFailed,
            Error::Http(_) => ErrorCode::ConnectionFailed,

            Error::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Error::ConnectionTimeout { .. } => ErrorCode::ConnectionTimeout,
            Error::ConnectionLost { .. } => ErrorCode::ConnectionLost,
            Error::ChannelUnavailable { .. } => ErrorCode::ChannelUnavailable,

            Error::ProtocolMalformed { .. } => ErrorCode::ProtocolMalformed,
            Error::AuthenticationFailed { .. } => ErrorCode::AuthenticationFailed,
            Error::HandshakeRejected { .. } => ErrorCode::HandshakeRejected,

            Error::UnsupportedJob { .. } => ErrorCode::UnsupportedJob,
            Error::InvalidJobPayload { .. } => ErrorCode::InvalidJobPayload,
            Error::HandlerFailed { .. } => ErrorCode::ExecutionFailed,
            Error::JobTimeout { .. } => ErrorCode::ExecutionTimeout,

            Error::NoSession => ErrorCode::NoSession,
            Error::SessionStoreCorrupt { .. } => ErrorCode::SessionStoreCorrupt,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Transport-level problems a supervisor may retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed { .. }
                | Error::ConnectionTimeout { .. }
                | Error::ConnectionLost { .. }
                | Error::WebSocket(_)
                | Error::Io(_)
        )
    }

    /// Check if the error is fatal (worker should exit)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::Config(_)
                | Error::AuthenticationFailed { .. }
                | Error::HandshakeRejected { .. }
                | Error::NoSession
                | Error::SessionStoreCorrupt { .. }
                | Error::Internal(_)
        )
    }

    /// Errors confined to a single job; they never end the connection
    pub fn is_job_local(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedJob { .. }
                | Error::InvalidJobPayload { .. }
                | Error::HandlerFailed { .. }
                | Error::JobTimeout { .. }
                | Error::ChannelUnavailable { .. }
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'atom-worker config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'atom-worker config validate' to see details."
            ),
            Error::ConfigValidation { .. } | Error::Config(_) => Some(
                "Review the configuration file and fix the invalid values."
            ),

            Error::ConnectionFailed { .. } => Some(
                "Check your network connection and verify the coordinator URL is correct."
            ),
            Error::ConnectionTimeout { .. } => Some(
                "The coordinator may be down or unreachable. Check your firewall settings."
            ),
            Error::ConnectionLost { .. } => Some(
                "Connection was interrupted. Enable coordinator.auto_reconnect to reconnect automatically."
            ),

            Error::AuthenticationFailed { .. } => Some(
                "Verify your email and password, then run 'atom-worker login' again."
            ),
            Error::HandshakeRejected { .. } => Some(
                "Your session token was refused. Run 'atom-worker login' to obtain a new one."
            ),

            Error::NoSession => Some(
                "Please login using 'atom-worker login --email <EMAIL>'."
            ),
            Error::SessionStoreCorrupt { .. } => Some(
                "Delete the session file and log in again."
            ),

            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!(
            "\x1b[31mError [{}]\x1b[0m: {}\n",
            self.code().as_str(),
            self
        );

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn config_parse(message: impl Into<String>) -> Self {
        Error::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        let field = field.into();
        Error::ConfigValidation {
            message: format!("{}: {}", field, message.into()),
            field: Some(field),
        }
    }

    pub fn connection_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConnectionFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Error::AuthenticationFailed {
            message: message.into(),
        }
    }

    pub fn handler_failed(service_name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::HandlerFailed {
            service_name: service_name.into(),
            message: message.into(),
        }
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Error::InvalidJobPayload {
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
