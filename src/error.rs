//! Error types for realtime-link
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - Retry / fatal classification used by the connection manager
//! - User-facing hints for the CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for client operations
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
    IoNotFound = 203,

    // Connection errors (3xx)
    TransportFailed = 300,
    HeartbeatTimeout = 301,
    ReconnectExhausted = 302,
    InvalidUrl = 303,

    // Protocol errors (4xx)
    ProtocolMalformed = 401,
    AuthenticationFailed = 403,

    // Client backpressure errors (5xx)
    QueueOverflow = 500,
    ClientClosed = 501,

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

/// Main error type for the client
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

    // ─────────────────────────────────────────────────────────────
    // IO / Serialization Errors
    // ─────────────────────────────────────────────────────────────

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

    /// JSON error outside of inbound frame decoding
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid endpoint URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    // ─────────────────────────────────────────────────────────────
    // Client Errors
    // ─────────────────────────────────────────────────────────────

    /// Socket-level failure reported by the transport
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Malformed inbound frame
    #[error("Malformed frame: {message}")]
    Parse { message: String },

    /// Handshake rejected by the server
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// Outbound buffer full
    #[error("Outbound queue full (capacity {capacity}), message rejected")]
    QueueOverflow { capacity: usize },

    /// Automatic reconnection gave up
    #[error("Reconnection failed after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// No pong arrived within the watchdog window
    #[error("Heartbeat timeout: no pong within {waited_ms}ms")]
    HeartbeatTimeout { waited_ms: u64 },

    /// The client driver is no longer running
    #[error("Client has been shut down")]
    ChannelClosed,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,

            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,
            Error::Json(_) => ErrorCode::ProtocolMalformed,
            Error::Url(_) => ErrorCode::InvalidUrl,
            Error::WebSocket(_) => ErrorCode::TransportFailed,

            Error::Transport { .. } => ErrorCode::TransportFailed,
            Error::Parse { .. } => ErrorCode::ProtocolMalformed,
            Error::Auth { .. } => ErrorCode::AuthenticationFailed,
            Error::QueueOverflow { .. } => ErrorCode::QueueOverflow,
            Error::ReconnectExhausted { .. } => ErrorCode::ReconnectExhausted,
            Error::HeartbeatTimeout { .. } => ErrorCode::HeartbeatTimeout,
            Error::ChannelClosed => ErrorCode::ClientClosed,
            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the reconnect scheduler may retry after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. }
                | Error::WebSocket(_)
                | Error::HeartbeatTimeout { .. }
                | Error::Io(_)
        )
    }

    /// Whether the error needs caller intervention before anything else happens
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::Url(_)
                | Error::Auth { .. }
                | Error::ReconnectExhausted { .. }
                | Error::Internal(_)
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => {
                Some("Run 'realtime-link config init' to create a default configuration file.")
            }
            Error::ConfigParse { .. } => {
                Some("Check the TOML syntax. 'realtime-link config validate' reports the details.")
            }
            Error::ConfigValidation { .. } => {
                Some("Fix the reported value in the configuration file or the REALTIME_LINK_* environment.")
            }
            Error::Url(_) => Some("The endpoint must be a ws:// or wss:// URL."),
            Error::Transport { .. } | Error::WebSocket(_) => {
                Some("Check network connectivity and that the realtime endpoint is reachable.")
            }
            Error::Auth { .. } => {
                Some("The server rejected the session token. Obtain a fresh token and connect again.")
            }
            Error::ReconnectExhausted { .. } => {
                Some("Automatic reconnection stopped. Call connect again once the server is reachable.")
            }
            Error::QueueOverflow { .. } => {
                Some("Too many messages were sent while offline. Raise 'message_queue_size' or retry later.")
            }
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!("\x1b[31mError [{}]\x1b[0m: {}\n", self.code().as_str(), self);

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
    /// Create a config validation error
    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
        }
    }

    /// Create a frame parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn auth(message: impl Into<String>) -> Self {
        Error::Auth {
            message: message.into(),
        }
    }
}
