//! Error types for the Magellan executor
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - User-friendly messages with suggestions
//! - Error context and chaining
//! - Exit codes for CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for executor operations
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
    ConnectionLost = 302,

    // Protocol errors (4xx)
    ProtocolVersion = 400,
    ProtocolMalformed = 401,
    PayloadDecode = 402,
    RegistrationRejected = 403,

    // Execution errors (5xx)
    ExecutionFailed = 500,
    CallbackFailed = 501,
    ExecutionCancelled = 502,

    // Provisioning errors (6xx)
    UnsupportedSource = 600,
    FetchFailed = 601,
    ExtractFailed = 602,

    // Internal errors (9xx)
    InternalError = 900,
    NotSupported = 902,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10, // Config errors
            200..=299 => 20, // IO errors
            300..=399 => 30, // Connection errors
            400..=499 => 40, // Protocol errors
            500..=599 => 50, // Execution errors
            600..=699 => 60, // Provisioning errors
            900..=999 => 90, // Internal errors
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for the executor
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Configuration error
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

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

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
    #[error("Lost connection to scheduler: {message}")]
    ConnectionLost { message: String },

    /// Generic connection error
    #[error("Connection error: {0}")]
    Connection(String),

    // ─────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────

    /// Protocol version mismatch
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolVersion { expected: String, actual: String },

    /// Malformed message
    #[error("Malformed protocol message: {message}")]
    ProtocolMalformed { message: String },

    /// Task payload failed to decode or validate
    #[error("Invalid task payload for {task_id}: {message}")]
    PayloadDecode { task_id: String, message: String },

    /// Scheduler rejected the executor registration
    #[error("Registration rejected: {message}")]
    RegistrationRejected { message: String },

    /// Generic protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    // ─────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────

    /// Task execution failed
    #[error("Task execution failed: {message}")]
    ExecutionFailed {
        task_id: Option<String>,
        message: String,
    },

    /// A mutation or fitness callback raised
    #[error("Objective callback failed: {message}")]
    Callback { message: String },

    /// The search was cancelled before it completed
    #[error("Search cancelled before completion")]
    Cancelled,

    // ─────────────────────────────────────────────────────────────
    // Provisioning Errors
    // ─────────────────────────────────────────────────────────────

    /// Package URL scheme is neither git nor a gzip-tar archive
    #[error("Unsupported package source: {url}")]
    UnsupportedSource { url: String },

    /// Package fetch failed (network or git failure)
    #[error("Failed to fetch package {name}: {message}")]
    FetchFailed { name: String, message: String },

    /// Archive extraction failed
    #[error("Failed to extract package {name}: {message}")]
    ExtractFailed { name: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Feature not supported
    #[error("Not supported: {0}")]
    NotSupported(String),

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
            Error::Config(_) => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,
            Error::WebSocket(_) => ErrorCode::ConnectionFailed,

            Error::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Error::ConnectionTimeout { .. } => ErrorCode::ConnectionTimeout,
            Error::ConnectionLost { .. } => ErrorCode::ConnectionLost,
            Error::Connection(_) => ErrorCode::ConnectionFailed,

            Error::ProtocolVersion { .. } => ErrorCode::ProtocolVersion,
            Error::ProtocolMalformed { .. } => ErrorCode::ProtocolMalformed,
            Error::PayloadDecode { .. } => ErrorCode::PayloadDecode,
            Error::RegistrationRejected { .. } => ErrorCode::RegistrationRejected,
            Error::Protocol(_) => ErrorCode::ProtocolMalformed,

            Error::ExecutionFailed { .. } => ErrorCode::ExecutionFailed,
            Error::Callback { .. } => ErrorCode::CallbackFailed,
            Error::Cancelled => ErrorCode::ExecutionCancelled,

            Error::UnsupportedSource { .. } => ErrorCode::UnsupportedSource,
            Error::FetchFailed { .. } => ErrorCode::FetchFailed,
            Error::ExtractFailed { .. } => ErrorCode::ExtractFailed,

            Error::NotSupported(_) => ErrorCode::NotSupported,
            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed { .. }
                | Error::ConnectionTimeout { .. }
                | Error::ConnectionLost { .. }
                | Error::Connection(_)
                | Error::FetchFailed { .. }
                | Error::Io(_)
                | Error::IoRead { .. }
                | Error::IoWrite { .. }
        )
    }

    /// Check if the error is fatal (executor should exit)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::Config(_)
                | Error::RegistrationRejected { .. }
                | Error::ProtocolVersion { .. }
                | Error::Internal(_)
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
                "Run 'magellan-executor config init' to create a default configuration file."
            ),
            Error::Config(_) => Some(
                "Check your configuration file syntax. Run 'magellan-executor config validate' to see details."
            ),

            Error::ConnectionFailed { .. } => Some(
                "Check your network connection and verify the scheduler URL is correct."
            ),
            Error::ConnectionTimeout { .. } => Some(
                "The scheduler may be down or unreachable. Check your firewall settings."
            ),
            Error::ConnectionLost { .. } => Some(
                "Connection was interrupted. The executor will automatically attempt to reconnect."
            ),

            Error::RegistrationRejected { .. } => Some(
                "Verify your executor credentials and that the scheduler accepts this executor version."
            ),
            Error::ProtocolVersion { .. } => Some(
                "Your executor version may be outdated. Run 'magellan-executor version' and check for updates."
            ),

            Error::UnsupportedSource { .. } => Some(
                "Package URLs must use a git:// scheme or be an http(s) link to a .tar.gz archive."
            ),
            Error::FetchFailed { .. } => Some(
                "Check your internet connection and that the package URL is reachable."
            ),
            Error::ExtractFailed { .. } => Some(
                "The downloaded archive may be corrupted. Delete the package cache entry and retry."
            ),

            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let code = self.code();
        let suggestion = self.suggestion();

        let mut output = format!(
            "\x1b[31mError [{}]\x1b[0m: {}\n",
            code.as_str(),
            self
        );

        if let Some(hint) = suggestion {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        let code = self.code();
        format!("[{}] {}", code.as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors (for ergonomic error creation)
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Error::ConfigNotFound {
            path: path.into(),
            source: None,
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConnectionFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a payload decode error for a specific task
    pub fn payload_decode(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::PayloadDecode {
            task_id: task_id.into(),
            message: message.into(),
        }
    }

    /// Create an execution failed error
    pub fn execution_failed(message: impl Into<String>) -> Self {
        Error::ExecutionFailed {
            task_id: None,
            message: message.into(),
        }
    }

    /// Create a callback error
    pub fn callback(message: impl Into<String>) -> Self {
        Error::Callback {
            message: message.into(),
        }
    }

    /// Create a fetch failed error
    pub fn fetch_failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::FetchFailed {
            name: name.into(),
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
