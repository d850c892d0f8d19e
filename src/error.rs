//! Error types for SignalHub
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - Transient/fatal classification used by the routing core
//! - User-friendly messages with suggestions for the CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for relay operations
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

    // Directory store errors (3xx)
    StoreFailed = 300,
    StoreUnavailable = 301,

    // Protocol errors (4xx)
    ProtocolMalformed = 400,
    BatchDecode = 401,
    CompactDecode = 402,

    // Delivery errors (5xx)
    PollConflict = 500,

    // Internal errors (9xx)
    ServerFailed = 900,
    InternalError = 901,
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
            300..=399 => 30, // Store errors
            400..=499 => 40, // Protocol errors
            500..=599 => 50, // Delivery errors
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

/// Main error type for the relay
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

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Directory Store Errors
    // ─────────────────────────────────────────────────────────────

    /// A store round-trip failed (network, timeout, protocol)
    #[error("Directory store {op} failed: {message}")]
    Store { op: &'static str, message: String },

    /// The store breaker is open; the call was not attempted
    #[error("Directory store unavailable (breaker open)")]
    StoreUnavailable,

    // ─────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────

    /// Malformed client message
    #[error("Malformed protocol message: {message}")]
    ProtocolMalformed { message: String },

    /// Batch blob could not be decoded
    #[error("Failed to decode signal batch: {0}")]
    BatchDecode(#[from] prost::DecodeError),

    /// Compacted payload could not be expanded
    #[error("Failed to decode compacted payload: {message}")]
    CompactDecode { message: String },

    // ─────────────────────────────────────────────────────────────
    // Delivery Errors
    // ─────────────────────────────────────────────────────────────

    /// A long-poll request is already outstanding for this peer
    #[error("Peer {peer_id} already has an outstanding poll")]
    PollConflict { peer_id: String },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// HTTP server bind/serve failure
    #[error("Server error on {bind}: {message}")]
    Server { bind: String, message: String },

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

            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,
            Error::Json(_) => ErrorCode::ProtocolMalformed,

            Error::Store { .. } => ErrorCode::StoreFailed,
            Error::StoreUnavailable => ErrorCode::StoreUnavailable,

            Error::ProtocolMalformed { .. } => ErrorCode::ProtocolMalformed,
            Error::BatchDecode(_) => ErrorCode::BatchDecode,
            Error::CompactDecode { .. } => ErrorCode::CompactDecode,

            Error::PollConflict { .. } => ErrorCode::PollConflict,

            Error::Server { .. } => ErrorCode::ServerFailed,
            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Transient store failure: trips the directory breaker
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Store { .. } | Error::StoreUnavailable)
    }

    /// Check if the error is fatal (process should exit)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::Config(_)
                | Error::Server { .. }
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
                "Run 'signalhub config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'signalhub config validate' to see details."
            ),
            Error::ConfigValidation { .. } | Error::Config(_) => Some(
                "Review the configuration file and fix the invalid values."
            ),
            Error::Store { .. } | Error::StoreUnavailable => Some(
                "Check that the directory store is reachable at [directory].url."
            ),
            Error::Server { .. } => Some(
                "Another process may already be listening on this address. Change [server].bind."
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
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Error::ConfigNotFound { path: path.into() }
    }

    /// Create a config parse error
    pub fn config_parse(message: impl Into<String>, source: Option<toml::de::Error>) -> Self {
        Error::ConfigParse {
            message: message.into(),
            source,
        }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a store error for the named operation
    pub fn store(op: &'static str, message: impl fmt::Display) -> Self {
        Error::Store {
            op,
            message: message.to_string(),
        }
    }

    /// Create a malformed message error
    pub fn malformed(message: impl Into<String>) -> Self {
        Error::ProtocolMalformed {
            message: message.into(),
        }
    }

    /// Create a compaction decode error
    pub fn compact_decode(message: impl Into<String>) -> Self {
        Error::CompactDecode {
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::ConfigNotFound.as_str(), "E100");
        assert_eq!(ErrorCode::StoreFailed.as_str(), "E300");
        assert_eq!(ErrorCode::InternalError.as_str(), "E901");
    }

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(ErrorCode::ConfigNotFound.exit_code(), 10);
        assert_eq!(ErrorCode::IoRead.exit_code(), 20);
        assert_eq!(ErrorCode::StoreUnavailable.exit_code(), 30);
        assert_eq!(ErrorCode::PollConflict.exit_code(), 50);
        assert_eq!(ErrorCode::ServerFailed.exit_code(), 90);
    }

    #[test]
    fn test_store_errors_are_transient() {
        assert!(Error::store("GET", "connection reset").is_transient());
        assert!(Error::StoreUnavailable.is_transient());
        assert!(!Error::malformed("not an object").is_transient());
        assert!(!Error::config_not_found("/x").is_transient());
    }

    #[test]
    fn test_error_fatal() {
        assert!(Error::config_not_found("/test").is_fatal());
        assert!(Error::config_field_invalid("server.bind", "empty").is_fatal());
        assert!(!Error::store("RPUSH", "timeout").is_fatal());
        assert!(!Error::PollConflict { peer_id: "abcdef".into() }.is_fatal());
    }

    #[test]
    fn test_store_error_display() {
        let err = Error::store("BLPOP", "connection refused");
        assert_eq!(
            err.to_string(),
            "Directory store BLPOP failed: connection refused"
        );
        assert_eq!(err.code(), ErrorCode::StoreFailed);
    }

    #[test]
    fn test_format_for_terminal() {
        let formatted = Error::config_not_found("/test/signalhub.toml").format_for_terminal();
        assert!(formatted.contains("E100"));
        assert!(formatted.contains("\x1b[31m"));
        assert!(formatted.contains("config init"));
    }

    #[test]
    fn test_format_for_log() {
        let formatted = Error::StoreUnavailable.format_for_log();
        assert!(formatted.contains("[E301]"));
        assert!(!formatted.contains("\x1b["));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert_eq!(err.code(), ErrorCode::IoNotFound);
    }
}
