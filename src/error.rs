//! Error types for command-scheduler
//!
//! This module provides error handling for the library, including:
//! - The crate-wide [`Error`] used by the admission API, persistence and the API server
//! - [`ExecutionError`], the hard/soft classification of a strategy failure
//! - HTTP status code mapping for API integration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for command-scheduler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for command-scheduler
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_general_workers")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Command not found in any queue
    #[error("command not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new commands
    #[error("shutdown in progress: not accepting new commands")]
    ShuttingDown,

    /// An [`AsyncTask`](crate::task::AsyncTask) was asked to do something its state forbids
    #[error("cannot {operation} task in state {status}")]
    InvalidTaskState {
        /// The operation that was attempted (e.g., "execute")
        operation: String,
        /// The task status that prevents the operation
        status: String,
    },

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A persisted row could not be turned back into a command
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// Failure of a single command execution, as reported by a strategy
///
/// Hard errors ([`Auth`](Self::Auth), [`Parse`](Self::Parse)) stop retries immediately.
/// Everything else is soft and consumes one retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// Credentials were rejected by the server
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Malformed or unexpected server or local data
    #[error("parse error: {0}")]
    Parse(String),

    /// Transient network or storage failure
    #[error("I/O error: {0}")]
    Io(String),

    /// The server asked us to back off
    #[error("throttled: {message}")]
    Throttled {
        /// Server-provided explanation
        message: String,
        /// How long to wait before trying again
        retry_after: Duration,
    },

    /// The worker exceeded its execution budget and was cancelled mid-command
    #[error("execution cancelled after {elapsed:?}")]
    Stale {
        /// How long the command had been executing
        elapsed: Duration,
    },
}

/// Hard vs soft classification of an [`ExecutionError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Terminal, never retried automatically
    Hard,
    /// Retryable
    Soft,
}

impl ExecutionError {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            ExecutionError::Auth(_) | ExecutionError::Parse(_) => ErrorClass::Hard,
            ExecutionError::Io(_) | ExecutionError::Throttled { .. } | ExecutionError::Stale { .. } => {
                ErrorClass::Soft
            }
        }
    }

    /// Returns true for auth and parse failures
    pub fn is_hard(&self) -> bool {
        self.class() == ErrorClass::Hard
    }
}

/// API error response format
///
/// ```json
/// {
///   "error": {
///     "code": "not_found",
///     "message": "command not found: 123"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "unauthorized" error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } => 400,
            Error::NotFound(_) => 404,
            Error::InvalidTaskState { .. } => 409,
            Error::ShuttingDown => 503,
            Error::Database(_)
            | Error::Sqlx(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::ApiServerError(_)
            | Error::Other(_) => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::InvalidTaskState { .. } => "invalid_task_state",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({ "key": key })),
            Error::InvalidTaskState { operation, status } => Some(serde_json::json!({
                "operation": operation,
                "status": status,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
