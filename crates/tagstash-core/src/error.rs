//! Error types for tagstash.
//!
//! A missing key is not an error: reads return [`crate::store::Lookup::NotFound`]
//! and removals return `false`. Everything here is a genuine failure that the
//! caller has to see.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the tagstash library.
#[derive(Debug, Error)]
pub enum TagStashError {
    // Store errors
    #[error("Store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Unsupported cache operations
    #[error("Not implemented: {operation}")]
    NotImplemented { operation: &'static str },

    // Index errors
    #[error("Invalid {field} {value:?}: {reason}")]
    InvalidToken {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("Corrupt index blob at {key}: {message}")]
    CorruptIndex { key: String, message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unknown cleaning mode: {0}")]
    InvalidCleaningMode(String),
}

/// Result type alias for tagstash operations.
pub type Result<T> = std::result::Result<T, TagStashError>;

impl From<std::io::Error> for TagStashError {
    fn from(err: std::io::Error) -> Self {
        TagStashError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for TagStashError {
    fn from(err: serde_json::Error) -> Self {
        TagStashError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for TagStashError {
    fn from(err: rusqlite::Error) -> Self {
        TagStashError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl TagStashError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        TagStashError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Error for a store whose internal lock was poisoned by a panicking writer.
    pub(crate) fn lock_poisoned(what: &str) -> Self {
        TagStashError::StoreUnavailable {
            message: format!("{} lock poisoned", what),
        }
    }

    /// Check if this error should trigger a retry.
    ///
    /// Only connectivity failures qualify; a SQLite busy error is already
    /// retried internally by the busy timeout.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TagStashError::StoreUnavailable { .. })
    }

    /// Check if this error marks an operation the cache declines to support.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, TagStashError::NotImplemented { .. })
    }
}
