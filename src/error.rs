//! Error types for esgf-dl
//!
//! This module provides the error hierarchy for the library:
//! - A top-level [`Error`] used by every fallible operation
//! - Domain-specific errors for the database layer and the download layer
//! - A classification helper mapping download errors onto per-file
//!   [`DownloadResult`](crate::types::DownloadResult) codes

use std::path::PathBuf;
use thiserror::Error;

use crate::types::DownloadResult;

/// Result type alias for esgf-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for esgf-dl
///
/// Each variant includes enough context to diagnose the failure from the logs
/// alone, since logs and the process exit code are the only user-facing output.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "downloads.n")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Download-related error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Work item failed validation
    #[error("invalid work item {instance_id}: {reason}")]
    InvalidItem {
        /// Instance identifier of the rejected item (may be empty)
        instance_id: String,
        /// Why the item was rejected
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error on a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
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

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Stored payload could not be decoded
    #[error("corrupt payload for {id}: {reason}")]
    CorruptPayload {
        /// Row or instance identifier of the bad payload
        id: String,
        /// Decoder error message
        reason: String,
    },
}

/// Download-related errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Server answered with a non-success HTTP status
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that was requested
        url: String,
        /// HTTP status code returned by the server
        status: u16,
    },

    /// Downloaded content does not match the expected checksum
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The file that failed verification
        path: PathBuf,
        /// Expected hex digest
        expected: String,
        /// Computed hex digest
        actual: String,
    },

    /// Downloaded content does not match the expected size
    #[error("size mismatch for {path}: expected {expected} bytes, got {actual} bytes")]
    SizeMismatch {
        /// The file that failed verification
        path: PathBuf,
        /// Expected size in bytes
        expected: u64,
        /// Actual size in bytes
        actual: u64,
    },

    /// Destination path cannot be used
    #[error("invalid destination {path}: {reason}")]
    InvalidDestination {
        /// The offending destination path
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },
}

impl Error {
    /// Map an error raised while fetching a single file onto its per-file result code
    ///
    /// Network and HTTP failures become [`DownloadResult::NetworkError`], integrity
    /// failures become [`DownloadResult::ChecksumMismatch`], anything else is
    /// [`DownloadResult::UnknownError`].
    pub fn download_result(&self) -> DownloadResult {
        match self {
            Error::Network(_) => DownloadResult::NetworkError,
            Error::Download(DownloadError::HttpStatus { .. }) => DownloadResult::NetworkError,
            Error::Download(DownloadError::ChecksumMismatch { .. })
            | Error::Download(DownloadError::SizeMismatch { .. }) => {
                DownloadResult::ChecksumMismatch
            }
            Error::Io(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::ConnectionRefused
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                        | std::io::ErrorKind::UnexpectedEof
                ) =>
            {
                DownloadResult::NetworkError
            }
            _ => DownloadResult::UnknownError,
        }
    }
}
