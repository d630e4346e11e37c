// src/error.rs

//! Crate-wide error type and Result alias.

use thiserror::Error;

/// Errors produced by the mirror downloader and server
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration (bad filter syntax, unsupported proxy scheme, ...)
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Transport-level HTTP failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// An attempt exceeded its deadline
    #[error("timeout: {0}")]
    Timeout(String),

    /// Upstream returned 404 for the named resource
    #[error("{0} not found in registry")]
    NotFound(String),

    /// Upstream returned an unexpected status
    #[error("registry returned status {0}")]
    Protocol(u16),

    /// Downloaded file does not match the advertised checksum
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse {0}")]
    Parse(String),

    /// The surrounding operation was cancelled by shutdown
    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this failure was caused by a deadline or client timeout.
    ///
    /// Timeout failures are retried in a dedicated second pass; everything
    /// else fails the job on the spot.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Http(e) if e.is_timeout() => true,
            other => {
                let text = other.to_string();
                text.contains("timeout")
                    || text.contains("Client.Timeout")
                    || text.contains("deadline")
            }
        }
    }

    /// Whether this error is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
