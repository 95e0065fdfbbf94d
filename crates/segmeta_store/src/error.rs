//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another process holds the store directory lock.
    #[error("store locked: another process has exclusive access")]
    Locked,

    /// A stored section failed integrity checks.
    #[error("section corrupted: {0}")]
    Corrupted(String),

    /// A section name contains characters the store cannot map to a file.
    #[error("invalid section name: {0}")]
    InvalidSectionName(String),
}
