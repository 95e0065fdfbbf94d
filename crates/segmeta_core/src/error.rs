//! Error types for the metadata core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in metadata core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Metadata store error.
    #[error("store error: {0}")]
    Store(#[from] segmeta_store::StoreError),

    /// A context flush cycle is already in flight.
    ///
    /// Checkpoint requests are never interleaved; the caller retries on
    /// its next checkpoint cycle.
    #[error("context flush already in progress")]
    FlushInProgress,

    /// A stored context image is malformed.
    #[error("invalid context format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// A stored context image failed its checksum.
    #[error("context checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },
}

impl CoreError {
    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }
}
