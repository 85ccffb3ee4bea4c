//! Error types for the record store.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in record store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] fieldsync_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Journal entry encode/decode error.
    #[error("codec error: {0}")]
    Codec(String),

    /// The journal is corrupted mid-stream.
    ///
    /// A torn tail frame is not corruption; it is truncated silently on
    /// open. This error means a frame that is fully present fails its
    /// checks while more data follows it.
    #[error("journal corruption: {message}")]
    JournalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A batch record with the same correlation key already exists.
    #[error("duplicate batch key: {key}")]
    DuplicateBatchKey {
        /// The conflicting correlation key.
        key: String,
    },

    /// Another process holds the store directory lock.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// The store directory path is unusable.
    #[error("invalid store path: {message}")]
    InvalidPath {
        /// Description of the problem.
        message: String,
    },
}

impl StoreError {
    /// Creates a journal corruption error.
    pub fn journal_corruption(message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    /// Creates an invalid path error.
    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::InvalidPath {
            message: message.into(),
        }
    }
}
