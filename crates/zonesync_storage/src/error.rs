//! Error types for slot storage.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another process holds the store directory.
    #[error("slot directory is locked by another process: {}", path.display())]
    Locked {
        /// The locked directory.
        path: PathBuf,
    },

    /// The slot name cannot be stored.
    #[error("invalid slot name: {0:?}")]
    InvalidSlot(String),
}
