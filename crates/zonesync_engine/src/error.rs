//! Error types for the sync engine.

use thiserror::Error;
use zonesync_protocol::{ProtocolError, RecordId, Scope, ZoneId};
use zonesync_storage::StorageError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or availability failure while fetching a page.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote store rejected a token as too old.
    #[error("change token expired for {key}")]
    TokenExpired {
        /// Scope key whose token expired.
        key: String,
    },

    /// Local token storage could not be written.
    #[error("persistence error: {0}")]
    Persistence(#[from] StorageError),

    /// A token or zone set could not be encoded for storage.
    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),

    /// The delegate could not interpret a record.
    #[error("cannot decode record {record}: {reason}")]
    Decode {
        /// Record that was skipped.
        record: RecordId,
        /// Reason given by the delegate.
        reason: String,
    },

    /// The remote feed violated its contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A checkpoint arrived for a page older than one already written.
    #[error("stale checkpoint for {key}: page {page} after page {last}")]
    StaleCheckpoint {
        /// Scope key being checkpointed.
        key: String,
        /// Page of the rejected checkpoint.
        page: u64,
        /// Page of the last written checkpoint.
        last: u64,
    },

    /// No delegate is attached, or the application dropped it.
    #[error("no record change delegate attached")]
    NoDelegate,

    /// A sync for this scope is already running.
    #[error("a sync of the {0} scope is already in progress")]
    AlreadySyncing(Scope),

    /// Zone or subscription setup failed.
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    /// One or more zones failed; other zones were unaffected.
    #[error("{} zone(s) failed to sync", .0.len())]
    Zones(Vec<(ZoneId, SyncError)>),
}

/// Classification used to pick an error handling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Keep the last checkpoint; the next sync resumes from it.
    TransientFetch,
    /// Token cleared; the next sync of that scope key starts from empty.
    TokenExpired,
    /// Local durability failed; stop advancing.
    Persistence,
    /// A single record was skipped.
    Decode,
    /// The remote or the caller broke a contract; needs attention.
    Contract,
    /// Setup failed; retried on the next setup call.
    Provisioning,
    /// Aggregate of per-zone failures.
    Partial,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a token expiry error for a scope key.
    pub fn token_expired(key: impl ToString) -> Self {
        Self::TokenExpired {
            key: key.to_string(),
        }
    }

    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Transport {
                retryable: true, ..
            } => ErrorKind::TransientFetch,
            SyncError::TokenExpired { .. } => ErrorKind::TokenExpired,
            SyncError::Persistence(_) | SyncError::Codec(_) => ErrorKind::Persistence,
            SyncError::Decode { .. } => ErrorKind::Decode,
            SyncError::Transport {
                retryable: false, ..
            }
            | SyncError::Protocol(_)
            | SyncError::StaleCheckpoint { .. }
            | SyncError::NoDelegate
            | SyncError::AlreadySyncing(_) => ErrorKind::Contract,
            SyncError::Provisioning(_) => ErrorKind::Provisioning,
            SyncError::Zones(_) => ErrorKind::Partial,
        }
    }

    /// Returns true if a later sync can be expected to get past this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::TokenExpired { .. } | SyncError::AlreadySyncing(_) => true,
            SyncError::Zones(failures) => failures.iter().all(|(_, e)| e.is_retryable()),
            _ => false,
        }
    }
}
