//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding persisted envelopes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The bytes are not a valid CBOR envelope.
    #[error("codec error: {0}")]
    Codec(String),

    /// The envelope was written by an unknown format version.
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),

    /// The envelope belongs to a different slot.
    #[error("envelope slot mismatch: expected {expected:?}, found {found:?}")]
    SlotMismatch {
        /// Slot the caller asked for.
        expected: String,
        /// Slot recorded in the envelope.
        found: String,
    },

    /// The integrity digest does not match the payload.
    #[error("envelope digest mismatch")]
    DigestMismatch,

    /// Unknown scope name.
    #[error("unknown scope: {0:?}")]
    UnknownScope(String),
}
