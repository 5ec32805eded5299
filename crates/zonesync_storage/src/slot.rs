//! Slot store trait definition.

use crate::error::{StorageError, StorageResult};

/// Upper bound on slot name length, before any file-name escaping.
const MAX_SLOT_NAME_LEN: usize = 4096;

/// A durable key-value store of small opaque blobs.
///
/// # Invariants
///
/// - `write` atomically replaces the slot: after a crash the slot holds either
///   the old bytes or the new bytes, never a mix
/// - `read` returns exactly the bytes of the last completed `write`
/// - `remove` of a missing slot succeeds
/// - Writes to the same slot are mutually exclusive
///
/// # Implementors
///
/// - [`super::InMemorySlotStore`] - For testing
/// - [`super::FileSlotStore`] - For persistent storage
pub trait SlotStore: Send + Sync {
    /// Reads the slot, or `None` if it was never written or was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot exists but cannot be read.
    fn read(&self, slot: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Replaces the slot contents.
    ///
    /// After this returns successfully the new contents survive process
    /// termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot name is invalid or the write fails.
    fn write(&self, slot: &str, data: &[u8]) -> StorageResult<()>;

    /// Removes the slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be made durable.
    fn remove(&self, slot: &str) -> StorageResult<()>;

    /// Returns true if the slot currently holds a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot cannot be read.
    fn contains(&self, slot: &str) -> StorageResult<bool> {
        Ok(self.read(slot)?.is_some())
    }
}

/// Checks that a slot name is non-empty, bounded and free of control characters.
///
/// # Errors
///
/// Returns [`StorageError::InvalidSlot`] for names that cannot be stored.
pub fn validate_slot_name(slot: &str) -> StorageResult<()> {
    if slot.is_empty() || slot.len() > MAX_SLOT_NAME_LEN || slot.chars().any(char::is_control) {
        return Err(StorageError::InvalidSlot(slot.to_string()));
    }
    Ok(())
}
