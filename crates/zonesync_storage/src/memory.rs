//! In-memory slot store for testing.

use crate::error::{StorageError, StorageResult};
use crate::slot::{validate_slot_name, SlotStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory slot store.
///
/// Suitable for unit tests, integration tests and applications that do not
/// need tokens to survive a restart (every launch performs a full resync).
///
/// Writes can be made to fail on demand to exercise persistence error paths.
///
/// # Example
///
/// ```rust
/// use zonesync_storage::{InMemorySlotStore, SlotStore};
///
/// let store = InMemorySlotStore::new();
/// store.write("slot", b"data").unwrap();
/// assert!(store.contains("slot").unwrap());
/// ```
#[derive(Debug, Default)]
pub struct InMemorySlotStore {
    slots: RwLock<BTreeMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl InMemorySlotStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `write` and `remove` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Returns a copy of all slots.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.slots.read().clone()
    }

    /// Returns the number of slots holding a value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Returns true if no slot holds a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        Ok(())
    }
}

impl SlotStore for InMemorySlotStore {
    fn read(&self, slot: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_slot_name(slot)?;
        Ok(self.slots.read().get(slot).cloned())
    }

    fn write(&self, slot: &str, data: &[u8]) -> StorageResult<()> {
        validate_slot_name(slot)?;
        self.check_writable()?;
        self.slots.write().insert(slot.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, slot: &str) -> StorageResult<()> {
        validate_slot_name(slot)?;
        self.check_writable()?;
        self.slots.write().remove(slot);
        Ok(())
    }
}
