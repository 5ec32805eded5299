//! File-based slot store for persistent storage.
//!
//! Directory layout:
//!
//! ```text
//! <dir>/
//! ├─ LOCK                                      # Advisory lock, one process per directory
//! ├─ sync_token%3Aprivate%3Adatabase.slot      # One file per slot
//! ├─ sync_token%3Aprivate%3Adatabase.slot.tmp  # Transient, only during a write
//! └─ ~3f1c…e07a.slot                           # Slot whose escaped name is too long
//! ```

use crate::error::{StorageError, StorageResult};
use crate::slot::{validate_slot_name, SlotStore};
use fs2::FileExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const LOCK_FILE: &str = "LOCK";
const SLOT_EXTENSION: &str = "slot";
const TEMP_EXTENSION: &str = "slot.tmp";
/// Longest escaped stem used verbatim. Longer stems are replaced by a digest
/// so file names stay under the common 255-byte limit.
const MAX_FILE_STEM_LEN: usize = 200;
const HASHED_STEM_PREFIX: char = '~';

/// A slot store keeping one file per slot.
///
/// # Durability
///
/// Every `write` uses the write-then-rename pattern:
/// 1. Write the new contents to `<slot>.slot.tmp`
/// 2. `sync_all` the temporary file
/// 3. Rename it over `<slot>.slot`
/// 4. Fsync the directory so the rename itself is durable
///
/// A crash at any point leaves either the old or the new contents in place.
/// Leftover temporary files are discarded on the next `open`.
///
/// # Thread Safety
///
/// Writes and removals of the same slot are serialized by a per-slot lock.
/// The directory is guarded by an exclusive advisory `LOCK` file, so two
/// processes cannot checkpoint into the same directory.
///
/// # Example
///
/// ```no_run
/// use zonesync_storage::{FileSlotStore, SlotStore};
/// use std::path::Path;
///
/// let store = FileSlotStore::open(Path::new("sync-state")).unwrap();
/// store.write("sync_token:private:database", b"token").unwrap();
/// ```
#[derive(Debug)]
pub struct FileSlotStore {
    dir: PathBuf,
    slot_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    _lock_file: File,
}

impl FileSlotStore {
    /// Opens or creates a slot directory and takes its exclusive lock.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the
    /// directory, or an I/O error if it cannot be created.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked {
                path: dir.to_path_buf(),
            });
        }

        let store = Self {
            dir: dir.to_path_buf(),
            slot_locks: Mutex::new(HashMap::new()),
            _lock_file: lock_file,
        };
        store.discard_temp_files()?;
        Ok(store)
    }

    /// Returns the slot directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file that backs a slot.
    #[must_use]
    pub fn slot_path(&self, slot: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{SLOT_EXTENSION}", file_stem(slot)))
    }

    fn temp_path(&self, slot: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{TEMP_EXTENSION}", file_stem(slot)))
    }

    fn slot_lock(&self, slot: &str) -> Arc<Mutex<()>> {
        let mut locks = self.slot_locks.lock();
        Arc::clone(locks.entry(slot.to_string()).or_default())
    }

    /// Drops the lock entry of `slot` once no other caller holds it.
    ///
    /// Clones are only handed out under the map lock, so a strong count of
    /// one means nobody is waiting on this slot.
    fn release_slot_lock(&self, slot: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.slot_locks.lock();
        drop(lock);
        if locks.get(slot).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(slot);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.slot_locks.lock().len()
    }

    fn discard_temp_files(&self) -> StorageResult<()> {
        let suffix = format!(".{TEMP_EXTENSION}");
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_temp = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(&suffix));
            if is_temp {
                warn!(path = %path.display(), "discarding interrupted slot write");
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        // NTFS journals metadata; directory handles cannot be fsynced.
        Ok(())
    }
}

impl SlotStore for FileSlotStore {
    fn read(&self, slot: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_slot_name(slot)?;

        let mut file = match File::open(self.slot_path(slot)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(Some(data))
    }

    fn write(&self, slot: &str, data: &[u8]) -> StorageResult<()> {
        validate_slot_name(slot)?;

        let lock = self.slot_lock(slot);
        let result = {
            let _guard = lock.lock();
            self.write_locked(slot, data)
        };
        self.release_slot_lock(slot, lock);
        result
    }

    fn remove(&self, slot: &str) -> StorageResult<()> {
        validate_slot_name(slot)?;

        let lock = self.slot_lock(slot);
        let result = {
            let _guard = lock.lock();
            self.remove_locked(slot)
        };
        self.release_slot_lock(slot, lock);
        result
    }
}

impl FileSlotStore {
    fn write_locked(&self, slot: &str, data: &[u8]) -> StorageResult<()> {
        let temp_path = self.temp_path(slot);
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.slot_path(slot))?;
        self.sync_directory()?;

        debug!(slot, bytes = data.len(), "slot written");
        Ok(())
    }

    fn remove_locked(&self, slot: &str) -> StorageResult<()> {
        match fs::remove_file(self.slot_path(slot)) {
            Ok(()) => {
                self.sync_directory()?;
                debug!(slot, "slot removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// File name stem of a slot, without extension.
///
/// Short names are escaped. Names whose escaped form exceeds
/// [`MAX_FILE_STEM_LEN`] use `~` followed by the hex SHA-256 of the slot
/// name. Escaping never produces `~`, so the two forms cannot collide.
fn file_stem(slot: &str) -> String {
    let escaped = escape_slot_name(slot);
    if escaped.len() <= MAX_FILE_STEM_LEN {
        return escaped;
    }
    let digest = Sha256::digest(slot.as_bytes());
    let mut stem = String::with_capacity(1 + digest.len() * 2);
    stem.push(HASHED_STEM_PREFIX);
    for byte in digest {
        stem.push_str(&format!("{byte:02x}"));
    }
    stem
}

/// Maps a slot name onto a portable file name.
///
/// ASCII alphanumerics, `-`, `_` and `.` are kept; every other byte becomes
/// `%XX`. The mapping is injective, so distinct slots never share a file.
fn escape_slot_name(slot: &str) -> String {
    let mut escaped = String::with_capacity(slot.len());
    for byte in slot.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            escaped.push(char::from(byte));
        } else {
            escaped.push_str(&format!("%{byte:02X}"));
        }
    }
    escaped
}
