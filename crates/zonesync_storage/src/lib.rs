//! # zonesync Storage
//!
//! Durable slot storage for zonesync.
//!
//! A slot is a small opaque blob addressed by a fixed, well-known name
//! (for example `sync_token:private:database`). Slot stores do not
//! interpret the bytes they hold; the engine owns the token envelope.
//!
//! ## Design Principles
//!
//! - A slot write either fully replaces the previous value or leaves it untouched
//! - Writes to the same slot are serialized
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Stores
//!
//! - [`InMemorySlotStore`] - For testing and ephemeral state
//! - [`FileSlotStore`] - One file per slot with write-then-rename durability
//!
//! ## Example
//!
//! ```rust
//! use zonesync_storage::{InMemorySlotStore, SlotStore};
//!
//! let store = InMemorySlotStore::new();
//! store.write("sync_token:private:database", b"opaque").unwrap();
//! assert_eq!(
//!     store.read("sync_token:private:database").unwrap(),
//!     Some(b"opaque".to_vec())
//! );
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod slot;

pub use error::{StorageError, StorageResult};
pub use file::FileSlotStore;
pub use memory::InMemorySlotStore;
pub use slot::{validate_slot_name, SlotStore};
