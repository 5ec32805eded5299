//! The application-facing consumer of record changes.

use crate::error::SyncError;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use zonesync_protocol::{Record, RecordId, Scope};

/// Reason a delegate could not apply a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError(pub String);

impl DecodeError {
    /// Creates a decode error.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Consumes record changes produced by a sync.
///
/// Calls are made synchronously from within the sync, once per change,
/// in feed order per zone. A page may be re-delivered after a crash or a
/// failed checkpoint, so both methods must be idempotent by record key.
///
/// Returning an error skips that single record; the feed continues.
pub trait RecordChangeDelegate: Send + Sync {
    /// A record was created or updated remotely.
    fn on_upserted(&self, record: &Record) -> Result<(), DecodeError>;

    /// A record was deleted remotely.
    fn on_deleted(&self, record_id: &RecordId) -> Result<(), DecodeError>;

    /// A sync of `scope` reported an error. Never called for successful syncs.
    fn on_sync_error(&self, _scope: Scope, _error: &SyncError) {}
}

/// A map-backed delegate for testing.
///
/// Holds the materialized state of every record it was given and logs each
/// call. Records can be marked undecodable to exercise the skip path.
#[derive(Debug, Default)]
pub struct MemoryDelegate {
    records: RwLock<BTreeMap<RecordId, Record>>,
    calls: RwLock<Vec<DelegateCall>>,
    undecodable: RwLock<BTreeSet<RecordId>>,
    errors: RwLock<Vec<(Scope, String)>>,
}

/// A call observed by [`MemoryDelegate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegateCall {
    /// `on_upserted` for a record.
    Upserted(RecordId),
    /// `on_deleted` for a record.
    Deleted(RecordId),
}

impl MemoryDelegate {
    /// Creates an empty delegate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes upserts of `id` fail to decode.
    pub fn reject(&self, id: RecordId) {
        self.undecodable.write().insert(id);
    }

    /// Returns the materialized records.
    pub fn records(&self) -> BTreeMap<RecordId, Record> {
        self.records.read().clone()
    }

    /// Returns every call in delivery order.
    pub fn calls(&self) -> Vec<DelegateCall> {
        self.calls.read().clone()
    }

    /// Returns the errors reported through [`RecordChangeDelegate::on_sync_error`].
    pub fn errors(&self) -> Vec<(Scope, String)> {
        self.errors.read().clone()
    }
}

impl RecordChangeDelegate for MemoryDelegate {
    fn on_upserted(&self, record: &Record) -> Result<(), DecodeError> {
        self.calls
            .write()
            .push(DelegateCall::Upserted(record.id.clone()));
        if self.undecodable.read().contains(&record.id) {
            return Err(DecodeError::new("unknown record layout"));
        }
        self.records
            .write()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn on_deleted(&self, record_id: &RecordId) -> Result<(), DecodeError> {
        self.calls
            .write()
            .push(DelegateCall::Deleted(record_id.clone()));
        self.records.write().remove(record_id);
        Ok(())
    }

    fn on_sync_error(&self, scope: Scope, error: &SyncError) {
        self.errors.write().push((scope, error.to_string()));
    }
}
