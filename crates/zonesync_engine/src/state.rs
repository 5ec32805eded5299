//! Per-scope sync state, cumulative statistics and sync reports.

use crate::error::SyncError;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use zonesync_protocol::{Scope, ZoneId};

/// The current state of one scope's sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No sync of this scope has run yet.
    Idle,
    /// Discovering which zones changed.
    FetchingDatabase,
    /// Fetching record changes of the changed zones.
    FetchingZones,
    /// The last sync completed without errors.
    Synced,
    /// The last sync reported an error.
    Error,
}

impl SyncState {
    /// Returns true while a sync of the scope is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::FetchingDatabase | SyncState::FetchingZones)
    }

    /// Returns true if a new sync of the scope can start.
    pub fn can_start_sync(&self) -> bool {
        !self.is_active()
    }
}

/// Statistics across all syncs of an engine.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Syncs that completed without errors.
    pub syncs_completed: u64,
    /// Syncs that reported an error.
    pub syncs_failed: u64,
    /// Syncs rejected because the scope was already syncing.
    pub syncs_rejected: u64,
    /// Zones whose feeds were exhausted.
    pub zones_synced: u64,
    /// Upserts delivered to the delegate.
    pub records_upserted: u64,
    /// Deletes delivered to the delegate.
    pub records_deleted: u64,
    /// Records the delegate could not decode.
    pub records_skipped: u64,
    /// Last successful sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

impl SyncStats {
    pub(crate) fn record(&mut self, report: &SyncReport) {
        self.zones_synced += report.zones_synced.len() as u64;
        self.records_upserted += report.upserted as u64;
        self.records_deleted += report.deleted as u64;
        self.records_skipped += report.skipped as u64;

        match &report.error {
            None => {
                self.syncs_completed += 1;
                self.last_sync_time = Some(Instant::now());
                self.last_error = None;
            }
            Some(SyncError::AlreadySyncing(_)) => self.syncs_rejected += 1,
            Some(error) => {
                self.syncs_failed += 1;
                self.last_error = Some(error.to_string());
            }
        }
    }
}

/// Outcome of one sync of one scope, handed to the completion callback.
#[derive(Debug)]
pub struct SyncReport {
    /// Scope that was synced.
    pub scope: Scope,
    /// Zones the database feed reported as changed.
    pub changed_zones: BTreeSet<ZoneId>,
    /// Zones the database feed reported as deleted.
    pub deleted_zones: BTreeSet<ZoneId>,
    /// Zones whose feeds were exhausted, including previously pending ones.
    pub zones_synced: BTreeSet<ZoneId>,
    /// Upserts delivered to the delegate.
    pub upserted: usize,
    /// Deletes delivered to the delegate.
    pub deleted: usize,
    /// Records the delegate could not decode.
    pub skipped: usize,
    /// Why the sync stopped early, if it did.
    pub error: Option<SyncError>,
    /// Wall time of the sync.
    pub duration: Duration,
}

impl SyncReport {
    pub(crate) fn new(scope: Scope) -> Self {
        Self {
            scope,
            changed_zones: BTreeSet::new(),
            deleted_zones: BTreeSet::new(),
            zones_synced: BTreeSet::new(),
            upserted: 0,
            deleted: 0,
            skipped: 0,
            error: None,
            duration: Duration::ZERO,
        }
    }

    /// Returns true if the sync completed without errors.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
