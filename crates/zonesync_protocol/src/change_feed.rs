//! Change feed items and pages.

use crate::record::{Record, RecordId};
use crate::scope::ZoneId;
use crate::token::SyncToken;

/// A record-level change within a zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Record was created or updated.
    Upserted(Record),
    /// Record was deleted.
    Deleted(RecordId),
}

impl ChangeEvent {
    /// Returns the identifier of the affected record.
    #[must_use]
    pub fn record_id(&self) -> &RecordId {
        match self {
            ChangeEvent::Upserted(record) => &record.id,
            ChangeEvent::Deleted(id) => id,
        }
    }

    /// Returns true for deletions.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        matches!(self, ChangeEvent::Deleted(_))
    }
}

/// A database-level change: which zones changed or disappeared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneChange {
    /// Records in the zone changed since the database token.
    Changed(ZoneId),
    /// The zone was deleted.
    Deleted(ZoneId),
}

impl ZoneChange {
    /// Returns the affected zone.
    #[must_use]
    pub fn zone(&self) -> &ZoneId {
        match self {
            ZoneChange::Changed(zone) | ZoneChange::Deleted(zone) => zone,
        }
    }
}

/// One bounded batch of a paginated change feed.
///
/// Pages are transient: only their token is ever persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Changes in the order the remote store returned them.
    pub changes: Vec<T>,
    /// Token covering everything up to and including this page.
    pub token: SyncToken,
    /// Whether another page follows.
    pub more_coming: bool,
}

impl<T> Page<T> {
    /// Creates a page.
    pub fn new(changes: Vec<T>, token: SyncToken, more_coming: bool) -> Self {
        Self {
            changes,
            token,
            more_coming,
        }
    }

    /// Creates the terminal page of a feed.
    pub fn last(changes: Vec<T>, token: SyncToken) -> Self {
        Self::new(changes, token, false)
    }

    /// Returns the number of changes on the page.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if the page carries no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
