//! Remote records as delivered by a zone change feed.

use crate::scope::ZoneId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a record: its zone plus a record name unique within that zone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    /// Zone holding the record.
    pub zone: ZoneId,
    /// Record name, unique within the zone.
    pub record_name: String,
}

impl RecordId {
    /// Creates a record identifier.
    pub fn new(zone: ZoneId, record_name: impl Into<String>) -> Self {
        Self {
            zone,
            record_name: record_name.into(),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.zone, self.record_name)
    }
}

/// A remote record in its transport representation.
///
/// The payload is opaque here; mapping it onto a domain object is the
/// delegate's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Record identifier.
    pub id: RecordId,
    /// Application-defined record type.
    pub record_type: String,
    /// Remote version tag, if the store reports one.
    pub change_tag: Option<String>,
    /// Encoded record fields.
    pub payload: Vec<u8>,
}

impl Record {
    /// Creates a record without a change tag.
    pub fn new(id: RecordId, record_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id,
            record_type: record_type.into(),
            change_tag: None,
            payload,
        }
    }

    /// Sets the change tag.
    #[must_use]
    pub fn with_change_tag(mut self, tag: impl Into<String>) -> Self {
        self.change_tag = Some(tag.into());
        self
    }
}
