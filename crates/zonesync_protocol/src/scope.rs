//! Scopes, zones and the slot names their tokens live under.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Owner name the remote store resolves to the signed-in user.
pub const DEFAULT_OWNER: &str = "__defaultOwner__";

const TOKEN_SLOT_PREFIX: &str = "sync_token";

/// Which logical database a sync targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    /// The user's private database.
    Private,
    /// The database of records other users shared with this user.
    Shared,
}

impl Scope {
    /// All scopes, in sync order.
    pub const ALL: [Scope; 2] = [Scope::Private, Scope::Shared];

    /// Returns the stable name used in slot keys and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Private => "private",
            Scope::Shared => "shared",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Scope::Private),
            "shared" => Ok(Scope::Shared),
            other => Err(ProtocolError::UnknownScope(other.to_string())),
        }
    }
}

/// A change-tracked partition of records within a database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId {
    /// Zone name, unique per owner.
    pub zone_name: String,
    /// Owner of the zone.
    pub owner_name: String,
}

impl ZoneId {
    /// Creates a zone identifier.
    pub fn new(zone_name: impl Into<String>, owner_name: impl Into<String>) -> Self {
        Self {
            zone_name: zone_name.into(),
            owner_name: owner_name.into(),
        }
    }

    /// Creates a zone owned by the signed-in user.
    pub fn owned(zone_name: impl Into<String>) -> Self {
        Self::new(zone_name, DEFAULT_OWNER)
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_name, self.zone_name)
    }
}

/// What a stored token belongs to.
///
/// Slot names follow `sync_token:{scope}:database` and
/// `sync_token:{scope}:zone:{owner}/{zone}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopeKey {
    /// The database-level "which zones changed" feed.
    Database(Scope),
    /// The record-level feed of one zone.
    Zone(Scope, ZoneId),
}

impl ScopeKey {
    /// Returns the scope this key lives in.
    #[must_use]
    pub fn scope(&self) -> Scope {
        match self {
            ScopeKey::Database(scope) | ScopeKey::Zone(scope, _) => *scope,
        }
    }

    /// Returns the well-known slot name for this key's token.
    #[must_use]
    pub fn slot_name(&self) -> String {
        match self {
            ScopeKey::Database(scope) => format!("{TOKEN_SLOT_PREFIX}:{scope}:database"),
            ScopeKey::Zone(scope, zone) => format!("{TOKEN_SLOT_PREFIX}:{scope}:zone:{zone}"),
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKey::Database(scope) => write!(f, "{scope}/database"),
            ScopeKey::Zone(scope, zone) => write!(f, "{scope}/{zone}"),
        }
    }
}
