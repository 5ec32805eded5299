//! Durable sync tokens, pending zones and setup flags.
//!
//! Everything the engine persists lives in one [`SlotStore`] key space:
//!
//! ```text
//! sync_token:{scope}:database           # database-level token
//! sync_token:{scope}:zone:{owner}/{zone} # one token per zone
//! sync_pending:{scope}                   # zones discovered but not yet synced
//! setup:zone_created:{scope}:{zone}      # one-time setup flags
//! setup:subscribed:{scope}:{subscription_id}
//! ```

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};
use zonesync_protocol::{
    decode_token, decode_zone_set, encode_token, encode_zone_set, Scope, ScopeKey, SyncToken,
    ZoneId,
};
use zonesync_storage::SlotStore;

const FLAG_SET: &[u8] = b"1";

fn pending_slot(scope: Scope) -> String {
    format!("sync_pending:{scope}")
}

pub(crate) fn zone_created_flag(scope: Scope, zone: &ZoneId) -> String {
    format!("setup:zone_created:{scope}:{zone}")
}

pub(crate) fn subscribed_flag(scope: Scope, subscription_id: &str) -> String {
    format!("setup:subscribed:{scope}:{subscription_id}")
}

/// Durable persistence for opaque sync tokens, one slot per scope key.
///
/// `load` fails open: an unreadable or corrupt slot reads as "no token",
/// which makes the next sync of that key a full resync rather than sending a
/// garbage cursor to the remote store. `save` and `clear` surface storage
/// failures so callers stop advancing.
pub struct TokenStore {
    slots: Arc<dyn SlotStore>,
    pending_lock: Mutex<()>,
}

impl TokenStore {
    /// Creates a token store over a slot store.
    pub fn new(slots: Arc<dyn SlotStore>) -> Self {
        Self {
            slots,
            pending_lock: Mutex::new(()),
        }
    }

    /// Returns the underlying slot store.
    pub fn slots(&self) -> &Arc<dyn SlotStore> {
        &self.slots
    }

    /// Loads the token for a scope key, or `None` for a full resync.
    pub fn load(&self, key: &ScopeKey) -> Option<SyncToken> {
        let slot = key.slot_name();
        let bytes = match self.slots.read(&slot) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(%key, error = %e, "token slot unreadable, falling back to full resync");
                return None;
            }
        };

        match decode_token(&slot, &bytes) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(%key, error = %e, "token slot corrupt, falling back to full resync");
                None
            }
        }
    }

    /// Durably replaces the token for a scope key.
    pub fn save(&self, key: &ScopeKey, token: &SyncToken) -> SyncResult<()> {
        let slot = key.slot_name();
        let bytes = encode_token(&slot, token)?;
        self.slots.write(&slot, &bytes)?;
        debug!(%key, %token, "token saved");
        Ok(())
    }

    /// Removes the token for a scope key.
    pub fn clear(&self, key: &ScopeKey) -> SyncResult<()> {
        self.slots.remove(&key.slot_name())?;
        debug!(%key, "token cleared");
        Ok(())
    }

    /// Starts a checkpoint sequence for one feed run.
    pub fn checkpointer(&self, key: ScopeKey) -> Checkpointer<'_> {
        Checkpointer {
            store: self,
            key,
            last_page: None,
        }
    }

    /// Loads the zones discovered but not yet synced.
    ///
    /// Returns `None` if the pending set exists but cannot be read; the
    /// caller must then assume zones were lost and rediscover them.
    pub fn load_pending(&self, scope: Scope) -> Option<BTreeSet<ZoneId>> {
        let _guard = self.pending_lock.lock();
        self.read_pending(scope)
    }

    /// Applies `update` to the pending zone set and persists the result.
    pub fn update_pending(
        &self,
        scope: Scope,
        update: impl FnOnce(&mut BTreeSet<ZoneId>),
    ) -> SyncResult<()> {
        let _guard = self.pending_lock.lock();
        let mut zones = self.read_pending(scope).unwrap_or_default();
        update(&mut zones);
        self.write_pending(scope, &zones)
    }

    /// Removes the pending zone set.
    pub fn clear_pending(&self, scope: Scope) -> SyncResult<()> {
        let _guard = self.pending_lock.lock();
        self.slots.remove(&pending_slot(scope))?;
        Ok(())
    }

    fn read_pending(&self, scope: Scope) -> Option<BTreeSet<ZoneId>> {
        match self.slots.read(&pending_slot(scope)) {
            Ok(None) => Some(BTreeSet::new()),
            Ok(Some(bytes)) => match decode_zone_set(&bytes) {
                Ok(zones) => Some(zones),
                Err(e) => {
                    warn!(%scope, error = %e, "pending zone set corrupt");
                    None
                }
            },
            Err(e) => {
                warn!(%scope, error = %e, "pending zone set unreadable");
                None
            }
        }
    }

    fn write_pending(&self, scope: Scope, zones: &BTreeSet<ZoneId>) -> SyncResult<()> {
        let slot = pending_slot(scope);
        if zones.is_empty() {
            self.slots.remove(&slot)?;
        } else {
            self.slots.write(&slot, &encode_zone_set(zones)?)?;
        }
        Ok(())
    }

    /// Returns true if a setup flag is set. Unreadable flags read as unset,
    /// so the idempotent setup step simply runs again.
    pub fn flag(&self, name: &str) -> bool {
        match self.slots.read(name) {
            Ok(value) => value.as_deref() == Some(FLAG_SET),
            Err(e) => {
                warn!(flag = name, error = %e, "setup flag unreadable");
                false
            }
        }
    }

    /// Sets a setup flag.
    pub fn set_flag(&self, name: &str) -> SyncResult<()> {
        self.slots.write(name, FLAG_SET)?;
        Ok(())
    }
}

/// Writes the checkpoints of one feed run for one scope key.
///
/// Each checkpoint is stamped with the page it covers. A checkpoint for a
/// page at or before the last one written is refused, so a late completion
/// can never replace a newer token with an older one.
pub struct Checkpointer<'a> {
    store: &'a TokenStore,
    key: ScopeKey,
    last_page: Option<u64>,
}

impl Checkpointer<'_> {
    /// Returns the scope key being checkpointed.
    pub fn key(&self) -> &ScopeKey {
        &self.key
    }

    /// Returns the page of the last checkpoint written.
    pub fn last_page(&self) -> Option<u64> {
        self.last_page
    }

    /// Durably records `token` as covering everything through `page`.
    pub fn commit(&mut self, page: u64, token: &SyncToken) -> SyncResult<()> {
        if let Some(last) = self.last_page {
            if page <= last {
                return Err(SyncError::StaleCheckpoint {
                    key: self.key.to_string(),
                    page,
                    last,
                });
            }
        }

        self.store.save(&self.key, token)?;
        self.last_page = Some(page);
        Ok(())
    }
}
