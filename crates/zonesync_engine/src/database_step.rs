//! Database-level change discovery.

use crate::error::{ErrorKind, SyncResult};
use crate::feed_reader::{ChangeFeedReader, FeedHandler};
use crate::token_store::{Checkpointer, TokenStore};
use crate::transport::ChangeFeedTransport;
use std::collections::BTreeSet;
use tracing::{info, warn};
use zonesync_protocol::{Scope, ScopeKey, SyncToken, ZoneChange, ZoneId};

/// Zones the database feed reported since the stored database token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseChanges {
    /// Zones whose records changed.
    pub changed: BTreeSet<ZoneId>,
    /// Zones that were deleted. Their zone tokens have been cleared.
    pub deleted: BTreeSet<ZoneId>,
}

/// Discovers which zones of a database changed.
///
/// Each page is checkpointed before the next fetch: first the changed zones
/// are merged into the durable pending set, then tokens of deleted zones are
/// cleared, then the database token is saved. A zone is therefore never
/// covered by a saved database token without also being pending.
pub struct DatabaseSyncStep<'a> {
    transport: &'a dyn ChangeFeedTransport,
    tokens: &'a TokenStore,
}

impl<'a> DatabaseSyncStep<'a> {
    /// Creates the step.
    pub fn new(transport: &'a dyn ChangeFeedTransport, tokens: &'a TokenStore) -> Self {
        Self { transport, tokens }
    }

    /// Runs the database feed for `scope` to exhaustion.
    ///
    /// On an expired token the stored database token is cleared so the next
    /// run starts from an empty state.
    pub async fn execute(&self, scope: Scope) -> SyncResult<DatabaseChanges> {
        let key = ScopeKey::Database(scope);
        let initial = self.tokens.load(&key);
        let full_resync = initial.is_none();

        let mut collector = ZoneCollector {
            scope,
            tokens: self.tokens,
            checkpoints: self.tokens.checkpointer(key.clone()),
            changes: DatabaseChanges::default(),
            page_changed: BTreeSet::new(),
            page_deleted: BTreeSet::new(),
        };

        let transport = self.transport;
        let result = ChangeFeedReader::new(key.clone())
            .run(
                initial,
                move |token| transport.fetch_database_changes(scope, token),
                &mut collector,
            )
            .await;

        match result {
            Ok(token) => {
                info!(
                    %scope,
                    %token,
                    full_resync,
                    changed = collector.changes.changed.len(),
                    deleted = collector.changes.deleted.len(),
                    "database changes fetched"
                );
                Ok(collector.changes)
            }
            Err(failure) => {
                if failure.error.kind() == ErrorKind::TokenExpired {
                    warn!(%key, "database token expired, clearing for full resync");
                    self.tokens.clear(&key)?;
                }
                Err(failure.error)
            }
        }
    }
}

struct ZoneCollector<'a> {
    scope: Scope,
    tokens: &'a TokenStore,
    checkpoints: Checkpointer<'a>,
    changes: DatabaseChanges,
    page_changed: BTreeSet<ZoneId>,
    page_deleted: BTreeSet<ZoneId>,
}

impl FeedHandler<ZoneChange> for ZoneCollector<'_> {
    fn on_event(&mut self, event: ZoneChange) {
        // Within a run the latest report for a zone wins.
        match event {
            ZoneChange::Changed(zone) => {
                // A zone recreated after deletion keeps its place in
                // `page_deleted` so the old incarnation's token is dropped.
                self.changes.deleted.remove(&zone);
                self.page_changed.insert(zone.clone());
                self.changes.changed.insert(zone);
            }
            ZoneChange::Deleted(zone) => {
                self.changes.changed.remove(&zone);
                self.page_changed.remove(&zone);
                self.page_deleted.insert(zone.clone());
                self.changes.deleted.insert(zone);
            }
        }
    }

    fn on_checkpoint(&mut self, page: u64, token: &SyncToken) -> SyncResult<()> {
        let changed = std::mem::take(&mut self.page_changed);
        let deleted = std::mem::take(&mut self.page_deleted);

        if !changed.is_empty() || !deleted.is_empty() {
            self.tokens.update_pending(self.scope, |pending| {
                for zone in deleted.difference(&changed) {
                    pending.remove(zone);
                }
                pending.extend(changed.iter().cloned());
            })?;
        }
        for zone in &deleted {
            self.tokens
                .clear(&ScopeKey::Zone(self.scope, zone.clone()))?;
        }

        self.checkpoints.commit(page, token)
    }
}
