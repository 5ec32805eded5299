//! Zone-level record sync.

use crate::delegate::RecordChangeDelegate;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::feed_reader::{ChangeFeedReader, FeedHandler};
use crate::token_store::{Checkpointer, TokenStore};
use crate::transport::ChangeFeedTransport;
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};
use zonesync_protocol::{ChangeEvent, Scope, ScopeKey, SyncToken, ZoneId};

/// Per-zone change counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZoneCounts {
    /// Upserts the delegate accepted.
    pub upserted: usize,
    /// Deletes the delegate accepted.
    pub deleted: usize,
    /// Records the delegate could not decode.
    pub skipped: usize,
}

impl ZoneCounts {
    fn add(&mut self, other: ZoneCounts) {
        self.upserted += other.upserted;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
    }
}

/// Result of one zone step run.
///
/// Counts include changes delivered by zones that later failed, since those
/// changes did reach the delegate.
#[derive(Debug, Default)]
pub struct ZoneSyncOutcome {
    /// Zones whose feeds were exhausted.
    pub synced: BTreeSet<ZoneId>,
    /// Changes delivered across all zones.
    pub counts: ZoneCounts,
    /// Zones that stopped early, with their errors.
    pub failures: Vec<(ZoneId, SyncError)>,
}

impl ZoneSyncOutcome {
    /// Returns true if no zone failed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Converts the outcome into the aggregate result.
    pub fn into_result(self) -> SyncResult<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Zones(self.failures))
        }
    }
}

/// Syncs the records of a set of zones in one scope.
///
/// Each zone runs its own feed with its own token, so zones are independent:
/// a failing zone keeps its last checkpoint and never stops its siblings.
/// Up to `max_concurrent` zones are fetched at once; events of one zone
/// always reach the delegate in feed order.
pub struct ZoneSyncStep<'a> {
    scope: Scope,
    transport: &'a dyn ChangeFeedTransport,
    tokens: &'a TokenStore,
    delegate: &'a dyn RecordChangeDelegate,
    max_concurrent: usize,
}

impl<'a> ZoneSyncStep<'a> {
    /// Creates the step with sequential zone processing.
    pub fn new(
        scope: Scope,
        transport: &'a dyn ChangeFeedTransport,
        tokens: &'a TokenStore,
        delegate: &'a dyn RecordChangeDelegate,
    ) -> Self {
        Self {
            scope,
            transport,
            tokens,
            delegate,
            max_concurrent: 1,
        }
    }

    /// Sets how many zones are fetched concurrently. Values below 1 are
    /// raised to 1.
    pub fn with_max_concurrent(mut self, limit: usize) -> Self {
        self.max_concurrent = limit.max(1);
        self
    }

    /// Syncs every zone and aggregates per-zone failures.
    pub async fn execute(&self, zones: &BTreeSet<ZoneId>) -> SyncResult<()> {
        self.run(zones).await.into_result()
    }

    /// Syncs every zone and returns the detailed outcome.
    pub async fn run(&self, zones: &BTreeSet<ZoneId>) -> ZoneSyncOutcome {
        let results: Vec<(ZoneId, SyncResult<()>, ZoneCounts)> =
            stream::iter(zones.iter().cloned())
                .map(|zone| self.sync_zone(zone))
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;

        let mut outcome = ZoneSyncOutcome::default();
        for (zone, result, counts) in results {
            outcome.counts.add(counts);
            match result {
                Ok(()) => {
                    outcome.synced.insert(zone);
                }
                Err(error) => outcome.failures.push((zone, error)),
            }
        }
        // Completion order is arbitrary; report failures deterministically.
        outcome.failures.sort_by(|a, b| a.0.cmp(&b.0));
        outcome
    }

    async fn sync_zone(&self, zone: ZoneId) -> (ZoneId, SyncResult<()>, ZoneCounts) {
        let scope = self.scope;
        let key = ScopeKey::Zone(scope, zone.clone());
        let initial = self.tokens.load(&key);

        let mut forwarder = RecordForwarder {
            scope,
            delegate: self.delegate,
            checkpoints: self.tokens.checkpointer(key.clone()),
            counts: ZoneCounts::default(),
        };

        let transport = self.transport;
        let zone_ref = &zone;
        let run = ChangeFeedReader::new(key.clone())
            .run(
                initial,
                move |token| transport.fetch_zone_changes(scope, zone_ref, token),
                &mut forwarder,
            )
            .await;
        let counts = forwarder.counts;

        let result = match run {
            Ok(token) => self.finish_zone(&zone, &token, counts),
            Err(failure) => {
                if failure.error.kind() == ErrorKind::TokenExpired {
                    warn!(%key, "zone token expired, clearing for full resync");
                    if let Err(e) = self.tokens.clear(&key) {
                        warn!(%key, error = %e, "failed to clear expired zone token");
                        return (zone, Err(e), counts);
                    }
                } else {
                    warn!(
                        %key,
                        error = %failure.error,
                        resume_from = ?failure.last_checkpoint.as_ref().map(ToString::to_string),
                        "zone sync stopped"
                    );
                }
                Err(failure.error)
            }
        };
        (zone, result, counts)
    }

    fn finish_zone(&self, zone: &ZoneId, token: &SyncToken, counts: ZoneCounts) -> SyncResult<()> {
        self.tokens.update_pending(self.scope, |pending| {
            pending.remove(zone);
        })?;
        info!(
            scope = %self.scope,
            %zone,
            %token,
            upserted = counts.upserted,
            deleted = counts.deleted,
            skipped = counts.skipped,
            "zone synced"
        );
        Ok(())
    }
}

struct RecordForwarder<'a> {
    scope: Scope,
    delegate: &'a dyn RecordChangeDelegate,
    checkpoints: Checkpointer<'a>,
    counts: ZoneCounts,
}

impl FeedHandler<ChangeEvent> for RecordForwarder<'_> {
    fn on_event(&mut self, event: ChangeEvent) {
        let applied = match &event {
            ChangeEvent::Upserted(record) => self.delegate.on_upserted(record),
            ChangeEvent::Deleted(id) => self.delegate.on_deleted(id),
        };

        match applied {
            Ok(()) if event.is_delete() => self.counts.deleted += 1,
            Ok(()) => self.counts.upserted += 1,
            Err(reason) => {
                self.counts.skipped += 1;
                let error = SyncError::Decode {
                    record: event.record_id().clone(),
                    reason: reason.0,
                };
                warn!(scope = %self.scope, error = %error, "record skipped");
                self.delegate.on_sync_error(self.scope, &error);
            }
        }
    }

    fn on_checkpoint(&mut self, page: u64, token: &SyncToken) -> SyncResult<()> {
        self.checkpoints.commit(page, token)?;
        debug!(key = %self.checkpoints.key(), page, "zone checkpoint written");
        Ok(())
    }
}
