//! The sync entry point.

use crate::config::SyncConfig;
use crate::database_step::DatabaseSyncStep;
use crate::delegate::RecordChangeDelegate;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::setup::{Setup, SetupReport};
use crate::state::{SyncReport, SyncState, SyncStats};
use crate::token_store::TokenStore;
use crate::transport::{ChangeFeedTransport, ZoneProvisioner};
use crate::zone_step::ZoneSyncStep;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use zonesync_protocol::{Scope, ScopeKey};
use zonesync_storage::SlotStore;

/// Orchestrates database and zone sync for a scope.
///
/// A sync first discovers which zones changed, then fetches the record
/// changes of those zones plus any zones a previous sync discovered but did
/// not finish. Syncs never fail past this boundary: every outcome, including
/// errors, is delivered as a [`SyncReport`].
///
/// # Overlapping syncs
///
/// At most one sync per scope runs at a time. A sync requested while the same
/// scope is syncing completes immediately with
/// [`SyncError::AlreadySyncing`] and touches no tokens. Different scopes
/// sync independently.
///
/// # Delegate
///
/// The engine only holds a weak reference to the delegate. If the
/// application drops it, syncs report [`SyncError::NoDelegate`] without
/// fetching anything.
pub struct SyncEngine<T: ChangeFeedTransport> {
    config: SyncConfig,
    transport: Arc<T>,
    tokens: TokenStore,
    delegate: RwLock<Option<Weak<dyn RecordChangeDelegate>>>,
    states: RwLock<HashMap<Scope, SyncState>>,
    in_flight: Mutex<HashSet<Scope>>,
    stats: RwLock<SyncStats>,
}

impl<T: ChangeFeedTransport> SyncEngine<T> {
    /// Creates a new sync engine over a transport and durable slots.
    pub fn new(config: SyncConfig, transport: Arc<T>, slots: Arc<dyn SlotStore>) -> Self {
        Self {
            config,
            transport,
            tokens: TokenStore::new(slots),
            delegate: RwLock::new(None),
            states: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Creates an engine and runs [`SyncEngine::setup`] with its transport.
    pub async fn connect(
        config: SyncConfig,
        transport: Arc<T>,
        slots: Arc<dyn SlotStore>,
    ) -> (Self, SetupReport)
    where
        T: ZoneProvisioner,
    {
        let engine = Self::new(config, transport, slots);
        let report = engine.setup(engine.transport.as_ref()).await;
        (engine, report)
    }

    /// Creates the default zone and change subscriptions, once.
    ///
    /// Completed steps are remembered durably and skipped on later calls.
    /// Failed steps are logged and retried on the next call.
    pub async fn setup(&self, provisioner: &dyn ZoneProvisioner) -> SetupReport {
        Setup::new(&self.config, &self.tokens).run(provisioner).await
    }

    /// Attaches the delegate that receives record changes.
    pub fn set_delegate<D: RecordChangeDelegate + 'static>(&self, delegate: &Arc<D>) {
        let weak: Weak<D> = Arc::downgrade(delegate);
        let weak: Weak<dyn RecordChangeDelegate> = weak;
        *self.delegate.write() = Some(weak);
    }

    /// Detaches the delegate.
    pub fn clear_delegate(&self) {
        *self.delegate.write() = None;
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Returns the token store.
    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Returns the state of a scope.
    pub fn state(&self, scope: Scope) -> SyncState {
        self.states
            .read()
            .get(&scope)
            .copied()
            .unwrap_or(SyncState::Idle)
    }

    /// Returns cumulative statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Syncs `scope` and calls `completion` exactly once with the outcome.
    pub async fn sync<F>(&self, scope: Scope, completion: F)
    where
        F: FnOnce(SyncReport),
    {
        let report = self.sync_scope(scope).await;
        completion(report);
    }

    /// Syncs `scope` and returns the outcome.
    pub async fn sync_scope(&self, scope: Scope) -> SyncReport {
        let start = Instant::now();
        let mut report = SyncReport::new(scope);

        let Some(_guard) = self.begin(scope) else {
            debug!(%scope, "sync already in progress, request rejected");
            report.error = Some(SyncError::AlreadySyncing(scope));
            self.stats.write().record(&report);
            return report;
        };

        let result = self.run(scope, &mut report).await;
        report.duration = start.elapsed();

        match result {
            Ok(()) => {
                self.set_state(scope, SyncState::Synced);
                info!(
                    %scope,
                    zones = report.zones_synced.len(),
                    upserted = report.upserted,
                    deleted = report.deleted,
                    skipped = report.skipped,
                    elapsed_ms = report.duration.as_millis() as u64,
                    "sync completed"
                );
            }
            Err(e) => {
                self.handle_error(scope, &e);
                report.error = Some(e);
            }
        }

        self.stats.write().record(&report);
        report
    }

    async fn run(&self, scope: Scope, report: &mut SyncReport) -> SyncResult<()> {
        let delegate = self.delegate().ok_or(SyncError::NoDelegate)?;
        self.set_state(scope, SyncState::FetchingDatabase);

        if self.tokens.load_pending(scope).is_none() {
            // Zones discovered earlier may be lost; rediscover from scratch.
            warn!(%scope, "pending zones unreadable, resetting database token");
            self.tokens.clear(&ScopeKey::Database(scope))?;
            self.tokens.clear_pending(scope)?;
        }

        let changes = DatabaseSyncStep::new(self.transport.as_ref(), &self.tokens)
            .execute(scope)
            .await?;

        let mut zones = self.tokens.load_pending(scope).unwrap_or_default();
        zones.extend(changes.changed.iter().cloned());
        for zone in &changes.deleted {
            zones.remove(zone);
        }
        report.changed_zones = changes.changed;
        report.deleted_zones = changes.deleted;

        if zones.is_empty() {
            debug!(%scope, "no zones to sync");
            return Ok(());
        }

        self.set_state(scope, SyncState::FetchingZones);
        let outcome = ZoneSyncStep::new(
            scope,
            self.transport.as_ref(),
            &self.tokens,
            delegate.as_ref(),
        )
        .with_max_concurrent(self.config.max_concurrent_zones)
        .run(&zones)
        .await;

        report.upserted = outcome.counts.upserted;
        report.deleted = outcome.counts.deleted;
        report.skipped = outcome.counts.skipped;
        report.zones_synced = outcome.synced.clone();
        outcome.into_result()
    }

    fn delegate(&self) -> Option<Arc<dyn RecordChangeDelegate>> {
        self.delegate.read().as_ref().and_then(Weak::upgrade)
    }

    fn begin(&self, scope: Scope) -> Option<InFlight<'_>> {
        if self.in_flight.lock().insert(scope) {
            Some(InFlight {
                in_flight: &self.in_flight,
                scope,
            })
        } else {
            None
        }
    }

    fn set_state(&self, scope: Scope, state: SyncState) {
        self.states.write().insert(scope, state);
    }

    /// Logs an error by its kind and reports it to the delegate.
    fn handle_error(&self, scope: Scope, e: &SyncError) {
        self.set_state(scope, SyncState::Error);

        match e.kind() {
            ErrorKind::TransientFetch => {
                warn!(%scope, error = %e, "sync interrupted, next sync resumes from last checkpoint")
            }
            ErrorKind::TokenExpired => {
                warn!(%scope, error = %e, "token expired, next sync starts from empty state")
            }
            ErrorKind::Partial => {
                if let SyncError::Zones(failures) = e {
                    for (zone, zone_error) in failures {
                        warn!(%scope, %zone, error = %zone_error, "zone failed");
                    }
                }
                warn!(%scope, error = %e, "sync partially failed");
            }
            ErrorKind::Decode | ErrorKind::Provisioning => warn!(%scope, error = %e, "sync failed"),
            ErrorKind::Persistence | ErrorKind::Contract => {
                error!(%scope, error = %e, "sync failed")
            }
        }

        if let Some(delegate) = self.delegate() {
            delegate.on_sync_error(scope, e);
        }
    }
}

/// Marks a scope as syncing until dropped.
struct InFlight<'a> {
    in_flight: &'a Mutex<HashSet<Scope>>,
    scope: Scope,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.scope);
    }
}
