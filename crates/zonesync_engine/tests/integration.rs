//! Integration tests for the sync engine.

use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tempfile::tempdir;
use zonesync_engine::{
    ChangeFeedTransport, DelegateCall, MemoryDelegate, MockCall, MockTransport, SyncConfig,
    SyncEngine, SyncError, SyncReport, SyncResult, SyncState,
};
use zonesync_protocol::{
    ChangeEvent, Page, Record, RecordId, Scope, ScopeKey, SyncToken, ZoneChange, ZoneId,
};
use zonesync_storage::{FileSlotStore, InMemorySlotStore, SlotStore};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn token(s: &str) -> SyncToken {
    SyncToken::from_remote(s)
}

fn upsert(zone: &ZoneId, name: &str, payload: u8) -> ChangeEvent {
    ChangeEvent::Upserted(Record::new(
        RecordId::new(zone.clone(), name),
        "Todo",
        vec![payload],
    ))
}

fn delete(zone: &ZoneId, name: &str) -> ChangeEvent {
    ChangeEvent::Deleted(RecordId::new(zone.clone(), name))
}

fn zone_key(scope: Scope, zone: &ZoneId) -> ScopeKey {
    ScopeKey::Zone(scope, zone.clone())
}

fn engine_with<T: ChangeFeedTransport>(
    transport: Arc<T>,
    slots: Arc<dyn SlotStore>,
) -> (SyncEngine<T>, Arc<MemoryDelegate>) {
    let engine = SyncEngine::new(SyncConfig::default(), transport, slots);
    let delegate = Arc::new(MemoryDelegate::new());
    engine.set_delegate(&delegate);
    (engine, delegate)
}

fn mock_engine() -> (SyncEngine<MockTransport>, Arc<MemoryDelegate>) {
    engine_with(
        Arc::new(MockTransport::new()),
        Arc::new(InMemorySlotStore::new()),
    )
}

/// A remote store that pages through append-only change logs.
///
/// Tokens are log offsets, so any token the store issued can be resumed.
/// Offsets below the expiry horizon are rejected as expired.
struct FakeRemote {
    state: Mutex<RemoteState>,
}

struct RemoteState {
    page_size: usize,
    databases: HashMap<Scope, Vec<ZoneChange>>,
    zones: HashMap<(Scope, ZoneId), Vec<ChangeEvent>>,
    expired_before: usize,
}

impl FakeRemote {
    fn new(page_size: usize) -> Self {
        Self {
            state: Mutex::new(RemoteState {
                page_size,
                databases: HashMap::new(),
                zones: HashMap::new(),
                expired_before: 0,
            }),
        }
    }

    fn record(&self, scope: Scope, event: ChangeEvent) {
        let zone = event.record_id().zone.clone();
        let mut state = self.state.lock();
        state
            .zones
            .entry((scope, zone.clone()))
            .or_default()
            .push(event);
        state
            .databases
            .entry(scope)
            .or_default()
            .push(ZoneChange::Changed(zone));
    }

    fn expire_tokens_before(&self, offset: usize) {
        self.state.lock().expired_before = offset;
    }

    fn zone_len(&self, scope: Scope, zone: &ZoneId) -> usize {
        self.state
            .lock()
            .zones
            .get(&(scope, zone.clone()))
            .map_or(0, Vec::len)
    }

    fn page<T: Clone>(
        state: &RemoteState,
        key: &ScopeKey,
        log: &[T],
        token: Option<SyncToken>,
    ) -> SyncResult<Page<T>> {
        let from = match token {
            None => 0,
            Some(token) => {
                let offset: usize = std::str::from_utf8(token.as_bytes())
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| SyncError::transport_fatal("unknown token"))?;
                if offset < state.expired_before {
                    return Err(SyncError::token_expired(key));
                }
                offset
            }
        };
        let end = (from + state.page_size).min(log.len());
        Ok(Page::new(
            log[from.min(end)..end].to_vec(),
            SyncToken::from_remote(end.to_string()),
            end < log.len(),
        ))
    }
}

#[async_trait]
impl ChangeFeedTransport for FakeRemote {
    async fn fetch_database_changes(
        &self,
        scope: Scope,
        token: Option<SyncToken>,
    ) -> SyncResult<Page<ZoneChange>> {
        tokio::task::yield_now().await;
        let state = self.state.lock();
        let log = state.databases.get(&scope).cloned().unwrap_or_default();
        Self::page(&state, &ScopeKey::Database(scope), &log, token)
    }

    async fn fetch_zone_changes(
        &self,
        scope: Scope,
        zone: &ZoneId,
        token: Option<SyncToken>,
    ) -> SyncResult<Page<ChangeEvent>> {
        tokio::task::yield_now().await;
        let state = self.state.lock();
        let log = state
            .zones
            .get(&(scope, zone.clone()))
            .cloned()
            .unwrap_or_default();
        Self::page(&state, &zone_key(scope, zone), &log, token)
    }
}

#[tokio::test]
async fn end_to_end_two_level_sync() {
    init_tracing();
    let (engine, delegate) = mock_engine();
    let zone_a = ZoneId::owned("A");
    let transport = engine.transport();

    transport.push_database_page(
        Scope::Private,
        Ok(Page::last(vec![ZoneChange::Changed(zone_a.clone())], token("db-1"))),
    );
    transport.push_zone_page(
        Scope::Private,
        &zone_a,
        Ok(Page::new(vec![upsert(&zone_a, "rec-1", 1)], token("z-1"), true)),
    );
    transport.push_zone_page(
        Scope::Private,
        &zone_a,
        Ok(Page::last(vec![delete(&zone_a, "rec-0")], token("z-2"))),
    );

    let mut completions = Vec::new();
    engine
        .sync(Scope::Private, |report| completions.push(report))
        .await;

    assert_eq!(completions.len(), 1);
    let report = &completions[0];
    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(report.changed_zones, BTreeSet::from([zone_a.clone()]));
    assert_eq!(report.upserted, 1);
    assert_eq!(report.deleted, 1);

    assert_eq!(
        delegate.calls(),
        vec![
            DelegateCall::Upserted(RecordId::new(zone_a.clone(), "rec-1")),
            DelegateCall::Deleted(RecordId::new(zone_a.clone(), "rec-0")),
        ]
    );
    let tokens = engine.tokens();
    assert_eq!(
        tokens.load(&ScopeKey::Database(Scope::Private)),
        Some(token("db-1"))
    );
    assert_eq!(
        tokens.load(&zone_key(Scope::Private, &zone_a)),
        Some(token("z-2"))
    );
    assert_eq!(
        transport.tokens_sent(&zone_key(Scope::Private, &zone_a)),
        vec![None, Some(token("z-1"))]
    );
    assert_eq!(engine.state(Scope::Private), SyncState::Synced);
}

#[tokio::test]
async fn expired_token_falls_back_to_full_resync() {
    let (engine, delegate) = mock_engine();
    let transport = engine.transport();
    let db_key = ScopeKey::Database(Scope::Private);
    engine.tokens().save(&db_key, &token("T")).unwrap();

    transport.push_database_page(Scope::Private, Err(SyncError::token_expired(&db_key)));
    let first = engine.sync_scope(Scope::Private).await;
    assert!(matches!(first.error, Some(SyncError::TokenExpired { .. })));
    assert!(first.error.as_ref().unwrap().is_retryable());
    assert_eq!(engine.tokens().load(&db_key), None);
    assert_eq!(delegate.errors().len(), 1);

    transport.push_database_page(
        Scope::Private,
        Ok(Page::last(Vec::new(), token("db-fresh"))),
    );
    let second = engine.sync_scope(Scope::Private).await;
    assert!(second.is_success());
    assert_eq!(transport.tokens_sent(&db_key), vec![Some(token("T")), None]);
    assert_eq!(engine.tokens().load(&db_key), Some(token("db-fresh")));
}

#[tokio::test]
async fn failing_zone_is_isolated_from_siblings() {
    let (engine, delegate) = mock_engine();
    let transport = engine.transport();
    let a = ZoneId::owned("A");
    let b = ZoneId::owned("B");

    transport.push_database_page(
        Scope::Private,
        Ok(Page::last(
            vec![ZoneChange::Changed(a.clone()), ZoneChange::Changed(b.clone())],
            token("db-1"),
        )),
    );
    transport.push_zone_page(
        Scope::Private,
        &a,
        Ok(Page::new(vec![upsert(&a, "a-1", 1)], token("a-1"), true)),
    );
    transport.push_zone_page(
        Scope::Private,
        &a,
        Err(SyncError::transport_retryable("connection reset")),
    );
    for (i, more) in [(1, true), (2, true), (3, false)] {
        transport.push_zone_page(
            Scope::Private,
            &b,
            Ok(Page::new(
                vec![upsert(&b, &format!("b-{i}"), i)],
                token(&format!("b-{i}")),
                more,
            )),
        );
    }

    let report = engine.sync_scope(Scope::Private).await;

    match &report.error {
        Some(SyncError::Zones(failures)) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].0, a);
        }
        other => panic!("expected zone failures, got {other:?}"),
    }
    assert_eq!(report.zones_synced, BTreeSet::from([b.clone()]));

    let tokens = engine.tokens();
    assert_eq!(tokens.load(&zone_key(Scope::Private, &a)), Some(token("a-1")));
    assert_eq!(tokens.load(&zone_key(Scope::Private, &b)), Some(token("b-3")));
    let b_calls: Vec<_> = delegate
        .calls()
        .into_iter()
        .filter(|call| matches!(call, DelegateCall::Upserted(id) if id.zone == b))
        .collect();
    assert_eq!(b_calls.len(), 3);

    // Zone A is retried by the next sync even though the database feed no
    // longer reports it.
    transport.push_database_page(Scope::Private, Ok(Page::last(Vec::new(), token("db-2"))));
    transport.push_zone_page(
        Scope::Private,
        &a,
        Ok(Page::last(vec![upsert(&a, "a-2", 2)], token("a-2"))),
    );
    let retry = engine.sync_scope(Scope::Private).await;

    assert!(retry.is_success(), "{:?}", retry.error);
    assert_eq!(retry.zones_synced, BTreeSet::from([a.clone()]));
    assert_eq!(
        transport.tokens_sent(&zone_key(Scope::Private, &a)),
        vec![None, Some(token("a-1")), Some(token("a-1"))]
    );
    assert_eq!(delegate.records().len(), 5);
}

#[tokio::test]
async fn zones_found_before_a_database_failure_are_not_lost() {
    let (engine, delegate) = mock_engine();
    let transport = engine.transport();
    let a = ZoneId::owned("A");

    transport.push_database_page(
        Scope::Shared,
        Ok(Page::new(vec![ZoneChange::Changed(a.clone())], token("db-1"), true)),
    );
    transport.push_database_page(
        Scope::Shared,
        Err(SyncError::transport_retryable("timeout")),
    );
    let first = engine.sync_scope(Scope::Shared).await;
    assert!(!first.is_success());
    assert!(delegate.calls().is_empty());

    transport.push_database_page(Scope::Shared, Ok(Page::last(Vec::new(), token("db-2"))));
    transport.push_zone_page(
        Scope::Shared,
        &a,
        Ok(Page::last(vec![upsert(&a, "shared-1", 7)], token("z-1"))),
    );
    let second = engine.sync_scope(Scope::Shared).await;

    assert!(second.is_success(), "{:?}", second.error);
    assert_eq!(
        transport.tokens_sent(&ScopeKey::Database(Scope::Shared)),
        vec![None, Some(token("db-1")), Some(token("db-1"))]
    );
    assert_eq!(delegate.records().len(), 1);
    assert_eq!(
        engine.tokens().load_pending(Scope::Shared),
        Some(BTreeSet::new())
    );
}

#[tokio::test]
async fn redelivered_page_leaves_same_state() {
    let remote = Arc::new(FakeRemote::new(2));
    let zone = ZoneId::owned("A");
    remote.record(Scope::Private, upsert(&zone, "r1", 1));
    remote.record(Scope::Private, upsert(&zone, "r2", 2));
    remote.record(Scope::Private, delete(&zone, "r1"));
    remote.record(Scope::Private, upsert(&zone, "r3", 3));
    remote.record(Scope::Private, upsert(&zone, "r2", 4));

    let (engine, delegate) = engine_with(remote.clone(), Arc::new(InMemorySlotStore::new()));
    assert!(engine.sync_scope(Scope::Private).await.is_success());
    let once = delegate.records();
    assert_eq!(once.len(), 2);
    assert_eq!(once[&RecordId::new(zone.clone(), "r2")].payload, vec![4]);

    // Simulate a crash after page 2's events were applied but before its
    // checkpoint: the zone token and pending entry are from page 1.
    let key = zone_key(Scope::Private, &zone);
    engine.tokens().save(&key, &token("2")).unwrap();
    engine
        .tokens()
        .update_pending(Scope::Private, |pending| {
            pending.insert(zone.clone());
        })
        .unwrap();

    let report = engine.sync_scope(Scope::Private).await;
    assert!(report.is_success());
    assert_eq!(report.upserted + report.deleted, 3);
    assert_eq!(delegate.records(), once);
    assert_eq!(engine.tokens().load(&key), Some(token("5")));
}

#[tokio::test]
async fn tokens_survive_restart() {
    let dir = tempdir().unwrap();
    let remote = Arc::new(FakeRemote::new(3));
    let zone = ZoneId::owned("Todos");
    for i in 0..4 {
        remote.record(Scope::Private, upsert(&zone, &format!("todo-{i}"), i));
    }

    {
        let slots = Arc::new(FileSlotStore::open(dir.path()).unwrap());
        let (engine, delegate) = engine_with(remote.clone(), slots);
        assert!(engine.sync_scope(Scope::Private).await.is_success());
        assert_eq!(delegate.records().len(), 4);
    }

    remote.record(Scope::Private, delete(&zone, "todo-0"));

    let slots = Arc::new(FileSlotStore::open(dir.path()).unwrap());
    let (engine, delegate) = engine_with(remote.clone(), slots);
    assert_eq!(
        engine.tokens().load(&zone_key(Scope::Private, &zone)),
        Some(token("4"))
    );

    let report = engine.sync_scope(Scope::Private).await;
    assert!(report.is_success());
    assert_eq!(
        delegate.calls(),
        vec![DelegateCall::Deleted(RecordId::new(zone.clone(), "todo-0"))]
    );
    assert_eq!(
        engine.tokens().load(&ScopeKey::Database(Scope::Private)),
        Some(token("5"))
    );
}

#[tokio::test]
async fn remote_expiry_resyncs_only_that_scope() {
    let remote = Arc::new(FakeRemote::new(10));
    let private_zone = ZoneId::owned("Todos");
    let shared_zone = ZoneId::new("Groceries", "friend");
    remote.record(Scope::Private, upsert(&private_zone, "p1", 1));
    remote.record(Scope::Shared, upsert(&shared_zone, "s1", 1));

    let (engine, delegate) = engine_with(remote.clone(), Arc::new(InMemorySlotStore::new()));
    assert!(engine.sync_scope(Scope::Private).await.is_success());
    assert!(engine.sync_scope(Scope::Shared).await.is_success());

    remote.record(Scope::Private, upsert(&private_zone, "p2", 2));
    remote.expire_tokens_before(5);

    let expired = engine.sync_scope(Scope::Private).await;
    assert!(matches!(expired.error, Some(SyncError::TokenExpired { .. })));
    assert_eq!(engine.tokens().load(&ScopeKey::Database(Scope::Private)), None);
    assert!(engine
        .tokens()
        .load(&ScopeKey::Database(Scope::Shared))
        .is_some());

    remote.expire_tokens_before(0);
    let recovered = engine.sync_scope(Scope::Private).await;
    assert!(recovered.is_success(), "{:?}", recovered.error);
    assert_eq!(delegate.records().len(), 3);
}

#[tokio::test]
async fn overlapping_sync_of_same_scope_is_rejected() {
    let (engine, _delegate) = mock_engine();
    let transport = engine.transport();
    transport.push_database_page(Scope::Private, Ok(Page::last(Vec::new(), token("db-1"))));
    transport.push_database_page(Scope::Shared, Ok(Page::last(Vec::new(), token("db-s"))));

    let (first, second, other) = tokio::join!(
        engine.sync_scope(Scope::Private),
        engine.sync_scope(Scope::Private),
        engine.sync_scope(Scope::Shared),
    );

    assert!(first.is_success());
    assert!(matches!(
        second.error,
        Some(SyncError::AlreadySyncing(Scope::Private))
    ));
    assert!(other.is_success());
    assert_eq!(
        transport.tokens_sent(&ScopeKey::Database(Scope::Private)),
        vec![None]
    );
    assert_eq!(engine.stats().syncs_rejected, 1);
    assert_eq!(engine.stats().syncs_completed, 2);

    transport.push_database_page(Scope::Private, Ok(Page::last(Vec::new(), token("db-2"))));
    assert!(engine.sync_scope(Scope::Private).await.is_success());
}

#[tokio::test]
async fn undecodable_record_is_skipped_and_reported() {
    let (engine, delegate) = mock_engine();
    let transport = engine.transport();
    let zone = ZoneId::owned("Todos");
    delegate.reject(RecordId::new(zone.clone(), "from-the-future"));

    transport.push_database_page(
        Scope::Private,
        Ok(Page::last(vec![ZoneChange::Changed(zone.clone())], token("db-1"))),
    );
    transport.push_zone_page(
        Scope::Private,
        &zone,
        Ok(Page::last(
            vec![
                upsert(&zone, "ok-1", 1),
                upsert(&zone, "from-the-future", 2),
                upsert(&zone, "ok-2", 3),
            ],
            token("z-1"),
        )),
    );

    let report = engine.sync_scope(Scope::Private).await;

    assert!(report.is_success());
    assert_eq!(report.upserted, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(delegate.records().len(), 2);
    let errors = delegate.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].1.contains("from-the-future"));
    assert_eq!(engine.stats().records_skipped, 1);
}

#[tokio::test]
async fn deleted_zone_is_not_fetched() {
    let (engine, _delegate) = mock_engine();
    let transport = engine.transport();
    let gone = ZoneId::owned("Archive");
    engine
        .tokens()
        .save(&zone_key(Scope::Private, &gone), &token("z-9"))
        .unwrap();

    transport.push_database_page(
        Scope::Private,
        Ok(Page::last(vec![ZoneChange::Deleted(gone.clone())], token("db-1"))),
    );
    let report = engine.sync_scope(Scope::Private).await;

    assert!(report.is_success());
    assert_eq!(report.deleted_zones, BTreeSet::from([gone.clone()]));
    assert!(report.zones_synced.is_empty());
    assert_eq!(engine.tokens().load(&zone_key(Scope::Private, &gone)), None);
    assert!(transport
        .tokens_sent(&zone_key(Scope::Private, &gone))
        .is_empty());
}

#[tokio::test]
async fn setup_is_remembered_across_restarts() {
    let dir = tempdir().unwrap();
    let transport = Arc::new(MockTransport::new());
    transport.fail_next_provisioning(1);

    {
        let slots = Arc::new(FileSlotStore::open(dir.path()).unwrap());
        let (_engine, setup) =
            SyncEngine::connect(SyncConfig::default(), transport.clone(), slots).await;
        assert!(!setup.is_complete());
        assert_eq!(setup.performed.len(), 2);
    }

    let slots = Arc::new(FileSlotStore::open(dir.path()).unwrap());
    let (_engine, setup) = SyncEngine::connect(SyncConfig::default(), transport.clone(), slots).await;
    assert!(setup.is_complete());
    assert_eq!(setup.already_done.len(), 2);
    assert_eq!(setup.performed.len(), 1);

    let creates = transport
        .calls()
        .into_iter()
        .filter(|call| matches!(call, MockCall::CreateZone(..)))
        .count();
    assert_eq!(creates, 2);
}

fn run_sync<T: ChangeFeedTransport>(engine: &SyncEngine<T>, scope: Scope) -> SyncReport {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(engine.sync_scope(scope))
}

#[derive(Debug, Clone)]
enum Op {
    Upsert { zone: usize, record: usize, payload: u8 },
    Delete { zone: usize, record: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..3usize, 0..6usize, any::<u8>())
            .prop_map(|(zone, record, payload)| Op::Upsert { zone, record, payload }),
        1 => (0..3usize, 0..6usize).prop_map(|(zone, record)| Op::Delete { zone, record }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn replica_converges_for_any_paging(
        first in prop::collection::vec(op_strategy(), 0..30),
        second in prop::collection::vec(op_strategy(), 0..15),
        page_size in 1..5usize,
        concurrency in 1..4usize,
    ) {
        let remote = Arc::new(FakeRemote::new(page_size));
        let zones: Vec<ZoneId> = (0..3).map(|i| ZoneId::owned(format!("zone-{i}"))).collect();
        let config = SyncConfig::default().with_max_concurrent_zones(concurrency);
        let engine = SyncEngine::new(config, remote.clone(), Arc::new(InMemorySlotStore::new()));
        let delegate = Arc::new(MemoryDelegate::new());
        engine.set_delegate(&delegate);

        let mut expected: BTreeMap<RecordId, Vec<u8>> = BTreeMap::new();
        let mut issued: HashMap<ZoneId, Vec<DelegateCall>> = HashMap::new();

        for batch in [&first, &second] {
            for op in batch.iter() {
                let event = match *op {
                    Op::Upsert { zone, record, payload } => {
                        let id = RecordId::new(zones[zone].clone(), format!("r{record}"));
                        expected.insert(id.clone(), vec![payload]);
                        issued.entry(zones[zone].clone()).or_default().push(DelegateCall::Upserted(id));
                        upsert(&zones[zone], &format!("r{record}"), payload)
                    }
                    Op::Delete { zone, record } => {
                        let id = RecordId::new(zones[zone].clone(), format!("r{record}"));
                        expected.remove(&id);
                        issued.entry(zones[zone].clone()).or_default().push(DelegateCall::Deleted(id));
                        delete(&zones[zone], &format!("r{record}"))
                    }
                };
                remote.record(Scope::Private, event);
            }

            let report = run_sync(&engine, Scope::Private);
            prop_assert!(report.is_success(), "{:?}", report.error);
        }

        let materialized: BTreeMap<RecordId, Vec<u8>> = delegate
            .records()
            .into_iter()
            .map(|(id, record)| (id, record.payload))
            .collect();
        prop_assert_eq!(materialized, expected);

        // Per-zone delivery order matches the remote log exactly once.
        for zone in &zones {
            let delivered: Vec<DelegateCall> = delegate
                .calls()
                .into_iter()
                .filter(|call| match call {
                    DelegateCall::Upserted(id) | DelegateCall::Deleted(id) => &id.zone == zone,
                })
                .collect();
            let expected_calls = issued.get(zone).cloned().unwrap_or_default();
            prop_assert_eq!(delivered, expected_calls);

            let len = remote.zone_len(Scope::Private, zone);
            let stored = engine.tokens().load(&zone_key(Scope::Private, zone));
            if len > 0 {
                prop_assert_eq!(stored, Some(SyncToken::from_remote(len.to_string())));
            } else {
                prop_assert_eq!(stored, None);
            }
        }
    }
}
