//! Remote store collaborators.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use zonesync_protocol::{ChangeEvent, Page, Scope, ScopeKey, SyncToken, ZoneChange, ZoneId};

/// Fetches pages of the remote change feeds.
///
/// Implementations own transport, authentication, timeouts and retries;
/// the engine treats each call as one fallible page fetch. A feed must
/// report `more_coming == false` on its terminal page and return pages in a
/// stable order when the same token is retried. A token the remote no longer
/// accepts must be reported as [`SyncError::TokenExpired`].
#[async_trait]
pub trait ChangeFeedTransport: Send + Sync {
    /// Fetches the next page of "which zones changed" for a database.
    async fn fetch_database_changes(
        &self,
        scope: Scope,
        token: Option<SyncToken>,
    ) -> SyncResult<Page<ZoneChange>>;

    /// Fetches the next page of record changes for one zone.
    async fn fetch_zone_changes(
        &self,
        scope: Scope,
        zone: &ZoneId,
        token: Option<SyncToken>,
    ) -> SyncResult<Page<ChangeEvent>>;
}

/// One-time zone and subscription setup calls.
#[async_trait]
pub trait ZoneProvisioner: Send + Sync {
    /// Creates a zone. Creating an existing zone must succeed.
    async fn create_zone(&self, scope: Scope, zone: &ZoneId) -> SyncResult<()>;

    /// Subscribes to change notifications for a database.
    async fn subscribe(&self, scope: Scope, subscription_id: &str) -> SyncResult<()>;
}

/// A call observed by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// A page fetch for a scope key with the token sent.
    Fetch(ScopeKey, Option<SyncToken>),
    /// A zone creation.
    CreateZone(Scope, ZoneId),
    /// A subscription.
    Subscribe(Scope, String),
}

/// A scripted transport for testing.
///
/// Each feed replays its queued results in order; a feed with nothing
/// queued fails with a protocol error. Every fetch yields to the runtime
/// once, so concurrent zone fetches genuinely interleave.
#[derive(Default)]
pub struct MockTransport {
    database_pages: Mutex<HashMap<Scope, VecDeque<SyncResult<Page<ZoneChange>>>>>,
    zone_pages: Mutex<HashMap<(Scope, ZoneId), VecDeque<SyncResult<Page<ChangeEvent>>>>>,
    calls: Mutex<Vec<MockCall>>,
    provisioning_failures: Mutex<u32>,
}

impl MockTransport {
    /// Creates a transport with no scripted pages.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a database feed result.
    pub fn push_database_page(&self, scope: Scope, page: SyncResult<Page<ZoneChange>>) {
        self.database_pages
            .lock()
            .entry(scope)
            .or_default()
            .push_back(page);
    }

    /// Queues a zone feed result.
    pub fn push_zone_page(&self, scope: Scope, zone: &ZoneId, page: SyncResult<Page<ChangeEvent>>) {
        self.zone_pages
            .lock()
            .entry((scope, zone.clone()))
            .or_default()
            .push_back(page);
    }

    /// Makes the next `count` provisioning calls fail.
    pub fn fail_next_provisioning(&self, count: u32) {
        *self.provisioning_failures.lock() = count;
    }

    /// Returns every call made so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Returns the tokens sent to one feed, in order.
    pub fn tokens_sent(&self, key: &ScopeKey) -> Vec<Option<SyncToken>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                MockCall::Fetch(k, token) if k == key => Some(token.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the number of results still queued across all feeds.
    pub fn remaining(&self) -> usize {
        self.database_pages.lock().values().map(VecDeque::len).sum::<usize>()
            + self.zone_pages.lock().values().map(VecDeque::len).sum::<usize>()
    }

    fn provisioning_result(&self, what: &str) -> SyncResult<()> {
        let mut failures = self.provisioning_failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(SyncError::Provisioning(format!("{what} rejected")));
        }
        Ok(())
    }
}

#[async_trait]
impl ChangeFeedTransport for MockTransport {
    async fn fetch_database_changes(
        &self,
        scope: Scope,
        token: Option<SyncToken>,
    ) -> SyncResult<Page<ZoneChange>> {
        let key = ScopeKey::Database(scope);
        self.calls.lock().push(MockCall::Fetch(key.clone(), token));
        tokio::task::yield_now().await;

        let next = self
            .database_pages
            .lock()
            .get_mut(&scope)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| Err(SyncError::Protocol(format!("no scripted page for {key}"))))
    }

    async fn fetch_zone_changes(
        &self,
        scope: Scope,
        zone: &ZoneId,
        token: Option<SyncToken>,
    ) -> SyncResult<Page<ChangeEvent>> {
        let key = ScopeKey::Zone(scope, zone.clone());
        self.calls.lock().push(MockCall::Fetch(key.clone(), token));
        tokio::task::yield_now().await;

        let next = self
            .zone_pages
            .lock()
            .get_mut(&(scope, zone.clone()))
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| Err(SyncError::Protocol(format!("no scripted page for {key}"))))
    }
}

#[async_trait]
impl ZoneProvisioner for MockTransport {
    async fn create_zone(&self, scope: Scope, zone: &ZoneId) -> SyncResult<()> {
        self.calls
            .lock()
            .push(MockCall::CreateZone(scope, zone.clone()));
        self.provisioning_result("zone creation")
    }

    async fn subscribe(&self, scope: Scope, subscription_id: &str) -> SyncResult<()> {
        self.calls
            .lock()
            .push(MockCall::Subscribe(scope, subscription_id.to_string()));
        self.provisioning_result("subscription")
    }
}
