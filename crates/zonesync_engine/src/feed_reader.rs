//! Drives one paginated change feed to exhaustion.

use crate::error::{SyncError, SyncResult};
use std::future::Future;
use tracing::debug;
use zonesync_protocol::{Page, ScopeKey, SyncToken};

/// Receives the output of a [`ChangeFeedReader`] run.
pub trait FeedHandler<T> {
    /// Called once per change, in feed order.
    fn on_event(&mut self, event: T);

    /// Called after every event of `page` was delivered, before the next
    /// fetch. An error stops the run without advancing further.
    fn on_checkpoint(&mut self, page: u64, token: &SyncToken) -> SyncResult<()>;
}

/// A feed run that stopped early.
#[derive(Debug)]
pub struct FeedFailure {
    /// Token of the last successful checkpoint, or the initial token if no
    /// page was checkpointed. The next run resumes from here.
    pub last_checkpoint: Option<SyncToken>,
    /// Why the run stopped.
    pub error: SyncError,
}

/// Wraps one fetch cycle of a scope key's change feed.
///
/// Pages are fetched one at a time. For each page every change is handed to
/// [`FeedHandler::on_event`] in page order, then the page token goes to
/// [`FeedHandler::on_checkpoint`], and only then is the next page requested.
/// If the process dies mid-run the next run resumes from the last
/// checkpointed page and re-delivers at most one page of events, so handlers
/// must apply upserts and deletes idempotently by key.
#[derive(Debug, Clone)]
pub struct ChangeFeedReader {
    key: ScopeKey,
}

impl ChangeFeedReader {
    /// Creates a reader for a scope key.
    pub fn new(key: ScopeKey) -> Self {
        Self { key }
    }

    /// Returns the scope key being read.
    pub fn key(&self) -> &ScopeKey {
        &self.key
    }

    /// Runs the feed from `initial` until the remote reports no more pages.
    ///
    /// Returns the final token. On failure returns the last checkpointed
    /// token with the error; the failed page's token is never reported.
    pub async fn run<T, F, Fut, H>(
        &self,
        initial: Option<SyncToken>,
        mut fetch_page: F,
        handler: &mut H,
    ) -> Result<SyncToken, FeedFailure>
    where
        F: FnMut(Option<SyncToken>) -> Fut,
        Fut: Future<Output = SyncResult<Page<T>>>,
        H: FeedHandler<T>,
    {
        let mut checkpointed = initial;
        let mut page_number = 0u64;

        loop {
            let page = match fetch_page(checkpointed.clone()).await {
                Ok(page) => page,
                Err(error) => {
                    return Err(FeedFailure {
                        last_checkpoint: checkpointed,
                        error,
                    })
                }
            };
            page_number += 1;

            if page.more_coming && checkpointed.as_ref() == Some(&page.token) {
                return Err(FeedFailure {
                    last_checkpoint: checkpointed,
                    error: SyncError::Protocol(format!(
                        "feed for {} reported more pages without advancing its token",
                        self.key
                    )),
                });
            }

            let events = page.changes.len();
            for event in page.changes {
                handler.on_event(event);
            }

            if let Err(error) = handler.on_checkpoint(page_number, &page.token) {
                return Err(FeedFailure {
                    last_checkpoint: checkpointed,
                    error,
                });
            }

            debug!(
                key = %self.key,
                page = page_number,
                events,
                token = %page.token,
                more_coming = page.more_coming,
                "page checkpointed"
            );

            checkpointed = Some(page.token);
            if !page.more_coming {
                break;
            }
        }

        // The loop only exits after a successful checkpoint.
        checkpointed.ok_or_else(|| FeedFailure {
            last_checkpoint: None,
            error: SyncError::Protocol(format!("feed for {} ended without a token", self.key)),
        })
    }
}
