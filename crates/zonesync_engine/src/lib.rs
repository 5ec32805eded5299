//! # Zonesync Engine
//!
//! Two-level delta sync of zoned remote record stores.
//!
//! This crate provides:
//! - Durable token storage with per-page checkpoints
//! - A paginated change feed reader
//! - Database-level zone discovery and zone-level record sync
//! - Per-scope sync orchestration with error classification
//! - Idempotent zone and subscription setup
//!
//! ## Architecture
//!
//! A sync of one scope runs in two steps:
//! 1. The database feed reports which zones changed since the stored
//!    database token
//! 2. The feed of every changed zone delivers record upserts and deletes to
//!    the [`RecordChangeDelegate`]
//!
//! Both feeds are paginated. After each page the new token is persisted
//! before the next page is requested, so a crash re-delivers at most one
//! page per feed.
//!
//! ## Key Invariants
//!
//! - A stored token is only replaced by a token issued after it
//! - Events of a page reach the delegate before the page is checkpointed
//! - A corrupt token reads as absent and triggers a full resync
//! - A failing zone never stops its sibling zones
//! - Sync errors are reported, never propagated to the caller
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use zonesync_engine::{MemoryDelegate, SyncConfig, SyncEngine};
//! use zonesync_protocol::Scope;
//! use zonesync_storage::FileSlotStore;
//!
//! let slots = Arc::new(FileSlotStore::open(&data_dir)?);
//! let (engine, _setup) = SyncEngine::connect(SyncConfig::default(), transport, slots).await;
//! let delegate = Arc::new(MemoryDelegate::new());
//! engine.set_delegate(&delegate);
//!
//! engine.sync(Scope::Private, |report| println!("{report:?}")).await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database_step;
mod delegate;
mod engine;
mod error;
mod feed_reader;
mod setup;
mod state;
mod token_store;
mod transport;
mod zone_step;

pub use config::{SyncConfig, DEFAULT_ZONE_NAME};
pub use database_step::{DatabaseChanges, DatabaseSyncStep};
pub use delegate::{DecodeError, DelegateCall, MemoryDelegate, RecordChangeDelegate};
pub use engine::SyncEngine;
pub use error::{ErrorKind, SyncError, SyncResult};
pub use feed_reader::{ChangeFeedReader, FeedFailure, FeedHandler};
pub use setup::{SetupReport, SetupStep};
pub use state::{SyncReport, SyncState, SyncStats};
pub use token_store::{Checkpointer, TokenStore};
pub use transport::{ChangeFeedTransport, MockCall, MockTransport, ZoneProvisioner};
pub use zone_step::{ZoneCounts, ZoneSyncOutcome, ZoneSyncStep};
