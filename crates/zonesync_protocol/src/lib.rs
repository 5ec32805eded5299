//! # zonesync Protocol
//!
//! Change-feed types and the token envelope codec for zonesync.
//!
//! This crate provides:
//! - [`SyncToken`], the opaque remote-issued cursor
//! - [`Scope`], [`ZoneId`] and [`ScopeKey`] naming what a token belongs to
//! - [`Record`], [`RecordId`] and [`ChangeEvent`] for zone-level changes
//! - [`ZoneChange`] for database-level changes
//! - [`Page`], one batch of a paginated change feed
//! - CBOR envelopes for persisted tokens and pending zone sets
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod envelope;
mod error;
mod record;
mod scope;
mod token;

pub use change_feed::{ChangeEvent, Page, ZoneChange};
pub use envelope::{decode_token, decode_zone_set, encode_token, encode_zone_set, ENVELOPE_VERSION};
pub use error::{ProtocolError, ProtocolResult};
pub use record::{Record, RecordId};
pub use scope::{Scope, ScopeKey, ZoneId, DEFAULT_OWNER};
pub use token::SyncToken;
