//! CBOR envelopes for persisted sync state.
//!
//! A persisted token is wrapped with its slot name and a truncated SHA-256
//! digest so a torn, foreign or bit-flipped slot is detected on load instead
//! of being sent back to the remote store as a garbage cursor.

use crate::error::{ProtocolError, ProtocolResult};
use crate::scope::ZoneId;
use crate::token::SyncToken;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

const DIGEST_LEN: usize = 8;

#[derive(Serialize, Deserialize)]
struct TokenEnvelope {
    version: u8,
    slot: String,
    token: SyncToken,
    digest: [u8; DIGEST_LEN],
}

#[derive(Serialize, Deserialize)]
struct ZoneSetEnvelope {
    version: u8,
    zones: Vec<ZoneId>,
}

fn token_digest(slot: &str, token: &SyncToken) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update([ENVELOPE_VERSION]);
    hasher.update(slot.as_bytes());
    hasher.update([0u8]);
    hasher.update(token.as_bytes());
    let full = hasher.finalize();

    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&full[..DIGEST_LEN]);
    digest
}

fn to_cbor<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| ProtocolError::Codec(e.to_string()))?;
    Ok(bytes)
}

fn check_version(version: u8) -> ProtocolResult<()> {
    if version != ENVELOPE_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    Ok(())
}

/// Encodes a token for storage under `slot`.
///
/// # Errors
///
/// Returns [`ProtocolError::Codec`] if serialization fails.
pub fn encode_token(slot: &str, token: &SyncToken) -> ProtocolResult<Vec<u8>> {
    to_cbor(&TokenEnvelope {
        version: ENVELOPE_VERSION,
        slot: slot.to_string(),
        token: token.clone(),
        digest: token_digest(slot, token),
    })
}

/// Decodes a token previously stored under `slot`.
///
/// # Errors
///
/// Fails if the bytes are not an envelope, were written by another format
/// version, belong to another slot, or do not match their digest.
pub fn decode_token(slot: &str, bytes: &[u8]) -> ProtocolResult<SyncToken> {
    let envelope: TokenEnvelope =
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::Codec(e.to_string()))?;

    check_version(envelope.version)?;
    if envelope.slot != slot {
        return Err(ProtocolError::SlotMismatch {
            expected: slot.to_string(),
            found: envelope.slot,
        });
    }
    if envelope.digest != token_digest(slot, &envelope.token) {
        return Err(ProtocolError::DigestMismatch);
    }
    Ok(envelope.token)
}

/// Encodes a set of zones.
///
/// # Errors
///
/// Returns [`ProtocolError::Codec`] if serialization fails.
pub fn encode_zone_set(zones: &BTreeSet<ZoneId>) -> ProtocolResult<Vec<u8>> {
    to_cbor(&ZoneSetEnvelope {
        version: ENVELOPE_VERSION,
        zones: zones.iter().cloned().collect(),
    })
}

/// Decodes a set of zones.
///
/// # Errors
///
/// Fails if the bytes are not a zone set envelope of the current version.
pub fn decode_zone_set(bytes: &[u8]) -> ProtocolResult<BTreeSet<ZoneId>> {
    let envelope: ZoneSetEnvelope =
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::Codec(e.to_string()))?;
    check_version(envelope.version)?;
    Ok(envelope.zones.into_iter().collect())
}
