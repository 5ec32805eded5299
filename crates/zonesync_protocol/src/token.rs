//! Opaque server change tokens.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque, remote-issued cursor marking sync progress for one scope key.
///
/// Tokens are strictly ordered by the remote store: a stored token is only
/// ever replaced by one the remote issued after it for the same scope key.
/// The client never builds or inspects them; it stores what the remote
/// returned and sends it back on the next fetch. Absence of a token means
/// "fetch everything from an empty state".
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncToken(Vec<u8>);

impl SyncToken {
    /// Wraps token bytes exactly as the remote store issued them.
    pub fn from_remote(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw token bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the token, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Returns the token length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the remote issued an empty token.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// Tokens show up in logs; keep printable ones readable and truncate the rest.
impl fmt::Display for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(text) if text.chars().all(|c| c.is_ascii_graphic()) => f.write_str(text),
            _ => {
                for byte in self.0.iter().take(12) {
                    write!(f, "{byte:02x}")?;
                }
                if self.0.len() > 12 {
                    write!(f, "..({} bytes)", self.0.len())?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncToken({self})")
    }
}
