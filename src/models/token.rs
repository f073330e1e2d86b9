// Token model shared by the issuer, the verifier and every store backend.
// Only the digest of a token's secret is ever persisted; see `auth::secret`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of an account in the surrounding backend (a username).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Returns `None` for an empty (or whitespace-only) identifier.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    /// Rebuild from a value that was validated before it was stored.
    pub(crate) fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hex-encoded SHA-256 of a token secret. The keyed form used for lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenDigest(String);

impl TokenDigest {
    pub(crate) fn from_hex(hex: String) -> Self {
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A persisted token record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// Public handle used by administrators; not a credential.
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub digest: TokenDigest,
    /// Leading characters of the secret, safe to display.
    pub prefix: String,
    pub owner: AccountId,
    pub created_at: DateTime<Utc>,
    pub revoked: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Token {
    pub fn is_live(&self) -> bool {
        !self.revoked
    }

    pub fn status(&self) -> &'static str {
        if self.revoked {
            "revoked"
        } else {
            "active"
        }
    }
}
