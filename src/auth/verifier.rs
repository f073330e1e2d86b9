use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::secret;
use crate::models::token::{AccountId, TokenDigest};
use crate::store::{StoreError, TokenStore};

/// Why a presented credential was refused. Callers must not expose the
/// distinction to unauthenticated clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Unknown,
    Revoked,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Unknown => f.write_str("unknown"),
            Rejection::Revoked => f.write_str("revoked"),
        }
    }
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("credential rejected ({0})")]
    Rejected(Rejection),

    #[error("token store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for VerifyError {
    fn from(err: StoreError) -> Self {
        VerifyError::StoreUnavailable(err.to_string())
    }
}

/// Per-request credential check.
///
/// One digest, one keyed lookup, one constant-time comparison on every path.
/// Holds no cache, so a revocation is seen by the very next call.
#[derive(Clone)]
pub struct TokenVerifier {
    tokens: Arc<dyn TokenStore>,
    track_last_used: bool,
}

impl TokenVerifier {
    pub fn new(tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            tokens,
            track_last_used: true,
        }
    }

    /// Disable `last_used_at` bookkeeping.
    pub fn without_usage_tracking(mut self) -> Self {
        self.track_last_used = false;
        self
    }

    pub async fn verify(&self, presented: &str) -> Result<AccountId, VerifyError> {
        let digest = secret::digest(presented);
        let found = self.tokens.find_by_identifier(&digest).await?;

        // Compare against a filler digest on a miss so both rejection paths
        // do the same work.
        let filler;
        let stored = match &found {
            Some(token) => &token.digest,
            None => {
                filler = TokenDigest::from_hex("0".repeat(digest.as_str().len()));
                &filler
            }
        };
        let matched = secret::digests_match(stored, &digest);

        let token = match found {
            Some(token) if matched => token,
            _ => {
                tracing::warn!(
                    prefix = %secret::display_prefix(presented),
                    reason = %Rejection::Unknown,
                    "credential rejected"
                );
                return Err(VerifyError::Rejected(Rejection::Unknown));
            }
        };

        if token.revoked {
            tracing::warn!(
                token_id = %token.id,
                prefix = %token.prefix,
                reason = %Rejection::Revoked,
                "credential rejected"
            );
            return Err(VerifyError::Rejected(Rejection::Revoked));
        }

        if self.track_last_used {
            self.touch_in_background(token.id);
        }

        tracing::debug!(token_id = %token.id, account = %token.owner, "credential accepted");
        Ok(token.owner)
    }

    /// Spawn the `last_used_at` update; its outcome never affects the caller.
    fn touch_in_background(&self, id: uuid::Uuid) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = Arc::clone(&self.tokens);
        handle.spawn(async move {
            if let Err(e) = store.touch_last_used(id).await {
                tracing::debug!(token_id = %id, "last_used_at update skipped: {}", e);
            }
        });
    }
}
