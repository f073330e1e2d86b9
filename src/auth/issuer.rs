//! Token issuance and administration.
//!
//! Issuance is an administrator action: it checks the account against the
//! directory, generates a secret, and persists only its digest. The secret is
//! handed back exactly once in [`IssuedToken`].

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::secret;
use crate::models::token::{AccountId, Token};
use crate::store::{AccountDirectory, StoreError, TokenStore};

/// Attempts before giving up on digest collisions.
const MAX_SAVE_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IssueOptions {
    /// Revoke the account's tokens created before the new one, once the new
    /// one is stored.
    pub revoke_existing: bool,
}

/// A freshly issued token. The secret is wiped from memory on drop.
pub struct IssuedToken {
    secret: Zeroizing<String>,
    pub token: Token,
    /// Number of older tokens revoked by rotation.
    pub rotated: usize,
}

impl IssuedToken {
    pub fn secret(&self) -> &str {
        self.secret.as_str()
    }

    pub fn account(&self) -> &AccountId {
        &self.token.owner
    }
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("secret", &"<redacted>")
            .field("token", &self.token)
            .field("rotated", &self.rotated)
            .finish()
    }
}

pub struct TokenIssuer {
    tokens: Arc<dyn TokenStore>,
    accounts: Arc<dyn AccountDirectory>,
    clock: IssueClock,
}

impl TokenIssuer {
    pub fn new(tokens: Arc<dyn TokenStore>, accounts: Arc<dyn AccountDirectory>) -> Self {
        Self {
            tokens,
            accounts,
            clock: IssueClock::default(),
        }
    }

    /// Issue a new token for an existing account.
    ///
    /// Fails with `UnknownAccount` (and writes nothing) when the account is
    /// blank or absent from the directory. If the account disappears while
    /// the token is being saved, the token is revoked and `UnknownAccount`
    /// returned. Two calls for the same account yield two independent tokens
    /// unless `revoke_existing` is set.
    #[tracing::instrument(skip(self, options), fields(rotate = options.revoke_existing))]
    pub async fn issue(
        &self,
        account: &str,
        options: IssueOptions,
    ) -> Result<IssuedToken, IssueError> {
        let owner = AccountId::new(account)
            .ok_or_else(|| IssueError::UnknownAccount(account.to_string()))?;

        if !self.accounts.exists(&owner).await? {
            tracing::warn!(account = %owner, "issue refused: unknown account");
            return Err(IssueError::UnknownAccount(owner.to_string()));
        }

        let mut attempt = 0;
        let (secret, token) = loop {
            attempt += 1;
            let secret = secret::generate();
            let token = Token {
                id: Uuid::new_v4(),
                digest: secret::digest(&secret),
                prefix: secret::display_prefix(&secret),
                owner: owner.clone(),
                created_at: self.clock.now(),
                revoked: false,
                last_used_at: None,
            };

            match self.tokens.save(&token).await {
                Ok(()) => break (secret, token),
                Err(StoreError::DuplicateIdentifier) if attempt < MAX_SAVE_ATTEMPTS => {
                    tracing::warn!(attempt, "token digest collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        };

        // An account removed between the check above and the save must not
        // end up with a live token.
        if !self.accounts.exists(&owner).await? {
            self.tokens.mark_revoked(token.id).await?;
            tracing::warn!(
                account = %owner,
                token_id = %token.id,
                "account removed during issuance, token revoked"
            );
            return Err(IssueError::UnknownAccount(owner.to_string()));
        }

        let rotated = if options.revoke_existing {
            self.revoke_older(&owner, &token).await.map_err(|e| {
                tracing::error!(
                    token_id = %token.id,
                    "new token stored but rotation failed: {}",
                    e
                );
                e
            })?
        } else {
            0
        };

        tracing::info!(
            account = %owner,
            token_id = %token.id,
            prefix = %token.prefix,
            rotated,
            "token issued"
        );

        Ok(IssuedToken {
            secret,
            token,
            rotated,
        })
    }

    /// Tokens of an account, oldest first. Works for removed accounts too.
    pub async fn list_for_account(&self, account: &str) -> Result<Vec<Token>, IssueError> {
        let owner = AccountId::new(account)
            .ok_or_else(|| IssueError::UnknownAccount(account.to_string()))?;
        Ok(self.tokens.find_by_owner(&owner).await?)
    }

    /// Revoke by public id. Returns false if no such token exists.
    pub async fn revoke(&self, id: Uuid) -> Result<bool, StoreError> {
        let revoked = self.tokens.mark_revoked(id).await?;
        if revoked {
            tracing::info!(token_id = %id, "token revoked");
        }
        Ok(revoked)
    }

    /// Revoke by the secret itself, for clients reporting a leaked token.
    pub async fn revoke_identifier(&self, presented: &str) -> Result<bool, StoreError> {
        let digest = secret::digest(presented);
        match self.tokens.find_by_identifier(&digest).await? {
            Some(token) if secret::digests_match(&token.digest, &digest) => {
                self.revoke(token.id).await
            }
            _ => Ok(false),
        }
    }

    /// Revoke every live token of an account. Returns how many changed.
    pub async fn revoke_all_for_account(&self, owner: &AccountId) -> Result<usize, StoreError> {
        self.revoke_matching(owner, |_| true).await
    }

    /// Account deletion: the account leaves the directory, then its tokens
    /// are revoked (history kept). A token saved by a concurrent `issue`
    /// is either seen here or caught by that issue's own re-check.
    pub async fn remove_account(&self, account: &str) -> Result<usize, IssueError> {
        let owner = AccountId::new(account)
            .ok_or_else(|| IssueError::UnknownAccount(account.to_string()))?;
        let existed = self.accounts.remove_account(&owner).await?;
        // revoke even when already gone, so a retry after a failed sweep
        // finishes the job
        let revoked = self.revoke_all_for_account(&owner).await?;
        if !existed {
            return Err(IssueError::UnknownAccount(owner.to_string()));
        }
        tracing::info!(account = %owner, revoked, "account removed");
        Ok(revoked)
    }

    /// Tokens saved after `newest` (by a concurrent rotation) are left alone.
    async fn revoke_older(&self, owner: &AccountId, newest: &Token) -> Result<usize, StoreError> {
        self.revoke_matching(owner, |t| t.created_at < newest.created_at)
            .await
    }

    async fn revoke_matching<F>(&self, owner: &AccountId, pick: F) -> Result<usize, StoreError>
    where
        F: Fn(&Token) -> bool,
    {
        let mut count = 0;
        for token in self.tokens.find_by_owner(owner).await? {
            if token.is_live() && pick(&token) && self.tokens.mark_revoked(token.id).await? {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Wall clock that never repeats or goes backwards within one issuer, at
/// the microsecond precision Postgres keeps.
#[derive(Default)]
struct IssueClock {
    last_micros: AtomicI64,
}

impl IssueClock {
    fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().timestamp_micros();
        let mut prev = self.last_micros.load(Ordering::SeqCst);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last_micros
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => {
                    let secs = next.div_euclid(1_000_000);
                    let nanos = (next.rem_euclid(1_000_000) * 1_000) as u32;
                    return Utc.timestamp_opt(secs, nanos).single().unwrap_or_else(Utc::now);
                }
                Err(actual) => prev = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::token::TokenDigest;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Reports a digest collision on the first `collisions` saves.
    struct CollidingStore {
        inner: MemoryStore,
        collisions: u32,
        saves: AtomicU32,
    }

    #[async_trait]
    impl TokenStore for CollidingStore {
        async fn save(&self, token: &Token) -> Result<(), StoreError> {
            if self.saves.fetch_add(1, Ordering::SeqCst) < self.collisions {
                return Err(StoreError::DuplicateIdentifier);
            }
            self.inner.save(token).await
        }

        async fn find_by_identifier(
            &self,
            digest: &TokenDigest,
        ) -> Result<Option<Token>, StoreError> {
            self.inner.find_by_identifier(digest).await
        }

        async fn find_by_owner(&self, owner: &AccountId) -> Result<Vec<Token>, StoreError> {
            self.inner.find_by_owner(owner).await
        }

        async fn mark_revoked(&self, id: Uuid) -> Result<bool, StoreError> {
            self.inner.mark_revoked(id).await
        }

        async fn touch_last_used(&self, id: Uuid) -> Result<(), StoreError> {
            self.inner.touch_last_used(id).await
        }
    }

    fn colliding_issuer(collisions: u32) -> (Arc<CollidingStore>, TokenIssuer) {
        let inner = MemoryStore::with_accounts(["alice"]);
        let store = Arc::new(CollidingStore {
            inner: inner.clone(),
            collisions,
            saves: AtomicU32::new(0),
        });
        let issuer = TokenIssuer::new(store.clone(), Arc::new(inner));
        (store, issuer)
    }

    #[test]
    fn collision_is_retried_with_a_fresh_secret() {
        let (store, issuer) = colliding_issuer(2);
        let issued = tokio_test::block_on(issuer.issue("alice", IssueOptions::default()))
            .expect("third attempt succeeds");
        assert_eq!(store.saves.load(Ordering::SeqCst), 3);
        assert_eq!(store.inner.len(), 1);
        assert_eq!(issued.account().as_str(), "alice");
    }

    #[test]
    fn persistent_collisions_give_up() {
        let (store, issuer) = colliding_issuer(u32::MAX);
        let err = tokio_test::block_on(issuer.issue("alice", IssueOptions::default()))
            .unwrap_err();
        assert!(matches!(
            err,
            IssueError::Store(StoreError::DuplicateIdentifier)
        ));
        assert_eq!(store.saves.load(Ordering::SeqCst), MAX_SAVE_ATTEMPTS);
        assert!(store.inner.is_empty());
    }

    /// Removes the owner from the directory right after each save, as a
    /// concurrent `remove_account` would.
    struct RemovingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl TokenStore for RemovingStore {
        async fn save(&self, token: &Token) -> Result<(), StoreError> {
            self.inner.save(token).await?;
            self.inner.remove_account(&token.owner).await?;
            Ok(())
        }

        async fn find_by_identifier(
            &self,
            digest: &TokenDigest,
        ) -> Result<Option<Token>, StoreError> {
            self.inner.find_by_identifier(digest).await
        }

        async fn find_by_owner(&self, owner: &AccountId) -> Result<Vec<Token>, StoreError> {
            self.inner.find_by_owner(owner).await
        }

        async fn mark_revoked(&self, id: Uuid) -> Result<bool, StoreError> {
            self.inner.mark_revoked(id).await
        }

        async fn touch_last_used(&self, id: Uuid) -> Result<(), StoreError> {
            self.inner.touch_last_used(id).await
        }
    }

    #[test]
    fn account_removed_during_issue_leaves_no_live_token() {
        let inner = MemoryStore::with_accounts(["alice"]);
        let issuer = TokenIssuer::new(
            Arc::new(RemovingStore {
                inner: inner.clone(),
            }),
            Arc::new(inner.clone()),
        );

        let err = tokio_test::block_on(issuer.issue("alice", IssueOptions::default()))
            .unwrap_err();
        assert!(matches!(err, IssueError::UnknownAccount(ref a) if a == "alice"));

        let alice = AccountId::new("alice").unwrap();
        let stored = tokio_test::block_on(inner.find_by_owner(&alice)).unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].revoked);
    }

    #[test]
    fn clock_is_strictly_increasing() {
        let clock = IssueClock::default();
        let mut prev = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn issued_token_debug_hides_secret() {
        let issued = IssuedToken {
            secret: Zeroizing::new("vgl_supersecret".to_string()),
            token: Token {
                id: Uuid::new_v4(),
                digest: secret::digest("vgl_supersecret"),
                prefix: "vgl_supersec".to_string(),
                owner: AccountId::new("alice").unwrap(),
                created_at: Utc::now(),
                revoked: false,
                last_used_at: None,
            },
            rotated: 0,
        };
        let rendered = format!("{:?}", issued);
        assert!(!rendered.contains("vgl_supersecret"));
        assert!(rendered.contains("<redacted>"));
    }
}
