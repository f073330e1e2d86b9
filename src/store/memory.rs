use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::{AccountDirectory, StoreError, TokenStore};
use crate::models::token::{AccountId, Token, TokenDigest};

/// In-process token store backed by DashMap.
///
/// Used by the test-suite and for embedding the issuer/verifier without a
/// database. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tokens: Arc<DashMap<Uuid, Token>>,
    by_digest: Arc<DashMap<TokenDigest, Uuid>>,
    accounts: Arc<DashMap<AccountId, DateTime<Utc>>>,
    unavailable: Arc<AtomicBool>,
    lookups: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience for seeding accounts.
    pub fn with_accounts<I, S>(accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        for name in accounts {
            if let Some(account) = AccountId::new(name) {
                store.accounts.insert(account, Utc::now());
            }
        }
        store
    }

    /// Simulate an outage: every call fails with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Number of `find_by_identifier` calls served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn save(&self, token: &Token) -> Result<(), StoreError> {
        self.check_available()?;
        match self.by_digest.entry(token.digest.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateIdentifier),
            Entry::Vacant(slot) => {
                // record first so the index never points at a missing row
                self.tokens.insert(token.id, token.clone());
                slot.insert(token.id);
                Ok(())
            }
        }
    }

    async fn find_by_identifier(
        &self,
        digest: &TokenDigest,
    ) -> Result<Option<Token>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let id = match self.by_digest.get(digest) {
            Some(entry) => *entry.value(),
            None => return Ok(None),
        };
        Ok(self.tokens.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_by_owner(&self, owner: &AccountId) -> Result<Vec<Token>, StoreError> {
        self.check_available()?;
        let mut tokens: Vec<Token> = self
            .tokens
            .iter()
            .filter(|entry| &entry.value().owner == owner)
            .map(|entry| entry.value().clone())
            .collect();
        tokens.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tokens)
    }

    async fn mark_revoked(&self, id: Uuid) -> Result<bool, StoreError> {
        self.check_available()?;
        match self.tokens.get_mut(&id) {
            Some(mut entry) => {
                entry.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn touch_last_used(&self, id: Uuid) -> Result<(), StoreError> {
        self.check_available()?;
        if let Some(mut entry) = self.tokens.get_mut(&id) {
            entry.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

#[async_trait]
impl AccountDirectory for MemoryStore {
    async fn exists(&self, account: &AccountId) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.accounts.contains_key(account))
    }

    async fn add_account(&self, account: &AccountId) -> Result<bool, StoreError> {
        self.check_available()?;
        match self.accounts.entry(account.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                Ok(true)
            }
        }
    }

    async fn remove_account(&self, account: &AccountId) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.accounts.remove(account).is_some())
    }

    async fn list_accounts(&self) -> Result<Vec<AccountId>, StoreError> {
        self.check_available()?;
        let mut accounts: Vec<AccountId> =
            self.accounts.iter().map(|entry| entry.key().clone()).collect();
        accounts.sort();
        Ok(accounts)
    }
}
