pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::token::{AccountId, Token, TokenDigest};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage could not be reached or timed out. Treated as transient.
    #[error("token store unavailable: {0}")]
    Unavailable(String),

    /// A token with the same digest already exists.
    #[error("duplicate token identifier")]
    DuplicateIdentifier,
}

/// Durable storage for token records.
/// Implementations: PgStore (Postgres via sqlx), MemoryStore (DashMap).
///
/// `save` must be atomic and reject duplicate digests. Reads must observe the
/// latest `save` / `mark_revoked` for the same record.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn save(&self, token: &Token) -> Result<(), StoreError>;

    /// Exact-match lookup by the digest of a token identifier.
    async fn find_by_identifier(&self, digest: &TokenDigest)
        -> Result<Option<Token>, StoreError>;

    /// All tokens of an account, oldest first.
    async fn find_by_owner(&self, owner: &AccountId) -> Result<Vec<Token>, StoreError>;

    /// Returns false when no such token exists. Revoking twice is a no-op.
    async fn mark_revoked(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Best-effort bookkeeping after a successful verification.
    async fn touch_last_used(&self, id: Uuid) -> Result<(), StoreError>;

    /// Cheap liveness probe for readiness checks.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// The narrow view of the external identity system.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn exists(&self, account: &AccountId) -> Result<bool, StoreError>;

    /// Returns false if the account was already registered.
    async fn add_account(&self, account: &AccountId) -> Result<bool, StoreError>;

    /// Returns false if the account did not exist.
    async fn remove_account(&self, account: &AccountId) -> Result<bool, StoreError>;

    async fn list_accounts(&self) -> Result<Vec<AccountId>, StoreError>;
}
