use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use uuid::Uuid;

use super::{AccountDirectory, StoreError, TokenStore};
use crate::models::token::{AccountId, Token, TokenDigest};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect with bounded pool acquisition and a server-side statement
    /// timeout, so a stalled database surfaces as `StoreError::Unavailable`.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let options = PgConnectOptions::from_str(database_url)?
            .options([("statement_timeout", timeout.as_millis().to_string())]);
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(timeout)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for PgStore {
    async fn save(&self, token: &Token) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO api_tokens (id, digest, prefix, owner, created_at, revoked, last_used_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(token.id)
        .bind(token.digest.as_str())
        .bind(&token.prefix)
        .bind(token.owner.as_str())
        .bind(token.created_at)
        .bind(token.revoked)
        .bind(token.last_used_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    async fn find_by_identifier(
        &self,
        digest: &TokenDigest,
    ) -> Result<Option<Token>, StoreError> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT id, digest, prefix, owner, created_at, revoked, last_used_at FROM api_tokens WHERE digest = $1",
        )
        .bind(digest.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.map(Token::from))
    }

    async fn find_by_owner(&self, owner: &AccountId) -> Result<Vec<Token>, StoreError> {
        let rows = sqlx::query_as::<_, TokenRow>(
            "SELECT id, digest, prefix, owner, created_at, revoked, last_used_at FROM api_tokens WHERE owner = $1 ORDER BY created_at ASC",
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(rows.into_iter().map(Token::from).collect())
    }

    async fn mark_revoked(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE api_tokens SET revoked = true WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn touch_last_used(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE api_tokens SET last_used_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

#[async_trait]
impl AccountDirectory for PgStore {
    async fn exists(&self, account: &AccountId) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM accounts WHERE username = $1)",
        )
        .bind(account.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(exists)
    }

    async fn add_account(&self, account: &AccountId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO accounts (username) VALUES ($1) ON CONFLICT (username) DO NOTHING",
        )
        .bind(account.as_str())
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_account(&self, account: &AccountId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM accounts WHERE username = $1")
            .bind(account.as_str())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_accounts(&self) -> Result<Vec<AccountId>, StoreError> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT username FROM accounts ORDER BY username ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(names.into_iter().map(AccountId::from_stored).collect())
    }
}

/// Unique violations become `DuplicateIdentifier`; everything else (pool
/// timeout, I/O, statement timeout) is reported as unavailable.
fn store_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::DuplicateIdentifier;
        }
    }
    tracing::error!("token store error: {}", err);
    StoreError::Unavailable(err.to_string())
}

// -- Row types --

#[derive(Debug, sqlx::FromRow)]
pub struct TokenRow {
    pub id: Uuid,
    pub digest: String,
    pub prefix: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub revoked: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<TokenRow> for Token {
    fn from(row: TokenRow) -> Self {
        Token {
            id: row.id,
            digest: TokenDigest::from_hex(row.digest),
            prefix: row.prefix,
            owner: AccountId::from_stored(row.owner),
            created_at: row.created_at,
            revoked: row.revoked,
            last_used_at: row.last_used_at,
        }
    }
}
