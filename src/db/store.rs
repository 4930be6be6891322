//! Store contracts; scoped methods take the scope handle `S` explicitly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::error::LedgerError;

use super::account::Account;
use super::transfer::{Transfer, TransferStatus};
use super::tx::Transaction;

#[derive(Error, Debug)]
pub enum StoreError {
    /// A unique constraint rejected the write.
    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Atomic scope timed out")]
    TimedOut,

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                let constraint = db_err.constraint().unwrap_or("unique").to_string();
                return StoreError::Conflict(constraint);
            }
        }
        StoreError::Database(err)
    }
}

/// Atomic execution boundary.
///
/// `run` hands a fresh scope to `work`, commits when it returns `Ok` and rolls
/// back when it returns `Err`. Dropping the returned future before it
/// resolves (timeout, client disconnect) rolls back as well.
pub trait UnitOfWork: Send + Sync + 'static {
    type Scope: Send;

    fn run<'a, T, F>(&'a self, work: F) -> BoxFuture<'a, Result<T, LedgerError>>
    where
        T: Send + 'a,
        F: for<'s> FnOnce(&'s mut Self::Scope) -> BoxFuture<'s, Result<T, LedgerError>>
            + Send
            + 'a;
}

#[async_trait]
pub trait AccountStore<S: Send>: Send + Sync + 'static {
    async fn create(&self, account: &Account) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Read an account under an exclusive row lock held until `scope` ends.
    async fn lock(&self, scope: &mut S, id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Overwrite the balance. Only valid while the row is locked by `scope`.
    async fn update_balance(
        &self,
        scope: &mut S,
        id: Uuid,
        balance: Decimal,
    ) -> Result<(), StoreError>;

    async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Account>, StoreError>;

    async fn count_by_user(&self, user_id: Uuid) -> Result<i64, StoreError>;
}

/// Append-only ledger of balance movements.
#[async_trait]
pub trait LedgerStore<S: Send>: Send + Sync + 'static {
    async fn append(&self, scope: &mut S, entry: &Transaction) -> Result<(), StoreError>;

    async fn list_by_account(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, StoreError>;

    async fn count_by_account(&self, account_id: Uuid) -> Result<i64, StoreError>;
}

#[async_trait]
pub trait TransferStore<S: Send>: Send + Sync + 'static {
    /// Insert a new transfer. Fails with `StoreError::Conflict` when the
    /// idempotency key is already taken.
    async fn create(&self, scope: &mut S, transfer: &Transfer) -> Result<(), StoreError>;

    async fn update_status(
        &self,
        scope: &mut S,
        id: Uuid,
        status: TransferStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Transfer>, StoreError>;

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Transfer>, StoreError>;

    /// Transfers touching any account owned by `user_id`, newest first.
    async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transfer>, StoreError>;

    async fn count_by_user(&self, user_id: Uuid) -> Result<i64, StoreError>;
}
