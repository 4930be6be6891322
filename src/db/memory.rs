//! In-memory adapter for every store contract, used by tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::LedgerError;

use super::account::Account;
use super::store::{AccountStore, LedgerStore, StoreError, TransferStore, UnitOfWork};
use super::transfer::{Transfer, TransferStatus};
use super::tx::Transaction;

#[derive(Default)]
struct State {
    accounts: HashMap<Uuid, Account>,
    transactions: Vec<Transaction>,
    transfers: Vec<Transfer>,
    failing_balance_updates: HashSet<Uuid>,
    failing_appends: HashSet<Uuid>,
    failing_status_updates: bool,
}

impl State {
    fn key_taken(&self, key: &str) -> bool {
        self.transfers
            .iter()
            .any(|t| t.idempotency_key.as_deref() == Some(key))
    }

    fn transfers_of(&self, user_id: Uuid) -> Vec<Transfer> {
        let owned: Vec<Uuid> = self
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .map(|a| a.id)
            .collect();
        let mut found: Vec<Transfer> = self
            .transfers
            .iter()
            .rev()
            .filter(|t| owned.iter().any(|id| t.involves(*id)))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found
    }
}

/// Pending writes of one atomic scope plus the row locks it holds.
#[derive(Default)]
pub struct MemoryScope {
    guards: Vec<OwnedMutexGuard<()>>,
    locked: HashSet<Uuid>,
    balances: HashMap<Uuid, Decimal>,
    transactions: Vec<Transaction>,
    transfers: Vec<Transfer>,
    status_updates: Vec<(Uuid, TransferStatus, Option<DateTime<Utc>>)>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    row_locks: Mutex<HashMap<Uuid, Arc<RowLock<()>>>>,
}

fn page<T>(items: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    items
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

fn injected(what: String) -> StoreError {
    StoreError::Database(sqlx::Error::Protocol(format!("injected failure {what}")))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_lock(&self, id: Uuid) -> Arc<RowLock<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(id).or_default().clone()
    }

    /// Insert or replace an account directly, bypassing any scope.
    pub fn seed_account(&self, account: Account) {
        self.state().accounts.insert(account.id, account);
    }

    /// Committed view of an account.
    pub fn account(&self, id: Uuid) -> Option<Account> {
        self.state().accounts.get(&id).cloned()
    }

    /// Committed ledger entries of an account, in append order.
    pub fn entries_for(&self, account_id: Uuid) -> Vec<Transaction> {
        self.state()
            .transactions
            .iter()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect()
    }

    pub fn transfer_count(&self) -> usize {
        self.state().transfers.len()
    }

    /// Make every later balance write on `account_id` fail.
    pub fn fail_balance_updates_for(&self, account_id: Uuid) {
        self.state().failing_balance_updates.insert(account_id);
    }

    /// Make every later ledger append on `account_id` fail.
    pub fn fail_ledger_appends_for(&self, account_id: Uuid) {
        self.state().failing_appends.insert(account_id);
    }

    /// Make every later transfer status update fail.
    pub fn fail_status_updates(&self) {
        self.state().failing_status_updates = true;
    }

    fn commit(&self, scope: MemoryScope) -> Result<(), StoreError> {
        let mut state = self.state();

        for transfer in &scope.transfers {
            if let Some(key) = transfer.idempotency_key.as_deref() {
                if state.key_taken(key) {
                    return Err(StoreError::Conflict("transfers_idempotency_key_key".into()));
                }
            }
        }

        let now = Utc::now();
        for (id, balance) in &scope.balances {
            if let Some(account) = state.accounts.get_mut(id) {
                account.balance = *balance;
                account.updated_at = now;
            }
        }
        state.transactions.extend(scope.transactions);
        state.transfers.extend(scope.transfers);
        for (id, status, completed_at) in scope.status_updates {
            if let Some(transfer) = state.transfers.iter_mut().find(|t| t.id == id) {
                transfer.status = status;
                transfer.completed_at = completed_at;
            }
        }

        // row locks in scope.guards are released here, after the writes landed
        Ok(())
    }
}

impl UnitOfWork for MemoryStore {
    type Scope = MemoryScope;

    fn run<'a, T, F>(&'a self, work: F) -> BoxFuture<'a, Result<T, LedgerError>>
    where
        T: Send + 'a,
        F: for<'s> FnOnce(&'s mut MemoryScope) -> BoxFuture<'s, Result<T, LedgerError>>
            + Send
            + 'a,
    {
        Box::pin(async move {
            let mut scope = MemoryScope::default();
            let value = work(&mut scope).await?;
            self.commit(scope)?;
            Ok(value)
        })
    }
}

#[async_trait]
impl AccountStore<MemoryScope> for MemoryStore {
    async fn create(&self, account: &Account) -> Result<(), StoreError> {
        let mut state = self.state();
        let number_taken = state
            .accounts
            .values()
            .any(|a| a.account_number == account.account_number);
        if state.accounts.contains_key(&account.id) || number_taken {
            return Err(StoreError::Conflict("accounts_account_number_key".into()));
        }
        state.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.account(id))
    }

    async fn lock(
        &self,
        scope: &mut MemoryScope,
        id: Uuid,
    ) -> Result<Option<Account>, StoreError> {
        if self.account(id).is_none() {
            return Ok(None);
        }

        if !scope.locked.contains(&id) {
            let guard = self.row_lock(id).lock_owned().await;
            scope.guards.push(guard);
            scope.locked.insert(id);
        }

        // re-read after the lock so we see what the previous holder committed
        Ok(self.account(id).map(|mut account| {
            if let Some(balance) = scope.balances.get(&id) {
                account.balance = *balance;
            }
            account
        }))
    }

    async fn update_balance(
        &self,
        scope: &mut MemoryScope,
        id: Uuid,
        balance: Decimal,
    ) -> Result<(), StoreError> {
        if self.state().failing_balance_updates.contains(&id) {
            return Err(injected(format!("updating account {id}")));
        }
        if balance < Decimal::ZERO {
            return Err(StoreError::Corrupt(format!(
                "balance of account {id} would become negative"
            )));
        }
        scope.balances.insert(id, balance);
        Ok(())
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Account>, StoreError> {
        let mut accounts: Vec<Account> = self
            .state()
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(accounts, limit, offset))
    }

    async fn count_by_user(&self, user_id: Uuid) -> Result<i64, StoreError> {
        let count = self
            .state()
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .count();
        Ok(count as i64)
    }
}

#[async_trait]
impl LedgerStore<MemoryScope> for MemoryStore {
    async fn append(&self, scope: &mut MemoryScope, entry: &Transaction) -> Result<(), StoreError> {
        if self.state().failing_appends.contains(&entry.account_id) {
            return Err(injected(format!("appending to account {}", entry.account_id)));
        }
        scope.transactions.push(entry.clone());
        Ok(())
    }

    async fn list_by_account(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let mut entries: Vec<Transaction> = self.entries_for(account_id).into_iter().rev().collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(entries, limit, offset))
    }

    async fn count_by_account(&self, account_id: Uuid) -> Result<i64, StoreError> {
        Ok(self.entries_for(account_id).len() as i64)
    }
}

#[async_trait]
impl TransferStore<MemoryScope> for MemoryStore {
    async fn create(&self, scope: &mut MemoryScope, transfer: &Transfer) -> Result<(), StoreError> {
        if let Some(key) = transfer.idempotency_key.as_deref() {
            if self.state().key_taken(key) {
                return Err(StoreError::Conflict("transfers_idempotency_key_key".into()));
            }
        }
        scope.transfers.push(transfer.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        scope: &mut MemoryScope,
        id: Uuid,
        status: TransferStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        if self.state().failing_status_updates {
            return Err(injected(format!("updating transfer {id}")));
        }
        if let Some(transfer) = scope.transfers.iter_mut().find(|t| t.id == id) {
            if !transfer.status.can_transition_to(status) {
                return Err(StoreError::Corrupt(format!("transfer {id} is not pending")));
            }
            transfer.status = status;
            transfer.completed_at = completed_at;
            return Ok(());
        }

        let state = self.state();
        match state.transfers.iter().find(|t| t.id == id) {
            Some(transfer) if transfer.status.can_transition_to(status) => {
                scope.status_updates.push((id, status, completed_at));
                Ok(())
            }
            _ => Err(StoreError::Corrupt(format!("transfer {id} is not pending"))),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transfer>, StoreError> {
        Ok(self.state().transfers.iter().find(|t| t.id == id).cloned())
    }

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Transfer>, StoreError> {
        Ok(self
            .state()
            .transfers
            .iter()
            .find(|t| t.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transfer>, StoreError> {
        let transfers = self.state().transfers_of(user_id);
        Ok(page(transfers, limit, offset))
    }

    async fn count_by_user(&self, user_id: Uuid) -> Result<i64, StoreError> {
        Ok(self.state().transfers_of(user_id).len() as i64)
    }
}
