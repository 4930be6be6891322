use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::config::Config;
use crate::db::account::Account;
use crate::db::store::{AccountStore, LedgerStore, StoreError, TransferStore, UnitOfWork};
use crate::db::transfer::Transfer;
use crate::db::tx::Transaction;
use crate::error::LedgerError;
use crate::page::{self, Page};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTransfer {
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    /// Decimal string, kept as text so no precision is lost in JSON.
    pub amount: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Decimal places stored for every monetary column.
pub const MONEY_SCALE: u32 = 2;

/// Parse a transfer amount. Rejects anything unparsable, not strictly
/// positive, or finer than `MONEY_SCALE` decimals ("1.50" and "1.500" pass).
pub fn parse_amount(raw: &str) -> Result<Decimal, LedgerError> {
    let amount: Decimal = raw.trim().parse().map_err(|_| LedgerError::InvalidAmount)?;
    if amount <= Decimal::ZERO || amount.normalize().scale() > MONEY_SCALE {
        return Err(LedgerError::InvalidAmount);
    }
    Ok(amount)
}

/// Validates and executes transfers between two accounts.
///
/// Holds no mutable state of its own: every call opens its own atomic scope
/// and cross-request correctness comes from the store's row locks, so one
/// engine can be shared freely between tasks (and processes can share a store).
pub struct TransferEngine<U, A, L, T> {
    uow: Arc<U>,
    accounts: Arc<A>,
    ledger: Arc<L>,
    transfers: Arc<T>,
    scope_timeout: Duration,
}

impl<U, A, L, T> TransferEngine<U, A, L, T>
where
    U: UnitOfWork,
    A: AccountStore<U::Scope>,
    L: LedgerStore<U::Scope>,
    T: TransferStore<U::Scope>,
{
    pub fn new(
        uow: Arc<U>,
        accounts: Arc<A>,
        ledger: Arc<L>,
        transfers: Arc<T>,
        config: &Config,
    ) -> Self {
        Self {
            uow,
            accounts,
            ledger,
            transfers,
            scope_timeout: config.transfer_timeout,
        }
    }

    pub async fn create(
        &self,
        requester: Uuid,
        request: CreateTransfer,
    ) -> Result<Transfer, LedgerError> {
        let key = request.idempotency_key.filter(|key| !key.is_empty());

        if let Some(key) = key.as_deref() {
            if let Some(existing) = self.transfers.get_by_idempotency_key(key).await? {
                tracing::info!(
                    transfer_id = %existing.id,
                    idempotency_key = %key,
                    "Transfer already exists for idempotency key, returning it"
                );
                return Ok(existing);
            }
        }

        let amount = parse_amount(&request.amount).inspect_err(|_| {
            tracing::warn!(amount = %request.amount, "Rejected transfer with invalid amount");
        })?;

        if request.from_account_id == request.to_account_id {
            tracing::warn!(account_id = %request.from_account_id, "Rejected transfer to the same account");
            return Err(LedgerError::SameAccount);
        }

        let job = TransferJob {
            requester,
            from: request.from_account_id,
            to: request.to_account_id,
            amount,
            idempotency_key: key.clone(),
        };
        let accounts = Arc::clone(&self.accounts);
        let ledger = Arc::clone(&self.ledger);
        let transfers = Arc::clone(&self.transfers);

        let work = self.uow.run(move |scope| {
            Box::pin(async move { job.execute(scope, &*accounts, &*ledger, &*transfers).await })
        });

        // dropping `work` on timeout rolls the scope back and releases its locks
        let outcome = match tokio::time::timeout(self.scope_timeout, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(
                    from = %request.from_account_id,
                    to = %request.to_account_id,
                    timeout_ms = self.scope_timeout.as_millis() as u64,
                    "Transfer scope timed out, rolled back"
                );
                Err(LedgerError::Internal(StoreError::TimedOut))
            }
        };

        match outcome {
            Ok(transfer) => {
                tracing::info!(
                    transfer_id = %transfer.id,
                    from = %transfer.from_account_id,
                    to = %transfer.to_account_id,
                    amount = %transfer.amount,
                    currency = %transfer.currency,
                    "Transfer completed"
                );
                Ok(transfer)
            }
            Err(err) => {
                // A concurrent request with the same key won the unique insert.
                if err.is_conflict() {
                    if let Some(key) = key.as_deref() {
                        if let Some(existing) = self.transfers.get_by_idempotency_key(key).await? {
                            tracing::info!(
                                transfer_id = %existing.id,
                                idempotency_key = %key,
                                "Concurrent duplicate resolved to existing transfer"
                            );
                            return Ok(existing);
                        }
                    }
                }

                match &err {
                    LedgerError::Internal(cause) => {
                        tracing::error!("Transfer rolled back: {cause}")
                    }
                    rejected => tracing::warn!(
                        code = rejected.code(),
                        from = %request.from_account_id,
                        to = %request.to_account_id,
                        "Transfer rejected"
                    ),
                }
                Err(err)
            }
        }
    }

    /// Visible only to the owner of the source or destination account.
    pub async fn get(&self, requester: Uuid, transfer_id: Uuid) -> Result<Transfer, LedgerError> {
        let transfer = self
            .transfers
            .get(transfer_id)
            .await?
            .ok_or(LedgerError::TransferNotFound)?;

        let from = self.accounts.get(transfer.from_account_id).await?;
        let to = self.accounts.get(transfer.to_account_id).await?;
        let owned = |account: &Option<Account>| {
            account
                .as_ref()
                .is_some_and(|account| account.user_id == requester)
        };

        if owned(&from) || owned(&to) {
            Ok(transfer)
        } else {
            tracing::warn!(%transfer_id, %requester, "Transfer lookup by non-owner");
            Err(LedgerError::Forbidden)
        }
    }

    /// Transfers touching any of the requester's accounts, newest first.
    pub async fn list(
        &self,
        requester: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<Page<Transfer>, LedgerError> {
        let (page, page_size, offset) = page::bounds(page, page_size);
        let items = self
            .transfers
            .list_by_user(requester, page_size, offset)
            .await?;
        let total = self.transfers.count_by_user(requester).await?;

        Ok(Page::new(items, page, page_size, total))
    }
}

/// Everything one execution needs inside the atomic scope.
struct TransferJob {
    requester: Uuid,
    from: Uuid,
    to: Uuid,
    amount: Decimal,
    idempotency_key: Option<String>,
}

impl TransferJob {
    async fn execute<S, A, L, T>(
        self,
        scope: &mut S,
        accounts: &A,
        ledger: &L,
        transfers: &T,
    ) -> Result<Transfer, LedgerError>
    where
        S: Send,
        A: AccountStore<S>,
        L: LedgerStore<S>,
        T: TransferStore<S>,
    {
        // Smaller id first regardless of direction, so A->B and B->A
        // contend for the same first lock instead of deadlocking.
        let (first, second) = if self.from < self.to {
            (self.from, self.to)
        } else {
            (self.to, self.from)
        };
        let first_account = accounts.lock(scope, first).await?;
        let second_account = accounts.lock(scope, second).await?;
        let (source, dest) = if first == self.from {
            (first_account, second_account)
        } else {
            (second_account, first_account)
        };

        let source = source.ok_or(LedgerError::AccountNotFound)?;
        let dest = dest.ok_or(LedgerError::AccountNotFound)?;

        if source.user_id != self.requester {
            return Err(LedgerError::Forbidden);
        }
        if source.currency != dest.currency {
            return Err(LedgerError::CurrencyMismatch);
        }
        if !source.can_debit(self.amount) {
            return Err(LedgerError::InsufficientBalance);
        }
        if !dest.can_credit() {
            return Err(LedgerError::AccountInactive);
        }

        let mut transfer = Transfer::new(
            source.id,
            dest.id,
            self.amount,
            source.currency,
            self.idempotency_key,
        );
        transfers.create(scope, &transfer).await?;

        let new_source_balance = source.balance - self.amount;
        let new_dest_balance = dest
            .balance
            .checked_add(self.amount)
            .ok_or(LedgerError::InvalidAmount)?;

        accounts
            .update_balance(scope, source.id, new_source_balance)
            .await?;
        accounts
            .update_balance(scope, dest.id, new_dest_balance)
            .await?;

        let debit = Transaction::debit(
            source.id,
            self.amount,
            new_source_balance,
            format!("Transfer to account {}", dest.account_number),
            transfer.id,
        );
        ledger.append(scope, &debit).await?;

        let credit = Transaction::credit(
            dest.id,
            self.amount,
            new_dest_balance,
            format!("Transfer from account {}", source.account_number),
            transfer.id,
        );
        ledger.append(scope, &credit).await?;

        transfer.complete(Utc::now());
        transfers
            .update_status(scope, transfer.id, transfer.status, transfer.completed_at)
            .await?;

        Ok(transfer)
    }
}
