use std::marker::PhantomData;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::account::{Account, AccountRepository, AccountStatus, AccountType, Currency};
use crate::db::store::{AccountStore, LedgerStore, StoreError};
use crate::db::tx::{Transaction, TransactionRepository, TransactionType};
use crate::db::PgScope;
use crate::error::LedgerError;
use crate::page::{self, Page};

use super::{
    auth::AuthService,
    utils::{money, validate_auth_token, ApiError},
};

// account numbers are random, a clash is retried with a fresh number
const ACCOUNT_NUMBER_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAccount {
    pub account_type: AccountType,
    pub currency: Currency,
}

/// Owner-scoped account operations. `S` is the scope type of the stores,
/// which the service itself never opens.
pub struct AccountService<S, A, L> {
    accounts: Arc<A>,
    ledger: Arc<L>,
    _scope: PhantomData<fn() -> S>,
}

impl<S, A, L> AccountService<S, A, L>
where
    S: Send,
    A: AccountStore<S>,
    L: LedgerStore<S>,
{
    pub fn new(accounts: Arc<A>, ledger: Arc<L>) -> Self {
        Self {
            accounts,
            ledger,
            _scope: PhantomData,
        }
    }

    pub async fn create(&self, requester: Uuid, request: CreateAccount) -> Result<Account, LedgerError> {
        let mut attempt = 1;
        loop {
            let account = Account::new(requester, request.account_type, request.currency);
            match self.accounts.create(&account).await {
                Ok(()) => {
                    tracing::info!(
                        account_id = %account.id,
                        user_id = %requester,
                        currency = %account.currency,
                        "Account created"
                    );
                    return Ok(account);
                }
                Err(StoreError::Conflict(constraint)) if attempt < ACCOUNT_NUMBER_ATTEMPTS => {
                    tracing::warn!(%constraint, attempt, "Account number clash, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub async fn get(&self, requester: Uuid, account_id: Uuid) -> Result<Account, LedgerError> {
        let account = self
            .accounts
            .get(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound)?;

        if account.user_id != requester {
            tracing::warn!(%account_id, %requester, "Account lookup by non-owner");
            return Err(LedgerError::Forbidden);
        }
        Ok(account)
    }

    pub async fn list(
        &self,
        requester: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<Page<Account>, LedgerError> {
        let (page, page_size, offset) = page::bounds(page, page_size);
        let items = self.accounts.list_by_user(requester, page_size, offset).await?;
        let total = self.accounts.count_by_user(requester).await?;

        Ok(Page::new(items, page, page_size, total))
    }

    /// Ledger history of one owned account, newest first.
    pub async fn transactions(
        &self,
        requester: Uuid,
        account_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<Page<Transaction>, LedgerError> {
        self.get(requester, account_id).await?;

        let (page, page_size, offset) = page::bounds(page, page_size);
        let items = self.ledger.list_by_account(account_id, page_size, offset).await?;
        let total = self.ledger.count_by_account(account_id).await?;

        Ok(Page::new(items, page, page_size, total))
    }
}

pub type PgAccountService = AccountService<PgScope, AccountRepository, TransactionRepository>;

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub id: Uuid,
    pub account_number: String,
    pub account_type: AccountType,
    pub currency: Currency,
    pub balance: String,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            account_number: account.account_number,
            account_type: account.account_type,
            currency: account.currency,
            balance: money(account.balance),
            status: account.status,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: String,
    pub balance_after: String,
    pub description: String,
    pub reference_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<Transaction> for TransactionResponse {
    fn from(entry: Transaction) -> Self {
        Self {
            id: entry.id,
            transaction_type: entry.transaction_type,
            amount: money(entry.amount),
            balance_after: money(entry.balance_after),
            description: entry.description,
            reference_id: entry.reference_id,
            created_at: entry.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "first_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn first_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    10
}

type AccountState = (Arc<AuthService>, Arc<PgAccountService>);

async fn create_account(
    headers: HeaderMap,
    State((auth, service)): State<AccountState>,
    Json(payload): Json<CreateAccount>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = validate_auth_token(&headers, &auth)?;
    let account = service.create(user_id, payload).await?;
    Ok((StatusCode::CREATED, Json(AccountResponse::from(account))))
}

async fn list_accounts(
    headers: HeaderMap,
    State((auth, service)): State<AccountState>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = validate_auth_token(&headers, &auth)?;
    let accounts = service.list(user_id, query.page, query.page_size).await?;
    Ok(Json(accounts.map(AccountResponse::from)))
}

async fn get_account(
    headers: HeaderMap,
    State((auth, service)): State<AccountState>,
    Path(account_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = validate_auth_token(&headers, &auth)?;
    let account = service.get(user_id, account_id).await?;
    Ok(Json(AccountResponse::from(account)))
}

async fn account_transactions(
    headers: HeaderMap,
    State((auth, service)): State<AccountState>,
    Path(account_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = validate_auth_token(&headers, &auth)?;
    let entries = service
        .transactions(user_id, account_id, query.page, query.page_size)
        .await?;
    Ok(Json(entries.map(TransactionResponse::from)))
}

pub fn account_routes(auth: Arc<AuthService>, service: Arc<PgAccountService>) -> Router {
    Router::new()
        .route("/accounts", get(list_accounts).post(create_account))
        .route("/accounts/:id", get(get_account))
        .route("/accounts/:id/transactions", get(account_transactions))
        .with_state((auth, service))
}
