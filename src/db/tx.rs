use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use super::store::{LedgerStore, StoreError};
use super::{parse_column, PgScope};

/// One immutable movement on one account. Never updated once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub description: String,
    pub reference_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Credit,
    Debit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Credit => "credit",
            TransactionType::Debit => "debit",
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(TransactionType::Credit),
            "debit" => Ok(TransactionType::Debit),
            other => Err(format!("unknown transaction type: {other}")),
        }
    }
}

impl Transaction {
    fn new(
        account_id: Uuid,
        transaction_type: TransactionType,
        amount: Decimal,
        balance_after: Decimal,
        description: String,
        reference_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            transaction_type,
            amount,
            balance_after,
            description,
            reference_id,
            created_at: Utc::now(),
        }
    }

    pub fn debit(
        account_id: Uuid,
        amount: Decimal,
        balance_after: Decimal,
        description: String,
        transfer_id: Uuid,
    ) -> Self {
        Self::new(
            account_id,
            TransactionType::Debit,
            amount,
            balance_after,
            description,
            Some(transfer_id),
        )
    }

    pub fn credit(
        account_id: Uuid,
        amount: Decimal,
        balance_after: Decimal,
        description: String,
        transfer_id: Uuid,
    ) -> Self {
        Self::new(
            account_id,
            TransactionType::Credit,
            amount,
            balance_after,
            description,
            Some(transfer_id),
        )
    }
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, StoreError> {
    Ok(Transaction {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        transaction_type: parse_column(row, "type")?,
        amount: row.try_get("amount")?,
        balance_after: row.try_get("balance_after")?,
        description: row.try_get("description")?,
        reference_id: row.try_get("reference_id")?,
        created_at: row.try_get("created_at")?,
    })
}

pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore<PgScope> for TransactionRepository {
    async fn append(&self, scope: &mut PgScope, entry: &Transaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO transactions (id, account_id, type, amount, balance_after, description, reference_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.account_id)
        .bind(entry.transaction_type.as_str())
        .bind(entry.amount)
        .bind(entry.balance_after)
        .bind(&entry.description)
        .bind(entry.reference_id)
        .bind(entry.created_at)
        .execute(&mut **scope)
        .await?;
        Ok(())
    }

    async fn list_by_account(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, type, amount, balance_after, description, reference_id, created_at
            FROM transactions
            WHERE account_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn count_by_account(&self, account_id: Uuid) -> Result<i64, StoreError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM transactions WHERE account_id = $1")
                .bind(account_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
