use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use super::account::Currency;
use super::store::{StoreError, TransferStore};
use super::{parse_column, PgScope};

/// Transfer lifecycle. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }

    /// Only `pending -> completed` and `pending -> failed` are allowed.
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        *self == TransferStatus::Pending && next.is_terminal()
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransferStatus::Pending),
            "completed" => Ok(TransferStatus::Completed),
            "failed" => Ok(TransferStatus::Failed),
            other => Err(format!("unknown transfer status: {other}")),
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: Uuid,
    pub idempotency_key: Option<String>,
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transfer {
    pub fn new(
        from_account_id: Uuid,
        to_account_id: Uuid,
        amount: Decimal,
        currency: Currency,
        idempotency_key: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            idempotency_key,
            from_account_id,
            to_account_id,
            amount,
            currency,
            status: TransferStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Move to `completed`. Returns false and leaves the record untouched
    /// when the transfer is already terminal.
    pub fn complete(&mut self, at: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(TransferStatus::Completed) {
            return false;
        }
        self.status = TransferStatus::Completed;
        self.completed_at = Some(at);
        true
    }

    pub fn involves(&self, account_id: Uuid) -> bool {
        self.from_account_id == account_id || self.to_account_id == account_id
    }
}

fn transfer_from_row(row: &PgRow) -> Result<Transfer, StoreError> {
    Ok(Transfer {
        id: row.try_get("id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        from_account_id: row.try_get("from_account_id")?,
        to_account_id: row.try_get("to_account_id")?,
        amount: row.try_get("amount")?,
        currency: parse_column(row, "currency")?,
        status: parse_column(row, "status")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

pub struct TransferRepository {
    pool: PgPool,
}

impl TransferRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransferStore<PgScope> for TransferRepository {
    async fn create(&self, scope: &mut PgScope, transfer: &Transfer) -> Result<(), StoreError> {
        // idempotency_key carries a UNIQUE constraint; a concurrent duplicate
        // blocks here until the first scope ends and then fails as Conflict.
        sqlx::query(
            r#"
            INSERT INTO transfers (id, idempotency_key, from_account_id, to_account_id, amount, currency, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(transfer.id)
        .bind(&transfer.idempotency_key)
        .bind(transfer.from_account_id)
        .bind(transfer.to_account_id)
        .bind(transfer.amount)
        .bind(transfer.currency.as_str())
        .bind(transfer.status.as_str())
        .bind(transfer.created_at)
        .execute(&mut **scope)
        .await?;
        Ok(())
    }

    async fn update_status(
        &self,
        scope: &mut PgScope,
        id: Uuid,
        status: TransferStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE transfers
            SET status = $2, completed_at = $3
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(completed_at)
        .execute(&mut **scope)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Corrupt(format!(
                "transfer {id} is not pending"
            )));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transfer>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, idempotency_key, from_account_id, to_account_id, amount, currency, status, created_at, completed_at
            FROM transfers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(transfer_from_row).transpose()
    }

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Transfer>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, idempotency_key, from_account_id, to_account_id, amount, currency, status, created_at, completed_at
            FROM transfers
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(transfer_from_row).transpose()
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transfer>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.idempotency_key, t.from_account_id, t.to_account_id, t.amount,
                   t.currency, t.status, t.created_at, t.completed_at
            FROM transfers t
            WHERE EXISTS (
                SELECT 1 FROM accounts a
                WHERE a.user_id = $1 AND (a.id = t.from_account_id OR a.id = t.to_account_id)
            )
            ORDER BY t.created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transfer_from_row).collect()
    }

    async fn count_by_user(&self, user_id: Uuid) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM transfers t
            WHERE EXISTS (
                SELECT 1 FROM accounts a
                WHERE a.user_id = $1 AND (a.id = t.from_account_id OR a.id = t.to_account_id)
            )
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
