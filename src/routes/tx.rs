use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::db::account::Currency;
use crate::db::transfer::{Transfer, TransferStatus};
use crate::transfer::{CreateTransfer, PgTransferEngine};

use super::{
    account::PageQuery,
    auth::AuthService,
    utils::{money, validate_auth_token, ApiError},
};

pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub id: Uuid,
    pub idempotency_key: Option<String>,
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    pub amount: String,
    pub currency: Currency,
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Transfer> for TransferResponse {
    fn from(transfer: Transfer) -> Self {
        Self {
            id: transfer.id,
            idempotency_key: transfer.idempotency_key,
            from_account_id: transfer.from_account_id,
            to_account_id: transfer.to_account_id,
            amount: money(transfer.amount),
            currency: transfer.currency,
            status: transfer.status,
            created_at: transfer.created_at,
            completed_at: transfer.completed_at,
        }
    }
}

/// The header key, when present and non-empty, replaces the body key.
fn idempotency_key(headers: &HeaderMap, body_key: Option<String>) -> Option<String> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .or(body_key)
}

type TransferState = (Arc<AuthService>, Arc<PgTransferEngine>);

async fn create_transfer(
    headers: HeaderMap,
    State((auth, engine)): State<TransferState>,
    Json(mut payload): Json<CreateTransfer>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = validate_auth_token(&headers, &auth)?;
    payload.idempotency_key = idempotency_key(&headers, payload.idempotency_key.take());

    let transfer = engine.create(user_id, payload).await?;
    Ok((StatusCode::CREATED, Json(TransferResponse::from(transfer))))
}

async fn get_transfer(
    headers: HeaderMap,
    State((auth, engine)): State<TransferState>,
    Path(transfer_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = validate_auth_token(&headers, &auth)?;
    let transfer = engine.get(user_id, transfer_id).await?;
    Ok(Json(TransferResponse::from(transfer)))
}

async fn list_transfers(
    headers: HeaderMap,
    State((auth, engine)): State<TransferState>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = validate_auth_token(&headers, &auth)?;
    let transfers = engine.list(user_id, query.page, query.page_size).await?;
    Ok(Json(transfers.map(TransferResponse::from)))
}

pub fn tx_route(auth: Arc<AuthService>, engine: Arc<PgTransferEngine>) -> Router {
    Router::new()
        .route("/transfers", get(list_transfers).post(create_transfer))
        .route("/transfers/:id", get(get_transfer))
        .with_state((auth, engine))
}
