use axum::http::StatusCode;
use thiserror::Error;

use crate::db::store::StoreError;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Amount must be a positive decimal")]
    InvalidAmount,

    #[error("Cannot transfer to the same account")]
    SameAccount,

    #[error("Account not found")]
    AccountNotFound,

    #[error("Access forbidden")]
    Forbidden,

    #[error("Currency mismatch between accounts")]
    CurrencyMismatch,

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Account is not active")]
    AccountInactive,

    #[error("Transfer not found")]
    TransferNotFound,

    #[error("Internal error: {0}")]
    Internal(#[from] StoreError),
}

impl LedgerError {
    /// Stable error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount => "INVALID_AMOUNT",
            LedgerError::SameAccount => "SAME_ACCOUNT",
            LedgerError::AccountNotFound => "ACCOUNT_NOT_FOUND",
            LedgerError::Forbidden => "FORBIDDEN",
            LedgerError::CurrencyMismatch => "CURRENCY_MISMATCH",
            LedgerError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            LedgerError::AccountInactive => "ACCOUNT_INACTIVE",
            LedgerError::TransferNotFound => "TRANSFER_NOT_FOUND",
            LedgerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            LedgerError::InvalidAmount
            | LedgerError::SameAccount
            | LedgerError::CurrencyMismatch => StatusCode::BAD_REQUEST,
            LedgerError::Forbidden => StatusCode::FORBIDDEN,
            LedgerError::AccountNotFound | LedgerError::TransferNotFound => StatusCode::NOT_FOUND,
            LedgerError::InsufficientBalance | LedgerError::AccountInactive => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            LedgerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True when the store rejected a write because a unique key already exists.
    pub fn is_conflict(&self) -> bool {
        matches!(self, LedgerError::Internal(StoreError::Conflict(_)))
    }
}
