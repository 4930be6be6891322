use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::error::LedgerError;

use super::auth::{AuthError, AuthService};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// Error response shared by every route: a status plus `{ code, message }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Invalid token")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let message = match &err {
            // transfer failures are already logged by the engine
            LedgerError::Internal(cause) => {
                tracing::debug!("Internal error: {cause}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        Self::new(err.status(), err.code(), message)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let message = match &err {
            AuthError::Database(_) | AuthError::Token(_) | AuthError::Hash => {
                tracing::error!("Auth failure: {err}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        Self::new(err.status(), err.code(), message)
    }
}

/// Money is always rendered with two decimals.
pub fn money(amount: Decimal) -> String {
    format!("{:.2}", amount)
}

#[inline]
pub fn validate_auth_token(headers: &HeaderMap, service: &AuthService) -> Result<Uuid, ApiError> {
    let jwt_header_token = match headers
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    {
        Some(token) => token.trim(),
        None => {
            return Err(ApiError::unauthorized());
        }
    };
    //validate our token
    match service.verify_token(jwt_header_token) {
        Ok(user) => Ok(user),
        Err(err) => {
            tracing::warn!("Token validation failed: {err}");
            Err(ApiError::unauthorized())
        }
    }
}

#[inline]
pub fn check_password(password: &str) -> Result<(), AuthError> {
    let weak = |reason: &str| Err(AuthError::WeakPassword(reason.to_string()));
    if password.len() < 8 {
        return weak("Password must be at least 8 characters");
    }
    if password.len() > 72 {
        return weak("Password must be at most 72 characters");
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return weak("Password must contain at least one uppercase letter");
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        return weak("Password must contain at least one lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return weak("Password must contain at least one digit");
    }
    if !password.chars().any(|c| !c.is_alphanumeric()) {
        return weak("Password must contain at least one special character");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::StoreError;
    use rust_decimal_macros::dec;

    #[test]
    fn password_policy() {
        assert!(check_password("Str0ng!pass").is_ok());
        assert!(check_password("short1!").is_err());
        assert!(check_password("nouppercase1!").is_err());
        assert!(check_password("NOLOWERCASE1!").is_err());
        assert!(check_password("NoDigits!!").is_err());
        assert!(check_password("NoSpecial123").is_err());
    }

    #[test]
    fn money_has_two_decimals() {
        assert_eq!(money(dec!(60)), "60.00");
        assert_eq!(money(dec!(40.5)), "40.50");
        assert_eq!(money(dec!(0)), "0.00");
    }

    #[test]
    fn ledger_errors_map_to_responses() {
        let err = ApiError::from(LedgerError::InsufficientBalance);
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.body.code, "INSUFFICIENT_BALANCE");

        let err = ApiError::from(LedgerError::Internal(StoreError::Corrupt("row".into())));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body.message, "Internal server error");
    }
}
