use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_email::Email;

use super::{
    auth::AuthService,
    utils::{validate_auth_token, ApiError},
};

fn user_not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "USER_NOT_FOUND", "User not found")
}

async fn get_user(
    headers: HeaderMap,
    State(service): State<Arc<AuthService>>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = validate_auth_token(&headers, &service)?;

    let user = service
        .repo
        .find_user_by_id(user_id)
        .await
        .map_err(|err| {
            tracing::error!("Failed to load user {user_id}: {err}");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error",
            )
        })?
        .ok_or_else(user_not_found)?;

    Ok((StatusCode::OK, Json(user)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUser {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<Email>,
}

async fn update_user(
    headers: HeaderMap,
    State(service): State<Arc<AuthService>>,
    Json(payload): Json<UpdateUser>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = validate_auth_token(&headers, &service)?;

    let full_name = payload.full_name.as_deref().map(str::trim);
    let email = payload.email.as_ref().map(|email| email.as_str());

    let updated = service
        .repo
        .update_user(user_id, full_name, email)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => ApiError::new(
                StatusCode::CONFLICT,
                "USER_EXISTS",
                "Email already in use",
            ),
            _ => {
                tracing::error!("Failed to update user {user_id}: {err}");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error",
                )
            }
        })?
        .ok_or_else(user_not_found)?;

    tracing::info!(%user_id, "User profile updated");
    Ok((StatusCode::OK, Json(updated)))
}

pub fn user_routes(service: Arc<AuthService>) -> Router {
    Router::new()
        .route("/users/me", get(get_user).put(update_user))
        .with_state(service)
}
