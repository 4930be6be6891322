use std::sync::Arc;
use std::time::Duration;

use argon2::{
    password_hash::{PasswordHasher, SaltString},
    Argon2, PasswordHash, PasswordVerifier,
};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_email::Email;
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;
use crate::db::auth::AuthRepository;

use super::utils::{check_password, ApiError};

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("User already exists")]
    UserExists,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("{0}")]
    WeakPassword(String),

    #[error("Unable to hash password")]
    Hash,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::UserExists => "USER_EXISTS",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::InvalidToken => "UNAUTHORIZED",
            AuthError::WeakPassword(_) => "WEAK_PASSWORD",
            AuthError::Hash | AuthError::Database(_) | AuthError::Token(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::UserExists => StatusCode::CONFLICT,
            AuthError::InvalidCredentials | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::WeakPassword(_) => StatusCode::BAD_REQUEST,
            AuthError::Hash | AuthError::Database(_) | AuthError::Token(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    sub: Uuid,   // user_id
    exp: i64,    // expiration timestamp
    iat: i64,    // issued at timestamp
    iss: String, // issuer
}

/// Issues and checks HS256 access tokens.
pub struct TokenManager {
    secret: String,
    issuer: String,
    ttl: Duration,
}

impl TokenManager {
    pub fn new(secret: String, issuer: String, ttl: Duration) -> Self {
        Self {
            secret,
            issuer,
            ttl,
        }
    }

    pub fn issue(&self, user_id: Uuid) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id,
            exp: (now + self.ttl).timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
        };

        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(self.secret.as_bytes()),
        )?;
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Result<Uuid, AuthError> {
        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.leeway = 10;
        validation.validate_exp = true;
        validation.set_issuer(&[self.issuer.as_str()]);

        let token_data = jsonwebtoken::decode::<Claims>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|err| {
            tracing::debug!("Error decoding token: {:?}", err);
            AuthError::InvalidToken
        })?;

        Ok(token_data.claims.sub)
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    email: Email,
    password: String,
    #[serde(default)]
    full_name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    email: Email,
    password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    access_token: String,
    refresh_token: String,
    token_type: &'static str,
    expires_in: u64,
    user_uid: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    refresh_token: String,
}

// Authentication service
pub struct AuthService {
    pub repo: AuthRepository,
    tokens: TokenManager,
    refresh_ttl: Duration,
}

impl AuthService {
    pub fn new(repo: AuthRepository, config: &Config) -> Self {
        Self {
            repo,
            tokens: TokenManager::new(
                config.jwt_secret.clone(),
                config.jwt_issuer.clone(),
                config.access_token_ttl,
            ),
            refresh_ttl: config.refresh_token_ttl,
        }
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<AuthResponse, AuthError> {
        if self
            .repo
            .find_user_by_email(req.email.as_str())
            .await?
            .is_some()
        {
            return Err(AuthError::UserExists);
        }

        check_password(&req.password)?;

        let salt = SaltString::generate(&mut rand::thread_rng());
        let password_hash = Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|_err| AuthError::Hash)?
            .to_string();

        let user = self
            .repo
            .create_user(req.email.as_str(), &password_hash, req.full_name.trim())
            .await
            .map_err(|err| match &err {
                // lost a race with a concurrent registration
                sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                    AuthError::UserExists
                }
                _ => AuthError::Database(err),
            })?;
        tracing::info!(user_id = %user.id, "User registered");

        self.session_for(user.id).await
    }

    pub async fn login(&self, req: LoginRequest) -> Result<AuthResponse, AuthError> {
        let user = self
            .repo
            .find_user_by_email(req.email.as_str())
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let parsed_hash = PasswordHash::new(&user.password_hash).map_err(|_err| AuthError::Hash)?;
        if Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed_hash)
            .is_err()
        {
            tracing::warn!(user_id = %user.id, "Invalid credentials");
            return Err(AuthError::InvalidCredentials);
        }
        tracing::info!(user_id = %user.id, "User logged in");

        self.session_for(user.id).await
    }

    /// Rotates the refresh token: the presented one is consumed either way.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<AuthResponse, AuthError> {
        let user = self
            .repo
            .take_refresh_token(refresh_token)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        self.session_for(user.id).await
    }

    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        if !self.repo.revoke_refresh_token(refresh_token).await? {
            tracing::debug!("Logout with unknown refresh token");
        }
        Ok(())
    }

    pub fn verify_token(&self, token: &str) -> Result<Uuid, AuthError> {
        self.tokens.verify(token)
    }

    async fn session_for(&self, user_id: Uuid) -> Result<AuthResponse, AuthError> {
        let access_token = self.tokens.issue(user_id)?;
        let refresh_token = Uuid::new_v4().to_string();

        let expires_at = Utc::now() + self.refresh_ttl;
        self.repo
            .store_refresh_token(user_id, &refresh_token, expires_at)
            .await?;

        Ok(AuthResponse {
            access_token,
            refresh_token,
            token_type: "Bearer",
            expires_in: self.tokens.ttl.as_secs(),
            user_uid: user_id,
        })
    }
}

// Route for handling new user registration
pub async fn register_handler(
    State(service): State<Arc<AuthService>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = service.register(req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

// Route for handling user login
pub async fn login_handler(
    State(service): State<Arc<AuthService>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = service.login(req).await?;
    Ok((StatusCode::OK, Json(response)))
}

// Route for handling token refresh
pub async fn refresh_token_handler(
    State(service): State<Arc<AuthService>>,
    Json(req): Json<RefreshTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = service.refresh_token(&req.refresh_token).await?;
    Ok((StatusCode::OK, Json(response)))
}

pub async fn logout_handler(
    State(service): State<Arc<AuthService>>,
    Json(req): Json<RefreshTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    service.logout(&req.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn auth_routes(service: Arc<AuthService>) -> Router {
    Router::new()
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/refresh", post(refresh_token_handler))
        .route("/auth/logout", post(logout_handler))
        .with_state(service)
}
