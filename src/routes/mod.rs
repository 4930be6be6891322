use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use sqlx::PgPool;
use tower_http::{
    compression::CompressionLayer, limit::RequestBodyLimitLayer,
    validate_request::ValidateRequestHeaderLayer,
};

use crate::config::Config;
use crate::db::{self, account::AccountRepository, auth::AuthRepository, transfer::TransferRepository};
use crate::db::{tx::TransactionRepository, PgUnitOfWork};
use crate::transfer::PgTransferEngine;

use account::PgAccountService;
use auth::AuthService;

pub mod account;
pub mod auth;
pub mod middleware;
pub mod tx;
pub mod user;
pub mod utils;

async fn health(State(pool): State<PgPool>) -> impl IntoResponse {
    match db::health_check(&pool).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(err) => {
            tracing::error!("Health check failed: {err}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}

/// Wire the Postgres-backed services into the full `/v1` router.
pub fn app(pool: PgPool, config: &Config) -> Router {
    let auth = Arc::new(AuthService::new(AuthRepository::new(pool.clone()), config));

    let accounts = Arc::new(AccountRepository::new(pool.clone()));
    let ledger = Arc::new(TransactionRepository::new(pool.clone()));
    let transfers = Arc::new(TransferRepository::new(pool.clone()));
    let uow = Arc::new(PgUnitOfWork::new(pool.clone()));

    let account_service = Arc::new(PgAccountService::new(accounts.clone(), ledger.clone()));
    let engine = Arc::new(PgTransferEngine::new(uow, accounts, ledger, transfers, config));

    let auth_routes = auth::auth_routes(auth.clone());
    let user_routes = user::user_routes(auth.clone())
        .route_layer(ValidateRequestHeaderLayer::accept("application/json"));
    let account_routes = account::account_routes(auth.clone(), account_service)
        .route_layer(ValidateRequestHeaderLayer::accept("application/json"));
    let transfer_routes = tx::tx_route(auth, engine)
        .route_layer(ValidateRequestHeaderLayer::accept("application/json"))
        .route_layer(CompressionLayer::new().gzip(true));

    let v1 = Router::new()
        .merge(auth_routes)
        .merge(user_routes)
        .merge(account_routes)
        .merge(transfer_routes);

    let router = Router::new()
        .route("/health", get(health).with_state(pool))
        .nest("/v1", v1)
        .route_layer(RequestBodyLimitLayer::new(config.body_limit));

    middleware::layered(router)
}
