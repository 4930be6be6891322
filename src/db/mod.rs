use std::str::FromStr;
use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    PgPool, Postgres, Row,
};

use crate::config::Config;
use crate::error::LedgerError;

use store::{StoreError, UnitOfWork};

pub mod account;
pub mod auth;
pub mod memory;
pub mod store;
pub mod transfer;
pub mod tx;
pub mod user;

/// Scope handle of the Postgres adapter: one open database transaction.
pub type PgScope = sqlx::Transaction<'static, Postgres>;

pub async fn connect(config: &Config) -> Result<PgPool, String> {
    // create a connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await
        .map_err(|err| format!("Failed to connect to database: {}", err))?;

    match sqlx::migrate!("./migrations").run(&db_pool).await {
        Ok(_) => {
            tracing::info!("Migrations run successfully");
        }
        Err(err) => {
            // if it fails we assume to continue believing that the database is already migrated
            tracing::warn!("Failed to run migrations: {err}");
        }
    }

    Ok(db_pool)
}

pub async fn health_check(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Read a TEXT column and parse it into one of the entity enums.
pub(crate) fn parse_column<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(StoreError::Corrupt)
}

pub struct PgUnitOfWork {
    pool: PgPool,
}

impl PgUnitOfWork {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl UnitOfWork for PgUnitOfWork {
    type Scope = PgScope;

    fn run<'a, T, F>(&'a self, work: F) -> BoxFuture<'a, Result<T, LedgerError>>
    where
        T: Send + 'a,
        F: for<'s> FnOnce(&'s mut PgScope) -> BoxFuture<'s, Result<T, LedgerError>> + Send + 'a,
    {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

            match work(&mut tx).await {
                Ok(value) => {
                    tx.commit().await.map_err(StoreError::from)?;
                    Ok(value)
                }
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::error!("Failed to roll back transaction: {rollback_err}");
                    }
                    Err(err)
                }
            }
        })
    }
}
