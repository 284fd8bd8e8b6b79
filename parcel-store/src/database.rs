use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::info;

use crate::app_config::DatabaseConfig;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str) -> Result<Self, sqlx::Error> {
        Self::with_options(connection_string, 5, Duration::from_secs(3)).await
    }

    pub async fn from_config(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        Self::with_options(
            &config.url,
            config.max_connections,
            Duration::from_secs(config.acquire_timeout_secs),
        )
        .await
    }

    async fn with_options(connection_string: &str, max_connections: u32, acquire_timeout: Duration) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

/// Unique-key violations surface as conflicts so the caller may retry;
/// every other storage failure is internal.
pub(crate) fn map_write_error(context: &str, err: sqlx::Error) -> parcel_core::CoreError {
    use parcel_core::CoreError;

    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            tracing::warn!(context, error = %err, "Unique constraint violated");
            CoreError::ConflictError(format!("{}: {}", context, db.message()))
        }
        _ => {
            tracing::error!(context, error = %err, "Database write failed");
            CoreError::InternalError(format!("{}: {}", context, err))
        }
    }
}

pub(crate) fn map_read_error(context: &str, err: sqlx::Error) -> parcel_core::CoreError {
    tracing::error!(context, error = %err, "Database read failed");
    parcel_core::CoreError::InternalError(format!("{}: {}", context, err))
}
