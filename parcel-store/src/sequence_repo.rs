use async_trait::async_trait;
use parcel_core::sequence::validate_sequence_name;
use parcel_core::{CoreError, CoreResult, SequenceAllocator, SEQUENCE_SEED};
use sqlx::PgPool;
use std::time::Duration;

/// Counter allocation through a row lock on `sequence_counters`.
///
/// Each call runs its own transaction:
///
/// 1. `SET LOCAL lock_timeout` so a stuck holder turns into an error
/// 2. create the row with the seed if it is missing (`ON CONFLICT DO NOTHING`)
/// 3. `SELECT ... FOR UPDATE`, blocking concurrent callers of the same name
/// 4. write back `last_value + 1` and commit
///
/// Several processes may share one database; no in-process lock is involved.
/// Any failure rolls the transaction back and is reported as
/// [`CoreError::ConflictError`] without retrying.
#[derive(Clone)]
pub struct PgSequenceAllocator {
    pool: PgPool,
    seed: i64,
    lock_timeout: Duration,
}

impl PgSequenceAllocator {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            seed: SEQUENCE_SEED,
            lock_timeout: Duration::from_millis(2000),
        }
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    async fn allocate(&self, name: &str) -> Result<i64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // SET does not take bind parameters; the value is a plain integer.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO sequence_counters (name, last_value) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING",
        )
        .bind(name)
        .bind(self.seed)
        .execute(&mut *tx)
        .await?;

        let last_value: i64 =
            sqlx::query_scalar("SELECT last_value FROM sequence_counters WHERE name = $1 FOR UPDATE")
                .bind(name)
                .fetch_one(&mut *tx)
                .await?;

        let next = last_value
            .checked_add(1)
            .ok_or_else(|| sqlx::Error::Protocol(format!("sequence '{}' is exhausted", name)))?;

        sqlx::query("UPDATE sequence_counters SET last_value = $2 WHERE name = $1")
            .bind(name)
            .bind(next)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(next)
    }
}

#[async_trait]
impl SequenceAllocator for PgSequenceAllocator {
    async fn next(&self, name: &str) -> CoreResult<i64> {
        validate_sequence_name(name)?;

        match self.allocate(name).await {
            Ok(value) => {
                tracing::debug!(sequence = name, value, "Allocated sequence value");
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(sequence = name, error = %e, "Sequence allocation rolled back");
                Err(CoreError::ConflictError(format!(
                    "allocation for sequence '{}' failed: {}",
                    name, e
                )))
            }
        }
    }
}
