use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parcel_core::repository::StatusRepository;
use parcel_core::{CoreResult, PackageStatus, StatusCode};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::{map_read_error, map_write_error};

pub struct PgStatusRepository {
    pool: PgPool,
}

impl PgStatusRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct StatusCodeRow {
    id: i32,
    code: String,
    description: String,
}

#[derive(sqlx::FromRow)]
struct PackageStatusRow {
    id: Uuid,
    package_id: Uuid,
    status_code: String,
    occurred_at: DateTime<Utc>,
    note: Option<String>,
}

#[async_trait]
impl StatusRepository for PgStatusRepository {
    async fn get_status_code(&self, code: &str) -> CoreResult<Option<StatusCode>> {
        let row = sqlx::query_as::<_, StatusCodeRow>("SELECT id, code, description FROM status_code WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_read_error("get_status_code", e))?;

        Ok(row.map(|r| StatusCode {
            id: r.id,
            code: r.code,
            description: r.description,
        }))
    }

    async fn append_status(&self, status: &PackageStatus) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO package_status (id, package_id, status_code, occurred_at, note) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(status.id)
        .bind(status.package_id)
        .bind(&status.status_code)
        .bind(status.occurred_at)
        .bind(&status.note)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error("append_status", e))?;

        Ok(())
    }

    async fn list_statuses(&self, package_id: Uuid) -> CoreResult<Vec<PackageStatus>> {
        let rows = sqlx::query_as::<_, PackageStatusRow>(
            r#"
            SELECT id, package_id, status_code, occurred_at, note
            FROM package_status
            WHERE package_id = $1
            ORDER BY occurred_at, id
            "#,
        )
        .bind(package_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_read_error("list_statuses", e))?;

        Ok(rows
            .into_iter()
            .map(|r| PackageStatus {
                id: r.id,
                package_id: r.package_id,
                status_code: r.status_code,
                occurred_at: r.occurred_at,
                note: r.note,
            })
            .collect())
    }
}
