use async_trait::async_trait;
use parcel_core::repository::RangeRepository;
use parcel_core::{CoreResult, CountryCode, PostalCodeRange, RangeKind};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::map_read_error;

pub struct PgRangeRepository {
    pool: PgPool,
}

impl PgRangeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct RangeRow {
    id: i64,
    partner_id: Uuid,
    country: String,
    code_from: String,
    code_to: String,
    kind: String,
    priority: i32,
}

impl RangeRow {
    fn into_range(self) -> Option<PostalCodeRange> {
        let kind: RangeKind = match self.kind.parse() {
            Ok(kind) => kind,
            Err(_) => {
                tracing::warn!(range_id = self.id, kind = %self.kind, "Skipping range with unknown kind");
                return None;
            }
        };

        Some(PostalCodeRange {
            id: self.id,
            partner_id: self.partner_id,
            country: self.country.trim().to_uppercase(),
            code_from: self.code_from,
            code_to: self.code_to,
            kind,
            priority: self.priority,
        })
    }
}

#[async_trait]
impl RangeRepository for PgRangeRepository {
    /// Containment and priority are left to the in-memory index, which owns
    /// the postal code normalization.
    async fn ranges_for_country(&self, country: &CountryCode) -> CoreResult<Vec<PostalCodeRange>> {
        let rows = sqlx::query_as::<_, RangeRow>(
            r#"
            SELECT id, partner_id, country, code_from, code_to, kind, priority
            FROM postal_code_range
            WHERE upper(country) = $1
            ORDER BY priority, id
            "#,
        )
        .bind(country.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_read_error("ranges_for_country", e))?;

        Ok(rows.into_iter().filter_map(RangeRow::into_range).collect())
    }
}
