use async_trait::async_trait;
use parcel_core::repository::PartnerRepository;
use parcel_core::{CoreResult, Partner};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::map_read_error;

pub struct PgPartnerRepository {
    pool: PgPool,
}

impl PgPartnerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PartnerRow {
    id: Uuid,
    station_number: i32,
    name: String,
    street: String,
    house_number: String,
    postal_code: String,
    city: String,
    country: String,
    has_forklift: bool,
    is_coloader: bool,
}

impl From<PartnerRow> for Partner {
    fn from(row: PartnerRow) -> Self {
        Partner {
            id: row.id,
            station_number: row.station_number,
            name: row.name,
            street: row.street,
            house_number: row.house_number,
            postal_code: row.postal_code,
            city: row.city,
            country: row.country,
            has_forklift: row.has_forklift,
            is_coloader: row.is_coloader,
        }
    }
}

const PARTNER_COLUMNS: &str =
    "id, station_number, name, street, house_number, postal_code, city, country, has_forklift, is_coloader";

#[async_trait]
impl PartnerRepository for PgPartnerRepository {
    async fn get_partner(&self, id: Uuid) -> CoreResult<Option<Partner>> {
        let row = sqlx::query_as::<_, PartnerRow>(&format!("SELECT {} FROM partner WHERE id = $1", PARTNER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_read_error("get_partner", e))?;

        Ok(row.map(Partner::from))
    }

    async fn find_by_station(&self, station_number: i32) -> CoreResult<Option<Partner>> {
        let row = sqlx::query_as::<_, PartnerRow>(&format!(
            "SELECT {} FROM partner WHERE station_number = $1",
            PARTNER_COLUMNS
        ))
        .bind(station_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_read_error("find_by_station", e))?;

        Ok(row.map(Partner::from))
    }
}
