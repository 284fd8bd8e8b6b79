use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parcel_core::repository::ShipmentRepository;
use parcel_core::{Address, CoreError, CoreResult, Package, PackagingType, ServiceWindow, Shipment};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::database::{map_read_error, map_write_error};

pub struct PgShipmentRepository {
    pool: PgPool,
}

impl PgShipmentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct ShipmentRow {
    id: Uuid,
    tracking_number: i64,
    sender: Json<Address>,
    recipient: Json<Address>,
    pickup: Json<ServiceWindow>,
    delivery: Json<ServiceWindow>,
    customer_reference: Option<String>,
    order_type: String,
    goods_value: f64,
    insurance_value: f64,
    booking_partner_id: Option<Uuid>,
    pickup_partner_id: Option<Uuid>,
    delivery_partner_id: Option<Uuid>,
    weight_total: f64,
    volume_weight_total: f64,
    girth_max: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
    version: i64,
}

#[derive(sqlx::FromRow)]
struct PackageRow {
    id: Uuid,
    package_number: i64,
    reference: Option<String>,
    packaging_type: String,
    length_cm: i32,
    width_cm: i32,
    height_cm: i32,
    weight_kg: f64,
    volume_weight_kg: f64,
    girth_cm: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl PackageRow {
    fn into_package(self) -> CoreResult<Package> {
        let packaging_type: PackagingType = self.packaging_type.parse().map_err(|_| {
            CoreError::InternalError(format!(
                "package {} has unknown packaging type '{}'",
                self.package_number, self.packaging_type
            ))
        })?;

        Ok(Package {
            id: self.id,
            package_number: self.package_number,
            reference: self.reference,
            packaging_type,
            length_cm: self.length_cm,
            width_cm: self.width_cm,
            height_cm: self.height_cm,
            weight_kg: self.weight_kg,
            volume_weight_kg: self.volume_weight_kg,
            girth_cm: self.girth_cm,
            created_at: self.created_at,
            updated_at: self.updated_at,
            cancelled_at: self.cancelled_at,
        })
    }
}

impl ShipmentRow {
    fn into_shipment(self, packages: Vec<Package>) -> Shipment {
        Shipment {
            id: self.id,
            tracking_number: self.tracking_number,
            sender: self.sender.0,
            recipient: self.recipient.0,
            pickup: self.pickup.0,
            delivery: self.delivery.0,
            customer_reference: self.customer_reference,
            order_type: self.order_type,
            goods_value: self.goods_value,
            insurance_value: self.insurance_value,
            booking_partner_id: self.booking_partner_id,
            pickup_partner_id: self.pickup_partner_id,
            delivery_partner_id: self.delivery_partner_id,
            weight_total: self.weight_total,
            volume_weight_total: self.volume_weight_total,
            girth_max: self.girth_max,
            packages,
            created_at: self.created_at,
            updated_at: self.updated_at,
            cancelled_at: self.cancelled_at,
            version: self.version,
        }
    }
}

/// Result of a conditional shipment update.
enum UpdateOutcome {
    Written,
    Stale { stored_version: i64 },
    Missing,
}

const SHIPMENT_COLUMNS: &str = "s.id, s.tracking_number, s.sender, s.recipient, s.pickup, s.delivery, \
     s.customer_reference, s.order_type, s.goods_value, s.insurance_value, \
     s.booking_partner_id, s.pickup_partner_id, s.delivery_partner_id, \
     s.weight_total, s.volume_weight_total, s.girth_max, s.created_at, s.updated_at, s.cancelled_at, s.version";

impl PgShipmentRepository {
    async fn hydrate(&self, row: Option<ShipmentRow>) -> CoreResult<Option<Shipment>> {
        let Some(row) = row else {
            return Ok(None);
        };

        let package_rows = sqlx::query_as::<_, PackageRow>(
            r#"
            SELECT id, package_number, reference, packaging_type, length_cm, width_cm, height_cm,
                   weight_kg, volume_weight_kg, girth_cm, created_at, updated_at, cancelled_at
            FROM package
            WHERE shipment_id = $1
            ORDER BY package_number
            "#,
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_read_error("load packages", e))?;

        let packages = package_rows
            .into_iter()
            .map(PackageRow::into_package)
            .collect::<CoreResult<Vec<_>>>()?;

        Ok(Some(row.into_shipment(packages)))
    }

    async fn upsert_packages(tx: &mut Transaction<'_, Postgres>, shipment: &Shipment) -> Result<(), sqlx::Error> {
        for package in &shipment.packages {
            // package_number and shipment_id are immutable once written
            sqlx::query(
                r#"
                INSERT INTO package (id, shipment_id, package_number, reference, packaging_type,
                                     length_cm, width_cm, height_cm, weight_kg, volume_weight_kg, girth_cm,
                                     created_at, updated_at, cancelled_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ON CONFLICT (id) DO UPDATE SET
                    reference = EXCLUDED.reference,
                    packaging_type = EXCLUDED.packaging_type,
                    length_cm = EXCLUDED.length_cm,
                    width_cm = EXCLUDED.width_cm,
                    height_cm = EXCLUDED.height_cm,
                    weight_kg = EXCLUDED.weight_kg,
                    volume_weight_kg = EXCLUDED.volume_weight_kg,
                    girth_cm = EXCLUDED.girth_cm,
                    updated_at = EXCLUDED.updated_at,
                    cancelled_at = EXCLUDED.cancelled_at
                "#,
            )
            .bind(package.id)
            .bind(shipment.id)
            .bind(package.package_number)
            .bind(&package.reference)
            .bind(package.packaging_type.as_str())
            .bind(package.length_cm)
            .bind(package.width_cm)
            .bind(package.height_cm)
            .bind(package.weight_kg)
            .bind(package.volume_weight_kg)
            .bind(package.girth_cm)
            .bind(package.created_at)
            .bind(package.updated_at)
            .bind(package.cancelled_at)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn write_insert(&self, shipment: &Shipment) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO shipment (id, tracking_number, sender, recipient, pickup, delivery,
                                  customer_reference, order_type, goods_value, insurance_value,
                                  booking_partner_id, pickup_partner_id, delivery_partner_id,
                                  weight_total, volume_weight_total, girth_max,
                                  created_at, updated_at, cancelled_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(shipment.id)
        .bind(shipment.tracking_number)
        .bind(Json(&shipment.sender))
        .bind(Json(&shipment.recipient))
        .bind(Json(&shipment.pickup))
        .bind(Json(&shipment.delivery))
        .bind(&shipment.customer_reference)
        .bind(&shipment.order_type)
        .bind(shipment.goods_value)
        .bind(shipment.insurance_value)
        .bind(shipment.booking_partner_id)
        .bind(shipment.pickup_partner_id)
        .bind(shipment.delivery_partner_id)
        .bind(shipment.weight_total)
        .bind(shipment.volume_weight_total)
        .bind(shipment.girth_max)
        .bind(shipment.created_at)
        .bind(shipment.updated_at)
        .bind(shipment.cancelled_at)
        .bind(shipment.version)
        .execute(&mut *tx)
        .await?;

        Self::upsert_packages(&mut tx, shipment).await?;

        tx.commit().await?;
        Ok(())
    }

    /// The header row is written only while its version still equals the one
    /// the caller read; packages follow in the same transaction.
    async fn write_update(&self, shipment: &Shipment) -> Result<UpdateOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE shipment SET
                sender = $2, recipient = $3, pickup = $4, delivery = $5,
                customer_reference = $6, order_type = $7, goods_value = $8, insurance_value = $9,
                booking_partner_id = $10, pickup_partner_id = $11, delivery_partner_id = $12,
                weight_total = $13, volume_weight_total = $14, girth_max = $15,
                updated_at = $16, cancelled_at = $17, version = version + 1
            WHERE id = $1 AND version = $18
            "#,
        )
        .bind(shipment.id)
        .bind(Json(&shipment.sender))
        .bind(Json(&shipment.recipient))
        .bind(Json(&shipment.pickup))
        .bind(Json(&shipment.delivery))
        .bind(&shipment.customer_reference)
        .bind(&shipment.order_type)
        .bind(shipment.goods_value)
        .bind(shipment.insurance_value)
        .bind(shipment.booking_partner_id)
        .bind(shipment.pickup_partner_id)
        .bind(shipment.delivery_partner_id)
        .bind(shipment.weight_total)
        .bind(shipment.volume_weight_total)
        .bind(shipment.girth_max)
        .bind(shipment.updated_at)
        .bind(shipment.cancelled_at)
        .bind(shipment.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Dropping the transaction rolls it back
            let stored: Option<i64> = sqlx::query_scalar("SELECT version FROM shipment WHERE id = $1")
                .bind(shipment.id)
                .fetch_optional(&mut *tx)
                .await?;
            return Ok(match stored {
                Some(stored_version) => UpdateOutcome::Stale { stored_version },
                None => UpdateOutcome::Missing,
            });
        }

        Self::upsert_packages(&mut tx, shipment).await?;

        tx.commit().await?;
        Ok(UpdateOutcome::Written)
    }
}

#[async_trait]
impl ShipmentRepository for PgShipmentRepository {
    async fn insert_shipment(&self, shipment: &Shipment) -> CoreResult<()> {
        self.write_insert(shipment)
            .await
            .map_err(|e| map_write_error("insert_shipment", e))?;

        tracing::debug!(
            tracking_number = shipment.tracking_number,
            packages = shipment.packages.len(),
            "Shipment persisted"
        );
        Ok(())
    }

    async fn update_shipment(&self, shipment: &mut Shipment) -> CoreResult<()> {
        let outcome = self
            .write_update(shipment)
            .await
            .map_err(|e| map_write_error("update_shipment", e))?;

        match outcome {
            UpdateOutcome::Written => {
                shipment.version += 1;
                Ok(())
            }
            UpdateOutcome::Stale { stored_version } => {
                tracing::warn!(
                    tracking_number = shipment.tracking_number,
                    read_version = shipment.version,
                    stored_version,
                    "Stale shipment write rejected"
                );
                Err(CoreError::ConflictError(format!(
                    "shipment {} changed since it was read",
                    shipment.tracking_number
                )))
            }
            UpdateOutcome::Missing => Err(CoreError::NotFound(format!("shipment {}", shipment.tracking_number))),
        }
    }

    async fn get_shipment(&self, id: Uuid) -> CoreResult<Option<Shipment>> {
        let row = sqlx::query_as::<_, ShipmentRow>(&format!("SELECT {} FROM shipment s WHERE s.id = $1", SHIPMENT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_read_error("get_shipment", e))?;

        self.hydrate(row).await
    }

    async fn find_by_tracking_number(&self, tracking_number: i64) -> CoreResult<Option<Shipment>> {
        let row = sqlx::query_as::<_, ShipmentRow>(&format!(
            "SELECT {} FROM shipment s WHERE s.tracking_number = $1",
            SHIPMENT_COLUMNS
        ))
        .bind(tracking_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_read_error("find_by_tracking_number", e))?;

        self.hydrate(row).await
    }

    async fn find_by_package_number(&self, package_number: i64) -> CoreResult<Option<Shipment>> {
        let row = sqlx::query_as::<_, ShipmentRow>(&format!(
            "SELECT {} FROM shipment s JOIN package p ON p.shipment_id = s.id WHERE p.package_number = $1",
            SHIPMENT_COLUMNS
        ))
        .bind(package_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_read_error("find_by_package_number", e))?;

        self.hydrate(row).await
    }
}
