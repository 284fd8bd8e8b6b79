use async_trait::async_trait;
use parcel_shared::ShipmentAssembledEvent;
use uuid::Uuid;

use crate::models::{Partner, PackageStatus, PostalCodeRange, Shipment, StatusCode};
use crate::postal::CountryCode;
use crate::CoreResult;

/// Read-only access to coverage ranges
#[async_trait]
pub trait RangeRepository: Send + Sync {
    async fn ranges_for_country(&self, country: &CountryCode) -> CoreResult<Vec<PostalCodeRange>>;
}

/// Read-only partner lookups
#[async_trait]
pub trait PartnerRepository: Send + Sync {
    async fn get_partner(&self, id: Uuid) -> CoreResult<Option<Partner>>;

    async fn find_by_station(&self, station_number: i32) -> CoreResult<Option<Partner>>;
}

/// Shipment aggregate persistence.
///
/// `insert_shipment` and `update_shipment` each write the shipment row and all
/// of its packages in one transaction: either everything becomes visible or
/// nothing does.
#[async_trait]
pub trait ShipmentRepository: Send + Sync {
    async fn insert_shipment(&self, shipment: &Shipment) -> CoreResult<()>;

    /// Writes only if the stored `version` still equals `shipment.version`,
    /// then increments both. A stale version is a `ConflictError`; the caller
    /// re-reads and reapplies its change.
    async fn update_shipment(&self, shipment: &mut Shipment) -> CoreResult<()>;

    async fn get_shipment(&self, id: Uuid) -> CoreResult<Option<Shipment>>;

    async fn find_by_tracking_number(&self, tracking_number: i64) -> CoreResult<Option<Shipment>>;

    async fn find_by_package_number(&self, package_number: i64) -> CoreResult<Option<Shipment>>;
}

/// Package tracking history
#[async_trait]
pub trait StatusRepository: Send + Sync {
    async fn get_status_code(&self, code: &str) -> CoreResult<Option<StatusCode>>;

    async fn append_status(&self, status: &PackageStatus) -> CoreResult<()>;

    async fn list_statuses(&self, package_id: Uuid) -> CoreResult<Vec<PackageStatus>>;
}

/// Feed of committed shipment writes (label generation, dispatch).
#[async_trait]
pub trait ShipmentEventSink: Send + Sync {
    async fn publish(&self, event: &ShipmentAssembledEvent) -> CoreResult<()>;
}

/// Default sink: writes the event to the log only.
pub struct LoggingEventSink;

#[async_trait]
impl ShipmentEventSink for LoggingEventSink {
    async fn publish(&self, event: &ShipmentAssembledEvent) -> CoreResult<()> {
        tracing::info!(
            tracking_number = event.tracking_number,
            change = ?event.change,
            packages = event.package_numbers.len(),
            "Shipment event"
        );
        Ok(())
    }
}
