use std::sync::Arc;

use chrono::{DateTime, Utc};
use parcel_core::repository::{ShipmentRepository, StatusRepository};
use parcel_core::{CoreError, CoreResult, Package, PackageStatus, Shipment};
use uuid::Uuid;

/// Records and reads the tracking history of individual packages.
pub struct PackageTracker {
    shipments: Arc<dyn ShipmentRepository>,
    statuses: Arc<dyn StatusRepository>,
}

impl PackageTracker {
    pub fn new(shipments: Arc<dyn ShipmentRepository>, statuses: Arc<dyn StatusRepository>) -> Self {
        Self { shipments, statuses }
    }

    /// Append a status entry. The code must exist in the status catalogue;
    /// `occurred_at` defaults to now.
    pub async fn record_status(
        &self,
        package_number: i64,
        status_code: &str,
        note: Option<String>,
        occurred_at: Option<DateTime<Utc>>,
    ) -> CoreResult<PackageStatus> {
        let code = status_code.trim();
        if self.statuses.get_status_code(code).await?.is_none() {
            return Err(CoreError::ValidationError(format!("unknown status code '{}'", code)));
        }

        let shipment = self.load(package_number).await?;
        let package = package_of(&shipment, package_number)?;

        let status = PackageStatus {
            id: Uuid::new_v4(),
            package_id: package.id,
            status_code: code.to_string(),
            occurred_at: occurred_at.unwrap_or_else(Utc::now),
            note,
        };
        self.statuses.append_status(&status).await?;

        tracing::info!(
            tracking_number = shipment.tracking_number,
            package_number,
            status_code = code,
            "Package status recorded"
        );
        Ok(status)
    }

    /// Oldest entry first.
    pub async fn history(&self, package_number: i64) -> CoreResult<Vec<PackageStatus>> {
        let shipment = self.load(package_number).await?;
        let package = package_of(&shipment, package_number)?;

        let mut entries = self.statuses.list_statuses(package.id).await?;
        entries.sort_by_key(|s| s.occurred_at);
        Ok(entries)
    }

    async fn load(&self, package_number: i64) -> CoreResult<Shipment> {
        self.shipments
            .find_by_package_number(package_number)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("package {}", package_number)))
    }
}

fn package_of(shipment: &Shipment, package_number: i64) -> CoreResult<&Package> {
    shipment
        .packages
        .iter()
        .find(|p| p.package_number == package_number)
        .ok_or_else(|| CoreError::NotFound(format!("package {}", package_number)))
}
