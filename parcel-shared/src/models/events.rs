use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentChange {
    Created,
    Updated,
    PackageAdded,
    PackageUpdated,
    PackageCancelled,
    Cancelled,
}

/// Emitted after a shipment write has committed. Downstream consumers (label
/// rendering, dispatch boards) load the full records by tracking number.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct ShipmentAssembledEvent {
    pub shipment_id: Uuid,
    pub tracking_number: i64,
    pub change: ShipmentChange,
    pub package_numbers: Vec<i64>,
    pub booking_partner_id: Option<Uuid>,
    pub pickup_partner_id: Option<Uuid>,
    pub delivery_partner_id: Option<Uuid>,
    pub weight_total: f64,
    pub volume_weight_total: f64,
    pub girth_max: f64,
    pub cancelled: bool,
    pub occurred_at: DateTime<Utc>,
}

impl ShipmentAssembledEvent {
    /// Partition key for ordered delivery per shipment.
    pub fn key(&self) -> String {
        self.tracking_number.to_string()
    }
}
