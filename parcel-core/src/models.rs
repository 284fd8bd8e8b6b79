use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use parcel_shared::Masked;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{CoreError, CoreResult};

pub const STATION_NUMBER_MIN: i32 = 100;
pub const STATION_NUMBER_MAX: i32 = 999;

pub const DEFAULT_ORDER_TYPE: &str = "Standard";

/// Which side of a shipment a postal-code range covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeKind {
    Pickup,
    Delivery,
}

impl RangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RangeKind::Pickup => "pickup",
            RangeKind::Delivery => "delivery",
        }
    }
}

impl fmt::Display for RangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RangeKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pickup" => Ok(RangeKind::Pickup),
            "delivery" => Ok(RangeKind::Delivery),
            other => Err(CoreError::ValidationError(format!(
                "range kind must be 'pickup' or 'delivery', got '{}'",
                other
            ))),
        }
    }
}

/// A depot / carrier that picks up, delivers or books shipments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partner {
    pub id: Uuid,
    pub station_number: i32,
    pub name: String,
    pub street: String,
    pub house_number: String,
    pub postal_code: String,
    pub city: String,
    pub country: String,
    pub has_forklift: bool,
    pub is_coloader: bool,
}

impl Partner {
    pub fn validate_station_number(station_number: i32) -> CoreResult<()> {
        if !(STATION_NUMBER_MIN..=STATION_NUMBER_MAX).contains(&station_number) {
            return Err(CoreError::ValidationError(format!(
                "station number {} outside {}..={}",
                station_number, STATION_NUMBER_MIN, STATION_NUMBER_MAX
            )));
        }
        Ok(())
    }
}

/// A postal-code interval served by one partner. Overlaps are allowed and
/// resolved by `priority` (lower wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostalCodeRange {
    pub id: i64,
    pub partner_id: Uuid,
    pub country: String,
    pub code_from: String,
    pub code_to: String,
    pub kind: RangeKind,
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub name1: String,
    pub name2: Option<String>,
    pub street: String,
    pub postal_code: String,
    pub city: String,
    pub country: String,
    pub email: Masked<String>,
    pub phone: Masked<String>,
}

/// Pickup or delivery appointment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceWindow {
    pub date: NaiveDate,
    pub time_from: NaiveTime,
    pub time_to: NaiveTime,
    pub note: Option<String>,
    #[serde(default)]
    pub extra_fee: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackagingType {
    Parcel,
    EuroPallet,
    ThermoBox,
    Envelope,
    Valuables,
    Roll,
}

impl PackagingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackagingType::Parcel => "PARCEL",
            PackagingType::EuroPallet => "EURO_PALLET",
            PackagingType::ThermoBox => "THERMO_BOX",
            PackagingType::Envelope => "ENVELOPE",
            PackagingType::Valuables => "VALUABLES",
            PackagingType::Roll => "ROLL",
        }
    }
}

impl FromStr for PackagingType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PARCEL" => Ok(PackagingType::Parcel),
            "EURO_PALLET" => Ok(PackagingType::EuroPallet),
            "THERMO_BOX" => Ok(PackagingType::ThermoBox),
            "ENVELOPE" => Ok(PackagingType::Envelope),
            "VALUABLES" => Ok(PackagingType::Valuables),
            "ROLL" => Ok(PackagingType::Roll),
            other => Err(CoreError::ValidationError(format!(
                "unknown packaging type '{}'",
                other
            ))),
        }
    }
}

/// A physical piece of a shipment.
///
/// `volume_weight_kg` and `girth_cm` are derived; they are overwritten by
/// [`crate::MetricsRecalculator`] before every write and never taken from callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub id: Uuid,
    pub package_number: i64,
    pub reference: Option<String>,
    pub packaging_type: PackagingType,
    pub length_cm: i32,
    pub width_cm: i32,
    pub height_cm: i32,
    pub weight_kg: f64,
    pub volume_weight_kg: f64,
    pub girth_cm: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Package {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    /// Mark as cancelled (never delete)
    pub fn cancel(&mut self) {
        if self.cancelled_at.is_none() {
            let now = Utc::now();
            self.cancelled_at = Some(now);
            self.updated_at = now;
        }
    }
}

/// The aggregate root of the write path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipment {
    pub id: Uuid,
    pub tracking_number: i64,
    pub sender: Address,
    pub recipient: Address,
    pub pickup: ServiceWindow,
    pub delivery: ServiceWindow,
    pub customer_reference: Option<String>,
    pub order_type: String,
    pub goods_value: f64,
    pub insurance_value: f64,
    pub booking_partner_id: Option<Uuid>,
    pub pickup_partner_id: Option<Uuid>,
    pub delivery_partner_id: Option<Uuid>,
    pub weight_total: f64,
    pub volume_weight_total: f64,
    pub girth_max: f64,
    pub packages: Vec<Package>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Bumped by every stored update; a write based on an older read is rejected.
    pub version: i64,
}

impl Shipment {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    /// Packages that still count towards the aggregates.
    pub fn active_packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.iter().filter(|p| !p.is_cancelled())
    }

    pub fn package_numbers(&self) -> Vec<i64> {
        self.packages.iter().map(|p| p.package_number).collect()
    }

    pub fn find_package_mut(&mut self, package_number: i64) -> Option<&mut Package> {
        self.packages
            .iter_mut()
            .find(|p| p.package_number == package_number)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Catalogue entry for tracking events (e.g. `100` In Transit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCode {
    pub id: i32,
    pub code: String,
    pub description: String,
}

/// One entry of a package's tracking history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageStatus {
    pub id: Uuid,
    pub package_id: Uuid,
    pub status_code: String,
    pub occurred_at: DateTime<Utc>,
    pub note: Option<String>,
}
