use chrono::Utc;

use crate::models::{Package, Shipment};

/// cm³ per kg of volumetric weight.
pub const VOLUMETRIC_DIVISOR: f64 = 6000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackageMetrics {
    pub volume_weight_kg: f64,
    pub girth_cm: f64,
}

/// The per-package inputs to shipment aggregation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackageMeasure {
    pub weight_kg: f64,
    pub volume_weight_kg: f64,
    pub girth_cm: f64,
}

impl From<&Package> for PackageMeasure {
    fn from(package: &Package) -> Self {
        Self {
            weight_kg: package.weight_kg,
            volume_weight_kg: package.volume_weight_kg,
            girth_cm: package.girth_cm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShipmentAggregates {
    pub weight_total: f64,
    pub volume_weight_total: f64,
    pub girth_max: f64,
}

/// Derived physical metrics. Pure functions; the orchestrator calls
/// [`MetricsRecalculator::recalculate_shipment`] before every persist.
pub struct MetricsRecalculator;

impl MetricsRecalculator {
    pub fn package_metrics(length_cm: i32, width_cm: i32, height_cm: i32) -> PackageMetrics {
        // Integer volume first so the only rounding is the final division.
        let volume_cm3 = i64::from(length_cm) * i64::from(width_cm) * i64::from(height_cm);
        let girth = (i64::from(height_cm) + i64::from(width_cm)) * 2 + i64::from(length_cm);

        PackageMetrics {
            volume_weight_kg: volume_cm3 as f64 / VOLUMETRIC_DIVISOR,
            girth_cm: girth as f64,
        }
    }

    /// Sums weights, takes the largest girth. An empty set yields all zeros.
    pub fn shipment_aggregates(packages: &[PackageMeasure]) -> ShipmentAggregates {
        packages
            .iter()
            .fold(ShipmentAggregates::default(), |acc, p| ShipmentAggregates {
                weight_total: acc.weight_total + p.weight_kg,
                volume_weight_total: acc.volume_weight_total + p.volume_weight_kg,
                girth_max: acc.girth_max.max(p.girth_cm),
            })
    }

    pub fn recalculate_package(package: &mut Package) {
        let metrics = Self::package_metrics(package.length_cm, package.width_cm, package.height_cm);
        package.volume_weight_kg = metrics.volume_weight_kg;
        package.girth_cm = metrics.girth_cm;
    }

    /// Overwrites every derived field of the shipment and its packages.
    /// Cancelled packages keep their own metrics but drop out of the totals.
    pub fn recalculate_shipment(shipment: &mut Shipment) -> ShipmentAggregates {
        for package in shipment.packages.iter_mut() {
            Self::recalculate_package(package);
        }

        let measures: Vec<PackageMeasure> =
            shipment.active_packages().map(PackageMeasure::from).collect();
        let aggregates = Self::shipment_aggregates(&measures);

        shipment.weight_total = aggregates.weight_total;
        shipment.volume_weight_total = aggregates.volume_weight_total;
        shipment.girth_max = aggregates.girth_max;
        shipment.updated_at = Utc::now();

        tracing::debug!(
            tracking_number = shipment.tracking_number,
            weight_total = aggregates.weight_total,
            volume_weight_total = aggregates.volume_weight_total,
            girth_max = aggregates.girth_max,
            "Recalculated shipment aggregates"
        );

        aggregates
    }
}
