use parcel_core::{CoreError, Package, Shipment};

use crate::models::{PackagePatch, PatchEffect, ShipmentPatch};

/// Applies modifications to a loaded shipment. Persistence, numbering and
/// metrics are the caller's concern.
pub struct ChangeHandler;

impl ChangeHandler {
    pub fn apply_patch(shipment: &mut Shipment, patch: ShipmentPatch) -> Result<PatchEffect, ChangeError> {
        Self::ensure_modifiable(shipment)?;
        let effect = patch.apply(shipment);
        shipment.touch();
        Ok(effect)
    }

    /// Add an unnumbered package to an existing shipment
    pub fn add_package(shipment: &mut Shipment, package: Package) -> Result<(), ChangeError> {
        Self::ensure_modifiable(shipment)?;
        shipment.packages.push(package);
        shipment.touch();
        Ok(())
    }

    pub fn update_package(
        shipment: &mut Shipment,
        package_number: i64,
        patch: PackagePatch,
    ) -> Result<(), ChangeError> {
        Self::ensure_modifiable(shipment)?;

        let package = shipment
            .find_package_mut(package_number)
            .ok_or(ChangeError::PackageNotFound(package_number))?;
        if package.is_cancelled() {
            return Err(ChangeError::PackageNotActive(package_number));
        }

        patch.apply(package);
        shipment.touch();
        Ok(())
    }

    /// Mark a package cancelled (never delete). Cancelling twice is a no-op;
    /// returns whether anything changed.
    pub fn cancel_package(shipment: &mut Shipment, package_number: i64) -> Result<bool, ChangeError> {
        Self::ensure_modifiable(shipment)?;

        let package = shipment
            .find_package_mut(package_number)
            .ok_or(ChangeError::PackageNotFound(package_number))?;
        if package.is_cancelled() {
            return Ok(false);
        }

        package.cancel();
        shipment.touch();
        Ok(true)
    }

    /// Cancels the shipment and every active package. Returns `false` when
    /// it was already cancelled.
    pub fn cancel_shipment(shipment: &mut Shipment) -> bool {
        if shipment.is_cancelled() {
            return false;
        }

        for package in shipment.packages.iter_mut() {
            package.cancel();
        }
        shipment.touch();
        shipment.cancelled_at = Some(shipment.updated_at);
        true
    }

    fn ensure_modifiable(shipment: &Shipment) -> Result<(), ChangeError> {
        if shipment.is_cancelled() {
            return Err(ChangeError::ShipmentNotModifiable(shipment.tracking_number));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChangeError {
    #[error("Shipment {0} is cancelled and cannot be modified")]
    ShipmentNotModifiable(i64),

    #[error("Package not found: {0}")]
    PackageNotFound(i64),

    #[error("Package {0} is cancelled")]
    PackageNotActive(i64),
}

impl From<ChangeError> for CoreError {
    fn from(err: ChangeError) -> Self {
        let message = err.to_string();
        match err {
            ChangeError::PackageNotFound(_) => CoreError::NotFound(message),
            _ => CoreError::ValidationError(message),
        }
    }
}
