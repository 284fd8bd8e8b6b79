use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use parcel_core::repository::{ShipmentEventSink, ShipmentRepository};
use parcel_core::{
    CoreError, CoreResult, MetricsRecalculator, PartnerOverrides, RoutingResolver, SequenceAllocator,
    Shipment, SHIPMENT_SEQUENCE,
};
use parcel_shared::{ShipmentAssembledEvent, ShipmentChange};
use uuid::Uuid;

use crate::changes::ChangeHandler;
use crate::models::{PackageDraft, PackagePatch, ShipmentDraft, ShipmentPatch, UNASSIGNED_NUMBER};
use crate::validation::{ShipmentValidator, StructuralValidator};

#[derive(Debug, Clone)]
pub struct AssemblySettings {
    /// Counter for tracking and package numbers
    pub sequence_name: String,
    /// Reject shipments whose sender no pickup range covers
    pub require_pickup_partner: bool,
    /// Reject shipments whose recipient no delivery range covers
    pub require_delivery_partner: bool,
    /// Total tries per write when a conflict is reported (1 = no retry)
    pub max_attempts: u32,
}

impl Default for AssemblySettings {
    fn default() -> Self {
        Self {
            sequence_name: SHIPMENT_SEQUENCE.to_string(),
            require_pickup_partner: false,
            require_delivery_partner: false,
            max_attempts: 1,
        }
    }
}

/// Write path for shipments: numbering, routing, validation, metrics and
/// persistence, in that order, followed by an event once the write has
/// committed.
///
/// Numbers drawn by an attempt that later fails are not returned to the
/// counter. Gaps in tracking and package numbers are expected.
///
/// Changes to an existing shipment are read-modify-write against its stored
/// version. A concurrent writer turns the loser's write into a conflict, which
/// `max_attempts` decides whether to retry from a fresh read.
pub struct ShipmentAssemblyOrchestrator {
    sequences: Arc<dyn SequenceAllocator>,
    routing: RoutingResolver,
    shipments: Arc<dyn ShipmentRepository>,
    validator: Arc<dyn ShipmentValidator>,
    events: Arc<dyn ShipmentEventSink>,
    settings: AssemblySettings,
}

impl ShipmentAssemblyOrchestrator {
    pub fn new(
        sequences: Arc<dyn SequenceAllocator>,
        routing: RoutingResolver,
        shipments: Arc<dyn ShipmentRepository>,
        events: Arc<dyn ShipmentEventSink>,
        settings: AssemblySettings,
    ) -> Self {
        Self {
            sequences,
            routing,
            shipments,
            validator: Arc::new(StructuralValidator),
            events,
            settings,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn ShipmentValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn settings(&self) -> &AssemblySettings {
        &self.settings
    }

    /// Assemble and persist a new shipment.
    ///
    /// The tracking number is drawn first, then one package number per
    /// package in input order, so a fresh counter yields strictly ascending
    /// numbers with the shipment lowest.
    pub async fn create_shipment(
        &self,
        draft: ShipmentDraft,
        booking_partner: Option<Uuid>,
        overrides: &PartnerOverrides,
    ) -> CoreResult<Shipment> {
        let shipment = self
            .with_retry("create_shipment", || {
                self.try_create(draft.clone(), booking_partner, overrides)
            })
            .await?;

        tracing::info!(
            tracking_number = shipment.tracking_number,
            packages = shipment.packages.len(),
            pickup_partner = ?shipment.pickup_partner_id,
            delivery_partner = ?shipment.delivery_partner_id,
            "Shipment created"
        );
        self.publish(&shipment, ShipmentChange::Created).await;
        Ok(shipment)
    }

    async fn try_create(
        &self,
        draft: ShipmentDraft,
        booking_partner: Option<Uuid>,
        overrides: &PartnerOverrides,
    ) -> CoreResult<Shipment> {
        let tracking_number = self.sequences.next(&self.settings.sequence_name).await?;
        let mut shipment = draft.into_shipment(tracking_number);

        self.routing.assign_partners(&mut shipment, booking_partner).await?;
        self.routing.apply_overrides(&mut shipment, overrides).await?;
        self.enforce_routing_policy(&shipment)?;

        self.validator.validate(&shipment)?;

        for package in shipment.packages.iter_mut() {
            package.package_number = self.sequences.next(&self.settings.sequence_name).await?;
        }
        MetricsRecalculator::recalculate_shipment(&mut shipment);

        self.shipments.insert_shipment(&shipment).await?;
        Ok(shipment)
    }

    /// Change header fields. Pickup is re-routed only when the sender's
    /// country or postal code changed, delivery likewise for the recipient.
    /// The booking partner never changes.
    pub async fn update_shipment(
        &self,
        tracking_number: i64,
        patch: ShipmentPatch,
        overrides: &PartnerOverrides,
    ) -> CoreResult<Shipment> {
        let shipment = self
            .with_retry("update_shipment", || {
                self.try_update(tracking_number, patch.clone(), overrides)
            })
            .await?;

        tracing::info!(tracking_number, "Shipment updated");
        self.publish(&shipment, ShipmentChange::Updated).await;
        Ok(shipment)
    }

    async fn try_update(
        &self,
        tracking_number: i64,
        patch: ShipmentPatch,
        overrides: &PartnerOverrides,
    ) -> CoreResult<Shipment> {
        let mut shipment = self.get_shipment(tracking_number).await?;
        let effect = ChangeHandler::apply_patch(&mut shipment, patch)?;

        if effect.sender_location_changed {
            self.routing.assign_pickup(&mut shipment).await?;
        }
        if effect.recipient_location_changed {
            self.routing.assign_delivery(&mut shipment).await?;
        }
        self.routing.apply_overrides(&mut shipment, overrides).await?;
        self.enforce_routing_policy(&shipment)?;

        self.validator.validate(&shipment)?;
        MetricsRecalculator::recalculate_shipment(&mut shipment);

        self.shipments.update_shipment(&mut shipment).await?;
        Ok(shipment)
    }

    /// Append a package. The package number is drawn only after the package
    /// passed validation.
    pub async fn add_package(&self, tracking_number: i64, draft: PackageDraft) -> CoreResult<Shipment> {
        let (shipment, package_number) = self
            .with_retry("add_package", || self.try_add_package(tracking_number, draft.clone()))
            .await?;

        tracing::info!(tracking_number, package_number, "Package added");
        self.publish(&shipment, ShipmentChange::PackageAdded).await;
        Ok(shipment)
    }

    async fn try_add_package(&self, tracking_number: i64, draft: PackageDraft) -> CoreResult<(Shipment, i64)> {
        let mut shipment = self.get_shipment(tracking_number).await?;
        ChangeHandler::add_package(&mut shipment, draft.into_package())?;
        self.validator.validate(&shipment)?;

        let package_number = self.sequences.next(&self.settings.sequence_name).await?;
        let package = shipment
            .find_package_mut(UNASSIGNED_NUMBER)
            .ok_or_else(|| CoreError::InternalError("added package vanished".to_string()))?;
        package.package_number = package_number;
        MetricsRecalculator::recalculate_shipment(&mut shipment);

        self.shipments.update_shipment(&mut shipment).await?;
        Ok((shipment, package_number))
    }

    pub async fn update_package(&self, package_number: i64, patch: PackagePatch) -> CoreResult<Shipment> {
        let shipment = self
            .with_retry("update_package", || self.try_update_package(package_number, patch.clone()))
            .await?;

        tracing::info!(tracking_number = shipment.tracking_number, package_number, "Package updated");
        self.publish(&shipment, ShipmentChange::PackageUpdated).await;
        Ok(shipment)
    }

    async fn try_update_package(&self, package_number: i64, patch: PackagePatch) -> CoreResult<Shipment> {
        let mut shipment = self.find_by_package(package_number).await?;
        ChangeHandler::update_package(&mut shipment, package_number, patch)?;
        self.validator.validate(&shipment)?;
        MetricsRecalculator::recalculate_shipment(&mut shipment);

        self.shipments.update_shipment(&mut shipment).await?;
        Ok(shipment)
    }

    /// Cancel one package; it stays stored but leaves the aggregates.
    /// Cancelling an already cancelled package writes nothing.
    pub async fn cancel_package(&self, package_number: i64) -> CoreResult<Shipment> {
        let (shipment, changed) = self
            .with_retry("cancel_package", || self.try_cancel_package(package_number))
            .await?;
        if !changed {
            return Ok(shipment);
        }

        tracing::info!(tracking_number = shipment.tracking_number, package_number, "Package cancelled");
        self.publish(&shipment, ShipmentChange::PackageCancelled).await;
        Ok(shipment)
    }

    async fn try_cancel_package(&self, package_number: i64) -> CoreResult<(Shipment, bool)> {
        let mut shipment = self.find_by_package(package_number).await?;
        if !ChangeHandler::cancel_package(&mut shipment, package_number)? {
            return Ok((shipment, false));
        }
        MetricsRecalculator::recalculate_shipment(&mut shipment);

        self.shipments.update_shipment(&mut shipment).await?;
        Ok((shipment, true))
    }

    /// Cancel the whole shipment. Idempotent; numbers are never reused.
    pub async fn cancel_shipment(&self, tracking_number: i64) -> CoreResult<Shipment> {
        let (shipment, changed) = self
            .with_retry("cancel_shipment", || self.try_cancel_shipment(tracking_number))
            .await?;
        if !changed {
            return Ok(shipment);
        }

        tracing::info!(tracking_number, "Shipment cancelled");
        self.publish(&shipment, ShipmentChange::Cancelled).await;
        Ok(shipment)
    }

    async fn try_cancel_shipment(&self, tracking_number: i64) -> CoreResult<(Shipment, bool)> {
        let mut shipment = self.get_shipment(tracking_number).await?;
        if !ChangeHandler::cancel_shipment(&mut shipment) {
            return Ok((shipment, false));
        }
        MetricsRecalculator::recalculate_shipment(&mut shipment);

        self.shipments.update_shipment(&mut shipment).await?;
        Ok((shipment, true))
    }

    pub async fn get_shipment(&self, tracking_number: i64) -> CoreResult<Shipment> {
        self.shipments
            .find_by_tracking_number(tracking_number)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("shipment {}", tracking_number)))
    }

    pub async fn find_by_package(&self, package_number: i64) -> CoreResult<Shipment> {
        self.shipments
            .find_by_package_number(package_number)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("package {}", package_number)))
    }

    fn enforce_routing_policy(&self, shipment: &Shipment) -> CoreResult<()> {
        if self.settings.require_pickup_partner && shipment.pickup_partner_id.is_none() {
            return Err(CoreError::ValidationError(format!(
                "no pickup partner covers {} {}",
                shipment.sender.country, shipment.sender.postal_code
            )));
        }
        if self.settings.require_delivery_partner && shipment.delivery_partner_id.is_none() {
            return Err(CoreError::ValidationError(format!(
                "no delivery partner covers {} {}",
                shipment.recipient.country, shipment.recipient.postal_code
            )));
        }
        Ok(())
    }

    /// Repeats the whole attempt on conflicts, up to `max_attempts` tries.
    /// Every other error is returned as is.
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut attempt_once: F) -> CoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match attempt_once().await {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(operation, attempt, max_attempts, error = %e, "Write conflict, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(operation, attempt, error = %e, "Shipment write failed");
                    return Err(e);
                }
                Ok(value) => return Ok(value),
            }
        }
    }

    /// The write has already committed; a sink failure is logged, not returned.
    async fn publish(&self, shipment: &Shipment, change: ShipmentChange) {
        let event = assembled_event(shipment, change);
        if let Err(e) = self.events.publish(&event).await {
            tracing::error!(
                tracking_number = shipment.tracking_number,
                change = ?change,
                error = %e,
                "Failed to publish shipment event"
            );
        }
    }
}

fn assembled_event(shipment: &Shipment, change: ShipmentChange) -> ShipmentAssembledEvent {
    ShipmentAssembledEvent {
        shipment_id: shipment.id,
        tracking_number: shipment.tracking_number,
        change,
        package_numbers: shipment.package_numbers(),
        booking_partner_id: shipment.booking_partner_id,
        pickup_partner_id: shipment.pickup_partner_id,
        delivery_partner_id: shipment.delivery_partner_id,
        weight_total: shipment.weight_total,
        volume_weight_total: shipment.volume_weight_total,
        girth_max: shipment.girth_max,
        cancelled: shipment.is_cancelled(),
        occurred_at: Utc::now(),
    }
}
