use chrono::Utc;
use parcel_core::models::DEFAULT_ORDER_TYPE;
use parcel_core::{Address, Package, PackagingType, ServiceWindow, Shipment};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Package number placeholder until the counter has issued one.
pub const UNASSIGNED_NUMBER: i64 = 0;

/// Caller input for a new package. Derived metrics are not accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageDraft {
    pub reference: Option<String>,
    pub packaging_type: PackagingType,
    pub length_cm: i32,
    pub width_cm: i32,
    pub height_cm: i32,
    pub weight_kg: f64,
}

impl PackageDraft {
    pub fn into_package(self) -> Package {
        let now = Utc::now();
        Package {
            id: Uuid::new_v4(),
            package_number: UNASSIGNED_NUMBER,
            reference: self.reference,
            packaging_type: self.packaging_type,
            length_cm: self.length_cm,
            width_cm: self.width_cm,
            height_cm: self.height_cm,
            weight_kg: self.weight_kg,
            volume_weight_kg: 0.0,
            girth_cm: 0.0,
            created_at: now,
            updated_at: now,
            cancelled_at: None,
        }
    }
}

/// Caller input for a new shipment. Numbers, partners and aggregates are
/// filled in by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentDraft {
    pub sender: Address,
    pub recipient: Address,
    pub pickup: ServiceWindow,
    pub delivery: ServiceWindow,
    pub customer_reference: Option<String>,
    pub order_type: Option<String>,
    #[serde(default)]
    pub goods_value: f64,
    #[serde(default)]
    pub insurance_value: f64,
    #[serde(default)]
    pub packages: Vec<PackageDraft>,
}

impl ShipmentDraft {
    pub fn into_shipment(self, tracking_number: i64) -> Shipment {
        let now = Utc::now();
        Shipment {
            id: Uuid::new_v4(),
            tracking_number,
            sender: self.sender,
            recipient: self.recipient,
            pickup: self.pickup,
            delivery: self.delivery,
            customer_reference: self.customer_reference,
            order_type: self.order_type.unwrap_or_else(|| DEFAULT_ORDER_TYPE.to_string()),
            goods_value: self.goods_value,
            insurance_value: self.insurance_value,
            booking_partner_id: None,
            pickup_partner_id: None,
            delivery_partner_id: None,
            weight_total: 0.0,
            volume_weight_total: 0.0,
            girth_max: 0.0,
            packages: self.packages.into_iter().map(PackageDraft::into_package).collect(),
            created_at: now,
            updated_at: now,
            cancelled_at: None,
            version: 0,
        }
    }
}

/// Partial update of shipment header fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShipmentPatch {
    pub sender: Option<Address>,
    pub recipient: Option<Address>,
    pub pickup: Option<ServiceWindow>,
    pub delivery: Option<ServiceWindow>,
    pub customer_reference: Option<String>,
    pub order_type: Option<String>,
    pub goods_value: Option<f64>,
    pub insurance_value: Option<f64>,
}

/// Which routing inputs a patch touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchEffect {
    pub sender_location_changed: bool,
    pub recipient_location_changed: bool,
}

fn location_changed(before: &Address, after: &Address) -> bool {
    before.country != after.country || before.postal_code != after.postal_code
}

impl ShipmentPatch {
    pub fn apply(self, shipment: &mut Shipment) -> PatchEffect {
        let mut effect = PatchEffect::default();

        if let Some(sender) = self.sender {
            effect.sender_location_changed = location_changed(&shipment.sender, &sender);
            shipment.sender = sender;
        }
        if let Some(recipient) = self.recipient {
            effect.recipient_location_changed = location_changed(&shipment.recipient, &recipient);
            shipment.recipient = recipient;
        }
        if let Some(pickup) = self.pickup {
            shipment.pickup = pickup;
        }
        if let Some(delivery) = self.delivery {
            shipment.delivery = delivery;
        }
        if let Some(reference) = self.customer_reference {
            shipment.customer_reference = Some(reference);
        }
        if let Some(order_type) = self.order_type {
            shipment.order_type = order_type;
        }
        if let Some(value) = self.goods_value {
            shipment.goods_value = value;
        }
        if let Some(value) = self.insurance_value {
            shipment.insurance_value = value;
        }

        effect
    }
}

/// Partial update of one package. The package number is never part of it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackagePatch {
    pub reference: Option<String>,
    pub packaging_type: Option<PackagingType>,
    pub length_cm: Option<i32>,
    pub width_cm: Option<i32>,
    pub height_cm: Option<i32>,
    pub weight_kg: Option<f64>,
}

impl PackagePatch {
    pub fn apply(self, package: &mut Package) {
        if let Some(reference) = self.reference {
            package.reference = Some(reference);
        }
        if let Some(packaging_type) = self.packaging_type {
            package.packaging_type = packaging_type;
        }
        if let Some(length) = self.length_cm {
            package.length_cm = length;
        }
        if let Some(width) = self.width_cm {
            package.width_cm = width;
        }
        if let Some(height) = self.height_cm {
            package.height_cm = height;
        }
        if let Some(weight) = self.weight_kg {
            package.weight_kg = weight;
        }
        package.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_from_json_applies_defaults() {
        let raw = r#"{
            "sender": {"name1": "A", "name2": null, "street": "S 1", "postal_code": "10115",
                       "city": "Berlin", "country": "de", "email": "a@b.de", "phone": "1"},
            "recipient": {"name1": "B", "name2": null, "street": "S 2", "postal_code": "80331",
                          "city": "Muenchen", "country": "DE", "email": "b@b.de", "phone": "2"},
            "pickup": {"date": "2026-11-02", "time_from": "08:00:00", "time_to": "12:00:00", "note": null},
            "delivery": {"date": "2026-11-03", "time_from": "08:00:00", "time_to": "12:00:00", "note": null},
            "customer_reference": null,
            "order_type": null,
            "packages": [{"reference": "R1", "packaging_type": "EURO_PALLET",
                          "length_cm": 120, "width_cm": 80, "height_cm": 100, "weight_kg": 250.0}]
        }"#;

        let draft: ShipmentDraft = serde_json::from_str(raw).unwrap();
        assert_eq!(draft.goods_value, 0.0);
        assert_eq!(draft.pickup.extra_fee, 0.0);
        assert_eq!(draft.sender.email.expose(), "a@b.de");

        let shipment = draft.into_shipment(49_100_000_001);
        assert_eq!(shipment.order_type, DEFAULT_ORDER_TYPE);
        assert_eq!(shipment.packages[0].packaging_type, PackagingType::EuroPallet);
        assert_eq!(shipment.packages[0].package_number, UNASSIGNED_NUMBER);
        assert!(shipment.booking_partner_id.is_none());
    }

    #[test]
    fn test_package_patch_keeps_unset_fields() {
        let mut package = PackageDraft {
            reference: Some("R1".to_string()),
            packaging_type: PackagingType::Parcel,
            length_cm: 40,
            width_cm: 30,
            height_cm: 20,
            weight_kg: 5.0,
        }
        .into_package();

        PackagePatch {
            height_cm: Some(25),
            ..Default::default()
        }
        .apply(&mut package);

        assert_eq!(package.height_cm, 25);
        assert_eq!(package.length_cm, 40);
        assert_eq!(package.reference.as_deref(), Some("R1"));
    }
}
