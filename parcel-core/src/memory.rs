//! In-process implementations of the storage seams.
//!
//! Used by tests and local tooling. The sequence allocator here serializes
//! through a mutex, which is only correct for a single process; production
//! deployments use the row-locking allocator in `parcel-store`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parcel_shared::ShipmentAssembledEvent;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::models::{Partner, PackageStatus, PostalCodeRange, RangeKind, Shipment, StatusCode};
use crate::postal::CountryCode;
use crate::repository::{
    PartnerRepository, RangeRepository, ShipmentEventSink, ShipmentRepository, StatusRepository,
};
use crate::sequence::{validate_sequence_name, SequenceAllocator, SEQUENCE_SEED};
use crate::{CoreError, CoreResult};

/// Takes one unit from a failure budget, returning true if a failure is due.
fn take_failure(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub struct InMemorySequenceAllocator {
    counters: Mutex<HashMap<String, i64>>,
    seed: i64,
    failures: AtomicUsize,
}

impl InMemorySequenceAllocator {
    pub fn new() -> Self {
        Self::with_seed(SEQUENCE_SEED)
    }

    pub fn with_seed(seed: i64) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            seed,
            failures: AtomicUsize::new(0),
        }
    }

    /// The next `count` allocations fail as if their transaction had rolled back.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub async fn last_value(&self, name: &str) -> Option<i64> {
        self.counters.lock().await.get(name).copied()
    }
}

impl Default for InMemorySequenceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SequenceAllocator for InMemorySequenceAllocator {
    async fn next(&self, name: &str) -> CoreResult<i64> {
        validate_sequence_name(name)?;

        if take_failure(&self.failures) {
            return Err(CoreError::ConflictError(format!(
                "allocation for sequence '{}' rolled back",
                name
            )));
        }

        let mut counters = self.counters.lock().await;
        let last = counters.entry(name.to_string()).or_insert(self.seed);
        *last += 1;
        Ok(*last)
    }
}

#[derive(Default)]
struct StoreState {
    partners: HashMap<Uuid, Partner>,
    ranges: Vec<PostalCodeRange>,
    shipments: HashMap<Uuid, Shipment>,
    status_codes: HashMap<String, StatusCode>,
    statuses: Vec<PackageStatus>,
}

impl StoreState {
    /// Unique tracking and package numbers across every shipment except `skip`.
    fn check_numbers(&self, shipment: &Shipment, skip: Option<Uuid>) -> CoreResult<()> {
        let mut taken = HashSet::new();
        for other in self.shipments.values().filter(|s| Some(s.id) != skip) {
            taken.insert(other.tracking_number);
            taken.extend(other.packages.iter().map(|p| p.package_number));
        }

        let mut own = HashSet::new();
        let numbers = std::iter::once(shipment.tracking_number)
            .chain(shipment.packages.iter().map(|p| p.package_number));
        for number in numbers {
            if taken.contains(&number) || !own.insert(number) {
                return Err(CoreError::ConflictError(format!("number {} already in use", number)));
            }
        }
        Ok(())
    }
}

pub struct InMemoryStore {
    state: RwLock<StoreState>,
    next_range_id: AtomicI64,
    write_failures: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            next_range_id: AtomicI64::new(1),
            write_failures: AtomicUsize::new(0),
        }
    }

    pub async fn add_partner(&self, station_number: i32, name: &str) -> Partner {
        let partner = Partner {
            id: Uuid::new_v4(),
            station_number,
            name: name.to_string(),
            street: "Hauptstrasse".to_string(),
            house_number: "1".to_string(),
            postal_code: "10115".to_string(),
            city: "Berlin".to_string(),
            country: "DE".to_string(),
            has_forklift: false,
            is_coloader: false,
        };
        self.state.write().await.partners.insert(partner.id, partner.clone());
        partner
    }

    pub async fn add_range(
        &self,
        partner_id: Uuid,
        country: &str,
        code_from: &str,
        code_to: &str,
        kind: RangeKind,
        priority: i32,
    ) -> PostalCodeRange {
        let range = PostalCodeRange {
            id: self.next_range_id.fetch_add(1, Ordering::SeqCst),
            partner_id,
            country: country.to_uppercase(),
            code_from: code_from.to_string(),
            code_to: code_to.to_string(),
            kind,
            priority,
        };
        self.state.write().await.ranges.push(range.clone());
        range
    }

    /// Removing a partner cascades to its ranges.
    pub async fn remove_partner(&self, partner_id: Uuid) {
        let mut state = self.state.write().await;
        state.partners.remove(&partner_id);
        state.ranges.retain(|r| r.partner_id != partner_id);
    }

    pub async fn add_status_code(&self, code: &str, description: &str) -> StatusCode {
        let mut state = self.state.write().await;
        let status_code = StatusCode {
            id: state.status_codes.len() as i32 + 1,
            code: code.to_string(),
            description: description.to_string(),
        };
        state.status_codes.insert(status_code.code.clone(), status_code.clone());
        status_code
    }

    /// The next `count` shipment writes fail without changing anything.
    pub fn fail_next_writes(&self, count: usize) {
        self.write_failures.store(count, Ordering::SeqCst);
    }

    pub async fn shipment_count(&self) -> usize {
        self.state.read().await.shipments.len()
    }

    fn injected_failure(&self) -> CoreResult<()> {
        if take_failure(&self.write_failures) {
            return Err(CoreError::InternalError("injected write failure".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RangeRepository for InMemoryStore {
    async fn ranges_for_country(&self, country: &CountryCode) -> CoreResult<Vec<PostalCodeRange>> {
        let state = self.state.read().await;
        Ok(state
            .ranges
            .iter()
            .filter(|r| r.country.eq_ignore_ascii_case(country.as_str()))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PartnerRepository for InMemoryStore {
    async fn get_partner(&self, id: Uuid) -> CoreResult<Option<Partner>> {
        Ok(self.state.read().await.partners.get(&id).cloned())
    }

    async fn find_by_station(&self, station_number: i32) -> CoreResult<Option<Partner>> {
        let state = self.state.read().await;
        Ok(state
            .partners
            .values()
            .find(|p| p.station_number == station_number)
            .cloned())
    }
}

#[async_trait]
impl ShipmentRepository for InMemoryStore {
    async fn insert_shipment(&self, shipment: &Shipment) -> CoreResult<()> {
        let mut state = self.state.write().await;
        self.injected_failure()?;

        if state.shipments.contains_key(&shipment.id) {
            return Err(CoreError::ConflictError(format!("shipment {} already exists", shipment.id)));
        }
        state.check_numbers(shipment, None)?;
        state.shipments.insert(shipment.id, shipment.clone());
        Ok(())
    }

    async fn update_shipment(&self, shipment: &mut Shipment) -> CoreResult<()> {
        let mut state = self.state.write().await;
        self.injected_failure()?;

        let stored_version = match state.shipments.get(&shipment.id) {
            Some(stored) => stored.version,
            None => return Err(CoreError::NotFound(format!("shipment {}", shipment.id))),
        };
        if stored_version != shipment.version {
            return Err(CoreError::ConflictError(format!(
                "shipment {} changed since it was read (version {} != {})",
                shipment.tracking_number, stored_version, shipment.version
            )));
        }
        state.check_numbers(shipment, Some(shipment.id))?;

        shipment.version += 1;
        state.shipments.insert(shipment.id, shipment.clone());
        Ok(())
    }

    async fn get_shipment(&self, id: Uuid) -> CoreResult<Option<Shipment>> {
        Ok(self.state.read().await.shipments.get(&id).cloned())
    }

    async fn find_by_tracking_number(&self, tracking_number: i64) -> CoreResult<Option<Shipment>> {
        let state = self.state.read().await;
        Ok(state
            .shipments
            .values()
            .find(|s| s.tracking_number == tracking_number)
            .cloned())
    }

    async fn find_by_package_number(&self, package_number: i64) -> CoreResult<Option<Shipment>> {
        let state = self.state.read().await;
        Ok(state
            .shipments
            .values()
            .find(|s| s.packages.iter().any(|p| p.package_number == package_number))
            .cloned())
    }
}

#[async_trait]
impl StatusRepository for InMemoryStore {
    async fn get_status_code(&self, code: &str) -> CoreResult<Option<StatusCode>> {
        Ok(self.state.read().await.status_codes.get(code).cloned())
    }

    async fn append_status(&self, status: &PackageStatus) -> CoreResult<()> {
        self.state.write().await.statuses.push(status.clone());
        Ok(())
    }

    async fn list_statuses(&self, package_id: Uuid) -> CoreResult<Vec<PackageStatus>> {
        let state = self.state.read().await;
        let mut history: Vec<PackageStatus> = state
            .statuses
            .iter()
            .filter(|s| s.package_id == package_id)
            .cloned()
            .collect();
        history.sort_by_key(|s| s.occurred_at);
        Ok(history)
    }
}

/// Keeps every published event; can be told to fail.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<ShipmentAssembledEvent>>,
    failures: AtomicUsize,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub async fn events(&self) -> Vec<ShipmentAssembledEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl ShipmentEventSink for RecordingEventSink {
    async fn publish(&self, event: &ShipmentAssembledEvent) -> CoreResult<()> {
        if take_failure(&self.failures) {
            return Err(CoreError::InternalError("event sink unavailable".to_string()));
        }
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_shipment(sender_code: &str, recipient_code: &str) -> Shipment {
    use crate::models::{Address, ServiceWindow, DEFAULT_ORDER_TYPE};
    use chrono::{NaiveDate, NaiveTime, Utc};

    let address = |name: &str, code: &str| Address {
        name1: name.to_string(),
        name2: None,
        street: "Teststrasse 5".to_string(),
        postal_code: code.to_string(),
        city: "Teststadt".to_string(),
        country: "DE".to_string(),
        email: "ops@example.com".into(),
        phone: "+49 30 123456".into(),
    };
    let window = ServiceWindow {
        date: NaiveDate::from_ymd_opt(2025, 5, 12).unwrap(),
        time_from: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        time_to: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        note: None,
        extra_fee: 0.0,
    };
    let now = Utc::now();

    Shipment {
        id: Uuid::new_v4(),
        tracking_number: 0,
        sender: address("Sender GmbH", sender_code),
        recipient: address("Recipient AG", recipient_code),
        pickup: window.clone(),
        delivery: window,
        customer_reference: None,
        order_type: DEFAULT_ORDER_TYPE.to_string(),
        goods_value: 0.0,
        insurance_value: 0.0,
        booking_partner_id: None,
        pickup_partner_id: None,
        delivery_partner_id: None,
        weight_total: 0.0,
        volume_weight_total: 0.0,
        girth_max: 0.0,
        packages: Vec::new(),
        created_at: now,
        updated_at: now,
        cancelled_at: None,
        version: 0,
    }
}
