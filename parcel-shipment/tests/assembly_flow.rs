use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use parcel_core::memory::{InMemorySequenceAllocator, InMemoryStore, RecordingEventSink};
use parcel_core::{
    Address, CoreError, CoreResult, PackagingType, Partner, PartnerOverrides, PartnerRef, RangeKind,
    RoutingResolver, SequenceAllocator, ServiceWindow,
};
use parcel_shared::ShipmentChange;
use parcel_shipment::{
    AssemblySettings, PackageDraft, PackagePatch, PackageTracker, ShipmentAssemblyOrchestrator, ShipmentDraft,
    ShipmentPatch,
};

struct Harness {
    store: Arc<InMemoryStore>,
    sequences: Arc<InMemorySequenceAllocator>,
    events: Arc<RecordingEventSink>,
    orchestrator: Arc<ShipmentAssemblyOrchestrator>,
    berlin: Partner,
    munich: Partner,
    hamburg: Partner,
}

async fn harness(settings: AssemblySettings) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let sequences = Arc::new(InMemorySequenceAllocator::new());
    let events = Arc::new(RecordingEventSink::new());

    let berlin = store.add_partner(101, "Spedition Berlin").await;
    let munich = store.add_partner(802, "Spedition Muenchen").await;
    let hamburg = store.add_partner(203, "Spedition Hamburg").await;
    store.add_range(berlin.id, "DE", "10000", "19999", RangeKind::Pickup, 0).await;
    store.add_range(munich.id, "DE", "80000", "89999", RangeKind::Delivery, 0).await;
    store.add_range(hamburg.id, "DE", "20000", "29999", RangeKind::Delivery, 0).await;
    store.add_range(hamburg.id, "DE", "20000", "29999", RangeKind::Pickup, 0).await;

    let orchestrator = ShipmentAssemblyOrchestrator::new(
        sequences.clone(),
        RoutingResolver::new(store.clone(), store.clone()),
        store.clone(),
        events.clone(),
        settings,
    );

    Harness {
        store,
        sequences,
        events,
        orchestrator: Arc::new(orchestrator),
        berlin,
        munich,
        hamburg,
    }
}

fn address(name: &str, code: &str) -> Address {
    Address {
        name1: name.to_string(),
        name2: None,
        street: "Industriestr. 7".to_string(),
        postal_code: code.to_string(),
        city: "Somewhere".to_string(),
        country: "DE".to_string(),
        email: "dispo@example.de".into(),
        phone: "+49 89 555".into(),
    }
}

fn window(day: u32) -> ServiceWindow {
    ServiceWindow {
        date: NaiveDate::from_ymd_opt(2026, 11, day).unwrap(),
        time_from: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        time_to: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        note: None,
        extra_fee: 0.0,
    }
}

fn package(length: i32, width: i32, height: i32, weight: f64) -> PackageDraft {
    PackageDraft {
        reference: None,
        packaging_type: PackagingType::Parcel,
        length_cm: length,
        width_cm: width,
        height_cm: height,
        weight_kg: weight,
    }
}

fn draft(recipient_code: &str, packages: Vec<PackageDraft>) -> ShipmentDraft {
    ShipmentDraft {
        sender: address("Sender GmbH", "10115"),
        recipient: address("Recipient AG", recipient_code),
        pickup: window(2),
        delivery: window(3),
        customer_reference: Some("PO-1".to_string()),
        order_type: None,
        goods_value: 250.0,
        insurance_value: 0.0,
        packages,
    }
}

fn two_packages() -> Vec<PackageDraft> {
    vec![package(40, 30, 20, 5.0), package(10, 10, 10, 1.5)]
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[tokio::test]
async fn test_create_assigns_sequential_numbers_and_partners() {
    let h = harness(AssemblySettings::default()).await;
    let booking = h.berlin.id;

    let shipment = h
        .orchestrator
        .create_shipment(draft("80331", two_packages()), Some(booking), &PartnerOverrides::none())
        .await
        .unwrap();

    assert_eq!(shipment.tracking_number, 49_100_000_001);
    assert_eq!(shipment.package_numbers(), vec![49_100_000_002, 49_100_000_003]);
    assert_eq!(shipment.booking_partner_id, Some(booking));
    assert_eq!(shipment.pickup_partner_id, Some(h.berlin.id));
    assert_eq!(shipment.delivery_partner_id, Some(h.munich.id));
    assert_eq!(shipment.order_type, "Standard");

    assert!(approx(shipment.packages[0].volume_weight_kg, 4.0));
    assert!(approx(shipment.packages[0].girth_cm, 140.0));
    assert!(approx(shipment.weight_total, 6.5));
    assert!(approx(shipment.volume_weight_total, 4.0 + 1000.0 / 6000.0));
    assert!(approx(shipment.girth_max, 140.0));

    let stored = h.orchestrator.get_shipment(49_100_000_001).await.unwrap();
    assert_eq!(stored.id, shipment.id);
    let by_package = h.orchestrator.find_by_package(49_100_000_003).await.unwrap();
    assert_eq!(by_package.id, shipment.id);

    let events = h.events.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].change, ShipmentChange::Created);
    assert_eq!(events[0].package_numbers, vec![49_100_000_002, 49_100_000_003]);
}

#[tokio::test]
async fn test_shipment_without_packages() {
    let h = harness(AssemblySettings::default()).await;

    let shipment = h
        .orchestrator
        .create_shipment(draft("80331", vec![]), None, &PartnerOverrides::none())
        .await
        .unwrap();

    assert!(shipment.packages.is_empty());
    assert_eq!(shipment.weight_total, 0.0);
    assert_eq!(shipment.girth_max, 0.0);
    assert_eq!(h.sequences.last_value("shipment").await, Some(49_100_000_001));
}

#[tokio::test]
async fn test_failed_persist_leaves_number_gap() {
    let h = harness(AssemblySettings::default()).await;
    h.store.fail_next_writes(1);

    let err = h
        .orchestrator
        .create_shipment(draft("80331", two_packages()), None, &PartnerOverrides::none())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InternalError(_)));
    assert_eq!(h.store.shipment_count().await, 0);
    assert!(h.events.events().await.is_empty());

    let shipment = h
        .orchestrator
        .create_shipment(draft("80331", two_packages()), None, &PartnerOverrides::none())
        .await
        .unwrap();
    assert_eq!(shipment.tracking_number, 49_100_000_004);
    assert_eq!(h.store.shipment_count().await, 1);
}

#[tokio::test]
async fn test_validation_failure_spends_only_tracking_number() {
    let h = harness(AssemblySettings::default()).await;
    let mut bad = draft("80331", two_packages());
    bad.sender.email = "not-an-email".into();

    let err = h
        .orchestrator
        .create_shipment(bad, None, &PartnerOverrides::none())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ValidationError(_)));
    assert_eq!(h.sequences.last_value("shipment").await, Some(49_100_000_001));

    let shipment = h
        .orchestrator
        .create_shipment(draft("80331", two_packages()), None, &PartnerOverrides::none())
        .await
        .unwrap();
    assert_eq!(shipment.tracking_number, 49_100_000_002);
}

#[tokio::test]
async fn test_malformed_postal_code_rejected() {
    let h = harness(AssemblySettings::default()).await;
    let mut bad = draft("80331", two_packages());
    bad.recipient.postal_code = "80#31".to_string();

    let err = h
        .orchestrator
        .create_shipment(bad, None, &PartnerOverrides::none())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ValidationError(_)));
    assert_eq!(h.store.shipment_count().await, 0);
}

#[tokio::test]
async fn test_conflict_is_retried_when_configured() {
    let h = harness(AssemblySettings {
        max_attempts: 2,
        ..Default::default()
    })
    .await;
    h.sequences.fail_next(1);

    let shipment = h
        .orchestrator
        .create_shipment(draft("80331", two_packages()), None, &PartnerOverrides::none())
        .await
        .unwrap();
    // The rolled-back allocation consumed nothing
    assert_eq!(shipment.tracking_number, 49_100_000_001);
}

#[tokio::test]
async fn test_conflict_surfaces_without_retry() {
    let h = harness(AssemblySettings::default()).await;
    h.sequences.fail_next(1);

    let err = h
        .orchestrator
        .create_shipment(draft("80331", two_packages()), None, &PartnerOverrides::none())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ConflictError(_)));
    assert_eq!(h.store.shipment_count().await, 0);
}

#[tokio::test]
async fn test_overrides_replace_resolved_partners() {
    let h = harness(AssemblySettings::default()).await;
    let overrides = PartnerOverrides {
        pickup: Some(PartnerRef::Id(h.munich.id)),
        delivery: Some(PartnerRef::Station(203)),
    };

    let shipment = h
        .orchestrator
        .create_shipment(draft("80331", two_packages()), None, &overrides)
        .await
        .unwrap();
    assert_eq!(shipment.pickup_partner_id, Some(h.munich.id));
    assert_eq!(shipment.delivery_partner_id, Some(h.hamburg.id));
}

#[tokio::test]
async fn test_unknown_override_rejected() {
    let h = harness(AssemblySettings::default()).await;
    let overrides = PartnerOverrides {
        pickup: None,
        delivery: Some(PartnerRef::Station(999)),
    };

    let err = h
        .orchestrator
        .create_shipment(draft("80331", two_packages()), None, &overrides)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ValidationError(_)));
    assert_eq!(h.store.shipment_count().await, 0);
}

#[tokio::test]
async fn test_unroutable_recipient() {
    // Allowed by default: the partner simply stays unassigned
    let h = harness(AssemblySettings::default()).await;
    let shipment = h
        .orchestrator
        .create_shipment(draft("50667", two_packages()), None, &PartnerOverrides::none())
        .await
        .unwrap();
    assert_eq!(shipment.delivery_partner_id, None);
    assert_eq!(shipment.pickup_partner_id, Some(h.berlin.id));

    let strict = harness(AssemblySettings {
        require_delivery_partner: true,
        ..Default::default()
    })
    .await;
    let err = strict
        .orchestrator
        .create_shipment(draft("50667", two_packages()), None, &PartnerOverrides::none())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no delivery partner covers DE 50667"));
}

#[tokio::test]
async fn test_event_sink_failure_is_not_fatal() {
    let h = harness(AssemblySettings::default()).await;
    h.events.fail_next(1);

    let shipment = h
        .orchestrator
        .create_shipment(draft("80331", two_packages()), None, &PartnerOverrides::none())
        .await
        .unwrap();
    assert_eq!(h.store.shipment_count().await, 1);
    assert!(h.events.events().await.is_empty());
    assert!(h.orchestrator.get_shipment(shipment.tracking_number).await.is_ok());
}

#[tokio::test]
async fn test_package_changes_recompute_aggregates() {
    let h = harness(AssemblySettings::default()).await;
    let shipment = h
        .orchestrator
        .create_shipment(draft("80331", two_packages()), None, &PartnerOverrides::none())
        .await
        .unwrap();
    let tracking_number = shipment.tracking_number;

    let shipment = h
        .orchestrator
        .add_package(tracking_number, package(120, 80, 100, 20.0))
        .await
        .unwrap();
    assert_eq!(shipment.packages.len(), 3);
    assert_eq!(shipment.packages[2].package_number, 49_100_000_004);
    assert!(approx(shipment.weight_total, 26.5));
    assert!(approx(shipment.girth_max, 480.0));

    let shipment = h
        .orchestrator
        .update_package(
            49_100_000_002,
            PackagePatch {
                weight_kg: Some(10.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(approx(shipment.weight_total, 31.5));

    let shipment = h.orchestrator.cancel_package(49_100_000_004).await.unwrap();
    assert!(approx(shipment.weight_total, 11.5));
    assert!(approx(shipment.girth_max, 140.0));
    assert_eq!(shipment.packages.len(), 3);

    let stored = h.orchestrator.get_shipment(tracking_number).await.unwrap();
    assert!(approx(stored.weight_total, 11.5));

    let changes: Vec<ShipmentChange> = h.events.events().await.iter().map(|e| e.change).collect();
    assert_eq!(
        changes,
        vec![
            ShipmentChange::Created,
            ShipmentChange::PackageAdded,
            ShipmentChange::PackageUpdated,
            ShipmentChange::PackageCancelled,
        ]
    );
}

#[tokio::test]
async fn test_invalid_added_package_spends_no_number() {
    let h = harness(AssemblySettings::default()).await;
    let shipment = h
        .orchestrator
        .create_shipment(draft("80331", vec![]), None, &PartnerOverrides::none())
        .await
        .unwrap();

    let err = h
        .orchestrator
        .add_package(shipment.tracking_number, package(0, 10, 10, 1.0))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ValidationError(_)));
    assert_eq!(h.sequences.last_value("shipment").await, Some(49_100_000_001));

    let stored = h.orchestrator.get_shipment(shipment.tracking_number).await.unwrap();
    assert!(stored.packages.is_empty());
}

#[tokio::test]
async fn test_update_reroutes_only_changed_side() {
    let h = harness(AssemblySettings::default()).await;
    let shipment = h
        .orchestrator
        .create_shipment(draft("80331", two_packages()), Some(h.berlin.id), &PartnerOverrides::none())
        .await
        .unwrap();

    let patch = ShipmentPatch {
        recipient: Some(address("New Recipient", "20095")),
        goods_value: Some(300.0),
        ..Default::default()
    };
    let updated = h
        .orchestrator
        .update_shipment(shipment.tracking_number, patch, &PartnerOverrides::none())
        .await
        .unwrap();

    assert_eq!(updated.tracking_number, shipment.tracking_number);
    assert_eq!(updated.booking_partner_id, Some(h.berlin.id));
    assert_eq!(updated.pickup_partner_id, Some(h.berlin.id));
    assert_eq!(updated.delivery_partner_id, Some(h.hamburg.id));
    assert_eq!(updated.goods_value, 300.0);
    assert_eq!(updated.package_numbers(), shipment.package_numbers());
}

#[tokio::test]
async fn test_cancel_shipment() {
    let h = harness(AssemblySettings::default()).await;
    let shipment = h
        .orchestrator
        .create_shipment(draft("80331", two_packages()), None, &PartnerOverrides::none())
        .await
        .unwrap();

    let cancelled = h.orchestrator.cancel_shipment(shipment.tracking_number).await.unwrap();
    assert!(cancelled.is_cancelled());
    assert!(cancelled.packages.iter().all(|p| p.is_cancelled()));
    assert_eq!(cancelled.weight_total, 0.0);

    // Idempotent, and no second event
    h.orchestrator.cancel_shipment(shipment.tracking_number).await.unwrap();
    let cancels = h
        .events
        .events()
        .await
        .iter()
        .filter(|e| e.change == ShipmentChange::Cancelled)
        .count();
    assert_eq!(cancels, 1);

    let err = h
        .orchestrator
        .add_package(shipment.tracking_number, package(10, 10, 10, 1.0))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ValidationError(_)));
}

#[tokio::test]
async fn test_unknown_numbers_not_found() {
    let h = harness(AssemblySettings::default()).await;

    assert!(matches!(
        h.orchestrator.get_shipment(42).await,
        Err(CoreError::NotFound(_))
    ));
    assert!(matches!(
        h.orchestrator.cancel_package(42).await,
        Err(CoreError::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_get_distinct_numbers() {
    let h = harness(AssemblySettings::default()).await;

    let mut handles = Vec::new();
    for _ in 0..25 {
        let orchestrator = h.orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .create_shipment(draft("80331", two_packages()), None, &PartnerOverrides::none())
                .await
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        let shipment = handle.await.unwrap().unwrap();
        assert!(seen.insert(shipment.tracking_number));
        for number in shipment.package_numbers() {
            assert!(seen.insert(number));
            assert!(number > shipment.tracking_number);
        }
    }
    assert_eq!(seen.len(), 75);
    assert_eq!(h.store.shipment_count().await, 25);
}

#[tokio::test]
async fn test_package_tracking_history() {
    let h = harness(AssemblySettings::default()).await;
    h.store.add_status_code("100", "In Transit").await;
    h.store.add_status_code("200", "Delivered").await;
    let tracker = PackageTracker::new(h.store.clone(), h.store.clone());

    h.orchestrator
        .create_shipment(draft("80331", two_packages()), None, &PartnerOverrides::none())
        .await
        .unwrap();

    let earlier = chrono::Utc::now() - chrono::Duration::hours(2);
    tracker
        .record_status(49_100_000_002, "200", None, None)
        .await
        .unwrap();
    tracker
        .record_status(49_100_000_002, "100", Some("hub Berlin".to_string()), Some(earlier))
        .await
        .unwrap();

    let history = tracker.history(49_100_000_002).await.unwrap();
    let codes: Vec<&str> = history.iter().map(|s| s.status_code.as_str()).collect();
    assert_eq!(codes, vec!["100", "200"]);
    assert!(tracker.history(49_100_000_003).await.unwrap().is_empty());

    assert!(matches!(
        tracker.record_status(49_100_000_002, "999", None, None).await,
        Err(CoreError::ValidationError(_))
    ));
    assert!(matches!(
        tracker.record_status(1, "100", None, None).await,
        Err(CoreError::NotFound(_))
    ));
}

/// Allocation with a round-trip delay, so concurrent writers overlap between
/// reading a shipment and writing it back.
struct SlowAllocator {
    inner: Arc<InMemorySequenceAllocator>,
    delay: Duration,
}

#[async_trait]
impl SequenceAllocator for SlowAllocator {
    async fn next(&self, name: &str) -> CoreResult<i64> {
        tokio::time::sleep(self.delay).await;
        self.inner.next(name).await
    }
}

/// A second orchestrator over the harness store whose allocations are slow.
fn slow_orchestrator(h: &Harness, max_attempts: u32) -> Arc<ShipmentAssemblyOrchestrator> {
    Arc::new(ShipmentAssemblyOrchestrator::new(
        Arc::new(SlowAllocator {
            inner: h.sequences.clone(),
            delay: Duration::from_millis(20),
        }),
        RoutingResolver::new(h.store.clone(), h.store.clone()),
        h.store.clone(),
        h.events.clone(),
        AssemblySettings {
            max_attempts,
            ..Default::default()
        },
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_package_adds_are_all_kept() {
    let h = harness(AssemblySettings::default()).await;
    let created = h
        .orchestrator
        .create_shipment(draft("80331", vec![package(40, 30, 20, 5.0)]), None, &PartnerOverrides::none())
        .await
        .unwrap();
    let tracking_number = created.tracking_number;
    let orchestrator = slow_orchestrator(&h, 5);

    let mut handles = Vec::new();
    for draft in [package(10, 10, 10, 1.0), package(20, 20, 20, 2.0)] {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator.add_package(tracking_number, draft).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = h.orchestrator.get_shipment(tracking_number).await.unwrap();
    assert_eq!(stored.packages.len(), 3);
    let numbers: HashSet<i64> = stored.package_numbers().into_iter().collect();
    assert_eq!(numbers.len(), 3);
    assert_eq!(stored.version, 2);

    // Totals describe all three packages
    assert!(approx(stored.weight_total, 8.0));
    assert!(approx(stored.volume_weight_total, 4.0 + 1000.0 / 6000.0 + 8000.0 / 6000.0));
    assert!(approx(stored.girth_max, 140.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_add_without_retry_reports_conflict() {
    let h = harness(AssemblySettings::default()).await;
    let created = h
        .orchestrator
        .create_shipment(draft("80331", vec![package(40, 30, 20, 5.0)]), None, &PartnerOverrides::none())
        .await
        .unwrap();
    let tracking_number = created.tracking_number;
    let orchestrator = slow_orchestrator(&h, 1);

    let mut handles = Vec::new();
    for weight in [1.0, 2.0] {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .add_package(tracking_number, package(10, 10, 10, weight))
                .await
        }));
    }
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    let written: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(CoreError::ConflictError(_))))
        .count();
    assert_eq!(written.len(), 1);
    assert_eq!(conflicts, 1);

    // The winner's package is stored; the loser left nothing behind
    let stored = h.orchestrator.get_shipment(tracking_number).await.unwrap();
    assert_eq!(stored.packages.len(), 2);
    assert_eq!(stored.package_numbers(), written[0].package_numbers());
    assert!(approx(stored.weight_total, written[0].weight_total));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_during_add_sticks() {
    let h = harness(AssemblySettings::default()).await;
    let created = h
        .orchestrator
        .create_shipment(draft("80331", vec![package(40, 30, 20, 5.0)]), None, &PartnerOverrides::none())
        .await
        .unwrap();
    let tracking_number = created.tracking_number;
    let orchestrator = slow_orchestrator(&h, 5);

    let add = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .add_package(tracking_number, package(10, 10, 10, 1.0))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    let cancelled = h.orchestrator.cancel_shipment(tracking_number).await.unwrap();
    assert!(cancelled.is_cancelled());

    let stored_packages = match add.await.unwrap() {
        // Normal case: the add re-read a cancelled shipment and gave up
        Err(CoreError::ValidationError(_)) => 1,
        // The add committed before the cancel read the shipment
        Ok(_) => 2,
        Err(e) => panic!("unexpected error: {}", e),
    };

    let stored = h.orchestrator.get_shipment(tracking_number).await.unwrap();
    assert!(stored.is_cancelled());
    assert_eq!(stored.packages.len(), stored_packages);
    assert!(stored.packages.iter().all(|p| p.is_cancelled()));
    assert_eq!(stored.weight_total, 0.0);
}
