//! Integration tests for the trip finalizer

use std::sync::Arc;
use tripflow_core::annotate::NullAnnotator;
use tripflow_core::config::{FinalizerConfig, SlaConfig};
use tripflow_core::finalizer::TripFinalizer;
use tripflow_core::pipeline::Pipeline;
use tripflow_core::state::TripEvent;
use tripflow_core::storage::memory_store::{MemoryStateStore, MemoryTripStore};
use tripflow_core::store::{StateStore, TripStore};
use tripflow_core::types::{
    DeviceKey, GpsPoint, InboundEvent, InboundTelemetry, TelemetryData, TimeWindow, Timestamp,
    VehicleEventType, VehicleType,
};
use uuid::Uuid;

const SLA: SlaConfig = SlaConfig {
    max_telemetry_time_ms: 100_000,
    max_telemetry_distance_m: 1_000.0,
    max_start_end_time_ms: 30_000,
    max_enter_leave_time_ms: 30_000,
};

struct Harness {
    state: Arc<MemoryStateStore>,
    trips: Arc<MemoryTripStore>,
    pipeline: Pipeline,
    finalizer: TripFinalizer,
}

fn harness() -> Harness {
    let state = Arc::new(MemoryStateStore::new());
    let trips = Arc::new(MemoryTripStore::new());
    let pipeline = Pipeline::new(
        state.clone(),
        trips.clone(),
        Arc::new(NullAnnotator::default()),
    );
    let finalizer = TripFinalizer::new(
        state.clone(),
        trips.clone(),
        SLA,
        FinalizerConfig::default(),
    );
    Harness {
        state,
        trips,
        pipeline,
        finalizer,
    }
}

fn trip_event_msg(
    key: DeviceKey,
    timestamp: Timestamp,
    event_type: VehicleEventType,
    trip_id: Uuid,
    gps: GpsPoint,
) -> InboundEvent {
    InboundEvent {
        provider_id: key.provider_id,
        device_id: key.device_id,
        vehicle_type: VehicleType::Scooter,
        event_type,
        event_type_reason: None,
        telemetry: Some(TelemetryData {
            gps,
            charge: Some(0.8),
        }),
        trip_id: Some(trip_id),
        service_area_id: None,
        timestamp,
        recorded: timestamp,
    }
}

fn telemetry_msg(key: DeviceKey, timestamp: Timestamp, gps: GpsPoint) -> InboundTelemetry {
    InboundTelemetry {
        provider_id: key.provider_id,
        device_id: key.device_id,
        vehicle_type: VehicleType::Scooter,
        gps,
        charge: Some(0.7),
        timestamp,
        recorded: timestamp,
    }
}

fn bare_trip_event(timestamp: Timestamp, event_type: VehicleEventType) -> TripEvent {
    TripEvent {
        vehicle_type: VehicleType::Scooter,
        timestamp,
        event_type,
        event_type_reason: None,
        gps: None,
        service_area_id: None,
        annotation: None,
        annotation_version: 1,
    }
}

fn device() -> DeviceKey {
    DeviceKey::new(Uuid::new_v4(), Uuid::new_v4())
}

fn gps(lat: f64) -> GpsPoint {
    GpsPoint { lat, lng: -118.0 }
}

#[tokio::test]
async fn test_distance_violation_scenario() {
    let h = harness();
    let key = device();
    let trip_id = Uuid::new_v4();

    // trip_start at t=1000, two near points, one 5 km jump, trip_end.
    h.pipeline
        .process_event(trip_event_msg(
            key,
            1_000,
            VehicleEventType::TripStart,
            trip_id,
            gps(34.0),
        ))
        .await
        .unwrap();
    h.pipeline
        .process_telemetry(telemetry_msg(key, 1_005, gps(34.00001)))
        .await
        .unwrap();
    h.pipeline
        .process_telemetry(telemetry_msg(key, 1_010, gps(34.00002)))
        .await
        .unwrap();
    h.pipeline
        .process_telemetry(telemetry_msg(key, 1_600, gps(34.045)))
        .await
        .unwrap();
    h.pipeline
        .process_event(trip_event_msg(
            key,
            2_000,
            VehicleEventType::TripEnd,
            trip_id,
            gps(34.045),
        ))
        .await
        .unwrap();

    // Inside the grace window: nothing closes.
    let summary = h.finalizer.sweep(2_000 + SLA.max_telemetry_time_ms - 1).await.unwrap();
    assert_eq!(summary.trips_closed, 0);
    assert_eq!(summary.trips_deferred, 1);
    assert!(h.trips.trip(trip_id).await.unwrap().is_none());

    // Window elapsed: the trip closes.
    let summary = h.finalizer.sweep(2_000 + SLA.max_telemetry_time_ms).await.unwrap();
    assert_eq!(summary.trips_closed, 1);

    let trip = h.trips.trip(trip_id).await.unwrap().unwrap();
    assert_eq!(trip.duration, 1_000);
    assert_eq!(trip.start_time, 1_000);
    assert_eq!(trip.end_time, 2_000);
    assert_eq!(trip.violation_count, 1);

    // The 1010 -> 1600 jump is ~5 km; everything else is centimeters.
    let distance = trip.distance.unwrap();
    assert!((4_900.0..5_100.0).contains(&distance), "distance {distance}");
    let violation = trip.max_violation_dist.unwrap();
    assert!((4_900.0..5_100.0).contains(&violation));
    assert_eq!(trip.min_violation_dist, trip.max_violation_dist);
    assert_eq!(trip.avg_violation_dist, trip.max_violation_dist);

    assert_eq!(trip.events.len(), 2);
    assert_eq!(trip.telemetry.len(), 1);

    // Both cache buckets evicted, device key gone.
    assert!(h.state.trip_events(&key).await.unwrap().is_none());
    assert!(h.state.trip_telemetry(&key).await.unwrap().is_none());
    assert!(h
        .state
        .trip_device_keys(None, 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_trip_with_only_start_never_finalizes() {
    let h = harness();
    let key = device();
    let trip_id = Uuid::new_v4();

    h.pipeline
        .process_event(trip_event_msg(
            key,
            1_000,
            VehicleEventType::TripStart,
            trip_id,
            gps(34.0),
        ))
        .await
        .unwrap();

    let summary = h.finalizer.sweep(i64::MAX).await.unwrap();
    assert_eq!(summary.trips_closed, 0);
    assert_eq!(summary.trips_deferred, 1);
    assert!(h.trips.trip(trip_id).await.unwrap().is_none());
    assert!(h.state.trip_events(&key).await.unwrap().is_some());
}

#[tokio::test]
async fn test_missing_telemetry_defers_indefinitely() {
    let h = harness();
    let key = device();
    let trip_id = Uuid::new_v4();

    // Events appended directly, with no GPS fixes anywhere: the trip
    // has a start and an end but zero telemetry.
    h.state
        .append_trip_event(
            &key,
            trip_id,
            bare_trip_event(1_000, VehicleEventType::TripStart),
        )
        .await
        .unwrap();
    h.state
        .append_trip_event(
            &key,
            trip_id,
            bare_trip_event(2_000, VehicleEventType::TripEnd),
        )
        .await
        .unwrap();

    for _ in 0..3 {
        let summary = h.finalizer.sweep(10_000_000).await.unwrap();
        assert_eq!(summary.trips_closed, 0);
        assert_eq!(summary.trips_deferred, 1);
        // Never persisted, never evicted.
        assert!(h.trips.trip(trip_id).await.unwrap().is_none());
        assert!(h.state.trip_events(&key).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_sweep_after_eviction_is_a_no_op() {
    let h = harness();
    let key = device();
    let trip_id = Uuid::new_v4();

    h.pipeline
        .process_event(trip_event_msg(
            key,
            1_000,
            VehicleEventType::TripStart,
            trip_id,
            gps(34.0),
        ))
        .await
        .unwrap();
    h.pipeline
        .process_event(trip_event_msg(
            key,
            2_000,
            VehicleEventType::TripEnd,
            trip_id,
            gps(34.001),
        ))
        .await
        .unwrap();

    let now = 2_000 + SLA.max_telemetry_time_ms;
    let first = h.finalizer.sweep(now).await.unwrap();
    assert_eq!(first.trips_closed, 1);

    let second = h.finalizer.sweep(now).await.unwrap();
    assert_eq!(second.devices_scanned, 0);
    assert_eq!(second.trips_closed, 0);

    let window = TimeWindow::new(0, 10_000);
    assert_eq!(h.trips.trip_count(key.provider_id, window).await.unwrap(), 1);
}

#[tokio::test]
async fn test_refinalizing_persisted_trip_is_idempotent() {
    let h = harness();
    let key = device();
    let trip_id = Uuid::new_v4();

    let start = trip_event_msg(key, 1_000, VehicleEventType::TripStart, trip_id, gps(34.0));
    let end = trip_event_msg(key, 2_000, VehicleEventType::TripEnd, trip_id, gps(34.001));
    h.pipeline.process_event(start).await.unwrap();
    h.pipeline.process_event(end).await.unwrap();

    let now = 2_000 + SLA.max_telemetry_time_ms;
    h.finalizer.sweep(now).await.unwrap();
    let persisted = h.trips.trip(trip_id).await.unwrap().unwrap();

    // Simulate a crash between persist and eviction: the bucket
    // reappears, the sweeper runs again.
    h.state
        .append_trip_event(
            &key,
            trip_id,
            persisted.events[0].clone(),
        )
        .await
        .unwrap();
    h.state
        .append_trip_event(
            &key,
            trip_id,
            persisted.events[1].clone(),
        )
        .await
        .unwrap();
    for segment in &persisted.telemetry {
        for point in segment {
            h.state
                .append_trip_telemetry(&key, trip_id, point.clone())
                .await
                .unwrap();
        }
    }

    let summary = h.finalizer.sweep(now).await.unwrap();
    assert_eq!(summary.trips_closed, 1);

    let again = h.trips.trip(trip_id).await.unwrap().unwrap();
    assert_eq!(again, persisted);
}

#[tokio::test]
async fn test_closed_trip_evicted_open_trip_kept() {
    let h = harness();
    let key = device();
    let done = Uuid::new_v4();
    let open = Uuid::new_v4();

    h.pipeline
        .process_event(trip_event_msg(
            key,
            1_000,
            VehicleEventType::TripStart,
            done,
            gps(34.0),
        ))
        .await
        .unwrap();
    h.pipeline
        .process_event(trip_event_msg(
            key,
            2_000,
            VehicleEventType::TripEnd,
            done,
            gps(34.001),
        ))
        .await
        .unwrap();
    // A second trip with no end yet.
    h.pipeline
        .process_event(trip_event_msg(
            key,
            3_000,
            VehicleEventType::TripStart,
            open,
            gps(34.002),
        ))
        .await
        .unwrap();

    let summary = h
        .finalizer
        .sweep(2_000 + SLA.max_telemetry_time_ms)
        .await
        .unwrap();
    assert_eq!(summary.trips_closed, 1);
    assert_eq!(summary.trips_deferred, 1);

    let buckets = h.state.trip_events(&key).await.unwrap().unwrap();
    assert!(!buckets.contains_key(&done));
    assert!(buckets.contains_key(&open));
    assert_eq!(h.state.trip_device_keys(None, 10).await.unwrap(), vec![key]);
}

#[tokio::test]
async fn test_shutdown_cancels_sweep_between_devices() {
    let h = harness();
    let key = device();
    let trip_id = Uuid::new_v4();

    h.pipeline
        .process_event(trip_event_msg(
            key,
            1_000,
            VehicleEventType::TripStart,
            trip_id,
            gps(34.0),
        ))
        .await
        .unwrap();
    h.pipeline
        .process_event(trip_event_msg(
            key,
            2_000,
            VehicleEventType::TripEnd,
            trip_id,
            gps(34.001),
        ))
        .await
        .unwrap();

    h.finalizer.shutdown();
    let summary = h
        .finalizer
        .sweep(2_000 + SLA.max_telemetry_time_ms)
        .await
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.devices_scanned, 0);

    // Nothing was finalized or evicted mid-shutdown.
    assert!(h.trips.trip(trip_id).await.unwrap().is_none());
    assert!(h.state.trip_events(&key).await.unwrap().is_some());
}
