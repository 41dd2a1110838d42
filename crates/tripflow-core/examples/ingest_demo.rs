//! End-to-end demo: ingest one trip, finalize it, print the metrics.

use std::sync::Arc;
use tripflow_core::annotate::NullAnnotator;
use tripflow_core::config::{FinalizerConfig, SlaConfig};
use tripflow_core::finalizer::TripFinalizer;
use tripflow_core::metrics::MetricsAggregator;
use tripflow_core::pipeline::Pipeline;
use tripflow_core::storage::memory_store::{MemoryStateStore, MemoryTripStore};
use tripflow_core::store::TripStore;
use tripflow_core::types::{
    DeviceKey, GpsPoint, InboundEvent, InboundTelemetry, TelemetryData, TimeWindow,
    VehicleEventType, VehicleType,
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let sla = SlaConfig::from_toml_str(
        r#"
        [compliance_sla]
        max_telemetry_time_ms = 60000
        max_telemetry_distance_m = 1000.0
        max_start_end_time_ms = 30000
        max_enter_leave_time_ms = 30000
        "#,
    )?;

    let state = Arc::new(MemoryStateStore::new());
    let trips = Arc::new(MemoryTripStore::new());
    let annotator = Arc::new(NullAnnotator::default());
    let pipeline = Pipeline::new(state.clone(), trips.clone(), annotator);
    let finalizer = TripFinalizer::new(
        state.clone(),
        trips.clone(),
        sla,
        FinalizerConfig::default(),
    );

    let key = DeviceKey::new(Uuid::new_v4(), Uuid::new_v4());
    let trip_id = Uuid::new_v4();

    println!("=== Tripflow Demo ===\n");
    println!("Ingesting one trip for device {key}...");

    let start = InboundEvent {
        provider_id: key.provider_id,
        device_id: key.device_id,
        vehicle_type: VehicleType::Scooter,
        event_type: VehicleEventType::TripStart,
        event_type_reason: None,
        telemetry: Some(TelemetryData {
            gps: GpsPoint {
                lat: 34.0500,
                lng: -118.2400,
            },
            charge: Some(0.9),
        }),
        trip_id: Some(trip_id),
        service_area_id: None,
        timestamp: 1_000,
        recorded: 1_000,
    };
    println!("  trip_start -> {:?}", pipeline.process_event(start.clone()).await?);

    for (ts, lat) in [(10_000, 34.0520), (20_000, 34.0980), (30_000, 34.1000)] {
        let sample = InboundTelemetry {
            provider_id: key.provider_id,
            device_id: key.device_id,
            vehicle_type: VehicleType::Scooter,
            gps: GpsPoint { lat, lng: -118.2400 },
            charge: Some(0.8),
            timestamp: ts,
            recorded: ts,
        };
        println!("  telemetry  -> {:?}", pipeline.process_telemetry(sample).await?);
    }

    let end = InboundEvent {
        event_type: VehicleEventType::TripEnd,
        timestamp: 40_000,
        recorded: 40_000,
        ..start
    };
    println!("  trip_end   -> {:?}", pipeline.process_event(end).await?);

    println!("\nSweeping past the SLA window...");
    let summary = finalizer.sweep(40_000 + sla.max_telemetry_time_ms).await?;
    println!("  {summary:?}");

    let trip = trips
        .trip(trip_id)
        .await?
        .expect("trip should be finalized");
    println!("\nFinalized trip {trip_id}:");
    println!("  duration:   {} ms", trip.duration);
    println!("  distance:   {:.1} m", trip.distance.unwrap_or(0.0));
    println!("  violations: {}", trip.violation_count);

    let metrics = MetricsAggregator::new(state, trips, sla);
    let report = metrics
        .report(key.provider_id, TimeWindow::new(0, 100_000))
        .await?;
    println!("\nProvider report:");
    println!("  event counts: {:?}", report.event_counts);
    println!("  trip count:   {}", report.trip_count);
    println!("  deployed:     {}", report.vehicle_counts.deployed);

    Ok(())
}
