//! Micro-benchmarks for the hot per-message paths: classification and
//! distance math.

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use tripflow_core::matcher::resolve_trip;
use tripflow_core::quality::classify;
use tripflow_core::state::{DeviceState, TripEvent, TripEventMap};
use tripflow_core::types::{
    GpsPoint, InboundEvent, InboundMessage, TelemetryData, VehicleEventType, VehicleType,
};
use uuid::Uuid;

fn sample_event(timestamp: i64) -> InboundEvent {
    InboundEvent {
        provider_id: Uuid::nil(),
        device_id: Uuid::nil(),
        vehicle_type: VehicleType::Scooter,
        event_type: VehicleEventType::TripStart,
        event_type_reason: None,
        telemetry: Some(TelemetryData {
            gps: GpsPoint {
                lat: 34.05,
                lng: -118.24,
            },
            charge: Some(0.8),
        }),
        trip_id: Some(Uuid::nil()),
        service_area_id: None,
        timestamp,
        recorded: timestamp,
    }
}

fn open_trips(count: usize) -> TripEventMap {
    let mut trips = TripEventMap::new();
    for i in 0..count {
        trips.insert(
            Uuid::new_v4(),
            vec![TripEvent {
                vehicle_type: VehicleType::Scooter,
                timestamp: 1_000 * (i as i64 + 1),
                event_type: VehicleEventType::TripStart,
                event_type_reason: None,
                gps: None,
                service_area_id: None,
                annotation: None,
                annotation_version: 1,
            }],
        );
    }
    trips
}

fn bench_classify(c: &mut Criterion) {
    let message = InboundMessage::Event(sample_event(2_000));
    let current = DeviceState::from_event(&sample_event(1_000), None, 1);
    c.bench_function("classify_event", |b| {
        b.iter(|| classify(black_box(&message), black_box(Some(&current)), None));
    });
}

fn bench_resolve_trip(c: &mut Criterion) {
    let trips = open_trips(16);
    c.bench_function("resolve_trip_16_open", |b| {
        b.iter(|| resolve_trip(black_box(&trips), black_box(10_000)));
    });
}

fn bench_haversine(c: &mut Criterion) {
    let a = GpsPoint {
        lat: 34.05,
        lng: -118.24,
    };
    let b_point = GpsPoint {
        lat: 34.10,
        lng: -118.30,
    };
    c.bench_function("haversine", |b| {
        b.iter(|| tripflow_core::geo::haversine(black_box(a), black_box(b_point)));
    });
}

criterion_group!(benches, bench_classify, bench_resolve_trip, bench_haversine);
criterion_main!(benches);
