//! Cached and persisted state shapes
//!
//! [`DeviceState`] is the last-known snapshot per device key.
//! [`TripEvent`]/[`TripTelemetry`] accumulate in per-device buckets
//! keyed by trip until the finalizer closes the trip into a
//! [`FinalizedTrip`].

use crate::types::{
    status_for_event, DeviceKey, GpsPoint, MessageType, Timestamp, VehicleEventType,
    VehicleStatus, VehicleType,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Latest-known state for one device. Never deleted; overwritten only
/// by the monotonic merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub provider_id: Uuid,
    pub device_id: Uuid,
    pub vehicle_type: VehicleType,
    pub message_type: MessageType,
    pub timestamp: Timestamp,
    pub gps: Option<GpsPoint>,
    pub charge: Option<f64>,
    pub event_type: Option<VehicleEventType>,
    pub event_type_reason: Option<String>,
    pub trip_id: Option<Uuid>,
    pub service_area_id: Option<Uuid>,
    /// Derived from `event_type` via the fixed mapping; `None` for
    /// telemetry rows.
    pub status: Option<VehicleStatus>,
    /// Opaque geofence descriptor.
    pub annotation: Option<serde_json::Value>,
    pub annotation_version: u32,
    /// Ingestion time.
    pub recorded: Timestamp,
}

impl DeviceState {
    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(self.provider_id, self.device_id)
    }

    /// Build a state row from an accepted event.
    pub fn from_event(
        event: &crate::types::InboundEvent,
        annotation: Option<serde_json::Value>,
        annotation_version: u32,
    ) -> Self {
        let (gps, charge) = match &event.telemetry {
            Some(t) => (Some(t.gps), t.charge),
            None => (None, None),
        };
        Self {
            provider_id: event.provider_id,
            device_id: event.device_id,
            vehicle_type: event.vehicle_type,
            message_type: MessageType::Event,
            timestamp: event.timestamp,
            gps,
            charge,
            status: status_for_event(&event.event_type),
            event_type: Some(event.event_type.clone()),
            event_type_reason: event.event_type_reason.clone(),
            trip_id: event.trip_id,
            service_area_id: event.service_area_id,
            annotation,
            annotation_version,
            recorded: event.recorded,
        }
    }

    /// Build a state row from accepted telemetry.
    pub fn from_telemetry(
        telemetry: &crate::types::InboundTelemetry,
        annotation: Option<serde_json::Value>,
        annotation_version: u32,
    ) -> Self {
        Self {
            provider_id: telemetry.provider_id,
            device_id: telemetry.device_id,
            vehicle_type: telemetry.vehicle_type,
            message_type: MessageType::Telemetry,
            timestamp: telemetry.timestamp,
            gps: Some(telemetry.gps),
            charge: telemetry.charge,
            status: None,
            event_type: None,
            event_type_reason: None,
            trip_id: None,
            service_area_id: None,
            annotation,
            annotation_version,
            recorded: telemetry.recorded,
        }
    }

    /// Monotonicity rule for the state merge: a candidate replaces the
    /// incumbent iff it is strictly newer, or ties on timestamp while
    /// carrying trip context the incumbent lacks.
    pub fn supersedes(&self, incumbent: &DeviceState) -> bool {
        if self.timestamp > incumbent.timestamp {
            return true;
        }
        self.timestamp == incumbent.timestamp
            && self.trip_id.is_some()
            && incumbent.trip_id.is_none()
    }
}

/// One event bound into a trip bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripEvent {
    pub vehicle_type: VehicleType,
    pub timestamp: Timestamp,
    pub event_type: VehicleEventType,
    pub event_type_reason: Option<String>,
    pub gps: Option<GpsPoint>,
    pub service_area_id: Option<Uuid>,
    pub annotation: Option<serde_json::Value>,
    pub annotation_version: u32,
}

/// One telemetry point bound into a trip bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripTelemetry {
    pub timestamp: Timestamp,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub service_area_id: Option<Uuid>,
    pub annotation: Option<serde_json::Value>,
    pub annotation_version: u32,
}

/// Open trips for one device: trip_id -> events in append order.
///
/// `BTreeMap` so iteration is ordered by trip_id; the telemetry matcher
/// relies on that for its deterministic tie-break.
pub type TripEventMap = BTreeMap<Uuid, Vec<TripEvent>>;

/// Open-trip telemetry for one device: trip_id -> points in append order.
pub type TripTelemetryMap = BTreeMap<Uuid, Vec<TripTelemetry>>;

/// A closed, metrics-bearing trip record. Created exactly once by the
/// finalizer, immutable thereafter, owned by the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedTrip {
    pub trip_id: Uuid,
    pub device_id: Uuid,
    pub provider_id: Uuid,
    pub vehicle_type: VehicleType,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub start_service_area_id: Option<Uuid>,
    pub end_service_area_id: Option<Uuid>,
    /// `end_time - start_time`, milliseconds.
    pub duration: i64,
    /// Summed great-circle distance in meters; `None` when the trip
    /// start carried no GPS fix to anchor the route.
    pub distance: Option<f64>,
    pub violation_count: u32,
    pub min_violation_dist: Option<f64>,
    pub max_violation_dist: Option<f64>,
    pub avg_violation_dist: Option<f64>,
    /// Trip events sorted ascending by timestamp.
    pub events: Vec<TripEvent>,
    /// Telemetry segmented per inter-event interval, each segment
    /// sorted ascending by timestamp.
    pub telemetry: Vec<Vec<TripTelemetry>>,
}

/// Per-provider rejection bookkeeping kept in the state store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCounters {
    pub duplicate_events: u64,
    pub invalid_events: u64,
    pub out_of_order_events: u64,
    pub orphaned_telemetry: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InboundEvent, InboundTelemetry, TelemetryData};

    fn event(timestamp: Timestamp, trip_id: Option<Uuid>) -> InboundEvent {
        InboundEvent {
            provider_id: Uuid::new_v4(),
            device_id: Uuid::new_v4(),
            vehicle_type: VehicleType::Scooter,
            event_type: VehicleEventType::TripStart,
            event_type_reason: None,
            telemetry: Some(TelemetryData {
                gps: GpsPoint {
                    lat: 34.0,
                    lng: -118.0,
                },
                charge: Some(0.9),
            }),
            trip_id,
            service_area_id: None,
            timestamp,
            recorded: timestamp + 5,
        }
    }

    #[test]
    fn test_state_from_event_derives_status() {
        let state = DeviceState::from_event(&event(1_000, Some(Uuid::new_v4())), None, 1);
        assert_eq!(state.status, Some(VehicleStatus::Trip));
        assert_eq!(state.message_type, MessageType::Event);
        assert!(state.gps.is_some());
        assert_eq!(state.charge, Some(0.9));
    }

    #[test]
    fn test_state_from_telemetry_has_no_status() {
        let telemetry = InboundTelemetry {
            provider_id: Uuid::new_v4(),
            device_id: Uuid::new_v4(),
            vehicle_type: VehicleType::Bicycle,
            gps: GpsPoint {
                lat: 34.0,
                lng: -118.0,
            },
            charge: None,
            timestamp: 2_000,
            recorded: 2_010,
        };
        let state = DeviceState::from_telemetry(&telemetry, None, 1);
        assert_eq!(state.status, None);
        assert_eq!(state.event_type, None);
        assert_eq!(state.message_type, MessageType::Telemetry);
    }

    #[test]
    fn test_supersedes_strictly_newer() {
        let older = DeviceState::from_event(&event(1_000, None), None, 1);
        let newer = DeviceState::from_event(&event(2_000, None), None, 1);
        assert!(newer.supersedes(&older));
        assert!(!older.supersedes(&newer));
    }

    #[test]
    fn test_supersedes_tie_prefers_trip_context() {
        let plain = DeviceState::from_event(&event(1_000, None), None, 1);
        let with_trip = DeviceState::from_event(&event(1_000, Some(Uuid::new_v4())), None, 1);
        assert!(with_trip.supersedes(&plain));
        assert!(!plain.supersedes(&with_trip));
        // A tie between two trip-bearing states resolves to the incumbent.
        assert!(!with_trip.clone().supersedes(&with_trip));
    }
}
