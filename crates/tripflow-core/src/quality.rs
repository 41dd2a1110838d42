//! Quality gate
//!
//! The transport redelivers and reorders, so this gate is the only
//! backstop against double-counting trips or overwriting state with
//! stale data. Checks run in a fixed order; the first match wins.

use crate::state::{DeviceState, TripEventMap};
use crate::store::RejectionKind;
use crate::types::{InboundEvent, InboundMessage, MessageType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Accepted,
    Duplicate,
    Invalid,
    OutOfOrder,
}

impl Classification {
    /// Which provider tally a rejection bumps; `None` for accepted.
    pub fn rejection_kind(self) -> Option<RejectionKind> {
        match self {
            Self::Accepted => None,
            Self::Duplicate => Some(RejectionKind::Duplicate),
            Self::Invalid => Some(RejectionKind::Invalid),
            Self::OutOfOrder => Some(RejectionKind::OutOfOrder),
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Accepted => "accepted",
            Self::Duplicate => "duplicate",
            Self::Invalid => "invalid",
            Self::OutOfOrder => "out_of_order",
        };
        f.write_str(s)
    }
}

/// Classify a candidate message against the device's latest state and
/// its open-trip buckets.
pub fn classify(
    message: &InboundMessage,
    current: Option<&DeviceState>,
    open_trips: Option<&TripEventMap>,
) -> Classification {
    if is_duplicate(message, current) {
        return Classification::Duplicate;
    }
    if is_invalid(message, current) {
        return Classification::Invalid;
    }
    if is_out_of_order(message, open_trips) {
        return Classification::OutOfOrder;
    }
    Classification::Accepted
}

/// A candidate repeats the stored state when timestamps match exactly:
/// any telemetry at the same instant, or an event repeating the stored
/// event type.
fn is_duplicate(message: &InboundMessage, current: Option<&DeviceState>) -> bool {
    let Some(current) = current else {
        return false;
    };
    if message.timestamp() != current.timestamp {
        return false;
    }
    match message {
        InboundMessage::Telemetry(_) => true,
        InboundMessage::Event(event) => {
            current.message_type == MessageType::Event
                && current.event_type.as_ref() == Some(&event.event_type)
        }
    }
}

fn is_invalid(message: &InboundMessage, current: Option<&DeviceState>) -> bool {
    match message {
        InboundMessage::Event(event) => {
            crate::types::status_for_event(&event.event_type).is_none()
                || !transition_is_legal(current, event)
        }
        InboundMessage::Telemetry(_) => false,
    }
}

/// State-transition legality hook.
///
/// TODO: enforce a transition table once one is specified; until then
/// every transition passes.
fn transition_is_legal(_current: Option<&DeviceState>, _candidate: &InboundEvent) -> bool {
    true
}

/// Trip continuation events must land on an already-open trip; only
/// events can be checked here given the allowable telemetry delay.
fn is_out_of_order(message: &InboundMessage, open_trips: Option<&TripEventMap>) -> bool {
    let InboundMessage::Event(event) = message else {
        return false;
    };
    if !event.event_type.is_trip_continuation() {
        return false;
    }
    let Some(trip_id) = event.trip_id else {
        return true;
    };
    !open_trips.is_some_and(|trips| trips.contains_key(&trip_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TripEvent;
    use crate::types::{
        GpsPoint, InboundTelemetry, TelemetryData, Timestamp, VehicleEventType, VehicleType,
    };
    use uuid::Uuid;

    fn event_msg(
        timestamp: Timestamp,
        event_type: VehicleEventType,
        trip_id: Option<Uuid>,
    ) -> InboundMessage {
        InboundMessage::Event(InboundEvent {
            provider_id: Uuid::nil(),
            device_id: Uuid::nil(),
            vehicle_type: VehicleType::Scooter,
            event_type,
            event_type_reason: None,
            telemetry: Some(TelemetryData {
                gps: GpsPoint {
                    lat: 34.0,
                    lng: -118.0,
                },
                charge: None,
            }),
            trip_id,
            service_area_id: None,
            timestamp,
            recorded: timestamp,
        })
    }

    fn telemetry_msg(timestamp: Timestamp) -> InboundMessage {
        InboundMessage::Telemetry(InboundTelemetry {
            provider_id: Uuid::nil(),
            device_id: Uuid::nil(),
            vehicle_type: VehicleType::Scooter,
            gps: GpsPoint {
                lat: 34.0,
                lng: -118.0,
            },
            charge: None,
            timestamp,
            recorded: timestamp,
        })
    }

    fn state_for(message: &InboundMessage) -> DeviceState {
        match message {
            InboundMessage::Event(e) => DeviceState::from_event(e, None, 1),
            InboundMessage::Telemetry(t) => DeviceState::from_telemetry(t, None, 1),
        }
    }

    fn open_trip(trip_id: Uuid) -> TripEventMap {
        let mut trips = TripEventMap::new();
        trips.insert(
            trip_id,
            vec![TripEvent {
                vehicle_type: VehicleType::Scooter,
                timestamp: 500,
                event_type: VehicleEventType::TripStart,
                event_type_reason: None,
                gps: None,
                service_area_id: None,
                annotation: None,
                annotation_version: 1,
            }],
        );
        trips
    }

    #[test]
    fn test_first_message_accepted() {
        let msg = event_msg(1_000, VehicleEventType::ServiceStart, None);
        assert_eq!(classify(&msg, None, None), Classification::Accepted);
    }

    #[test]
    fn test_same_timestamp_telemetry_is_duplicate() {
        let first = telemetry_msg(1_000);
        let current = state_for(&first);
        assert_eq!(
            classify(&telemetry_msg(1_000), Some(&current), None),
            Classification::Duplicate
        );
        assert_eq!(
            classify(&telemetry_msg(1_001), Some(&current), None),
            Classification::Accepted
        );
    }

    #[test]
    fn test_same_timestamp_same_event_type_is_duplicate() {
        let msg = event_msg(1_000, VehicleEventType::ServiceStart, None);
        let current = state_for(&msg);
        assert_eq!(
            classify(&msg, Some(&current), None),
            Classification::Duplicate
        );
        // Different event type at the same instant is not a duplicate.
        let other = event_msg(1_000, VehicleEventType::ServiceEnd, None);
        assert_eq!(
            classify(&other, Some(&current), None),
            Classification::Accepted
        );
    }

    #[test]
    fn test_unknown_event_type_is_invalid() {
        let msg = event_msg(1_000, VehicleEventType::Other("teleport".into()), None);
        assert_eq!(classify(&msg, None, None), Classification::Invalid);
    }

    #[test]
    fn test_duplicate_wins_over_invalid() {
        // Ordering: an exact-duplicate unknown event classifies as
        // duplicate, not invalid.
        let msg = event_msg(1_000, VehicleEventType::Other("teleport".into()), None);
        let current = state_for(&msg);
        assert_eq!(
            classify(&msg, Some(&current), None),
            Classification::Duplicate
        );
    }

    #[test]
    fn test_continuation_without_open_trip_is_out_of_order() {
        let trip_id = Uuid::new_v4();
        let msg = event_msg(2_000, VehicleEventType::TripEnd, Some(trip_id));
        assert_eq!(classify(&msg, None, None), Classification::OutOfOrder);
        assert_eq!(
            classify(&msg, None, Some(&TripEventMap::new())),
            Classification::OutOfOrder
        );

        let trips = open_trip(trip_id);
        assert_eq!(classify(&msg, None, Some(&trips)), Classification::Accepted);
    }

    #[test]
    fn test_continuation_missing_trip_id_is_out_of_order() {
        let msg = event_msg(2_000, VehicleEventType::TripLeave, None);
        let trips = open_trip(Uuid::new_v4());
        assert_eq!(
            classify(&msg, None, Some(&trips)),
            Classification::OutOfOrder
        );
    }

    #[test]
    fn test_trip_start_never_out_of_order() {
        let msg = event_msg(2_000, VehicleEventType::TripStart, Some(Uuid::new_v4()));
        assert_eq!(classify(&msg, None, None), Classification::Accepted);
    }
}
