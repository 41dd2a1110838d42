//! Identifiers, enums and wire-boundary message types
//!
//! Inbound payloads are validated into the closed [`InboundMessage`]
//! variant at the edge; nothing loosely-typed travels through the
//! pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Provider-reported time, epoch milliseconds.
pub type Timestamp = i64;

/// Cache key for everything tracked per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceKey {
    pub provider_id: Uuid,
    pub device_id: Uuid,
}

impl DeviceKey {
    pub fn new(provider_id: Uuid, device_id: Uuid) -> Self {
        Self {
            provider_id,
            device_id,
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider_id, self.device_id)
    }
}

/// Kind of mobility device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Scooter,
    Bicycle,
    Moped,
    Car,
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scooter => "scooter",
            Self::Bicycle => "bicycle",
            Self::Moped => "moped",
            Self::Car => "car",
        };
        f.write_str(s)
    }
}

/// Which half of the stream a message (or a stored state row) came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Event,
    Telemetry,
}

/// Vehicle lifecycle event types.
///
/// The set is fixed; anything a provider sends outside it lands in
/// `Other` so the quality gate can reject it instead of the decoder
/// failing the whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VehicleEventType {
    Register,
    ServiceStart,
    ServiceEnd,
    ServiceEnter,
    ServiceLeave,
    ProviderDropOff,
    ProviderPickUp,
    AgencyPickUp,
    AgencyDropOff,
    Reserve,
    ReserveEnter,
    ReserveStop,
    CancelReservation,
    TripStart,
    TripEnter,
    TripLeave,
    TripEnd,
    TripStop,
    TripResume,
    DepotEnter,
    DepotLeave,
    Deregister,
    Other(String),
}

impl VehicleEventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Register => "register",
            Self::ServiceStart => "service_start",
            Self::ServiceEnd => "service_end",
            Self::ServiceEnter => "service_enter",
            Self::ServiceLeave => "service_leave",
            Self::ProviderDropOff => "provider_drop_off",
            Self::ProviderPickUp => "provider_pick_up",
            Self::AgencyPickUp => "agency_pick_up",
            Self::AgencyDropOff => "agency_drop_off",
            Self::Reserve => "reserve",
            Self::ReserveEnter => "reserve_enter",
            Self::ReserveStop => "reserve_stop",
            Self::CancelReservation => "cancel_reservation",
            Self::TripStart => "trip_start",
            Self::TripEnter => "trip_enter",
            Self::TripLeave => "trip_leave",
            Self::TripEnd => "trip_end",
            Self::TripStop => "trip_stop",
            Self::TripResume => "trip_resume",
            Self::DepotEnter => "depot_enter",
            Self::DepotLeave => "depot_leave",
            Self::Deregister => "deregister",
            Self::Other(s) => s,
        }
    }

    /// Trip lifecycle events feed the trip event buckets.
    pub fn is_trip_event(&self) -> bool {
        matches!(
            self,
            Self::TripStart | Self::TripEnter | Self::TripLeave | Self::TripEnd
        )
    }

    /// Events that may only continue an already-open trip.
    pub fn is_trip_continuation(&self) -> bool {
        matches!(self, Self::TripEnter | Self::TripLeave | Self::TripEnd)
    }

    /// Events that open a trip bucket when none exists yet.
    pub fn starts_trip(&self) -> bool {
        matches!(self, Self::TripStart | Self::TripEnter)
    }
}

impl From<&str> for VehicleEventType {
    fn from(s: &str) -> Self {
        match s {
            "register" => Self::Register,
            "service_start" => Self::ServiceStart,
            "service_end" => Self::ServiceEnd,
            "service_enter" => Self::ServiceEnter,
            "service_leave" => Self::ServiceLeave,
            "provider_drop_off" => Self::ProviderDropOff,
            "provider_pick_up" => Self::ProviderPickUp,
            "agency_pick_up" => Self::AgencyPickUp,
            "agency_drop_off" => Self::AgencyDropOff,
            "reserve" => Self::Reserve,
            "reserve_enter" => Self::ReserveEnter,
            "reserve_stop" => Self::ReserveStop,
            "cancel_reservation" => Self::CancelReservation,
            "trip_start" => Self::TripStart,
            "trip_enter" => Self::TripEnter,
            "trip_leave" => Self::TripLeave,
            "trip_end" => Self::TripEnd,
            "trip_stop" => Self::TripStop,
            "trip_resume" => Self::TripResume,
            "depot_enter" => Self::DepotEnter,
            "depot_leave" => Self::DepotLeave,
            "deregister" => Self::Deregister,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for VehicleEventType {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<VehicleEventType> for String {
    fn from(e: VehicleEventType) -> Self {
        e.as_str().to_string()
    }
}

impl fmt::Display for VehicleEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived vehicle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Available,
    Reserved,
    Unavailable,
    Removed,
    Trip,
    Elsewhere,
    Stopped,
    Inactive,
}

impl VehicleStatus {
    /// Statuses that count a vehicle as deployed in the right of way.
    pub fn is_right_of_way(self) -> bool {
        matches!(
            self,
            Self::Available | Self::Reserved | Self::Unavailable | Self::Trip
        )
    }
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::Unavailable => "unavailable",
            Self::Removed => "removed",
            Self::Trip => "trip",
            Self::Elsewhere => "elsewhere",
            Self::Stopped => "stopped",
            Self::Inactive => "inactive",
        };
        f.write_str(s)
    }
}

/// The fixed event-to-status mapping. `None` marks an event type the
/// system does not recognize; the quality gate rejects those as invalid.
pub fn status_for_event(event_type: &VehicleEventType) -> Option<VehicleStatus> {
    use VehicleEventType as E;
    use VehicleStatus as S;
    match event_type {
        E::Register => Some(S::Removed),
        E::ServiceStart => Some(S::Available),
        E::ServiceEnd => Some(S::Unavailable),
        E::ServiceEnter => Some(S::Available),
        E::ServiceLeave => Some(S::Elsewhere),
        E::ProviderDropOff => Some(S::Available),
        E::ProviderPickUp => Some(S::Removed),
        E::AgencyPickUp => Some(S::Removed),
        E::AgencyDropOff => Some(S::Available),
        E::Reserve => Some(S::Reserved),
        E::ReserveEnter => Some(S::Reserved),
        E::ReserveStop => Some(S::Stopped),
        E::CancelReservation => Some(S::Available),
        E::TripStart => Some(S::Trip),
        E::TripEnter => Some(S::Trip),
        E::TripLeave => Some(S::Elsewhere),
        E::TripEnd => Some(S::Available),
        E::TripStop => Some(S::Stopped),
        E::TripResume => Some(S::Trip),
        E::DepotEnter => Some(S::Removed),
        E::DepotLeave => Some(S::Unavailable),
        E::Deregister => Some(S::Inactive),
        E::Other(_) => None,
    }
}

/// A GPS fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Telemetry embedded in an event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryData {
    pub gps: GpsPoint,
    pub charge: Option<f64>,
}

/// A vehicle lifecycle event as delivered by the message source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub provider_id: Uuid,
    pub device_id: Uuid,
    pub vehicle_type: VehicleType,
    pub event_type: VehicleEventType,
    pub event_type_reason: Option<String>,
    pub telemetry: Option<TelemetryData>,
    pub trip_id: Option<Uuid>,
    pub service_area_id: Option<Uuid>,
    pub timestamp: Timestamp,
    /// Ingestion time stamped by the transport.
    pub recorded: Timestamp,
}

impl InboundEvent {
    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(self.provider_id, self.device_id)
    }
}

/// A location/battery sample with no inherent trip association.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundTelemetry {
    pub provider_id: Uuid,
    pub device_id: Uuid,
    pub vehicle_type: VehicleType,
    pub gps: GpsPoint,
    pub charge: Option<f64>,
    pub timestamp: Timestamp,
    pub recorded: Timestamp,
}

impl InboundTelemetry {
    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(self.provider_id, self.device_id)
    }
}

/// Closed tagged union of everything the message source can deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Event(InboundEvent),
    Telemetry(InboundTelemetry),
}

impl InboundMessage {
    pub fn key(&self) -> DeviceKey {
        match self {
            Self::Event(e) => e.key(),
            Self::Telemetry(t) => t.key(),
        }
    }

    pub fn provider_id(&self) -> Uuid {
        match self {
            Self::Event(e) => e.provider_id,
            Self::Telemetry(t) => t.provider_id,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::Event(e) => e.timestamp,
            Self::Telemetry(t) => t.timestamp,
        }
    }
}

/// Half-open time window `[start, end)` in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeWindow {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts < self.end
    }
}
