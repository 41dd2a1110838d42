//! Store traits for the shared cache and the durable trip store
//!
//! [`StateStore`] models the shared cache: hash-per-key semantics,
//! per-key atomic conditional writes, and a paginated device index.
//! [`TripStore`] models the durable store: idempotent trip upserts and
//! append-only device-state history.

use crate::state::{
    DeviceState, FinalizedTrip, ProviderCounters, TripEvent, TripEventMap, TripTelemetry,
    TripTelemetryMap,
};
use crate::types::{DeviceKey, TimeWindow, Timestamp};
use thiserror::Error;
use uuid::Uuid;

/// Transient store failure. Callers treat every variant as retryable:
/// message processing re-runs on redelivery, finalization defers to the
/// next sweep.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error("serialization failure: {0}")]
    Codec(String),

    #[error("store operation timed out")]
    Timeout,
}

/// Result of the monotonic device-state merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Candidate was written as the new latest state.
    Written,
    /// An equal-or-newer incumbent kept the slot; candidate dropped.
    Superseded,
}

/// Result of an idempotent trip-telemetry append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryAppend {
    Appended,
    /// A point with the same timestamp was already in the bucket.
    DuplicateTimestamp,
}

/// Which rejection tally to bump for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    Duplicate,
    Invalid,
    OutOfOrder,
    OrphanedTelemetry,
}

/// The shared cache.
///
/// Mutating operations are atomic per device key: implementations must
/// apply the merge predicate / bucket append under a compare-and-write
/// primitive (entry guard, CAS, server-side script), never as a read
/// followed by an unconditional write. Concurrent workers rely on this
/// for the monotonicity invariant.
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    /// Latest state for a device, if any message was ever accepted.
    async fn device_state(&self, key: &DeviceKey) -> Result<Option<DeviceState>, StoreError>;

    /// Atomically install `candidate` as the latest state iff no state
    /// exists, or [`DeviceState::supersedes`] holds against the
    /// incumbent.
    async fn merge_device_state(&self, candidate: DeviceState)
        -> Result<MergeOutcome, StoreError>;

    /// Point-in-time snapshot of device states ingested at or after
    /// `since` (by `recorded`), ordered by device id.
    async fn device_states_since(&self, since: Timestamp)
        -> Result<Vec<DeviceState>, StoreError>;

    /// All open-trip event buckets for a device.
    async fn trip_events(&self, key: &DeviceKey) -> Result<Option<TripEventMap>, StoreError>;

    /// Append an event to the bucket for `trip_id`, creating the bucket
    /// if absent.
    async fn append_trip_event(
        &self,
        key: &DeviceKey,
        trip_id: Uuid,
        event: TripEvent,
    ) -> Result<(), StoreError>;

    /// All open-trip telemetry buckets for a device.
    async fn trip_telemetry(&self, key: &DeviceKey)
        -> Result<Option<TripTelemetryMap>, StoreError>;

    /// Append a telemetry point to the bucket for `trip_id` unless a
    /// point with the same timestamp is already present.
    async fn append_trip_telemetry(
        &self,
        key: &DeviceKey,
        trip_id: Uuid,
        point: TripTelemetry,
    ) -> Result<TelemetryAppend, StoreError>;

    /// Remove one trip from both buckets; drop the device key entirely
    /// once its maps are empty.
    async fn evict_trip(&self, key: &DeviceKey, trip_id: Uuid) -> Result<(), StoreError>;

    /// Page through device keys that currently hold open-trip buckets,
    /// ordered, strictly after `after` when given.
    async fn trip_device_keys(
        &self,
        after: Option<DeviceKey>,
        limit: usize,
    ) -> Result<Vec<DeviceKey>, StoreError>;

    /// Bump one per-provider rejection tally.
    async fn record_rejection(
        &self,
        provider_id: Uuid,
        kind: RejectionKind,
    ) -> Result<(), StoreError>;

    /// Current rejection tallies for a provider.
    async fn provider_counters(&self, provider_id: Uuid)
        -> Result<ProviderCounters, StoreError>;
}

/// The durable store.
#[async_trait::async_trait]
pub trait TripStore: Send + Sync {
    /// Idempotent upsert keyed by `trip_id`. Re-finalizing a persisted
    /// trip overwrites it with identical content; safe to retry.
    async fn upsert_trip(&self, trip: FinalizedTrip) -> Result<(), StoreError>;

    /// Fetch one finalized trip.
    async fn trip(&self, trip_id: Uuid) -> Result<Option<FinalizedTrip>, StoreError>;

    /// Finalized trips for a provider whose end time falls in `window`.
    async fn trips_for_provider(
        &self,
        provider_id: Uuid,
        window: TimeWindow,
    ) -> Result<Vec<FinalizedTrip>, StoreError>;

    /// Count of finalized trips for a provider in `window`.
    async fn trip_count(&self, provider_id: Uuid, window: TimeWindow) -> Result<u64, StoreError>;

    /// Count of finalized trips for one device in `window`.
    async fn device_trip_count(
        &self,
        device_id: Uuid,
        window: TimeWindow,
    ) -> Result<u64, StoreError>;

    /// Append one device-state history row; returns its sequence number.
    async fn insert_device_state(&self, state: DeviceState) -> Result<u64, StoreError>;

    /// History rows for a provider whose message timestamp falls in
    /// `window`, in insertion order.
    async fn device_states(
        &self,
        provider_id: Uuid,
        window: TimeWindow,
    ) -> Result<Vec<DeviceState>, StoreError>;
}
