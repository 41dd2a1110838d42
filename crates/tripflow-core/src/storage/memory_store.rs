//! In-memory store backends for testing and single-process deployments
//!
//! Every mutating [`StateStore`] operation runs under the `DashMap`
//! entry guard for its device key, which supplies the per-key
//! compare-and-write semantics the trait contract requires.

use crate::state::{
    DeviceState, FinalizedTrip, ProviderCounters, TripEvent, TripEventMap, TripTelemetry,
    TripTelemetryMap,
};
use crate::store::{
    MergeOutcome, RejectionKind, StateStore, StoreError, TelemetryAppend, TripStore,
};
use crate::types::{DeviceKey, TimeWindow, Timestamp};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// In-memory shared-cache backend (non-persistent).
#[derive(Default)]
pub struct MemoryStateStore {
    states: DashMap<DeviceKey, DeviceState>,
    trip_events: DashMap<DeviceKey, TripEventMap>,
    trip_telemetry: DashMap<DeviceKey, TripTelemetryMap>,
    counters: DashMap<Uuid, ProviderCounters>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn device_state(&self, key: &DeviceKey) -> Result<Option<DeviceState>, StoreError> {
        Ok(self.states.get(key).map(|s| s.clone()))
    }

    async fn merge_device_state(
        &self,
        candidate: DeviceState,
    ) -> Result<MergeOutcome, StoreError> {
        match self.states.entry(candidate.key()) {
            Entry::Occupied(mut occupied) => {
                if candidate.supersedes(occupied.get()) {
                    occupied.insert(candidate);
                    Ok(MergeOutcome::Written)
                } else {
                    Ok(MergeOutcome::Superseded)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(candidate);
                Ok(MergeOutcome::Written)
            }
        }
    }

    async fn device_states_since(
        &self,
        since: Timestamp,
    ) -> Result<Vec<DeviceState>, StoreError> {
        let mut states: Vec<DeviceState> = self
            .states
            .iter()
            .filter(|entry| entry.value().recorded >= since)
            .map(|entry| entry.value().clone())
            .collect();
        states.sort_by_key(DeviceState::key);
        Ok(states)
    }

    async fn trip_events(&self, key: &DeviceKey) -> Result<Option<TripEventMap>, StoreError> {
        Ok(self.trip_events.get(key).map(|m| m.clone()))
    }

    async fn append_trip_event(
        &self,
        key: &DeviceKey,
        trip_id: Uuid,
        event: TripEvent,
    ) -> Result<(), StoreError> {
        self.trip_events
            .entry(*key)
            .or_default()
            .entry(trip_id)
            .or_default()
            .push(event);
        Ok(())
    }

    async fn trip_telemetry(
        &self,
        key: &DeviceKey,
    ) -> Result<Option<TripTelemetryMap>, StoreError> {
        Ok(self.trip_telemetry.get(key).map(|m| m.clone()))
    }

    async fn append_trip_telemetry(
        &self,
        key: &DeviceKey,
        trip_id: Uuid,
        point: TripTelemetry,
    ) -> Result<TelemetryAppend, StoreError> {
        let mut device = self.trip_telemetry.entry(*key).or_default();
        let bucket = device.entry(trip_id).or_default();
        if bucket.iter().any(|p| p.timestamp == point.timestamp) {
            return Ok(TelemetryAppend::DuplicateTimestamp);
        }
        bucket.push(point);
        Ok(TelemetryAppend::Appended)
    }

    async fn evict_trip(&self, key: &DeviceKey, trip_id: Uuid) -> Result<(), StoreError> {
        if let Entry::Occupied(mut occupied) = self.trip_events.entry(*key) {
            occupied.get_mut().remove(&trip_id);
            if occupied.get().is_empty() {
                occupied.remove();
            }
        }
        if let Entry::Occupied(mut occupied) = self.trip_telemetry.entry(*key) {
            occupied.get_mut().remove(&trip_id);
            if occupied.get().is_empty() {
                occupied.remove();
            }
        }
        Ok(())
    }

    async fn trip_device_keys(
        &self,
        after: Option<DeviceKey>,
        limit: usize,
    ) -> Result<Vec<DeviceKey>, StoreError> {
        let mut keys: Vec<DeviceKey> = self
            .trip_events
            .iter()
            .map(|entry| *entry.key())
            .filter(|key| after.map_or(true, |cursor| *key > cursor))
            .collect();
        keys.sort();
        keys.truncate(limit);
        Ok(keys)
    }

    async fn record_rejection(
        &self,
        provider_id: Uuid,
        kind: RejectionKind,
    ) -> Result<(), StoreError> {
        let mut counters = self.counters.entry(provider_id).or_default();
        match kind {
            RejectionKind::Duplicate => counters.duplicate_events += 1,
            RejectionKind::Invalid => counters.invalid_events += 1,
            RejectionKind::OutOfOrder => counters.out_of_order_events += 1,
            RejectionKind::OrphanedTelemetry => counters.orphaned_telemetry += 1,
        }
        Ok(())
    }

    async fn provider_counters(
        &self,
        provider_id: Uuid,
    ) -> Result<ProviderCounters, StoreError> {
        Ok(self
            .counters
            .get(&provider_id)
            .map(|c| *c)
            .unwrap_or_default())
    }
}

/// In-memory durable-store backend (non-persistent).
#[derive(Default)]
pub struct MemoryTripStore {
    trips: DashMap<Uuid, FinalizedTrip>,
    states: DashMap<u64, DeviceState>,
    seq: AtomicU64,
}

impl MemoryTripStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TripStore for MemoryTripStore {
    async fn upsert_trip(&self, trip: FinalizedTrip) -> Result<(), StoreError> {
        self.trips.insert(trip.trip_id, trip);
        Ok(())
    }

    async fn trip(&self, trip_id: Uuid) -> Result<Option<FinalizedTrip>, StoreError> {
        Ok(self.trips.get(&trip_id).map(|t| t.clone()))
    }

    async fn trips_for_provider(
        &self,
        provider_id: Uuid,
        window: TimeWindow,
    ) -> Result<Vec<FinalizedTrip>, StoreError> {
        let mut trips: Vec<FinalizedTrip> = self
            .trips
            .iter()
            .filter(|entry| {
                entry.value().provider_id == provider_id && window.contains(entry.value().end_time)
            })
            .map(|entry| entry.value().clone())
            .collect();
        trips.sort_by_key(|t| t.end_time);
        Ok(trips)
    }

    async fn trip_count(
        &self,
        provider_id: Uuid,
        window: TimeWindow,
    ) -> Result<u64, StoreError> {
        let count = self
            .trips
            .iter()
            .filter(|entry| {
                entry.value().provider_id == provider_id && window.contains(entry.value().end_time)
            })
            .count();
        Ok(count as u64)
    }

    async fn device_trip_count(
        &self,
        device_id: Uuid,
        window: TimeWindow,
    ) -> Result<u64, StoreError> {
        let count = self
            .trips
            .iter()
            .filter(|entry| {
                entry.value().device_id == device_id && window.contains(entry.value().end_time)
            })
            .count();
        Ok(count as u64)
    }

    async fn insert_device_state(&self, state: DeviceState) -> Result<u64, StoreError> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.states.insert(seq, state);
        Ok(seq)
    }

    async fn device_states(
        &self,
        provider_id: Uuid,
        window: TimeWindow,
    ) -> Result<Vec<DeviceState>, StoreError> {
        let mut rows: Vec<(u64, DeviceState)> = self
            .states
            .iter()
            .filter(|entry| {
                entry.value().provider_id == provider_id
                    && window.contains(entry.value().timestamp)
            })
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows.into_iter().map(|(_, state)| state).collect())
    }
}
