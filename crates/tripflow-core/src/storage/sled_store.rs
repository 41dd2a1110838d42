//! `Sled`-based durable store implementation
//!
//! Embedded on-disk backend for finalized trips and device-state
//! history. Trips live in a tree keyed by trip id, so the upsert is
//! naturally idempotent; history rows are keyed by a big-endian
//! sequence number to preserve insertion order.

use crate::state::{DeviceState, FinalizedTrip};
use crate::store::{StoreError, TripStore};
use crate::types::TimeWindow;
use async_trait::async_trait;
use sled::{Db, Tree};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// `Sled`-based persistent trip store.
pub struct SledTripStore {
    db: Db,
    trips: Tree,
    device_states: Tree,
    seq_counter: AtomicU64,
}

impl SledTripStore {
    /// Open (or create) a store at `path`.
    pub fn new(path: &str) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let trips = db.open_tree("trips")?;
        let device_states = db.open_tree("device_states")?;

        // Initialize the sequence counter from the last history row
        let last_seq = device_states
            .last()?
            .and_then(|(k, _)| {
                let bytes: [u8; 8] = k.as_ref().try_into().ok()?;
                Some(u64::from_be_bytes(bytes))
            })
            .unwrap_or(0);

        Ok(Self {
            db,
            trips,
            device_states,
            seq_counter: AtomicU64::new(last_seq),
        })
    }

    fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| StoreError::Codec(e.to_string()))
    }

    fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(decoded, _)| decoded)
            .map_err(|e| StoreError::Codec(e.to_string()))
    }
}

#[async_trait]
impl TripStore for SledTripStore {
    async fn upsert_trip(&self, trip: FinalizedTrip) -> Result<(), StoreError> {
        let key = trip.trip_id.as_bytes().to_vec();
        let encoded = Self::encode(&trip)?;
        self.trips.insert(key, encoded)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn trip(&self, trip_id: Uuid) -> Result<Option<FinalizedTrip>, StoreError> {
        match self.trips.get(trip_id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn trips_for_provider(
        &self,
        provider_id: Uuid,
        window: TimeWindow,
    ) -> Result<Vec<FinalizedTrip>, StoreError> {
        let mut trips = Vec::new();
        for item in &self.trips {
            let (_, value) = item?;
            let trip: FinalizedTrip = Self::decode(&value)?;
            if trip.provider_id == provider_id && window.contains(trip.end_time) {
                trips.push(trip);
            }
        }
        trips.sort_by_key(|t| t.end_time);
        Ok(trips)
    }

    async fn trip_count(
        &self,
        provider_id: Uuid,
        window: TimeWindow,
    ) -> Result<u64, StoreError> {
        Ok(self.trips_for_provider(provider_id, window).await?.len() as u64)
    }

    async fn device_trip_count(
        &self,
        device_id: Uuid,
        window: TimeWindow,
    ) -> Result<u64, StoreError> {
        let mut count = 0;
        for item in &self.trips {
            let (_, value) = item?;
            let trip: FinalizedTrip = Self::decode(&value)?;
            if trip.device_id == device_id && window.contains(trip.end_time) {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn insert_device_state(&self, state: DeviceState) -> Result<u64, StoreError> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let encoded = Self::encode(&state)?;
        self.device_states.insert(seq.to_be_bytes(), encoded)?;
        self.db.flush_async().await?;
        Ok(seq)
    }

    async fn device_states(
        &self,
        provider_id: Uuid,
        window: TimeWindow,
    ) -> Result<Vec<DeviceState>, StoreError> {
        let mut rows = Vec::new();
        for item in &self.device_states {
            let (_, value) = item?;
            let state: DeviceState = Self::decode(&value)?;
            if state.provider_id == provider_id && window.contains(state.timestamp) {
                rows.push(state);
            }
        }
        Ok(rows)
    }
}
