//! Windowed metrics over the durable store and a state-store snapshot
//!
//! Read-only. Surfaces store errors as-is; no retries, no mutation.

use crate::config::SlaConfig;
use crate::state::ProviderCounters;
use crate::store::{StateStore, StoreError, TripStore};
use crate::types::{MessageType, TimeWindow, VehicleEventType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Count with spread, for lateness and violation reporting. `min`,
/// `max` and `average` are `None` when nothing qualified.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricCount {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub average: Option<f64>,
}

impl MetricCount {
    fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                count: 0,
                min: None,
                max: None,
                average: None,
            };
        }
        Self {
            count: values.len() as u64,
            min: values.iter().copied().reduce(f64::min),
            max: values.iter().copied().reduce(f64::max),
            average: Some(values.iter().sum::<f64>() / values.len() as f64),
        }
    }
}

/// Fleet size for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleCounts {
    /// Registrations minus deregistrations over the window's history.
    pub registered: i64,
    /// Devices currently in a right-of-way status, from the snapshot.
    pub deployed: u64,
}

/// SLA-lateness spread split by message class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LateEventCounts {
    pub start_end: MetricCount,
    pub enter_leave: MetricCount,
    pub telemetry: MetricCount,
}

/// One provider's aggregate row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetrics {
    pub provider_id: Uuid,
    pub window: TimeWindow,
    pub event_counts: BTreeMap<String, u64>,
    pub vehicle_counts: VehicleCounts,
    pub trip_count: u64,
    /// Index i = devices with exactly i trips in the window; the last
    /// bin also absorbs everything above it.
    pub vehicle_trips_histogram: Vec<u64>,
    pub late_events: LateEventCounts,
    pub telemetry_violations: MetricCount,
    pub rejections: ProviderCounters,
    pub sla: SlaConfig,
}

/// Maximum per-vehicle trip bin in the histogram.
const MAX_VEHICLE_TRIP_BIN: usize = 5;

pub struct MetricsAggregator {
    state: Arc<dyn StateStore>,
    trips: Arc<dyn TripStore>,
    sla: SlaConfig,
}

impl MetricsAggregator {
    pub fn new(state: Arc<dyn StateStore>, trips: Arc<dyn TripStore>, sla: SlaConfig) -> Self {
        Self { state, trips, sla }
    }

    /// Per-event-type counts from the state history.
    pub async fn event_counts(
        &self,
        provider_id: Uuid,
        window: TimeWindow,
    ) -> Result<BTreeMap<String, u64>, StoreError> {
        let rows = self.trips.device_states(provider_id, window).await?;
        let mut counts = BTreeMap::new();
        for row in rows {
            if let Some(event_type) = row.event_type {
                *counts.entry(event_type.as_str().to_string()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// Registered fleet size over the window plus currently-deployed
    /// count from the point-in-time snapshot.
    pub async fn vehicle_counts(
        &self,
        provider_id: Uuid,
        window: TimeWindow,
    ) -> Result<VehicleCounts, StoreError> {
        let rows = self.trips.device_states(provider_id, window).await?;
        let mut registered: i64 = 0;
        for row in &rows {
            match row.event_type {
                Some(VehicleEventType::Register) => registered += 1,
                Some(VehicleEventType::Deregister) => registered -= 1,
                _ => {}
            }
        }

        let snapshot = self.state.device_states_since(0).await?;
        let deployed = snapshot
            .iter()
            .filter(|s| {
                s.provider_id == provider_id
                    && s.status.is_some_and(|status| status.is_right_of_way())
            })
            .count() as u64;

        Ok(VehicleCounts {
            registered,
            deployed,
        })
    }

    /// Finalized-trip count in the window.
    pub async fn trip_count(
        &self,
        provider_id: Uuid,
        window: TimeWindow,
    ) -> Result<u64, StoreError> {
        self.trips.trip_count(provider_id, window).await
    }

    /// Histogram of trips-per-vehicle; the final bin absorbs everything
    /// at or above [`MAX_VEHICLE_TRIP_BIN`].
    pub async fn vehicle_trip_histogram(
        &self,
        provider_id: Uuid,
        window: TimeWindow,
    ) -> Result<Vec<u64>, StoreError> {
        let mut bins = vec![0u64; MAX_VEHICLE_TRIP_BIN + 1];
        let snapshot = self.state.device_states_since(0).await?;
        for device in snapshot.iter().filter(|s| s.provider_id == provider_id) {
            let count = self
                .trips
                .device_trip_count(device.device_id, window)
                .await? as usize;
            bins[count.min(MAX_VEHICLE_TRIP_BIN)] += 1;
        }
        Ok(bins)
    }

    /// SLA-lateness spreads: how far past each delivery threshold rows
    /// arrived (recorded minus reported time), by message class.
    pub async fn late_event_counts(
        &self,
        provider_id: Uuid,
        window: TimeWindow,
    ) -> Result<LateEventCounts, StoreError> {
        let rows = self.trips.device_states(provider_id, window).await?;
        let mut start_end = Vec::new();
        let mut enter_leave = Vec::new();
        let mut telemetry = Vec::new();

        for row in rows {
            let lateness = (row.recorded - row.timestamp) as f64;
            match (&row.message_type, &row.event_type) {
                (MessageType::Telemetry, _) => {
                    if lateness > self.sla.max_telemetry_time_ms as f64 {
                        telemetry.push(lateness);
                    }
                }
                (
                    MessageType::Event,
                    Some(VehicleEventType::TripStart | VehicleEventType::TripEnd),
                ) => {
                    if lateness > self.sla.max_start_end_time_ms as f64 {
                        start_end.push(lateness);
                    }
                }
                (
                    MessageType::Event,
                    Some(VehicleEventType::TripEnter | VehicleEventType::TripLeave),
                ) => {
                    if lateness > self.sla.max_enter_leave_time_ms as f64 {
                        enter_leave.push(lateness);
                    }
                }
                _ => {}
            }
        }

        Ok(LateEventCounts {
            start_end: MetricCount::from_values(&start_end),
            enter_leave: MetricCount::from_values(&enter_leave),
            telemetry: MetricCount::from_values(&telemetry),
        })
    }

    /// Aggregate distance-violation statistics over finalized trips.
    pub async fn telemetry_violation_counts(
        &self,
        provider_id: Uuid,
        window: TimeWindow,
    ) -> Result<MetricCount, StoreError> {
        let trips = self.trips.trips_for_provider(provider_id, window).await?;

        let total: u64 = trips.iter().map(|t| u64::from(t.violation_count)).sum();
        if total == 0 {
            return Ok(MetricCount {
                count: 0,
                min: None,
                max: None,
                average: None,
            });
        }

        let mins: Vec<f64> = trips.iter().filter_map(|t| t.min_violation_dist).collect();
        let maxs: Vec<f64> = trips.iter().filter_map(|t| t.max_violation_dist).collect();
        let avgs: Vec<f64> = trips.iter().filter_map(|t| t.avg_violation_dist).collect();

        Ok(MetricCount {
            count: total,
            min: mins.into_iter().reduce(f64::min),
            max: maxs.into_iter().reduce(f64::max),
            average: if avgs.is_empty() {
                None
            } else {
                Some(avgs.iter().sum::<f64>() / avgs.len() as f64)
            },
        })
    }

    /// Quality-gate rejection tallies for a provider.
    pub async fn rejection_counts(
        &self,
        provider_id: Uuid,
    ) -> Result<ProviderCounters, StoreError> {
        self.state.provider_counters(provider_id).await
    }

    /// Assemble the full per-provider row.
    pub async fn report(
        &self,
        provider_id: Uuid,
        window: TimeWindow,
    ) -> Result<ProviderMetrics, StoreError> {
        Ok(ProviderMetrics {
            provider_id,
            window,
            event_counts: self.event_counts(provider_id, window).await?,
            vehicle_counts: self.vehicle_counts(provider_id, window).await?,
            trip_count: self.trip_count(provider_id, window).await?,
            vehicle_trips_histogram: self.vehicle_trip_histogram(provider_id, window).await?,
            late_events: self.late_event_counts(provider_id, window).await?,
            telemetry_violations: self
                .telemetry_violation_counts(provider_id, window)
                .await?,
            rejections: self.rejection_counts(provider_id).await?,
            sla: self.sla,
        })
    }
}
