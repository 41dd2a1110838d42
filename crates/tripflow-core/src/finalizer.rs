//! Periodic trip finalizer
//!
//! Sweeps open trip buckets on an interval, closes every trip past the
//! SLA grace window, computes duration/distance/violation metrics,
//! persists the result (idempotent upsert by trip id) and evicts the
//! cache entries. Built to run single-instance; a concurrent sweep is
//! wasted work, not corruption, because the upsert is idempotent.

use crate::config::{FinalizerConfig, SlaConfig};
use crate::geo::measure_route;
use crate::state::{FinalizedTrip, TripEvent, TripTelemetry};
use crate::store::{StateStore, StoreError, TripStore};
use crate::types::{DeviceKey, Timestamp};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Totals from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub devices_scanned: usize,
    pub trips_closed: usize,
    pub trips_deferred: usize,
    /// Sweep stopped early because shutdown was requested.
    pub cancelled: bool,
}

/// Why a trip stayed open this sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeferReason {
    /// Fewer than two events; no end observed yet.
    AwaitingEnd,
    /// Last event still inside the late-telemetry grace window.
    InsideSlaWindow,
    /// Two or more events but no telemetry; unsafe to close without
    /// distance data. Retried every sweep, never evicted.
    MissingTelemetry,
}

enum TripDisposition {
    Closed,
    Deferred(DeferReason),
}

/// The sweeper. Clone-free; share behind an `Arc` and call
/// [`TripFinalizer::spawn`] for the background task.
pub struct TripFinalizer {
    state: Arc<dyn StateStore>,
    trips: Arc<dyn TripStore>,
    sla: SlaConfig,
    config: FinalizerConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl TripFinalizer {
    pub fn new(
        state: Arc<dyn StateStore>,
        trips: Arc<dyn TripStore>,
        sla: SlaConfig,
        config: FinalizerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            state,
            trips,
            sla,
            config,
            shutdown_tx,
        }
    }

    /// Request a graceful stop. The running sweep finishes its current
    /// device and exits; the background task stops ticking.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Run one sweep over every device holding open trips. `now` is
    /// epoch milliseconds; tests pin it, the background task feeds the
    /// wall clock.
    pub async fn sweep(&self, now: Timestamp) -> Result<SweepSummary, StoreError> {
        let mut summary = SweepSummary::default();
        let mut cursor: Option<DeviceKey> = None;

        loop {
            let keys = self
                .state
                .trip_device_keys(cursor, self.config.device_batch_size)
                .await?;
            if keys.is_empty() {
                break;
            }
            cursor = keys.last().copied();

            for key in keys {
                // Cancellation point: never abandon a device mid-trip.
                if self.is_shutdown() {
                    summary.cancelled = true;
                    debug!("sweep cancelled after {} devices", summary.devices_scanned);
                    return Ok(summary);
                }
                let (closed, deferred) = self.evaluate_device(&key, now).await?;
                summary.devices_scanned += 1;
                summary.trips_closed += closed;
                summary.trips_deferred += deferred;
            }
        }

        if summary.trips_closed > 0 {
            info!(
                "sweep closed {} trips across {} devices ({} deferred)",
                summary.trips_closed, summary.devices_scanned, summary.trips_deferred
            );
        } else {
            debug!(
                "sweep found nothing to close across {} devices ({} deferred)",
                summary.devices_scanned, summary.trips_deferred
            );
        }
        Ok(summary)
    }

    async fn evaluate_device(
        &self,
        key: &DeviceKey,
        now: Timestamp,
    ) -> Result<(usize, usize), StoreError> {
        let Some(trip_map) = self.state.trip_events(key).await? else {
            return Ok((0, 0));
        };

        let mut closed = 0;
        let mut deferred = 0;
        for (trip_id, events) in trip_map {
            match self.evaluate_trip(key, trip_id, events, now).await {
                Ok(TripDisposition::Closed) => closed += 1,
                Ok(TripDisposition::Deferred(reason)) => {
                    deferred += 1;
                    match reason {
                        DeferReason::MissingTelemetry => {
                            warn!("trip {trip_id} on {key} has events but no telemetry; deferring");
                        }
                        DeferReason::AwaitingEnd | DeferReason::InsideSlaWindow => {
                            debug!("trip {trip_id} on {key} deferred: {reason:?}");
                        }
                    }
                }
                Err(e) => {
                    // Transient store failure; the trip stays open and
                    // the next sweep retries it.
                    deferred += 1;
                    warn!("trip {trip_id} on {key} not finalized: {e}");
                }
            }
        }
        Ok((closed, deferred))
    }

    async fn evaluate_trip(
        &self,
        key: &DeviceKey,
        trip_id: Uuid,
        mut events: Vec<TripEvent>,
        now: Timestamp,
    ) -> Result<TripDisposition, StoreError> {
        if events.len() < 2 {
            return Ok(TripDisposition::Deferred(DeferReason::AwaitingEnd));
        }
        events.sort_by_key(|e| e.timestamp);

        let (Some(first), Some(last)) = (events.first(), events.last()) else {
            return Ok(TripDisposition::Deferred(DeferReason::AwaitingEnd));
        };
        if last.timestamp + self.sla.max_telemetry_time_ms > now {
            return Ok(TripDisposition::Deferred(DeferReason::InsideSlaWindow));
        }

        let start_time = first.timestamp;
        let end_time = last.timestamp;
        let start_service_area_id = first.service_area_id;
        let end_service_area_id = last.service_area_id;
        let start_gps = first.gps;
        let vehicle_type = first.vehicle_type;

        let bucket = self
            .state
            .trip_telemetry(key)
            .await?
            .and_then(|mut map| map.remove(&trip_id))
            .unwrap_or_default();
        if bucket.is_empty() {
            return Ok(TripDisposition::Deferred(DeferReason::MissingTelemetry));
        }

        let segments = segment_telemetry(&events, &bucket);

        // Distance needs the trip-start fix as its anchor; without one
        // the trip still closes, just without distance metrics.
        let (distance, violations) = match start_gps {
            Some(gps) => {
                let measure = measure_route(&segments, gps);
                let violations: Vec<f64> = measure
                    .legs
                    .iter()
                    .copied()
                    .filter(|leg| *leg > self.sla.max_telemetry_distance_m)
                    .collect();
                (Some(measure.distance), violations)
            }
            None => (None, Vec::new()),
        };

        let violation_count = violations.len() as u32;
        let min_violation_dist = violations.iter().copied().reduce(f64::min);
        let max_violation_dist = violations.iter().copied().reduce(f64::max);
        let avg_violation_dist = if violations.is_empty() {
            None
        } else {
            Some(violations.iter().sum::<f64>() / violations.len() as f64)
        };

        let trip = FinalizedTrip {
            trip_id,
            device_id: key.device_id,
            provider_id: key.provider_id,
            vehicle_type,
            start_time,
            end_time,
            start_service_area_id,
            end_service_area_id,
            duration: end_time - start_time,
            distance,
            violation_count,
            min_violation_dist,
            max_violation_dist,
            avg_violation_dist,
            events,
            telemetry: segments,
        };

        self.trips.upsert_trip(trip).await?;

        // The trip is durable now. A failed eviction only costs a
        // redundant re-finalization next sweep.
        if let Err(e) = self.state.evict_trip(key, trip_id).await {
            error!("evicting trip {trip_id} on {key} failed: {e}");
        }
        info!(
            "finalized trip {trip_id} on {key}: duration {}ms, {} violations",
            end_time - start_time,
            violation_count
        );
        Ok(TripDisposition::Closed)
    }

    /// Start the background sweep task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.sweep_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = Utc::now().timestamp_millis();
                        match self.sweep(now).await {
                            Ok(summary) if summary.cancelled => break,
                            Ok(_) => {}
                            Err(e) => warn!("sweep failed, retrying next tick: {e}"),
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        })
    }
}

/// Partition a trip's telemetry into per-interval segments: segment `i`
/// holds points with `events[i].timestamp <= t < events[i+1].timestamp`,
/// sorted ascending. Points outside every interval (early or at/after
/// the final event) are dropped.
fn segment_telemetry(events: &[TripEvent], bucket: &[TripTelemetry]) -> Vec<Vec<TripTelemetry>> {
    let mut segments = Vec::with_capacity(events.len().saturating_sub(1));
    for pair in events.windows(2) {
        let (start, end) = (pair[0].timestamp, pair[1].timestamp);
        let mut segment: Vec<TripTelemetry> = bucket
            .iter()
            .filter(|p| p.timestamp >= start && p.timestamp < end)
            .cloned()
            .collect();
        segment.sort_by_key(|p| p.timestamp);
        segments.push(segment);
    }
    segments
}
