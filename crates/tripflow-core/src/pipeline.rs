//! Message processing pipeline
//!
//! One entry point per message type, invoked once per inbound message
//! by any number of concurrent workers. Flow: quality gate → monotonic
//! state merge → trip event binding or telemetry matching → durable
//! history row. The caller acknowledges the message only after `Ok`,
//! including intentional rejects.

use crate::annotate::{AnnotationError, Annotator};
use crate::matcher;
use crate::quality::{classify, Classification};
use crate::state::{DeviceState, TripEvent, TripTelemetry};
use crate::store::{
    MergeOutcome, RejectionKind, StateStore, StoreError, TelemetryAppend, TripStore,
};
use crate::types::{InboundEvent, InboundMessage, InboundTelemetry};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Processing failure. Both variants are transient from the broker's
/// point of view: nothing was acknowledged, the message is redelivered.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Annotation(#[from] AnnotationError),
}

/// What happened to an accepted message's trip attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripBinding {
    /// Event appended to a trip event bucket.
    Event,
    /// Telemetry matched an open trip and joined its bucket.
    Telemetry,
    /// Telemetry matched no open trip; logged, counted, dropped.
    Orphaned,
    /// Message had no trip to bind to (non-trip event).
    None,
}

/// Observable outcome of processing one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Accepted {
        merge: MergeOutcome,
        binding: TripBinding,
    },
    Rejected(Classification),
}

/// The ingestion pipeline. Cheap to clone behind `Arc`s; safe to share
/// across workers because every state mutation is an atomic store
/// operation.
pub struct Pipeline {
    state: Arc<dyn StateStore>,
    trips: Arc<dyn TripStore>,
    annotator: Arc<dyn Annotator>,
}

impl Pipeline {
    pub fn new(
        state: Arc<dyn StateStore>,
        trips: Arc<dyn TripStore>,
        annotator: Arc<dyn Annotator>,
    ) -> Self {
        Self {
            state,
            trips,
            annotator,
        }
    }

    /// Process one inbound message of either type.
    pub async fn process(
        &self,
        message: InboundMessage,
    ) -> Result<ProcessOutcome, PipelineError> {
        let key = message.key();
        let current = self.state.device_state(&key).await?;

        // Open trips are only consulted for continuation events; the
        // gate never needs them otherwise.
        let open_trips = match &message {
            InboundMessage::Event(e) if e.event_type.is_trip_continuation() => {
                self.state.trip_events(&key).await?
            }
            _ => None,
        };

        let classification = classify(&message, current.as_ref(), open_trips.as_ref());
        if let Some(kind) = classification.rejection_kind() {
            self.state
                .record_rejection(message.provider_id(), kind)
                .await?;
            debug!(
                "rejected {} message for {key} at {}",
                classification,
                message.timestamp()
            );
            return Ok(ProcessOutcome::Rejected(classification));
        }

        match message {
            InboundMessage::Event(event) => self.apply_event(event).await,
            InboundMessage::Telemetry(telemetry) => self.apply_telemetry(telemetry).await,
        }
    }

    /// Process a vehicle lifecycle event.
    pub async fn process_event(
        &self,
        event: InboundEvent,
    ) -> Result<ProcessOutcome, PipelineError> {
        self.process(InboundMessage::Event(event)).await
    }

    /// Process a telemetry sample.
    pub async fn process_telemetry(
        &self,
        telemetry: InboundTelemetry,
    ) -> Result<ProcessOutcome, PipelineError> {
        self.process(InboundMessage::Telemetry(telemetry)).await
    }

    async fn apply_event(&self, event: InboundEvent) -> Result<ProcessOutcome, PipelineError> {
        let key = event.key();

        // Fail closed: no unannotated state is ever persisted.
        let annotation = match &event.telemetry {
            Some(t) => Some(self.annotator.annotate(&t.gps)?),
            None => None,
        };
        let annotation_version = self.annotator.version();

        let state_row = DeviceState::from_event(&event, annotation.clone(), annotation_version);
        let merge = self.state.merge_device_state(state_row.clone()).await?;

        let binding = if event.event_type.is_trip_event() {
            match event.trip_id {
                Some(trip_id) => {
                    let trip_event = TripEvent {
                        vehicle_type: event.vehicle_type,
                        timestamp: event.timestamp,
                        event_type: event.event_type.clone(),
                        event_type_reason: event.event_type_reason.clone(),
                        gps: event.telemetry.as_ref().map(|t| t.gps),
                        service_area_id: event.service_area_id,
                        annotation: annotation.clone(),
                        annotation_version,
                    };
                    self.state
                        .append_trip_event(&key, trip_id, trip_event)
                        .await?;

                    // An event-borne GPS fix belongs to the trip's route
                    // as well; the append is idempotent on timestamp.
                    if let Some(t) = &event.telemetry {
                        let point = TripTelemetry {
                            timestamp: event.timestamp,
                            latitude: Some(t.gps.lat),
                            longitude: Some(t.gps.lng),
                            service_area_id: event.service_area_id,
                            annotation: annotation.clone(),
                            annotation_version,
                        };
                        self.state
                            .append_trip_telemetry(&key, trip_id, point)
                            .await?;
                    }
                    TripBinding::Event
                }
                None => {
                    warn!(
                        "trip event {} for {key} carries no trip_id; state merged, not bound",
                        event.event_type
                    );
                    TripBinding::None
                }
            }
        } else {
            TripBinding::None
        };

        self.trips.insert_device_state(state_row).await?;
        Ok(ProcessOutcome::Accepted { merge, binding })
    }

    async fn apply_telemetry(
        &self,
        telemetry: InboundTelemetry,
    ) -> Result<ProcessOutcome, PipelineError> {
        let key = telemetry.key();

        let annotation = Some(self.annotator.annotate(&telemetry.gps)?);
        let annotation_version = self.annotator.version();

        let state_row =
            DeviceState::from_telemetry(&telemetry, annotation.clone(), annotation_version);
        let merge = self.state.merge_device_state(state_row.clone()).await?;

        let open_trips = self.state.trip_events(&key).await?;
        let resolved = open_trips
            .as_ref()
            .and_then(|trips| matcher::resolve_trip(trips, telemetry.timestamp));

        let binding = match resolved {
            Some(trip_id) => {
                let point = TripTelemetry {
                    timestamp: telemetry.timestamp,
                    latitude: Some(telemetry.gps.lat),
                    longitude: Some(telemetry.gps.lng),
                    service_area_id: None,
                    annotation,
                    annotation_version,
                };
                match self
                    .state
                    .append_trip_telemetry(&key, trip_id, point)
                    .await?
                {
                    TelemetryAppend::Appended => {
                        debug!("telemetry at {} joined trip {trip_id}", telemetry.timestamp);
                    }
                    TelemetryAppend::DuplicateTimestamp => {
                        debug!(
                            "telemetry at {} already present on trip {trip_id}",
                            telemetry.timestamp
                        );
                    }
                }
                TripBinding::Telemetry
            }
            None => {
                warn!(
                    "telemetry for {key} at {} matched no open trip; dropped",
                    telemetry.timestamp
                );
                self.state
                    .record_rejection(telemetry.provider_id, RejectionKind::OrphanedTelemetry)
                    .await?;
                TripBinding::Orphaned
            }
        };

        self.trips.insert_device_state(state_row).await?;
        Ok(ProcessOutcome::Accepted { merge, binding })
    }
}
