//! Tripflow Core Pipeline
//!
//! This crate turns provider event/telemetry streams into:
//! - A live per-device state snapshot (monotonic, duplicate-safe merge)
//! - Trip buckets binding events and untagged telemetry per trip
//! - Finalized trip records with duration/distance/violation metrics
//!
//! The transport is at-least-once and unordered; the quality gate and
//! atomic store operations are what keep state correct anyway.

pub mod annotate;
pub mod config;
pub mod finalizer;
pub mod geo;
pub mod matcher;
pub mod metrics;
pub mod pipeline;
pub mod quality;
pub mod state;
pub mod storage;
pub mod store;
pub mod types;

pub use annotate::{Annotator, NullAnnotator};
pub use config::{FinalizerConfig, SlaConfig};
pub use finalizer::{SweepSummary, TripFinalizer};
pub use metrics::MetricsAggregator;
pub use pipeline::{Pipeline, ProcessOutcome, TripBinding};
pub use quality::Classification;
pub use state::{DeviceState, FinalizedTrip};
pub use store::{MergeOutcome, StateStore, StoreError, TripStore};
pub use types::{DeviceKey, InboundEvent, InboundMessage, InboundTelemetry, Timestamp};
