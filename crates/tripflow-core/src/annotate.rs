//! Geofence annotation seam
//!
//! Annotation itself (polygon evaluation) lives outside this crate; the
//! pipeline only needs a pure function from a GPS fix to an opaque
//! descriptor plus the version of the geography it was computed against.

use crate::types::GpsPoint;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("annotation failed for ({lat}, {lng}): {reason}")]
    Failed { lat: f64, lng: f64, reason: String },
}

/// Pure geofence annotation function.
///
/// Implementations must be side-effect free; the pipeline calls
/// `annotate` synchronously for every message carrying a GPS fix and
/// fails the message if annotation fails. No unannotated state is ever
/// persisted.
pub trait Annotator: Send + Sync {
    fn annotate(&self, gps: &GpsPoint) -> Result<serde_json::Value, AnnotationError>;

    /// Version of the geography data backing `annotate`.
    fn version(&self) -> u32;
}

/// Annotator that stamps an empty descriptor. Useful for wiring and
/// tests when no geography is loaded.
pub struct NullAnnotator {
    version: u32,
}

impl NullAnnotator {
    pub fn new(version: u32) -> Self {
        Self { version }
    }
}

impl Default for NullAnnotator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Annotator for NullAnnotator {
    fn annotate(&self, _gps: &GpsPoint) -> Result<serde_json::Value, AnnotationError> {
        Ok(serde_json::Value::Object(serde_json::Map::new()))
    }

    fn version(&self) -> u32 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_annotator() {
        let annotator = NullAnnotator::new(3);
        let gps = GpsPoint {
            lat: 34.0,
            lng: -118.0,
        };
        let annotation = annotator.annotate(&gps).unwrap();
        assert!(annotation.as_object().unwrap().is_empty());
        assert_eq!(annotator.version(), 3);
    }
}
