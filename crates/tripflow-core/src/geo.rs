//! Great-circle distance over trip telemetry

use crate::state::TripTelemetry;
use crate::types::GpsPoint;

/// Earth's mean radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two fixes, meters.
pub fn haversine(a: GpsPoint, b: GpsPoint) -> f64 {
    let (lat1, lng1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lng2) = (b.lat.to_radians(), b.lng.to_radians());
    let (dlat, dlng) = (lat2 - lat1, lng2 - lng1);
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Route measurement over segmented trip telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMeasure {
    /// Total distance in meters.
    pub distance: f64,
    /// Every successive point-to-point leg, in traversal order.
    pub legs: Vec<f64>,
}

/// Chain point-to-point distances across all segments, anchored at the
/// trip-start fix. The anchor carries across segment boundaries, so a
/// point at the head of segment N measures from the tail of segment
/// N-1. Points without coordinates are skipped without breaking the
/// chain.
pub fn measure_route(segments: &[Vec<TripTelemetry>], start: GpsPoint) -> RouteMeasure {
    let mut anchor = start;
    let mut distance = 0.0;
    let mut legs = Vec::new();
    for segment in segments {
        for point in segment {
            let (Some(lat), Some(lng)) = (point.latitude, point.longitude) else {
                continue;
            };
            let fix = GpsPoint { lat, lng };
            let leg = haversine(anchor, fix);
            distance += leg;
            legs.push(leg);
            anchor = fix;
        }
    }
    RouteMeasure { distance, legs }
}
