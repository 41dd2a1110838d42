//! Telemetry-to-trip matching
//!
//! Telemetry carries no trip id. A point belongs to the most recently
//! started open trip that had already begun when the point was
//! recorded; anything else is an orphan.

use crate::state::TripEventMap;
use crate::types::Timestamp;
use uuid::Uuid;

/// Resolve which open trip a telemetry point recorded at `at` belongs
/// to.
///
/// Each trip's start is its earliest trip_start/trip_enter timestamp;
/// the winner is the trip with the greatest start `<= at`. Trips whose
/// buckets hold no start-class event yet are skipped. When several
/// trips share the winning start timestamp the lexicographically
/// smallest trip id wins — the map iterates in trip-id order and a
/// candidate only replaces the current best on a strictly greater
/// start.
pub fn resolve_trip(trips: &TripEventMap, at: Timestamp) -> Option<Uuid> {
    let mut best: Option<(Timestamp, Uuid)> = None;
    for (trip_id, events) in trips {
        let start = events
            .iter()
            .filter(|e| e.event_type.starts_trip())
            .map(|e| e.timestamp)
            .min();
        let Some(start) = start else {
            continue;
        };
        if start > at {
            continue;
        }
        if best.map_or(true, |(best_start, _)| start > best_start) {
            best = Some((start, *trip_id));
        }
    }
    best.map(|(_, trip_id)| trip_id)
}
