//! Trip update predictions into normalized arrival events.

use super::{NormalizedEvent, event_shell};
use crate::service_time::{parse_start_date, seconds_after_midnight, service_date_for_unix};
use crate::static_lookup::resolve_parent_station;
use ahash::AHashMap;
use chrono_tz::Tz;
use serde::Deserialize;

/// A prediction is only useful as a near-final arrival estimate. Anything
/// further out than this ahead of the message timestamp is dropped.
pub const PREDICTION_HORIZON_SECONDS: i64 = 120;

#[derive(Clone, Debug, Deserialize)]
pub struct RawTripUpdate {
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub direction_id: Option<i64>,
    pub start_date: Option<String>,
    pub start_time: Option<String>,
    pub vehicle_id: Option<String>,
    pub feed_timestamp: Option<i64>,
    pub stop_time_updates: Vec<RawStopPrediction>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RawStopPrediction {
    pub stop_id: Option<String>,
    pub stop_sequence: Option<i64>,
    pub arrival_time: Option<i64>,
}

/// Explode trip updates into one event per predicted stop, keeping only
/// predictions that are ahead of the message timestamp but within the
/// horizon, and only the most recent message per (trip, stop).
pub fn normalize_trip_updates(
    raw: Vec<RawTripUpdate>,
    parent_stations: &AHashMap<String, String>,
    static_version_key: i64,
    tz: Tz,
) -> Vec<NormalizedEvent> {
    // hash -> (event, message timestamp that produced it)
    let mut events: AHashMap<String, (NormalizedEvent, i64)> = AHashMap::new();

    for update in raw {
        let Some(feed_timestamp) = update.feed_timestamp else {
            continue;
        };

        let Some(route_id) = update.route_id.filter(|r| !r.is_empty()) else {
            continue;
        };
        let Some(trip_id) = update.trip_id.filter(|t| !t.is_empty()) else {
            continue;
        };
        let Some(vehicle_id) = update.vehicle_id.filter(|v| !v.is_empty()) else {
            continue;
        };

        let direction_id = match update.direction_id {
            Some(0) => false,
            Some(1) => true,
            _ => continue,
        };

        // unlike position pings, a missing start time is tolerated here and
        // backfilled later by the trip resolver
        let start_time = update
            .start_time
            .as_deref()
            .and_then(|t| seconds_after_midnight(t).ok());

        let Some(service_date) = update
            .start_date
            .as_deref()
            .and_then(parse_start_date)
            .or_else(|| service_date_for_unix(feed_timestamp, tz))
        else {
            continue;
        };

        for prediction in update.stop_time_updates {
            let Some(arrival_time) = prediction.arrival_time else {
                continue;
            };

            // stale, or too speculative to treat as a final arrival
            if arrival_time < feed_timestamp
                || arrival_time > feed_timestamp + PREDICTION_HORIZON_SECONDS
            {
                continue;
            }

            let Some(stop_id) = prediction.stop_id.filter(|s| !s.is_empty()) else {
                continue;
            };
            let Some(stop_sequence) = prediction
                .stop_sequence
                .and_then(|s| i32::try_from(s).ok())
                .filter(|s| *s >= 1)
            else {
                continue;
            };

            let parent_station = resolve_parent_station(parent_stations, &stop_id);

            let mut event = event_shell(
                service_date,
                route_id.clone(),
                trip_id.clone(),
                direction_id,
                start_time,
                vehicle_id.clone(),
                stop_sequence,
                stop_id,
                parent_station,
                static_version_key,
            );
            event.tu_stop_timestamp = Some(arrival_time);

            match events.entry(event.trip_stop_hash.clone()) {
                std::collections::hash_map::Entry::Vacant(vacant) => {
                    vacant.insert((event, feed_timestamp));
                }
                std::collections::hash_map::Entry::Occupied(mut occupied) => {
                    if feed_timestamp > occupied.get().1 {
                        occupied.insert((event, feed_timestamp));
                    }
                }
            }
        }
    }

    let mut out: Vec<NormalizedEvent> = events.into_values().map(|(event, _)| event).collect();
    out.sort_by(|a, b| {
        (&a.trip_id, a.stop_sequence).cmp(&(&b.trip_id, b.stop_sequence))
    });
    out
}
