//! Normalization of raw realtime rows into a common event shape.
//!
//! The vehicle position and trip update pipelines are independent, but
//! both end in a `NormalizedEvent` carrying the same identity fields and
//! the same trip-stop hash, which is what lets the merge engine recognize
//! an observation and a prediction as the same trip-stop.

pub mod trip_updates;
pub mod vehicle_positions;

use crate::identity_hash::{EventIdentity, hash_event_identity, pm_trip_key};
use chrono::NaiveDate;

#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedEvent {
    pub trip_stop_hash: String,
    pub service_date: NaiveDate,
    pub pm_trip_id: i64,
    pub route_id: String,
    pub trip_id: String,
    pub direction_id: bool,
    pub start_time: Option<u32>,
    pub vehicle_id: String,
    pub vehicle_label: Option<String>,
    pub vehicle_consist: Option<String>,
    pub stop_sequence: i32,
    pub stop_id: String,
    pub parent_station: String,
    pub static_version_key: i64,
    pub vp_move_timestamp: Option<i64>,
    pub vp_stop_timestamp: Option<i64>,
    pub tu_stop_timestamp: Option<i64>,
}

/// Identity-only constructor; the caller fills in whichever source
/// timestamps it has.
#[allow(clippy::too_many_arguments)]
pub(crate) fn event_shell(
    service_date: NaiveDate,
    route_id: String,
    trip_id: String,
    direction_id: bool,
    start_time: Option<u32>,
    vehicle_id: String,
    stop_sequence: i32,
    stop_id: String,
    parent_station: String,
    static_version_key: i64,
) -> NormalizedEvent {
    let identity = EventIdentity {
        service_date,
        route_id: route_id.clone(),
        trip_id: trip_id.clone(),
        direction_id,
        vehicle_id: vehicle_id.clone(),
        stop_sequence,
        parent_station: parent_station.clone(),
    };

    NormalizedEvent {
        trip_stop_hash: hash_event_identity(&identity),
        pm_trip_id: pm_trip_key(service_date, &route_id, &trip_id),
        service_date,
        route_id,
        trip_id,
        direction_id,
        start_time,
        vehicle_id,
        vehicle_label: None,
        vehicle_consist: None,
        stop_sequence,
        stop_id,
        parent_station,
        static_version_key,
        vp_move_timestamp: None,
        vp_stop_timestamp: None,
        tu_stop_timestamp: None,
    }
}

#[cfg(test)]
mod tests {
    use super::trip_updates::{RawStopPrediction, RawTripUpdate, normalize_trip_updates};
    use super::vehicle_positions::{RawVehiclePosition, normalize_vehicle_positions};
    use ahash::AHashMap;
    use chrono_tz::America::New_York;

    // the two pipelines must agree on the trip-stop hash for the same
    // identity, since the merge engine joins on it
    #[test]
    fn pipelines_produce_matching_hashes() {
        let parents: AHashMap<String, String> =
            [("70061".to_string(), "place-alfcl".to_string())].into();

        let ping = RawVehiclePosition {
            current_status: Some("STOPPED_AT".to_string()),
            current_stop_sequence: Some(40),
            stop_id: Some("70061".to_string()),
            vehicle_timestamp: Some(1718467200),
            trip_id: Some("61348621".to_string()),
            route_id: Some("Red".to_string()),
            direction_id: Some(0),
            start_date: Some("20240615".to_string()),
            start_time: Some("10:00:00".to_string()),
            vehicle_id: Some("R-5463D359".to_string()),
            vehicle_label: None,
            vehicle_consist: None,
        };

        let update = RawTripUpdate {
            trip_id: Some("61348621".to_string()),
            route_id: Some("Red".to_string()),
            direction_id: Some(0),
            start_date: Some("20240615".to_string()),
            start_time: Some("10:00:00".to_string()),
            vehicle_id: Some("R-5463D359".to_string()),
            feed_timestamp: Some(1718467190),
            stop_time_updates: vec![RawStopPrediction {
                stop_id: Some("70061".to_string()),
                stop_sequence: Some(40),
                arrival_time: Some(1718467250),
            }],
        };

        let vp_events =
            normalize_vehicle_positions(vec![ping], &parents, 7, New_York);
        let tu_events = normalize_trip_updates(vec![update], &parents, 7, New_York);

        assert_eq!(vp_events.len(), 1);
        assert_eq!(tu_events.len(), 1);
        assert_eq!(vp_events[0].trip_stop_hash, tu_events[0].trip_stop_hash);
        assert_eq!(vp_events[0].pm_trip_id, tu_events[0].pm_trip_id);
    }

    // predictions may arrive without a start time while position pings
    // always carry one; the key must not split over that difference
    #[test]
    fn hashes_agree_when_prediction_lacks_start_time() {
        let parents: AHashMap<String, String> =
            [("70061".to_string(), "place-alfcl".to_string())].into();

        let ping = RawVehiclePosition {
            current_status: Some("STOPPED_AT".to_string()),
            current_stop_sequence: Some(40),
            stop_id: Some("70061".to_string()),
            vehicle_timestamp: Some(1718467200),
            trip_id: Some("61348621".to_string()),
            route_id: Some("Red".to_string()),
            direction_id: Some(0),
            start_date: Some("20240615".to_string()),
            start_time: Some("10:00:00".to_string()),
            vehicle_id: Some("R-5463D359".to_string()),
            vehicle_label: None,
            vehicle_consist: None,
        };

        let update = RawTripUpdate {
            trip_id: Some("61348621".to_string()),
            route_id: Some("Red".to_string()),
            direction_id: Some(0),
            start_date: Some("20240615".to_string()),
            start_time: None,
            vehicle_id: Some("R-5463D359".to_string()),
            feed_timestamp: Some(1718467190),
            stop_time_updates: vec![RawStopPrediction {
                stop_id: Some("70061".to_string()),
                stop_sequence: Some(40),
                arrival_time: Some(1718467250),
            }],
        };

        let vp_events = normalize_vehicle_positions(vec![ping], &parents, 7, New_York);
        let tu_events = normalize_trip_updates(vec![update], &parents, 7, New_York);

        assert_eq!(vp_events[0].trip_stop_hash, tu_events[0].trip_stop_hash);
    }
}
