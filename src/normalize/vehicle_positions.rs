//! Vehicle position pings into normalized move / stop events.

use super::{NormalizedEvent, event_shell};
use crate::service_time::{parse_start_date, seconds_after_midnight, service_date_for_unix};
use crate::static_lookup::resolve_parent_station;
use ahash::AHashMap;
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Deserialize;

/// One raw position ping, already flattened to tabular form by the ingest
/// side. Every field is optional on the wire; validation fails closed.
#[derive(Clone, Debug, Deserialize)]
pub struct RawVehiclePosition {
    pub current_status: Option<String>,
    pub current_stop_sequence: Option<i64>,
    pub stop_id: Option<String>,
    pub vehicle_timestamp: Option<i64>,
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub direction_id: Option<i64>,
    pub start_date: Option<String>,
    pub start_time: Option<String>,
    pub vehicle_id: Option<String>,
    pub vehicle_label: Option<String>,
    pub vehicle_consist: Option<String>,
}

enum MovementState {
    Moving,
    StoppedAt,
}

fn movement_state(status: &str) -> Option<MovementState> {
    match status {
        "IN_TRANSIT_TO" | "INCOMING_AT" => Some(MovementState::Moving),
        "STOPPED_AT" => Some(MovementState::StoppedAt),
        _ => None,
    }
}

struct ValidPing {
    service_date: NaiveDate,
    route_id: String,
    trip_id: String,
    direction_id: bool,
    start_time: u32,
    vehicle_id: String,
    vehicle_label: Option<String>,
    vehicle_consist: Option<String>,
    stop_sequence: i32,
    stop_id: String,
    state: MovementState,
    timestamp: i64,
}

/// Validate one ping, dropping it when any identity field is missing or a
/// placeholder. Only the start date may be backfilled, from the ping's own
/// wall clock timestamp.
fn validate_ping(ping: RawVehiclePosition, tz: Tz) -> Option<ValidPing> {
    let timestamp = ping.vehicle_timestamp?;
    let state = movement_state(ping.current_status.as_deref()?)?;

    let route_id = ping.route_id.filter(|r| !r.is_empty())?;
    let trip_id = ping.trip_id.filter(|t| !t.is_empty())?;
    let vehicle_id = ping.vehicle_id.filter(|v| !v.is_empty())?;
    let stop_id = ping.stop_id.filter(|s| !s.is_empty())?;

    let direction_id = match ping.direction_id? {
        0 => false,
        1 => true,
        _ => return None,
    };

    let stop_sequence = i32::try_from(ping.current_stop_sequence?).ok()?;
    if stop_sequence < 1 {
        return None;
    }

    let start_time = seconds_after_midnight(ping.start_time.as_deref()?).ok()?;

    let service_date = ping
        .start_date
        .as_deref()
        .and_then(parse_start_date)
        .or_else(|| service_date_for_unix(timestamp, tz))?;

    Some(ValidPing {
        service_date,
        route_id,
        trip_id,
        direction_id,
        start_time,
        vehicle_id,
        vehicle_label: ping.vehicle_label,
        vehicle_consist: ping.vehicle_consist,
        stop_sequence,
        stop_id,
        state,
        timestamp,
    })
}

/// Collapse raw pings into one event per (trip, stop): the earliest moving
/// timestamp becomes vp_move_timestamp, the earliest stopped-at timestamp
/// becomes vp_stop_timestamp. A group can have one, the other, or both.
pub fn normalize_vehicle_positions(
    raw: Vec<RawVehiclePosition>,
    parent_stations: &AHashMap<String, String>,
    static_version_key: i64,
    tz: Tz,
) -> Vec<NormalizedEvent> {
    let mut events: AHashMap<String, NormalizedEvent> = AHashMap::new();

    for ping in raw {
        let Some(ping) = validate_ping(ping, tz) else {
            continue;
        };

        let parent_station = resolve_parent_station(parent_stations, &ping.stop_id);

        let shell = event_shell(
            ping.service_date,
            ping.route_id,
            ping.trip_id,
            ping.direction_id,
            Some(ping.start_time),
            ping.vehicle_id,
            ping.stop_sequence,
            ping.stop_id,
            parent_station,
            static_version_key,
        );

        let event = events
            .entry(shell.trip_stop_hash.clone())
            .or_insert(shell);

        match ping.state {
            MovementState::Moving => {
                event.vp_move_timestamp = Some(match event.vp_move_timestamp {
                    Some(existing) => existing.min(ping.timestamp),
                    None => ping.timestamp,
                });
            }
            MovementState::StoppedAt => {
                event.vp_stop_timestamp = Some(match event.vp_stop_timestamp {
                    Some(existing) => existing.min(ping.timestamp),
                    None => ping.timestamp,
                });
            }
        }

        if event.vehicle_label.is_none() {
            event.vehicle_label = ping.vehicle_label;
        }
        if event.vehicle_consist.is_none() {
            event.vehicle_consist = ping.vehicle_consist;
        }
    }

    let mut out: Vec<NormalizedEvent> = events.into_values().collect();
    out.sort_by(|a, b| {
        (&a.trip_id, a.stop_sequence).cmp(&(&b.trip_id, b.stop_sequence))
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;

    fn ping(status: &str, timestamp: i64) -> RawVehiclePosition {
        RawVehiclePosition {
            current_status: Some(status.to_string()),
            current_stop_sequence: Some(40),
            stop_id: Some("70061".to_string()),
            vehicle_timestamp: Some(timestamp),
            trip_id: Some("61348621".to_string()),
            route_id: Some("Red".to_string()),
            direction_id: Some(0),
            start_date: Some("20240615".to_string()),
            start_time: Some("10:00:00".to_string()),
            vehicle_id: Some("R-5463D359".to_string()),
            vehicle_label: Some("1823".to_string()),
            vehicle_consist: None,
        }
    }

    fn parents() -> AHashMap<String, String> {
        [("70061".to_string(), "place-alfcl".to_string())].into()
    }

    #[test]
    fn moving_and_stopped_pings_collapse_to_one_event() {
        let events = normalize_vehicle_positions(
            vec![ping("IN_TRANSIT_TO", 100), ping("STOPPED_AT", 160)],
            &parents(),
            7,
            New_York,
        );

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].vp_move_timestamp, Some(100));
        assert_eq!(events[0].vp_stop_timestamp, Some(160));
        assert_eq!(events[0].tu_stop_timestamp, None);
        assert_eq!(events[0].parent_station, "place-alfcl");
    }

    #[test]
    fn earliest_timestamp_wins_within_a_state() {
        let events = normalize_vehicle_positions(
            vec![
                ping("IN_TRANSIT_TO", 130),
                ping("IN_TRANSIT_TO", 100),
                ping("STOPPED_AT", 200),
                ping("STOPPED_AT", 160),
            ],
            &parents(),
            7,
            New_York,
        );

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].vp_move_timestamp, Some(100));
        assert_eq!(events[0].vp_stop_timestamp, Some(160));
    }

    #[test]
    fn incoming_at_counts_as_moving() {
        let events =
            normalize_vehicle_positions(vec![ping("INCOMING_AT", 90)], &parents(), 7, New_York);

        assert_eq!(events[0].vp_move_timestamp, Some(90));
        assert_eq!(events[0].vp_stop_timestamp, None);
    }

    #[test]
    fn invalid_rows_are_dropped_not_defaulted() {
        let missing_route = RawVehiclePosition {
            route_id: None,
            ..ping("STOPPED_AT", 100)
        };
        let bad_direction = RawVehiclePosition {
            direction_id: Some(5),
            ..ping("STOPPED_AT", 100)
        };
        let zero_sequence = RawVehiclePosition {
            current_stop_sequence: Some(0),
            ..ping("STOPPED_AT", 100)
        };
        let no_start_time = RawVehiclePosition {
            start_time: None,
            ..ping("STOPPED_AT", 100)
        };
        let unknown_status = RawVehiclePosition {
            current_status: Some("TELEPORTING".to_string()),
            ..ping("STOPPED_AT", 100)
        };

        let events = normalize_vehicle_positions(
            vec![
                missing_route,
                bad_direction,
                zero_sequence,
                no_start_time,
                unknown_status,
            ],
            &parents(),
            7,
            New_York,
        );

        assert!(events.is_empty());
    }

    #[test]
    fn missing_start_date_is_backfilled_from_timestamp() {
        // 2024-06-16 01:30 EDT belongs to service date 2024-06-15
        let row = RawVehiclePosition {
            start_date: None,
            ..ping("STOPPED_AT", 1718515800)
        };

        let events = normalize_vehicle_positions(vec![row], &parents(), 7, New_York);

        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].service_date,
            chrono::NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
        );
    }

    #[test]
    fn unknown_stop_is_its_own_parent_station() {
        let row = RawVehiclePosition {
            stop_id: Some("9901".to_string()),
            ..ping("STOPPED_AT", 100)
        };

        let events = normalize_vehicle_positions(vec![row], &parents(), 7, New_York);

        assert_eq!(events[0].parent_station, "9901");
    }
}
