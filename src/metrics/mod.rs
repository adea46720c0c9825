//! Performance metrics over merged, trip-resolved events.
//!
//! Travel time, dwell time, and trunk/branch headways are recomputed per
//! service date whenever a batch touched it, as pure passes over ordered
//! event sequences. Only rows whose metric values actually changed are
//! written back.

pub mod seq;

use crate::error::HeadwayError;
use crate::models;
use crate::schema::perf::vehicle_events as vehicle_events_pg_schema;
use crate::schema::perf::vehicle_trips as vehicle_trips_pg_schema;
use ahash::AHashMap;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use seq::{lag_within, lead_within};

/// Gaps longer than this are not real headways, just service gaps.
pub const HEADWAY_LOOKBACK_SECONDS: i64 = 6 * 60 * 60;

/// Branch and trunk classification of one trip, for headway partitioning.
#[derive(Clone, Debug)]
pub struct TripFamilyInfo {
    pub branch_route_id: Option<String>,
    pub trunk_route_id: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetricUpdate {
    pub trip_stop_hash: String,
    pub travel_time_seconds: Option<i32>,
    pub dwell_time_seconds: Option<i32>,
    pub headway_trunk_seconds: Option<i32>,
    pub headway_branch_seconds: Option<i32>,
}

fn stop_timestamp(event: &models::VehicleEvent) -> Option<i64> {
    event.vp_stop_timestamp.or(event.tu_stop_timestamp)
}

fn positive_i32(duration: i64) -> Option<i32> {
    (duration > 0).then_some(duration as i32)
}

fn positive_headway(duration: i64) -> Option<i32> {
    (duration > 0 && duration <= HEADWAY_LOOKBACK_SECONDS).then_some(duration as i32)
}

struct HeadwayRecord {
    key: (String, String, bool),
    departure: i64,
    event_index: usize,
}

fn headways_for(records: &mut Vec<HeadwayRecord>, out: &mut [Option<i32>]) {
    records.sort_by(|a, b| {
        a.key
            .cmp(&b.key)
            .then(a.departure.cmp(&b.departure))
            .then(a.event_index.cmp(&b.event_index))
    });

    let previous = lag_within(records, |r| r.key.clone(), |r| Some(r.departure));

    for (record, previous_departure) in records.iter().zip(previous) {
        if let Some(previous_departure) = previous_departure {
            out[record.event_index] = positive_headway(record.departure - previous_departure);
        }
    }
}

/// Derive all three metrics for a service date's events. Returns updates
/// only for events whose stored metric values differ from the computed
/// ones.
pub fn compute_metrics(
    events: &[models::VehicleEvent],
    families: &AHashMap<i64, TripFamilyInfo>,
) -> Vec<MetricUpdate> {
    // one global order by (trip, stop_sequence); trips are the partitions
    let mut ordered: Vec<usize> = (0..events.len()).collect();
    ordered.sort_by_key(|&index| (events[index].pm_trip_id, events[index].stop_sequence));

    let trip_of = |index: &usize| events[*index].pm_trip_id;

    // departure from a station is the move toward the trip's next station
    let next_moves = lead_within(&ordered, trip_of, |index| events[*index].vp_move_timestamp);
    let has_previous = lag_within(&ordered, trip_of, |_| Some(1));
    let has_next = lead_within(&ordered, trip_of, |_| Some(1));

    let mut departure: Vec<Option<i64>> = vec![None; events.len()];
    let mut first_of_trip: Vec<bool> = vec![false; events.len()];
    let mut last_of_trip: Vec<bool> = vec![false; events.len()];

    for (position, &index) in ordered.iter().enumerate() {
        departure[index] = next_moves[position];
        first_of_trip[index] = has_previous[position].is_none();
        last_of_trip[index] = has_next[position].is_none();
    }

    // layover lookup: stop timestamps per (vehicle, station), across trips
    let mut stops_by_vehicle_station: AHashMap<(&str, &str), Vec<(i64, i64)>> = AHashMap::new();
    for event in events {
        if let Some(stop_ts) = stop_timestamp(event) {
            stops_by_vehicle_station
                .entry((event.vehicle_id.as_str(), event.parent_station.as_str()))
                .or_default()
                .push((stop_ts, event.pm_trip_id));
        }
    }

    let mut headway_trunk: Vec<Option<i32>> = vec![None; events.len()];
    let mut headway_branch: Vec<Option<i32>> = vec![None; events.len()];
    let mut trunk_records: Vec<HeadwayRecord> = Vec::new();
    let mut branch_records: Vec<HeadwayRecord> = Vec::new();

    for (index, event) in events.iter().enumerate() {
        // single-stop trips are likely noise, never a headway participant
        if first_of_trip[index] && last_of_trip[index] {
            continue;
        }

        let (Some(departure), Some(family)) =
            (departure[index], families.get(&event.pm_trip_id))
        else {
            continue;
        };

        trunk_records.push(HeadwayRecord {
            key: (
                event.parent_station.clone(),
                family.trunk_route_id.clone(),
                event.direction_id,
            ),
            departure,
            event_index: index,
        });

        if let Some(branch) = &family.branch_route_id {
            branch_records.push(HeadwayRecord {
                key: (event.parent_station.clone(), branch.clone(), event.direction_id),
                departure,
                event_index: index,
            });
        }
    }

    headways_for(&mut trunk_records, &mut headway_trunk);
    headways_for(&mut branch_records, &mut headway_branch);

    let mut updates = Vec::new();

    for (index, event) in events.iter().enumerate() {
        let stop_ts = stop_timestamp(event);

        let travel = match (event.vp_move_timestamp, stop_ts) {
            (Some(moved), Some(stopped)) => positive_i32(stopped - moved),
            _ => None,
        };

        let dwell = if last_of_trip[index] {
            None
        } else if !first_of_trip[index] {
            match (departure[index], stop_ts) {
                (Some(departed), Some(stopped)) => positive_i32(departed - stopped),
                _ => None,
            }
        } else {
            // layover: span from the previous trip's arrival at this
            // station by the same vehicle to this trip's first move
            departure[index].and_then(|departed| {
                stops_by_vehicle_station
                    .get(&(event.vehicle_id.as_str(), event.parent_station.as_str()))
                    .and_then(|arrivals| {
                        arrivals
                            .iter()
                            .filter(|(arrival, trip)| {
                                *trip != event.pm_trip_id && *arrival < departed
                            })
                            .map(|(arrival, _)| *arrival)
                            .max()
                    })
                    .and_then(|arrival| positive_i32(departed - arrival))
            })
        };

        let update = MetricUpdate {
            trip_stop_hash: event.trip_stop_hash.clone(),
            travel_time_seconds: travel,
            dwell_time_seconds: dwell,
            headway_trunk_seconds: headway_trunk[index],
            headway_branch_seconds: headway_branch[index],
        };

        let unchanged = update.travel_time_seconds == event.travel_time_seconds
            && update.dwell_time_seconds == event.dwell_time_seconds
            && update.headway_trunk_seconds == event.headway_trunk_seconds
            && update.headway_branch_seconds == event.headway_branch_seconds;

        if !unchanged {
            updates.push(update);
        }
    }

    updates.sort_by(|a, b| a.trip_stop_hash.cmp(&b.trip_stop_hash));
    updates
}

/// Recompute metrics for a service date if any of its events changed
/// since the watermark.
pub async fn update_metrics(
    conn: &mut AsyncPgConnection,
    service_date: NaiveDate,
    since: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<usize, HeadwayError> {
    let changed: i64 = vehicle_events_pg_schema::table
        .filter(vehicle_events_pg_schema::dsl::service_date.eq(service_date))
        .filter(vehicle_events_pg_schema::dsl::updated_on.gt(since))
        .count()
        .get_result(conn)
        .await?;

    if changed == 0 {
        return Ok(0);
    }

    let events = vehicle_events_pg_schema::table
        .filter(vehicle_events_pg_schema::dsl::service_date.eq(service_date))
        .select(models::VehicleEvent::as_select())
        .load::<models::VehicleEvent>(conn)
        .await?;

    let families: AHashMap<i64, TripFamilyInfo> = vehicle_trips_pg_schema::table
        .filter(vehicle_trips_pg_schema::dsl::service_date.eq(service_date))
        .select((
            vehicle_trips_pg_schema::dsl::pm_trip_id,
            vehicle_trips_pg_schema::dsl::branch_route_id,
            vehicle_trips_pg_schema::dsl::trunk_route_id,
        ))
        .load::<(i64, Option<String>, String)>(conn)
        .await?
        .into_iter()
        .map(|(pm_trip_id, branch_route_id, trunk_route_id)| {
            (
                pm_trip_id,
                TripFamilyInfo {
                    branch_route_id,
                    trunk_route_id,
                },
            )
        })
        .collect();

    let updates = compute_metrics(&events, &families);
    let mut written = 0;

    for update in &updates {
        written += diesel::update(
            vehicle_events_pg_schema::table
                .filter(vehicle_events_pg_schema::dsl::trip_stop_hash.eq(&update.trip_stop_hash)),
        )
        .set((
            vehicle_events_pg_schema::dsl::travel_time_seconds.eq(update.travel_time_seconds),
            vehicle_events_pg_schema::dsl::dwell_time_seconds.eq(update.dwell_time_seconds),
            vehicle_events_pg_schema::dsl::headway_trunk_seconds.eq(update.headway_trunk_seconds),
            vehicle_events_pg_schema::dsl::headway_branch_seconds
                .eq(update.headway_branch_seconds),
            vehicle_events_pg_schema::dsl::updated_on.eq(now),
        ))
        .execute(conn)
        .await?;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn event(
        trip: i64,
        vehicle: &str,
        seq: i32,
        station: &str,
        vp_move: Option<i64>,
        vp_stop: Option<i64>,
    ) -> models::VehicleEvent {
        models::VehicleEvent {
            trip_stop_hash: format!("{}-{}", trip, seq),
            service_date: NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            pm_trip_id: trip,
            route_id: "Red".to_string(),
            trip_id: format!("t{}", trip),
            direction_id: false,
            start_time: Some(36000),
            vehicle_id: vehicle.to_string(),
            stop_sequence: seq,
            stop_id: station.to_string(),
            parent_station: station.to_string(),
            static_version_key: 7,
            vp_move_timestamp: vp_move,
            vp_stop_timestamp: vp_stop,
            tu_stop_timestamp: None,
            travel_time_seconds: None,
            dwell_time_seconds: None,
            headway_trunk_seconds: None,
            headway_branch_seconds: None,
            canonical_stop_sequence: None,
            sync_stop_sequence: None,
            previous_event_hash: None,
            next_event_hash: None,
            updated_on: DateTime::from_timestamp(0, 0).unwrap(),
        }
    }

    fn red_family() -> TripFamilyInfo {
        TripFamilyInfo {
            branch_route_id: Some("Red-A".to_string()),
            trunk_route_id: "Red".to_string(),
        }
    }

    fn find<'a>(updates: &'a [MetricUpdate], hash: &str) -> &'a MetricUpdate {
        updates.iter().find(|u| u.trip_stop_hash == hash).unwrap()
    }

    #[test]
    fn travel_time_requires_stop_after_move() {
        let events = vec![
            event(1, "v1", 10, "a", Some(100), Some(160)),
            event(1, "v1", 20, "b", Some(300), Some(280)),
        ];

        let updates = compute_metrics(&events, &AHashMap::new());

        assert_eq!(find(&updates, "1-10").travel_time_seconds, Some(60));
        // stopped before it moved, invalid and excluded; with every metric
        // null and the stored row already null, no update is planned at all
        assert!(!updates.iter().any(|u| u.trip_stop_hash == "1-20"));
    }

    #[test]
    fn dwell_spans_stop_to_next_move() {
        let events = vec![
            event(1, "v1", 10, "a", Some(100), Some(160)),
            event(1, "v1", 20, "b", Some(200), Some(260)),
            event(1, "v1", 30, "c", Some(320), Some(400)),
        ];

        let updates = compute_metrics(&events, &AHashMap::new());

        // middle stop: next move at 320, stopped at 260
        assert_eq!(find(&updates, "1-20").dwell_time_seconds, Some(60));
        // last stop has no departure
        assert_eq!(find(&updates, "1-30").dwell_time_seconds, None);
    }

    #[test]
    fn first_stop_dwell_is_the_layover_from_the_previous_trip() {
        let events = vec![
            // inbound trip ends at the terminal
            event(1, "v1", 10, "x", Some(700), Some(750)),
            event(1, "v1", 20, "term", Some(850), Some(900)),
            // outbound trip starts there 100 seconds later
            event(2, "v1", 10, "term", None, Some(990)),
            event(2, "v1", 20, "y", Some(1000), Some(1100)),
        ];

        let updates = compute_metrics(&events, &AHashMap::new());

        // from the inbound arrival at 900 to the outbound move at 1000
        assert_eq!(find(&updates, "2-10").dwell_time_seconds, Some(100));
    }

    #[test]
    fn headways_between_successive_vehicles_at_a_station() {
        let families: AHashMap<i64, TripFamilyInfo> =
            (1..=4).map(|trip| (trip, red_family())).collect();

        let mut events = Vec::new();
        for (trip, departure) in [(1i64, 1000i64), (2, 1300), (3, 1900), (4, 1900 + 7 * 3600)] {
            events.push(event(trip, &format!("v{}", trip), 10, "s", None, Some(departure - 40)));
            events.push(event(
                trip,
                &format!("v{}", trip),
                20,
                "next",
                Some(departure),
                Some(departure + 120),
            ));
        }

        let updates = compute_metrics(&events, &families);

        // the first visit has no predecessor, so its row stays untouched
        assert!(!updates.iter().any(|u| u.trip_stop_hash == "1-10"));
        assert_eq!(find(&updates, "2-10").headway_trunk_seconds, Some(300));
        assert_eq!(find(&updates, "3-10").headway_trunk_seconds, Some(600));
        // a seven hour gap is a service gap, not a headway
        assert!(!updates.iter().any(|u| u.trip_stop_hash == "4-10"));

        assert_eq!(find(&updates, "2-10").headway_branch_seconds, Some(300));
    }

    #[test]
    fn single_stop_trips_are_excluded_from_headways() {
        let families: AHashMap<i64, TripFamilyInfo> =
            (1..=3).map(|trip| (trip, red_family())).collect();

        let events = vec![
            event(1, "v1", 10, "s", None, Some(960)),
            event(1, "v1", 20, "next", Some(1000), Some(1120)),
            // one-stop ghost trip between the real ones
            event(2, "v2", 10, "s", Some(1100), Some(1150)),
            event(3, "v3", 10, "s", None, Some(1260)),
            event(3, "v3", 20, "next", Some(1300), Some(1420)),
        ];

        let updates = compute_metrics(&events, &families);

        assert_eq!(find(&updates, "3-10").headway_trunk_seconds, Some(300));
        assert!(!updates.iter().any(|u| u.trip_stop_hash == "2-10"
            && u.headway_trunk_seconds.is_some()));
    }

    #[test]
    fn unchanged_metrics_plan_no_update() {
        let mut first = event(1, "v1", 10, "a", Some(100), Some(160));
        first.travel_time_seconds = Some(60);
        let second = event(1, "v1", 20, "b", Some(200), None);

        let updates = compute_metrics(&vec![first, second], &AHashMap::new());

        assert!(!updates.iter().any(|u| u.trip_stop_hash == "1-10"));
    }

    #[test]
    fn branch_headways_skip_unclassified_trips() {
        let families: AHashMap<i64, TripFamilyInfo> = [
            (1, red_family()),
            (
                2,
                TripFamilyInfo {
                    branch_route_id: None,
                    trunk_route_id: "Red".to_string(),
                },
            ),
        ]
        .into();

        let events = vec![
            event(1, "v1", 10, "s", None, Some(960)),
            event(1, "v1", 20, "next", Some(1000), Some(1120)),
            event(2, "v2", 10, "s", None, Some(1260)),
            event(2, "v2", 20, "next", Some(1300), Some(1420)),
        ];

        let updates = compute_metrics(&events, &families);

        // trunk headway still connects them
        assert_eq!(find(&updates, "2-10").headway_trunk_seconds, Some(300));
        assert_eq!(find(&updates, "2-10").headway_branch_seconds, None);
    }
}
