//! Trip identity resolution.
//!
//! Every merged event references a synthetic trip key. This module owns
//! the vehicle_trips table behind that key: seeding rows from merged
//! events, matching realtime trips to the static schedule (exact id first,
//! nearest start time as a lower-confidence backup), backfilling start
//! times, classifying branches, and wiring per-trip event adjacency.

use crate::error::HeadwayError;
use crate::merge::StagedBatch;
use crate::models;
use crate::schema::perf::vehicle_events as vehicle_events_pg_schema;
use crate::schema::perf::vehicle_trips as vehicle_trips_pg_schema;
use crate::service_time::start_time_from_unix;
use crate::static_lookup::branching::{classify_route, classify_route_with_stations};
use crate::static_lookup::{ScheduledStop, patterns::pattern_lookup, scheduled_stops_for_date};
use ahash::{AHashMap, AHashSet};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use itertools::Itertools;

/// One static trip collapsed to what matching needs.
#[derive(Clone, Debug)]
pub struct StaticTripSummary {
    pub trip_id: String,
    pub route_id: String,
    pub direction_id: bool,
    /// Earliest scheduled departure, seconds after midnight.
    pub start_time: i32,
    pub stop_count: i32,
    pub branch_route_id: Option<String>,
    pub trunk_route_id: String,
}

pub fn summarize_static_trips(scheduled: &[ScheduledStop]) -> Vec<StaticTripSummary> {
    let mut by_trip: AHashMap<&str, Vec<&ScheduledStop>> = AHashMap::new();
    for stop in scheduled {
        by_trip.entry(&stop.trip_id).or_default().push(stop);
    }

    by_trip
        .into_values()
        .map(|mut stops| {
            stops.sort_by_key(|s| s.stop_sequence);

            let first = stops[0];
            let visited: AHashSet<String> =
                stops.iter().map(|s| s.parent_station.clone()).collect();
            let family = classify_route_with_stations(&first.route_id, &visited);

            StaticTripSummary {
                trip_id: first.trip_id.clone(),
                route_id: first.route_id.clone(),
                direction_id: first.direction_id,
                start_time: first.departure_time,
                stop_count: stops.len() as i32,
                branch_route_id: family.branch_route_id,
                trunk_route_id: family.trunk_route_id,
            }
        })
        .sorted_by(|a, b| a.trip_id.cmp(&b.trip_id))
        .collect()
}

/// Outcome of matching one realtime trip against the static schedule.
#[derive(Clone, Debug, PartialEq)]
pub struct StaticMatch {
    pub static_trip_id_guess: String,
    pub static_start_time: i32,
    pub static_stop_count: i32,
    /// True only for exact trip id matches.
    pub first_last_station_match: bool,
}

/// Exact trip id match, else nearest start time among static trips sharing
/// the direction and branch (trunk when the branch is undetermined). Ties
/// break by trip id, ascending, so reruns pick the same candidate.
pub fn match_trip(trip: &models::VehicleTrip, summaries: &[StaticTripSummary]) -> Option<StaticMatch> {
    if let Some(exact) = summaries.iter().find(|s| s.trip_id == trip.trip_id) {
        return Some(StaticMatch {
            static_trip_id_guess: exact.trip_id.clone(),
            static_start_time: trip.start_time.unwrap_or(exact.start_time),
            static_stop_count: exact.stop_count,
            first_last_station_match: true,
        });
    }

    let start_time = trip.start_time?;

    let candidate_pool = summaries.iter().filter(|s| {
        if s.direction_id != trip.direction_id {
            return false;
        }

        match &trip.branch_route_id {
            Some(branch) => s.branch_route_id.as_deref() == Some(branch.as_str()),
            None => s.trunk_route_id == trip.trunk_route_id,
        }
    });

    let backup = candidate_pool
        .sorted_by_key(|s| ((s.start_time - start_time).abs(), s.trip_id.clone()))
        .next()?;

    Some(StaticMatch {
        static_trip_id_guess: backup.trip_id.clone(),
        static_start_time: backup.start_time,
        static_stop_count: backup.stop_count,
        first_last_station_match: false,
    })
}

/// Start time backfill order: the matched static trip's earliest scheduled
/// departure, else the earliest observed timestamp converted to seconds
/// after service midnight.
pub fn choose_start_time(
    static_start_time: Option<i32>,
    earliest_event_timestamp: Option<i64>,
    service_date: NaiveDate,
    tz: Tz,
) -> Option<i32> {
    if let Some(start) = static_start_time {
        return Some(start);
    }

    let timestamp = earliest_event_timestamp?;
    start_time_from_unix(timestamp, service_date, tz).map(|s| s as i32)
}

/// Insert-or-refresh a vehicle_trips row per trip seen in the staged
/// batch, seeded from the last (by stop sequence) event of each trip. The
/// last stop reflects the most current onboard equipment, so its vehicle
/// fields win on conflict.
pub async fn seed_trips(
    conn: &mut AsyncPgConnection,
    staged: &StagedBatch,
    now: DateTime<Utc>,
) -> Result<usize, HeadwayError> {
    let seeds: Vec<models::VehicleTrip> = staged
        .events()
        .into_group_map_by(|event| event.pm_trip_id)
        .into_values()
        .filter_map(|events| events.into_iter().max_by_key(|event| event.stop_sequence))
        .map(|last| {
            let family = classify_route(&last.route_id);

            models::VehicleTrip {
                pm_trip_id: last.pm_trip_id,
                service_date: last.service_date,
                route_id: last.route_id.clone(),
                trip_id: last.trip_id.clone(),
                direction_id: last.direction_id,
                start_time: last.start_time.map(|t| t as i32),
                vehicle_id: Some(last.vehicle_id.clone()),
                vehicle_label: last.vehicle_label.clone(),
                vehicle_consist: last.vehicle_consist.clone(),
                branch_route_id: family.as_ref().and_then(|f| f.branch_route_id.clone()),
                trunk_route_id: family
                    .map(|f| f.trunk_route_id)
                    .unwrap_or_else(|| last.route_id.clone()),
                stop_count: None,
                static_trip_id_guess: None,
                static_start_time: None,
                static_stop_count: None,
                first_last_station_match: false,
                static_version_key: last.static_version_key,
                updated_on: now,
            }
        })
        .sorted_by_key(|trip| trip.pm_trip_id)
        .collect();

    if seeds.is_empty() {
        return Ok(0);
    }

    let count = diesel::insert_into(vehicle_trips_pg_schema::table)
        .values(&seeds)
        .on_conflict(vehicle_trips_pg_schema::dsl::pm_trip_id)
        .do_update()
        .set((
            vehicle_trips_pg_schema::dsl::vehicle_id
                .eq(diesel::upsert::excluded(vehicle_trips_pg_schema::dsl::vehicle_id)),
            vehicle_trips_pg_schema::dsl::vehicle_label
                .eq(diesel::upsert::excluded(vehicle_trips_pg_schema::dsl::vehicle_label)),
            vehicle_trips_pg_schema::dsl::vehicle_consist
                .eq(diesel::upsert::excluded(vehicle_trips_pg_schema::dsl::vehicle_consist)),
            vehicle_trips_pg_schema::dsl::updated_on
                .eq(diesel::upsert::excluded(vehicle_trips_pg_schema::dsl::updated_on)),
        ))
        .execute(conn)
        .await?;

    Ok(count)
}

/// Per-trip classification derived from its full set of observed events.
#[derive(Clone, Debug, PartialEq)]
pub struct TripClassification {
    pub pm_trip_id: i64,
    pub branch_route_id: Option<String>,
    pub trunk_route_id: String,
    pub stop_count: i32,
}

/// Classify every trip from its observed (route, station) rows. Rows for
/// one trip arrive in storage order, which interleaves trips, so they are
/// grouped by key here rather than assumed contiguous.
pub fn classify_observed_trips(rows: Vec<(i64, String, String)>) -> Vec<TripClassification> {
    let mut by_trip: AHashMap<i64, (String, AHashSet<String>)> = AHashMap::new();
    for (pm_trip_id, route_id, parent_station) in rows {
        by_trip
            .entry(pm_trip_id)
            .or_insert_with(|| (route_id, AHashSet::new()))
            .1
            .insert(parent_station);
    }

    by_trip
        .into_iter()
        .map(|(pm_trip_id, (route_id, stations))| {
            let family = classify_route_with_stations(&route_id, &stations);
            TripClassification {
                pm_trip_id,
                branch_route_id: family.branch_route_id,
                trunk_route_id: family.trunk_route_id,
                stop_count: stations.len() as i32,
            }
        })
        .sorted_by_key(|classified| classified.pm_trip_id)
        .collect()
}

/// Refresh branch classification and stop counts from the observed events
/// of every trip on the date.
pub async fn classify_trip_branches(
    conn: &mut AsyncPgConnection,
    service_date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<usize, HeadwayError> {
    let events: Vec<(i64, String, String)> = vehicle_events_pg_schema::table
        .filter(vehicle_events_pg_schema::dsl::service_date.eq(service_date))
        .select((
            vehicle_events_pg_schema::dsl::pm_trip_id,
            vehicle_events_pg_schema::dsl::route_id,
            vehicle_events_pg_schema::dsl::parent_station,
        ))
        .load::<(i64, String, String)>(conn)
        .await?;

    let mut updated = 0;

    for classified in classify_observed_trips(events) {
        updated += diesel::update(
            vehicle_trips_pg_schema::table
                .filter(vehicle_trips_pg_schema::dsl::pm_trip_id.eq(classified.pm_trip_id)),
        )
        .set((
            vehicle_trips_pg_schema::dsl::branch_route_id.eq(classified.branch_route_id),
            vehicle_trips_pg_schema::dsl::trunk_route_id.eq(classified.trunk_route_id),
            vehicle_trips_pg_schema::dsl::stop_count.eq(classified.stop_count),
            vehicle_trips_pg_schema::dsl::updated_on.eq(now),
        ))
        .execute(conn)
        .await?;
    }

    Ok(updated)
}

/// Match every trip of the date against the static schedule and store the
/// guess. A later exact match may overwrite an earlier backup match.
pub async fn resolve_static_trips(
    conn: &mut AsyncPgConnection,
    static_version_key: i64,
    service_date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<usize, HeadwayError> {
    let scheduled = scheduled_stops_for_date(conn, static_version_key, service_date).await?;
    let summaries = summarize_static_trips(&scheduled);

    let trips = vehicle_trips_pg_schema::table
        .filter(vehicle_trips_pg_schema::dsl::service_date.eq(service_date))
        .select(models::VehicleTrip::as_select())
        .load::<models::VehicleTrip>(conn)
        .await?;

    let mut resolved = 0;

    for trip in trips {
        let Some(matched) = match_trip(&trip, &summaries) else {
            continue;
        };

        let unchanged = trip.static_trip_id_guess.as_deref()
            == Some(matched.static_trip_id_guess.as_str())
            && trip.first_last_station_match == matched.first_last_station_match;
        if unchanged {
            continue;
        }

        resolved += diesel::update(
            vehicle_trips_pg_schema::table
                .filter(vehicle_trips_pg_schema::dsl::pm_trip_id.eq(trip.pm_trip_id)),
        )
        .set((
            vehicle_trips_pg_schema::dsl::static_trip_id_guess
                .eq(Some(matched.static_trip_id_guess)),
            vehicle_trips_pg_schema::dsl::static_start_time.eq(Some(matched.static_start_time)),
            vehicle_trips_pg_schema::dsl::static_stop_count.eq(Some(matched.static_stop_count)),
            vehicle_trips_pg_schema::dsl::first_last_station_match
                .eq(matched.first_last_station_match),
            vehicle_trips_pg_schema::dsl::updated_on.eq(now),
        ))
        .execute(conn)
        .await?;
    }

    Ok(resolved)
}

/// Fill missing trip start times from the static match, else from the
/// earliest observed event timestamp.
pub async fn backfill_start_times(
    conn: &mut AsyncPgConnection,
    service_date: NaiveDate,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<usize, HeadwayError> {
    let trips = vehicle_trips_pg_schema::table
        .filter(vehicle_trips_pg_schema::dsl::service_date.eq(service_date))
        .filter(vehicle_trips_pg_schema::dsl::start_time.is_null())
        .select(models::VehicleTrip::as_select())
        .load::<models::VehicleTrip>(conn)
        .await?;

    if trips.is_empty() {
        return Ok(0);
    }

    let trip_ids: Vec<i64> = trips.iter().map(|t| t.pm_trip_id).collect();

    let events: Vec<(i64, Option<i64>, Option<i64>, Option<i64>)> = vehicle_events_pg_schema::table
        .filter(vehicle_events_pg_schema::dsl::pm_trip_id.eq_any(&trip_ids))
        .select((
            vehicle_events_pg_schema::dsl::pm_trip_id,
            vehicle_events_pg_schema::dsl::vp_move_timestamp,
            vehicle_events_pg_schema::dsl::vp_stop_timestamp,
            vehicle_events_pg_schema::dsl::tu_stop_timestamp,
        ))
        .load::<(i64, Option<i64>, Option<i64>, Option<i64>)>(conn)
        .await?;

    let mut earliest_by_trip: AHashMap<i64, i64> = AHashMap::new();
    for (pm_trip_id, vp_move, vp_stop, tu_stop) in events {
        for timestamp in [vp_move, vp_stop, tu_stop].into_iter().flatten() {
            earliest_by_trip
                .entry(pm_trip_id)
                .and_modify(|existing| *existing = (*existing).min(timestamp))
                .or_insert(timestamp);
        }
    }

    let mut backfilled = 0;

    for trip in trips {
        let chosen = choose_start_time(
            trip.static_start_time,
            earliest_by_trip.get(&trip.pm_trip_id).copied(),
            service_date,
            tz,
        );

        let Some(start_time) = chosen else {
            continue;
        };

        backfilled += diesel::update(
            vehicle_trips_pg_schema::table
                .filter(vehicle_trips_pg_schema::dsl::pm_trip_id.eq(trip.pm_trip_id)),
        )
        .set((
            vehicle_trips_pg_schema::dsl::start_time.eq(Some(start_time)),
            vehicle_trips_pg_schema::dsl::updated_on.eq(now),
        ))
        .execute(conn)
        .await?;
    }

    Ok(backfilled)
}

/// Per-event adjacency and pattern sequence assignment.
#[derive(Clone, Debug, PartialEq)]
pub struct EventLinkUpdate {
    pub trip_stop_hash: String,
    pub previous_event_hash: Option<String>,
    pub next_event_hash: Option<String>,
    pub canonical_stop_sequence: Option<i32>,
    pub sync_stop_sequence: Option<i32>,
}

/// Compute prev/next links within each trip (ordered by stop sequence) and
/// the canonical/sync sequence of each event's station within its branch
/// pattern.
pub fn plan_event_links(
    events: &[models::VehicleEvent],
    branch_of_trip: &AHashMap<i64, Option<String>>,
    patterns: &AHashMap<(String, bool, String), (i32, i32)>,
) -> Vec<EventLinkUpdate> {
    let mut by_trip: AHashMap<i64, Vec<&models::VehicleEvent>> = AHashMap::new();
    for event in events {
        by_trip.entry(event.pm_trip_id).or_default().push(event);
    }

    let mut updates = Vec::new();

    for (pm_trip_id, mut trip_events) in by_trip {
        trip_events.sort_by_key(|event| event.stop_sequence);

        let branch = branch_of_trip.get(&pm_trip_id).cloned().flatten();

        for index in 0..trip_events.len() {
            let event = trip_events[index];

            let sequences = branch.as_ref().and_then(|branch| {
                patterns
                    .get(&(
                        branch.clone(),
                        event.direction_id,
                        event.parent_station.clone(),
                    ))
                    .copied()
            });

            let update = EventLinkUpdate {
                trip_stop_hash: event.trip_stop_hash.clone(),
                previous_event_hash: (index > 0)
                    .then(|| trip_events[index - 1].trip_stop_hash.clone()),
                next_event_hash: (index + 1 < trip_events.len())
                    .then(|| trip_events[index + 1].trip_stop_hash.clone()),
                canonical_stop_sequence: sequences.map(|(canonical, _)| canonical),
                sync_stop_sequence: sequences.map(|(_, sync)| sync),
            };

            let unchanged = update.previous_event_hash == event.previous_event_hash
                && update.next_event_hash == event.next_event_hash
                && update.canonical_stop_sequence == event.canonical_stop_sequence
                && update.sync_stop_sequence == event.sync_stop_sequence;

            if !unchanged {
                updates.push(update);
            }
        }
    }

    updates.sort_by(|a, b| a.trip_stop_hash.cmp(&b.trip_stop_hash));
    updates
}

/// Link adjacent events and assign canonical/sync sequences for the date.
pub async fn link_adjacent_events(
    conn: &mut AsyncPgConnection,
    static_version_key: i64,
    service_date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<usize, HeadwayError> {
    let events = vehicle_events_pg_schema::table
        .filter(vehicle_events_pg_schema::dsl::service_date.eq(service_date))
        .select(models::VehicleEvent::as_select())
        .load::<models::VehicleEvent>(conn)
        .await?;

    let branch_of_trip: AHashMap<i64, Option<String>> = vehicle_trips_pg_schema::table
        .filter(vehicle_trips_pg_schema::dsl::service_date.eq(service_date))
        .select((
            vehicle_trips_pg_schema::dsl::pm_trip_id,
            vehicle_trips_pg_schema::dsl::branch_route_id,
        ))
        .load::<(i64, Option<String>)>(conn)
        .await?
        .into_iter()
        .collect();

    let patterns = pattern_lookup(conn, static_version_key).await?;

    let updates = plan_event_links(&events, &branch_of_trip, &patterns);
    let mut written = 0;

    for update in &updates {
        written += diesel::update(
            vehicle_events_pg_schema::table
                .filter(vehicle_events_pg_schema::dsl::trip_stop_hash.eq(&update.trip_stop_hash)),
        )
        .set((
            vehicle_events_pg_schema::dsl::previous_event_hash
                .eq(update.previous_event_hash.clone()),
            vehicle_events_pg_schema::dsl::next_event_hash.eq(update.next_event_hash.clone()),
            vehicle_events_pg_schema::dsl::canonical_stop_sequence
                .eq(update.canonical_stop_sequence),
            vehicle_events_pg_schema::dsl::sync_stop_sequence.eq(update.sync_stop_sequence),
            vehicle_events_pg_schema::dsl::updated_on.eq(now),
        ))
        .execute(conn)
        .await?;
    }

    Ok(written)
}
