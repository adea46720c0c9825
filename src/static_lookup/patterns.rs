//! Canonical and sync stop sequences.
//!
//! The canonical sequence numbers a station's position within the
//! representative static pattern of a (branch, direction), so trips of
//! different realized lengths can be compared. The sync sequence renumbers
//! branches of a trunk to share a common zero-point station, which is what
//! lets cross-branch headways line up at trunk stations.

use super::ScheduledStop;
use super::branching::classify_route_with_stations;
use crate::error::HeadwayError;
use crate::models;
use crate::schema::perf::static_route_patterns as patterns_pg_schema;
use ahash::{AHashMap, AHashSet};
use chrono::NaiveDate;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use itertools::Itertools;

/// Build pattern rows from one date's ranked scheduled stops.
pub fn build_route_patterns(
    scheduled: &[ScheduledStop],
    static_version_key: i64,
) -> Vec<models::StaticRoutePattern> {
    // ordered station list per trip
    let mut trips: AHashMap<&str, Vec<&ScheduledStop>> = AHashMap::new();
    for stop in scheduled {
        trips.entry(&stop.trip_id).or_default().push(stop);
    }

    // (branch key, direction) -> station list -> occurrence count
    let mut pattern_votes: AHashMap<(String, bool), AHashMap<Vec<String>, usize>> =
        AHashMap::new();
    let mut trunk_of_branch: AHashMap<String, String> = AHashMap::new();

    for stops in trips.values_mut() {
        stops.sort_by_key(|s| s.stop_sequence);

        let first = stops[0];
        let visited: AHashSet<String> =
            stops.iter().map(|s| s.parent_station.clone()).collect();
        let family = classify_route_with_stations(&first.route_id, &visited);

        // a trunk trip whose branch cannot be determined has no single
        // pattern to vote for
        let Some(branch_route_id) = family.branch_route_id else {
            continue;
        };

        trunk_of_branch.insert(branch_route_id.clone(), family.trunk_route_id);

        let stations: Vec<String> = stops.iter().map(|s| s.parent_station.clone()).collect();
        *pattern_votes
            .entry((branch_route_id, first.direction_id))
            .or_default()
            .entry(stations)
            .or_default() += 1;
    }

    // most common realized pattern wins, ties broken by the station list
    // itself so reruns stay deterministic
    let representative: AHashMap<(String, bool), Vec<String>> = pattern_votes
        .into_iter()
        .map(|(key, votes)| {
            let pattern = votes
                .into_iter()
                .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
                .map(|(stations, _)| stations)
                .unwrap_or_default();
            (key, pattern)
        })
        .collect();

    // canonical index of every station in every branch pattern
    let mut canonical: AHashMap<(String, bool), Vec<(String, i32)>> = AHashMap::new();
    for ((branch, direction), stations) in &representative {
        let numbered = stations
            .iter()
            .enumerate()
            .map(|(index, station)| (station.clone(), (index + 1) as i32))
            .collect();
        canonical.insert((branch.clone(), *direction), numbered);
    }

    // sync offsets: for every (trunk, direction) with multiple branches,
    // find the first station shared by all branch patterns and shift each
    // branch so that station carries the same sync number everywhere
    let mut sync_offset: AHashMap<(String, bool), i32> = AHashMap::new();

    let mut by_trunk = canonical
        .keys()
        .map(|(branch, direction)| {
            let trunk = trunk_of_branch
                .get(branch)
                .cloned()
                .unwrap_or_else(|| branch.clone());
            ((trunk, *direction), (branch.clone(), *direction))
        })
        .into_group_map();

    // stable branch order so the zero point does not depend on map
    // iteration order
    for branch_keys in by_trunk.values_mut() {
        branch_keys.sort();
    }

    for branch_keys in by_trunk.values() {
        if branch_keys.len() < 2 {
            continue;
        }

        let first_branch = &canonical[&branch_keys[0]];
        let zero_point = first_branch.iter().find(|(station, _)| {
            branch_keys.iter().all(|key| {
                canonical[key]
                    .iter()
                    .any(|(other_station, _)| other_station == station)
            })
        });

        let Some((zero_station, _)) = zero_point else {
            continue;
        };

        let zero_positions: AHashMap<&(String, bool), i32> = branch_keys
            .iter()
            .map(|key| {
                let position = canonical[key]
                    .iter()
                    .find(|(station, _)| station == zero_station)
                    .map(|(_, seq)| *seq)
                    .unwrap_or(0);
                (key, position)
            })
            .collect();

        let deepest = zero_positions.values().copied().max().unwrap_or(0);

        for key in branch_keys {
            sync_offset.insert(key.clone(), deepest - zero_positions[key]);
        }
    }

    canonical
        .into_iter()
        .flat_map(|((branch, direction), stations)| {
            let offset = sync_offset
                .get(&(branch.clone(), direction))
                .copied()
                .unwrap_or(0);

            stations.into_iter().map(move |(station, seq)| {
                models::StaticRoutePattern {
                    static_version_key,
                    branch_route_id: branch.clone(),
                    direction_id: direction,
                    parent_station: station,
                    canonical_stop_sequence: seq,
                    sync_stop_sequence: seq + offset,
                }
            })
        })
        .sorted_by(|a, b| {
            (&a.branch_route_id, a.direction_id, a.canonical_stop_sequence).cmp(&(
                &b.branch_route_id,
                b.direction_id,
                b.canonical_stop_sequence,
            ))
        })
        .collect()
}

/// Recompute and upsert the pattern rows for one (version, date).
pub async fn refresh_route_patterns(
    conn: &mut AsyncPgConnection,
    static_version_key: i64,
    service_date: NaiveDate,
) -> Result<usize, HeadwayError> {
    let scheduled =
        super::scheduled_stops_for_date(conn, static_version_key, service_date).await?;
    let rows = build_route_patterns(&scheduled, static_version_key);

    if rows.is_empty() {
        return Ok(0);
    }

    let count = diesel::insert_into(patterns_pg_schema::table)
        .values(&rows)
        .on_conflict((
            patterns_pg_schema::dsl::static_version_key,
            patterns_pg_schema::dsl::branch_route_id,
            patterns_pg_schema::dsl::direction_id,
            patterns_pg_schema::dsl::parent_station,
        ))
        .do_update()
        .set((
            patterns_pg_schema::dsl::canonical_stop_sequence.eq(diesel::upsert::excluded(
                patterns_pg_schema::dsl::canonical_stop_sequence,
            )),
            patterns_pg_schema::dsl::sync_stop_sequence.eq(diesel::upsert::excluded(
                patterns_pg_schema::dsl::sync_stop_sequence,
            )),
        ))
        .execute(conn)
        .await?;

    Ok(count)
}

/// Lookup of (branch, direction, parent_station) -> (canonical, sync).
pub async fn pattern_lookup(
    conn: &mut AsyncPgConnection,
    static_version_key: i64,
) -> Result<AHashMap<(String, bool, String), (i32, i32)>, HeadwayError> {
    let rows = patterns_pg_schema::table
        .filter(patterns_pg_schema::dsl::static_version_key.eq(static_version_key))
        .select(models::StaticRoutePattern::as_select())
        .load::<models::StaticRoutePattern>(conn)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            (
                (row.branch_route_id, row.direction_id, row.parent_station),
                (row.canonical_stop_sequence, row.sync_stop_sequence),
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(trip_id: &str, route_id: &str, seq: i32, station: &str) -> ScheduledStop {
        ScheduledStop {
            trip_id: trip_id.to_string(),
            route_id: route_id.to_string(),
            service_id: "svc".to_string(),
            direction_id: false,
            stop_id: station.to_string(),
            parent_station: station.to_string(),
            stop_sequence: seq,
            departure_time: seq * 60,
            stop_rank: 0,
            first_stop: false,
            last_stop: false,
        }
    }

    #[test]
    fn single_branch_canonical_equals_sync() {
        let scheduled = vec![
            stop("t1", "Orange", 1, "place-ogmnl"),
            stop("t1", "Orange", 2, "place-mlmnl"),
            stop("t1", "Orange", 3, "place-welln"),
        ];

        let patterns = build_route_patterns(&scheduled, 7);

        assert_eq!(patterns.len(), 3);
        for pattern in &patterns {
            assert_eq!(pattern.canonical_stop_sequence, pattern.sync_stop_sequence);
            assert_eq!(pattern.branch_route_id, "Orange");
        }
        assert_eq!(patterns[0].parent_station, "place-ogmnl");
        assert_eq!(patterns[0].canonical_stop_sequence, 1);
    }

    #[test]
    fn most_common_pattern_wins() {
        // two trips run the full pattern, one is short-turned
        let mut scheduled = vec![
            stop("t1", "Orange", 1, "a"),
            stop("t1", "Orange", 2, "b"),
            stop("t1", "Orange", 3, "c"),
            stop("t2", "Orange", 1, "a"),
            stop("t2", "Orange", 2, "b"),
            stop("t2", "Orange", 3, "c"),
        ];
        scheduled.push(stop("t3", "Orange", 1, "a"));
        scheduled.push(stop("t3", "Orange", 2, "b"));

        let patterns = build_route_patterns(&scheduled, 7);
        assert_eq!(patterns.len(), 3);
    }

    #[test]
    fn trunk_branches_share_sync_numbers_at_common_stations() {
        // two Red trips, same direction, diverging after the shared trunk;
        // the Ashmont branch pattern is one station longer before the
        // common zero point
        let scheduled = vec![
            stop("ash", "Red", 1, "place-alfcl"),
            stop("ash", "Red", 2, "place-pktrm"),
            stop("ash", "Red", 3, "place-jfk"),
            stop("ash", "Red", 4, "place-shmnl"),
            stop("ash", "Red", 5, "place-asmnl"),
            stop("brn", "Red", 1, "place-pktrm"),
            stop("brn", "Red", 2, "place-jfk"),
            stop("brn", "Red", 3, "place-nqncy"),
            stop("brn", "Red", 4, "place-brntn"),
        ];

        let patterns = build_route_patterns(&scheduled, 7);

        let sync_at = |branch: &str, station: &str| {
            patterns
                .iter()
                .find(|p| p.branch_route_id == branch && p.parent_station == station)
                .map(|p| p.sync_stop_sequence)
                .unwrap()
        };

        // shared stations align across branches after renumbering
        assert_eq!(sync_at("Red-A", "place-alfcl") + 1, sync_at("Red-A", "place-pktrm"));
        assert_eq!(sync_at("Red-A", "place-pktrm"), sync_at("Red-B", "place-pktrm"));
        assert_eq!(sync_at("Red-A", "place-jfk"), sync_at("Red-B", "place-jfk"));

        // branch-specific stations keep diverging numbers
        assert_eq!(sync_at("Red-A", "place-shmnl"), sync_at("Red-B", "place-nqncy"));
    }
}
