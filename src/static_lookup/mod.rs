//! Static schedule lookup for a service date.
//!
//! Resolves which published schedule version applies to a date, which
//! service_ids run that date, and the ordered scheduled stops of every
//! active trip, with parent stations and branch classification attached.

pub mod branching;
pub mod patterns;

use crate::error::HeadwayError;
use crate::models;
use crate::schema::perf::service_id_dates as service_id_dates_pg_schema;
use crate::schema::perf::static_calendar as calendar_pg_schema;
use crate::schema::perf::static_calendar_dates as calendar_dates_pg_schema;
use crate::schema::perf::static_feeds as static_feeds_pg_schema;
use crate::schema::perf::static_routes as routes_pg_schema;
use crate::schema::perf::static_stop_times as stop_times_pg_schema;
use crate::schema::perf::static_stops as stops_pg_schema;
use crate::schema::perf::static_trips as trips_pg_schema;
use ahash::{AHashMap, AHashSet};
use chrono::{Datelike, NaiveDate, Weekday};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use itertools::Itertools;

/// GTFS route types excluded from performance tracking. Bus data comes from
/// a different pipeline with different timestamp semantics.
const EXCLUDED_ROUTE_TYPES: [i16; 2] = [3, 11];

/// One scheduled stop of one active trip, ranked within its trip.
#[derive(Clone, Debug)]
pub struct ScheduledStop {
    pub trip_id: String,
    pub route_id: String,
    pub service_id: String,
    pub direction_id: bool,
    pub stop_id: String,
    pub parent_station: String,
    pub stop_sequence: i32,
    pub departure_time: i32,
    /// 1..N position within the trip by stop_sequence.
    pub stop_rank: i32,
    pub first_stop: bool,
    pub last_stop: bool,
}

/// Newest published version whose feed window covers the date. Dates just
/// past a feed boundary can resolve to a different version than their
/// neighbors, so callers resolve per service date, never per batch.
pub fn newest_covering_version(
    feeds: &[models::StaticFeed],
    service_date: NaiveDate,
) -> Option<i64> {
    feeds
        .iter()
        .filter(|feed| {
            feed.feed_start_date <= service_date && service_date <= feed.feed_end_date
        })
        .max_by_key(|feed| feed.created_on)
        .map(|feed| feed.static_version_key)
}

pub async fn active_version_for_date(
    conn: &mut AsyncPgConnection,
    service_date: NaiveDate,
) -> Result<i64, HeadwayError> {
    let feeds = static_feeds_pg_schema::table
        .select(models::StaticFeed::as_select())
        .load::<models::StaticFeed>(conn)
        .await?;

    newest_covering_version(&feeds, service_date)
        .ok_or(HeadwayError::NoMatchingSchedule(service_date))
}

/// Service ids active on a date: weekday-enabled calendar rows, plus
/// calendar_dates additions, minus calendar_dates removals. Removal wins
/// when the same service id is both added and removed for the date.
pub fn resolve_service_ids(
    calendar: &[models::StaticCalendar],
    calendar_dates: &[models::StaticCalendarDate],
    service_date: NaiveDate,
) -> Vec<String> {
    let mut active: AHashSet<String> = calendar
        .iter()
        .filter(|row| row.gtfs_start_date <= service_date && service_date <= row.gtfs_end_date)
        .filter(|row| match service_date.weekday() {
            Weekday::Mon => row.monday,
            Weekday::Tue => row.tuesday,
            Weekday::Wed => row.wednesday,
            Weekday::Thu => row.thursday,
            Weekday::Fri => row.friday,
            Weekday::Sat => row.saturday,
            Weekday::Sun => row.sunday,
        })
        .map(|row| row.service_id.clone())
        .collect();

    for exception in calendar_dates {
        if exception.gtfs_date != service_date {
            continue;
        }

        if exception.exception_type == 1 {
            active.insert(exception.service_id.clone());
        }
    }

    for exception in calendar_dates {
        if exception.gtfs_date == service_date && exception.exception_type == 2 {
            active.remove(&exception.service_id);
        }
    }

    active.into_iter().sorted().collect()
}

/// Service ids for a (version, date), materialized into `service_id_dates`
/// the first time a date is touched.
pub async fn service_ids_for_date(
    conn: &mut AsyncPgConnection,
    static_version_key: i64,
    service_date: NaiveDate,
) -> Result<Vec<String>, HeadwayError> {
    let cached = service_id_dates_pg_schema::table
        .filter(service_id_dates_pg_schema::dsl::static_version_key.eq(static_version_key))
        .filter(service_id_dates_pg_schema::dsl::service_date.eq(service_date))
        .select(service_id_dates_pg_schema::dsl::service_id)
        .load::<String>(conn)
        .await?;

    if !cached.is_empty() {
        return Ok(cached);
    }

    let calendar = calendar_pg_schema::table
        .filter(calendar_pg_schema::dsl::static_version_key.eq(static_version_key))
        .select(models::StaticCalendar::as_select())
        .load::<models::StaticCalendar>(conn)
        .await?;

    let calendar_dates = calendar_dates_pg_schema::table
        .filter(calendar_dates_pg_schema::dsl::static_version_key.eq(static_version_key))
        .filter(calendar_dates_pg_schema::dsl::gtfs_date.eq(service_date))
        .select(models::StaticCalendarDate::as_select())
        .load::<models::StaticCalendarDate>(conn)
        .await?;

    let service_ids = resolve_service_ids(&calendar, &calendar_dates, service_date);

    let rows: Vec<models::ServiceIdDate> = service_ids
        .iter()
        .map(|service_id| models::ServiceIdDate {
            static_version_key,
            service_date,
            service_id: service_id.clone(),
        })
        .collect();

    if !rows.is_empty() {
        diesel::insert_into(service_id_dates_pg_schema::table)
            .values(&rows)
            .on_conflict_do_nothing()
            .execute(conn)
            .await?;
    }

    Ok(service_ids)
}

/// Parent station map for a schedule version. Stops with no parent station
/// map to themselves, never to null.
pub async fn parent_station_map(
    conn: &mut AsyncPgConnection,
    static_version_key: i64,
) -> Result<AHashMap<String, String>, HeadwayError> {
    let stops = stops_pg_schema::table
        .filter(stops_pg_schema::dsl::static_version_key.eq(static_version_key))
        .select(models::StaticStop::as_select())
        .load::<models::StaticStop>(conn)
        .await?;

    Ok(stops
        .into_iter()
        .map(|stop| {
            let parent = stop.parent_station.unwrap_or_else(|| stop.stop_id.clone());
            (stop.stop_id, parent)
        })
        .collect())
}

pub fn resolve_parent_station(map: &AHashMap<String, String>, stop_id: &str) -> String {
    map.get(stop_id)
        .cloned()
        .unwrap_or_else(|| stop_id.to_string())
}

/// Sort stop times within each trip and assign rank / first / last flags
/// with a single forward pass per trip.
pub fn rank_scheduled_stops(mut scheduled: Vec<ScheduledStop>) -> Vec<ScheduledStop> {
    scheduled.sort_by(|a, b| {
        a.trip_id
            .cmp(&b.trip_id)
            .then(a.stop_sequence.cmp(&b.stop_sequence))
    });

    let mut index = 0;
    while index < scheduled.len() {
        let trip_end = scheduled[index..]
            .iter()
            .position(|s| s.trip_id != scheduled[index].trip_id)
            .map(|offset| index + offset)
            .unwrap_or(scheduled.len());

        let trip_len = trip_end - index;
        for (rank_zero, stop) in scheduled[index..trip_end].iter_mut().enumerate() {
            stop.stop_rank = (rank_zero + 1) as i32;
            stop.first_stop = rank_zero == 0;
            stop.last_stop = rank_zero + 1 == trip_len;
        }

        index = trip_end;
    }

    scheduled
}

/// Ordered scheduled stops for every non-bus trip active on the date.
pub async fn scheduled_stops_for_date(
    conn: &mut AsyncPgConnection,
    static_version_key: i64,
    service_date: NaiveDate,
) -> Result<Vec<ScheduledStop>, HeadwayError> {
    let service_ids = service_ids_for_date(conn, static_version_key, service_date).await?;

    if service_ids.is_empty() {
        return Ok(vec![]);
    }

    let tracked_routes: AHashSet<String> = routes_pg_schema::table
        .filter(routes_pg_schema::dsl::static_version_key.eq(static_version_key))
        .filter(routes_pg_schema::dsl::route_type.ne_all(EXCLUDED_ROUTE_TYPES.to_vec()))
        .select(routes_pg_schema::dsl::route_id)
        .load::<String>(conn)
        .await?
        .into_iter()
        .collect();

    let trips: Vec<models::StaticTrip> = trips_pg_schema::table
        .filter(trips_pg_schema::dsl::static_version_key.eq(static_version_key))
        .filter(trips_pg_schema::dsl::service_id.eq_any(&service_ids))
        .select(models::StaticTrip::as_select())
        .load::<models::StaticTrip>(conn)
        .await?
        .into_iter()
        .filter(|trip| tracked_routes.contains(&trip.route_id))
        .collect();

    if trips.is_empty() {
        return Ok(vec![]);
    }

    let trip_ids: Vec<&String> = trips.iter().map(|trip| &trip.trip_id).collect();
    let trip_lookup: AHashMap<&String, &models::StaticTrip> =
        trips.iter().map(|trip| (&trip.trip_id, trip)).collect();

    let stop_times = stop_times_pg_schema::table
        .filter(stop_times_pg_schema::dsl::static_version_key.eq(static_version_key))
        .filter(stop_times_pg_schema::dsl::trip_id.eq_any(trip_ids))
        .select(models::StaticStopTime::as_select())
        .load::<models::StaticStopTime>(conn)
        .await?;

    let parents = parent_station_map(conn, static_version_key).await?;

    let scheduled: Vec<ScheduledStop> = stop_times
        .into_iter()
        .filter_map(|stop_time| {
            let trip = trip_lookup.get(&stop_time.trip_id)?;

            Some(ScheduledStop {
                parent_station: resolve_parent_station(&parents, &stop_time.stop_id),
                trip_id: stop_time.trip_id,
                route_id: trip.route_id.clone(),
                service_id: trip.service_id.clone(),
                direction_id: trip.direction_id,
                stop_id: stop_time.stop_id,
                stop_sequence: stop_time.stop_sequence,
                departure_time: stop_time.departure_time,
                stop_rank: 0,
                first_stop: false,
                last_stop: false,
            })
        })
        .collect();

    Ok(rank_scheduled_stops(scheduled))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calendar_row(service_id: &str, weekdays: [bool; 7]) -> models::StaticCalendar {
        models::StaticCalendar {
            static_version_key: 1,
            service_id: service_id.to_string(),
            monday: weekdays[0],
            tuesday: weekdays[1],
            wednesday: weekdays[2],
            thursday: weekdays[3],
            friday: weekdays[4],
            saturday: weekdays[5],
            sunday: weekdays[6],
            gtfs_start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            gtfs_end_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        }
    }

    fn exception(service_id: &str, date: NaiveDate, exception_type: i16) -> models::StaticCalendarDate {
        models::StaticCalendarDate {
            static_version_key: 1,
            service_id: service_id.to_string(),
            gtfs_date: date,
            exception_type,
        }
    }

    fn feed(key: i64, start: (i32, u32, u32), end: (i32, u32, u32), created: i64) -> models::StaticFeed {
        models::StaticFeed {
            static_version_key: key,
            feed_version: format!("v{}", key),
            feed_start_date: NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap(),
            feed_end_date: NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap(),
            created_on: chrono::DateTime::from_timestamp(created, 0).unwrap(),
        }
    }

    // adjacent service dates in one batch can straddle a feed boundary
    #[test]
    fn version_resolves_per_service_date() {
        let feeds = vec![
            feed(1, (2024, 6, 1), (2024, 6, 14), 100),
            feed(2, (2024, 6, 15), (2024, 6, 28), 200),
        ];

        assert_eq!(
            newest_covering_version(&feeds, NaiveDate::from_ymd_opt(2024, 6, 14).unwrap()),
            Some(1)
        );
        assert_eq!(
            newest_covering_version(&feeds, NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()),
            Some(2)
        );
        assert_eq!(
            newest_covering_version(&feeds, NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()),
            None
        );
    }

    #[test]
    fn newest_publication_wins_on_overlap() {
        let feeds = vec![
            feed(1, (2024, 6, 1), (2024, 6, 28), 200),
            feed(2, (2024, 6, 1), (2024, 6, 28), 100),
        ];

        assert_eq!(
            newest_covering_version(&feeds, NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()),
            Some(1)
        );
    }

    #[test]
    fn weekday_calendar_match() {
        // 2024-06-15 is a Saturday
        let saturday = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();

        let calendar = vec![
            calendar_row("weekday", [true, true, true, true, true, false, false]),
            calendar_row("saturday", [false, false, false, false, false, true, false]),
        ];

        assert_eq!(
            resolve_service_ids(&calendar, &[], saturday),
            vec!["saturday".to_string()]
        );
    }

    #[test]
    fn calendar_date_addition_and_removal() {
        let saturday = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();

        let calendar = vec![calendar_row(
            "saturday",
            [false, false, false, false, false, true, false],
        )];
        let exceptions = vec![
            exception("holiday-extra", saturday, 1),
            exception("saturday", saturday, 2),
        ];

        assert_eq!(
            resolve_service_ids(&calendar, &exceptions, saturday),
            vec!["holiday-extra".to_string()]
        );
    }

    #[test]
    fn removal_wins_over_addition() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();

        let exceptions = vec![exception("svc", date, 1), exception("svc", date, 2)];

        assert!(resolve_service_ids(&[], &exceptions, date).is_empty());
    }

    #[test]
    fn out_of_window_calendar_is_inactive() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();

        let calendar = vec![calendar_row(
            "svc",
            [true, true, true, true, true, true, true],
        )];

        assert!(resolve_service_ids(&calendar, &[], date).is_empty());
    }

    fn raw_stop(trip_id: &str, stop_sequence: i32, stop_id: &str) -> ScheduledStop {
        ScheduledStop {
            trip_id: trip_id.to_string(),
            route_id: "Red".to_string(),
            service_id: "svc".to_string(),
            direction_id: false,
            stop_id: stop_id.to_string(),
            parent_station: stop_id.to_string(),
            stop_sequence,
            departure_time: stop_sequence * 100,
            stop_rank: 0,
            first_stop: false,
            last_stop: false,
        }
    }

    #[test]
    fn ranks_stops_within_each_trip() {
        let scheduled = vec![
            raw_stop("t2", 30, "c"),
            raw_stop("t1", 520, "b"),
            raw_stop("t1", 510, "a"),
            raw_stop("t2", 10, "a"),
            raw_stop("t2", 20, "b"),
        ];

        let ranked = rank_scheduled_stops(scheduled);

        let t1: Vec<_> = ranked.iter().filter(|s| s.trip_id == "t1").collect();
        assert_eq!(t1[0].stop_rank, 1);
        assert!(t1[0].first_stop);
        assert!(!t1[0].last_stop);
        assert_eq!(t1[1].stop_rank, 2);
        assert!(t1[1].last_stop);

        let t2: Vec<_> = ranked.iter().filter(|s| s.trip_id == "t2").collect();
        assert_eq!(
            t2.iter().map(|s| s.stop_rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(t2[0].first_stop && t2[2].last_stop);
        assert!(!t2[1].first_stop && !t2[1].last_stop);
    }

    #[test]
    fn parent_station_self_mapping() {
        let mut map = AHashMap::new();
        map.insert("70061".to_string(), "place-alfcl".to_string());

        assert_eq!(resolve_parent_station(&map, "70061"), "place-alfcl");
        assert_eq!(resolve_parent_station(&map, "unknown-stop"), "unknown-stop");
    }
}
