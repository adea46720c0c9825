//! Static schedule snapshot loader.
//!
//! Reads one published schedule version from flattened JSON-lines files
//! and writes it as an immutable versioned snapshot. The version key is
//! derived from the feed version string and every insert is
//! insert-or-ignore, so reloading a published feed is a no-op.

use crate::error::HeadwayError;
use crate::models;
use crate::schema::perf::static_calendar as calendar_pg_schema;
use crate::schema::perf::static_calendar_dates as calendar_dates_pg_schema;
use crate::schema::perf::static_directions as directions_pg_schema;
use crate::schema::perf::static_feeds as feeds_pg_schema;
use crate::schema::perf::static_routes as routes_pg_schema;
use crate::schema::perf::static_stop_times as stop_times_pg_schema;
use crate::schema::perf::static_stops as stops_pg_schema;
use crate::schema::perf::static_trips as trips_pg_schema;
use crate::service_time::{parse_start_date, seconds_after_midnight};
use crate::sources::JsonLinesSource;
use chrono::{DateTime, NaiveDate, Utc};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;
use std::hash::Hasher;

const INSERT_CHUNK_SIZE: usize = 2048;

#[derive(Deserialize, Debug, Clone)]
pub struct RawFeedInfo {
    pub feed_version: String,
    pub feed_start_date: String,
    pub feed_end_date: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RawStaticTrip {
    pub trip_id: String,
    pub route_id: String,
    pub service_id: String,
    pub direction_id: u8,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RawStaticStop {
    pub stop_id: String,
    pub stop_name: Option<String>,
    pub parent_station: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RawStaticStopTime {
    pub trip_id: String,
    pub stop_id: String,
    pub stop_sequence: i32,
    pub arrival_time: String,
    pub departure_time: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RawStaticCalendar {
    pub service_id: String,
    pub monday: u8,
    pub tuesday: u8,
    pub wednesday: u8,
    pub thursday: u8,
    pub friday: u8,
    pub saturday: u8,
    pub sunday: u8,
    pub start_date: String,
    pub end_date: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RawStaticCalendarDate {
    pub service_id: String,
    pub date: String,
    pub exception_type: i16,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RawStaticRoute {
    pub route_id: String,
    pub route_type: i16,
    pub route_long_name: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RawStaticDirection {
    pub route_id: String,
    pub direction_id: u8,
    pub direction: String,
    pub direction_destination: String,
}

#[derive(Debug, Clone)]
pub struct StaticSnapshot {
    pub feed_info: RawFeedInfo,
    pub trips: Vec<RawStaticTrip>,
    pub stops: Vec<RawStaticStop>,
    pub stop_times: Vec<RawStaticStopTime>,
    pub calendar: Vec<RawStaticCalendar>,
    pub calendar_dates: Vec<RawStaticCalendarDate>,
    pub routes: Vec<RawStaticRoute>,
    pub directions: Vec<RawStaticDirection>,
}

impl StaticSnapshot {
    /// Fixed per-table file names under one snapshot directory.
    pub fn read(source: &JsonLinesSource, prefix: &str) -> Result<StaticSnapshot, HeadwayError> {
        let table_path = |name: &str| vec![format!("{}/{}.json", prefix, name)];

        let feed_rows: Vec<RawFeedInfo> = source.read_rows(&table_path("feed_info"))?;
        let feed_info = feed_rows
            .into_iter()
            .next()
            .ok_or_else(|| HeadwayError::SourceRead(format!("{}: empty feed_info", prefix)))?;

        Ok(StaticSnapshot {
            feed_info,
            trips: source.read_rows(&table_path("trips"))?,
            stops: source.read_rows(&table_path("stops"))?,
            stop_times: source.read_rows(&table_path("stop_times"))?,
            calendar: source.read_rows(&table_path("calendar"))?,
            calendar_dates: source.read_rows(&table_path("calendar_dates"))?,
            routes: source.read_rows(&table_path("routes"))?,
            directions: source.read_rows(&table_path("directions"))?,
        })
    }
}

/// Stable version key per published feed version.
pub fn version_key(feed_version: &str) -> i64 {
    let mut hasher = siphasher::sip::SipHasher24::new_with_keys(0, 0);
    hasher.write(feed_version.as_bytes());
    hasher.finish() as i64
}

fn gtfs_date(context: &str, yyyymmdd: &str) -> Result<NaiveDate, HeadwayError> {
    parse_start_date(yyyymmdd)
        .ok_or_else(|| HeadwayError::InvalidTime(format!("{}: {}", context, yyyymmdd)))
}

/// Write all snapshot tables under one fresh (or pre-existing) version
/// key. Returns the key.
pub async fn load_static_snapshot(
    conn: &mut AsyncPgConnection,
    snapshot: &StaticSnapshot,
    now: DateTime<Utc>,
) -> Result<i64, HeadwayError> {
    let static_version_key = version_key(&snapshot.feed_info.feed_version);

    let feed = models::StaticFeed {
        static_version_key,
        feed_version: snapshot.feed_info.feed_version.clone(),
        feed_start_date: gtfs_date("feed_start_date", &snapshot.feed_info.feed_start_date)?,
        feed_end_date: gtfs_date("feed_end_date", &snapshot.feed_info.feed_end_date)?,
        created_on: now,
    };

    diesel::insert_into(feeds_pg_schema::table)
        .values(&feed)
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;

    let trips: Vec<models::StaticTrip> = snapshot
        .trips
        .iter()
        .map(|raw| models::StaticTrip {
            static_version_key,
            trip_id: raw.trip_id.clone(),
            route_id: raw.route_id.clone(),
            service_id: raw.service_id.clone(),
            direction_id: raw.direction_id == 1,
        })
        .collect();

    for chunk in trips.chunks(INSERT_CHUNK_SIZE) {
        diesel::insert_into(trips_pg_schema::table)
            .values(chunk)
            .on_conflict_do_nothing()
            .execute(conn)
            .await?;
    }

    let stops: Vec<models::StaticStop> = snapshot
        .stops
        .iter()
        .map(|raw| models::StaticStop {
            static_version_key,
            stop_id: raw.stop_id.clone(),
            stop_name: raw.stop_name.clone(),
            parent_station: raw.parent_station.clone(),
        })
        .collect();

    for chunk in stops.chunks(INSERT_CHUNK_SIZE) {
        diesel::insert_into(stops_pg_schema::table)
            .values(chunk)
            .on_conflict_do_nothing()
            .execute(conn)
            .await?;
    }

    let stop_times: Vec<models::StaticStopTime> = snapshot
        .stop_times
        .iter()
        .map(|raw| {
            Ok(models::StaticStopTime {
                static_version_key,
                trip_id: raw.trip_id.clone(),
                stop_sequence: raw.stop_sequence,
                stop_id: raw.stop_id.clone(),
                arrival_time: seconds_after_midnight(&raw.arrival_time)? as i32,
                departure_time: seconds_after_midnight(&raw.departure_time)? as i32,
            })
        })
        .collect::<Result<_, HeadwayError>>()?;

    for chunk in stop_times.chunks(INSERT_CHUNK_SIZE) {
        diesel::insert_into(stop_times_pg_schema::table)
            .values(chunk)
            .on_conflict_do_nothing()
            .execute(conn)
            .await?;
    }

    let calendar: Vec<models::StaticCalendar> = snapshot
        .calendar
        .iter()
        .map(|raw| {
            Ok(models::StaticCalendar {
                static_version_key,
                service_id: raw.service_id.clone(),
                monday: raw.monday == 1,
                tuesday: raw.tuesday == 1,
                wednesday: raw.wednesday == 1,
                thursday: raw.thursday == 1,
                friday: raw.friday == 1,
                saturday: raw.saturday == 1,
                sunday: raw.sunday == 1,
                gtfs_start_date: gtfs_date("calendar start_date", &raw.start_date)?,
                gtfs_end_date: gtfs_date("calendar end_date", &raw.end_date)?,
            })
        })
        .collect::<Result<_, HeadwayError>>()?;

    for chunk in calendar.chunks(INSERT_CHUNK_SIZE) {
        diesel::insert_into(calendar_pg_schema::table)
            .values(chunk)
            .on_conflict_do_nothing()
            .execute(conn)
            .await?;
    }

    let calendar_dates: Vec<models::StaticCalendarDate> = snapshot
        .calendar_dates
        .iter()
        .map(|raw| {
            Ok(models::StaticCalendarDate {
                static_version_key,
                service_id: raw.service_id.clone(),
                gtfs_date: gtfs_date("calendar_dates date", &raw.date)?,
                exception_type: raw.exception_type,
            })
        })
        .collect::<Result<_, HeadwayError>>()?;

    for chunk in calendar_dates.chunks(INSERT_CHUNK_SIZE) {
        diesel::insert_into(calendar_dates_pg_schema::table)
            .values(chunk)
            .on_conflict_do_nothing()
            .execute(conn)
            .await?;
    }

    let routes: Vec<models::StaticRoute> = snapshot
        .routes
        .iter()
        .map(|raw| models::StaticRoute {
            static_version_key,
            route_id: raw.route_id.clone(),
            route_type: raw.route_type,
            route_long_name: raw.route_long_name.clone(),
        })
        .collect();

    for chunk in routes.chunks(INSERT_CHUNK_SIZE) {
        diesel::insert_into(routes_pg_schema::table)
            .values(chunk)
            .on_conflict_do_nothing()
            .execute(conn)
            .await?;
    }

    let directions: Vec<models::StaticDirection> = snapshot
        .directions
        .iter()
        .map(|raw| models::StaticDirection {
            static_version_key,
            route_id: raw.route_id.clone(),
            direction_id: raw.direction_id == 1,
            direction: raw.direction.clone(),
            direction_destination: raw.direction_destination.clone(),
        })
        .collect();

    for chunk in directions.chunks(INSERT_CHUNK_SIZE) {
        diesel::insert_into(directions_pg_schema::table)
            .values(chunk)
            .on_conflict_do_nothing()
            .execute(conn)
            .await?;
    }

    Ok(static_version_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_keys_are_stable_per_feed_version() {
        assert_eq!(version_key("2024-06-14T16:00"), version_key("2024-06-14T16:00"));
        assert_ne!(version_key("2024-06-14T16:00"), version_key("2024-06-21T16:00"));
    }

    #[test]
    fn gtfs_dates_must_be_yyyymmdd() {
        assert_eq!(
            gtfs_date("feed_start_date", "20240614").unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 14).unwrap()
        );
        assert!(matches!(
            gtfs_date("feed_start_date", "2024-06-14"),
            Err(HeadwayError::InvalidTime(_))
        ));
    }
}
