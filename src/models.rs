use diesel::prelude::*;
use serde_derive::Deserialize;
use serde_derive::Serialize;

/// One stored observation of a vehicle at a parent station during one trip.
///
/// A row is created as soon as any one of the three source timestamps is
/// known and enriched in place as the others arrive. At most one row exists
/// per trip-stop hash, and per (service_date, pm_trip_id, parent_station)
/// once trip identity is resolved.
#[derive(Queryable, Selectable, Insertable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::perf::vehicle_events)]
pub struct VehicleEvent {
    pub trip_stop_hash: String,
    pub service_date: chrono::NaiveDate,
    pub pm_trip_id: i64,
    pub route_id: String,
    pub trip_id: String,
    pub direction_id: bool,
    pub start_time: Option<i32>,
    pub vehicle_id: String,
    pub stop_sequence: i32,
    pub stop_id: String,
    pub parent_station: String,
    pub static_version_key: i64,
    pub vp_move_timestamp: Option<i64>,
    pub vp_stop_timestamp: Option<i64>,
    pub tu_stop_timestamp: Option<i64>,
    pub travel_time_seconds: Option<i32>,
    pub dwell_time_seconds: Option<i32>,
    pub headway_trunk_seconds: Option<i32>,
    pub headway_branch_seconds: Option<i32>,
    pub canonical_stop_sequence: Option<i32>,
    pub sync_stop_sequence: Option<i32>,
    pub previous_event_hash: Option<String>,
    pub next_event_hash: Option<String>,
    pub updated_on: chrono::DateTime<chrono::Utc>,
}

/// One realtime trip per (service_date, route_id, trip_id), keyed by the
/// synthetic pm_trip_id digest of those three fields.
#[derive(Queryable, Selectable, Insertable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::perf::vehicle_trips)]
pub struct VehicleTrip {
    pub pm_trip_id: i64,
    pub service_date: chrono::NaiveDate,
    pub route_id: String,
    pub trip_id: String,
    pub direction_id: bool,
    pub start_time: Option<i32>,
    pub vehicle_id: Option<String>,
    pub vehicle_label: Option<String>,
    pub vehicle_consist: Option<String>,
    pub branch_route_id: Option<String>,
    pub trunk_route_id: String,
    pub stop_count: Option<i32>,
    pub static_trip_id_guess: Option<String>,
    pub static_start_time: Option<i32>,
    pub static_stop_count: Option<i32>,
    pub first_last_station_match: bool,
    pub static_version_key: i64,
    pub updated_on: chrono::DateTime<chrono::Utc>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::perf::static_feeds)]
pub struct StaticFeed {
    pub static_version_key: i64,
    pub feed_version: String,
    pub feed_start_date: chrono::NaiveDate,
    pub feed_end_date: chrono::NaiveDate,
    pub created_on: chrono::DateTime<chrono::Utc>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::perf::static_trips)]
pub struct StaticTrip {
    pub static_version_key: i64,
    pub trip_id: String,
    pub route_id: String,
    pub service_id: String,
    pub direction_id: bool,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::perf::static_stops)]
pub struct StaticStop {
    pub static_version_key: i64,
    pub stop_id: String,
    pub stop_name: Option<String>,
    pub parent_station: Option<String>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::perf::static_stop_times)]
pub struct StaticStopTime {
    pub static_version_key: i64,
    pub trip_id: String,
    pub stop_sequence: i32,
    pub stop_id: String,
    pub arrival_time: i32,
    pub departure_time: i32,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::perf::static_calendar)]
pub struct StaticCalendar {
    pub static_version_key: i64,
    pub service_id: String,
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
    pub sunday: bool,
    pub gtfs_start_date: chrono::NaiveDate,
    pub gtfs_end_date: chrono::NaiveDate,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::perf::static_calendar_dates)]
pub struct StaticCalendarDate {
    pub static_version_key: i64,
    pub service_id: String,
    pub gtfs_date: chrono::NaiveDate,
    pub exception_type: i16,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::perf::static_routes)]
pub struct StaticRoute {
    pub static_version_key: i64,
    pub route_id: String,
    pub route_type: i16,
    pub route_long_name: Option<String>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::perf::static_directions)]
pub struct StaticDirection {
    pub static_version_key: i64,
    pub route_id: String,
    pub direction_id: bool,
    pub direction: String,
    pub direction_destination: String,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::perf::static_route_patterns)]
pub struct StaticRoutePattern {
    pub static_version_key: i64,
    pub branch_route_id: String,
    pub direction_id: bool,
    pub parent_station: String,
    pub canonical_stop_sequence: i32,
    pub sync_stop_sequence: i32,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::perf::service_id_dates)]
pub struct ServiceIdDate {
    pub static_version_key: i64,
    pub service_date: chrono::NaiveDate,
    pub service_id: String,
}

/// Ledger row for one source file awaiting (or done with) reconciliation.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::perf::ingest_files)]
pub struct IngestFile {
    pub id: i64,
    pub source_kind: String,
    pub path: String,
    pub partition_timestamp: i64,
    pub processed: bool,
    pub failed: bool,
    pub created_on: chrono::DateTime<chrono::Utc>,
    pub updated_on: chrono::DateTime<chrono::Utc>,
}
