//! Event merge engine.
//!
//! Fuses freshly normalized events with already persisted rows into a
//! minimal set of inserts and updates. The staging area is an in-memory
//! batch keyed on the trip-stop hash; the join against stored state is a
//! bounded `eq_any` lookup over exactly the staged keys, never a table
//! scan. Replaying an already-applied batch plans zero operations.

use crate::error::HeadwayError;
use crate::models;
use crate::normalize::NormalizedEvent;
use crate::schema::perf::vehicle_events as vehicle_events_pg_schema;
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

/// Staged events for one merge cycle, at most one per trip-stop hash.
#[derive(Default)]
pub struct StagedBatch {
    events: AHashMap<String, NormalizedEvent>,
}

impl StagedBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage events, combining duplicates of the same key: observed
    /// timestamps keep the earliest sighting per field, predictions keep
    /// the latest, matching what each normalizer would have produced had
    /// the rows arrived in one batch.
    pub fn stage(&mut self, events: impl IntoIterator<Item = NormalizedEvent>) {
        for event in events {
            match self.events.entry(event.trip_stop_hash.clone()) {
                std::collections::hash_map::Entry::Vacant(vacant) => {
                    vacant.insert(event);
                }
                std::collections::hash_map::Entry::Occupied(mut occupied) => {
                    let staged = occupied.get_mut();

                    staged.vp_move_timestamp =
                        earliest(staged.vp_move_timestamp, event.vp_move_timestamp);
                    staged.vp_stop_timestamp =
                        earliest(staged.vp_stop_timestamp, event.vp_stop_timestamp);
                    staged.tu_stop_timestamp =
                        latest(staged.tu_stop_timestamp, event.tu_stop_timestamp);

                    if staged.start_time.is_none() {
                        staged.start_time = event.start_time;
                    }
                    if staged.vehicle_label.is_none() {
                        staged.vehicle_label = event.vehicle_label;
                    }
                    if staged.vehicle_consist.is_none() {
                        staged.vehicle_consist = event.vehicle_consist;
                    }
                }
            }
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.events.keys().cloned().collect()
    }

    pub fn events(&self) -> impl Iterator<Item = &NormalizedEvent> {
        self.events.values()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

fn earliest(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn latest(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Outcome of merging one incoming timestamp into one stored field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeDecision {
    Keep,
    Take(i64),
}

/// The monotonic enrichment rule, in one place: fill a null, or overwrite
/// with a strictly later value. A stored timestamp never regresses.
pub fn merge_timestamp(existing: Option<i64>, incoming: Option<i64>) -> MergeDecision {
    match (existing, incoming) {
        (None, Some(incoming)) => MergeDecision::Take(incoming),
        (Some(existing), Some(incoming)) if incoming > existing => MergeDecision::Take(incoming),
        _ => MergeDecision::Keep,
    }
}

fn apply_decision(existing: Option<i64>, decision: MergeDecision) -> Option<i64> {
    match decision {
        MergeDecision::Keep => existing,
        MergeDecision::Take(value) => Some(value),
    }
}

/// Update operation for one already-stored row, carrying the fully merged
/// timestamp values.
#[derive(Clone, Debug)]
pub struct EventUpdate {
    pub trip_stop_hash: String,
    pub vp_move_timestamp: Option<i64>,
    pub vp_stop_timestamp: Option<i64>,
    pub tu_stop_timestamp: Option<i64>,
}

#[derive(Debug, Default)]
pub struct MergePlan {
    pub inserts: Vec<models::VehicleEvent>,
    pub updates: Vec<EventUpdate>,
}

impl MergePlan {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty()
    }
}

fn event_row(event: &NormalizedEvent, now: DateTime<Utc>) -> models::VehicleEvent {
    models::VehicleEvent {
        trip_stop_hash: event.trip_stop_hash.clone(),
        service_date: event.service_date,
        pm_trip_id: event.pm_trip_id,
        route_id: event.route_id.clone(),
        trip_id: event.trip_id.clone(),
        direction_id: event.direction_id,
        start_time: event.start_time.map(|t| t as i32),
        vehicle_id: event.vehicle_id.clone(),
        stop_sequence: event.stop_sequence,
        stop_id: event.stop_id.clone(),
        parent_station: event.parent_station.clone(),
        static_version_key: event.static_version_key,
        vp_move_timestamp: event.vp_move_timestamp,
        vp_stop_timestamp: event.vp_stop_timestamp,
        tu_stop_timestamp: event.tu_stop_timestamp,
        travel_time_seconds: None,
        dwell_time_seconds: None,
        headway_trunk_seconds: None,
        headway_branch_seconds: None,
        canonical_stop_sequence: None,
        sync_stop_sequence: None,
        previous_event_hash: None,
        next_event_hash: None,
        updated_on: now,
    }
}

/// Pure in-memory hash join of the staged batch against the stored rows
/// whose keys intersect it. Staged keys with no stored row become inserts;
/// the rest become updates only when some field actually changes.
pub fn plan_merge(
    staged: &StagedBatch,
    existing: &[models::VehicleEvent],
    now: DateTime<Utc>,
) -> MergePlan {
    let stored_by_hash: AHashMap<&String, &models::VehicleEvent> = existing
        .iter()
        .map(|row| (&row.trip_stop_hash, row))
        .collect();

    let mut plan = MergePlan::default();

    for event in staged.events() {
        match stored_by_hash.get(&event.trip_stop_hash) {
            None => plan.inserts.push(event_row(event, now)),
            Some(stored) => {
                let move_decision =
                    merge_timestamp(stored.vp_move_timestamp, event.vp_move_timestamp);
                let stop_decision =
                    merge_timestamp(stored.vp_stop_timestamp, event.vp_stop_timestamp);
                let tu_decision =
                    merge_timestamp(stored.tu_stop_timestamp, event.tu_stop_timestamp);

                if move_decision == MergeDecision::Keep
                    && stop_decision == MergeDecision::Keep
                    && tu_decision == MergeDecision::Keep
                {
                    continue;
                }

                plan.updates.push(EventUpdate {
                    trip_stop_hash: event.trip_stop_hash.clone(),
                    vp_move_timestamp: apply_decision(stored.vp_move_timestamp, move_decision),
                    vp_stop_timestamp: apply_decision(stored.vp_stop_timestamp, stop_decision),
                    tu_stop_timestamp: apply_decision(stored.tu_stop_timestamp, tu_decision),
                });
            }
        }
    }

    // stable order so batched execution is deterministic
    plan.inserts.sort_by(|a, b| a.trip_stop_hash.cmp(&b.trip_stop_hash));
    plan.updates.sort_by(|a, b| a.trip_stop_hash.cmp(&b.trip_stop_hash));

    plan
}

/// Stored rows whose key intersects the staged keys.
pub async fn fetch_existing(
    conn: &mut AsyncPgConnection,
    keys: &[String],
) -> Result<Vec<models::VehicleEvent>, HeadwayError> {
    if keys.is_empty() {
        return Ok(vec![]);
    }

    let rows = vehicle_events_pg_schema::table
        .filter(vehicle_events_pg_schema::dsl::trip_stop_hash.eq_any(keys))
        .select(models::VehicleEvent::as_select())
        .load::<models::VehicleEvent>(conn)
        .await?;

    Ok(rows)
}

/// Execute a plan: one batched insert, then parameterized updates keyed by
/// primary key. Returns (inserted, updated) row counts.
pub async fn apply_merge(
    conn: &mut AsyncPgConnection,
    plan: &MergePlan,
    now: DateTime<Utc>,
) -> Result<(usize, usize), HeadwayError> {
    let mut inserted = 0;

    if !plan.inserts.is_empty() {
        inserted = diesel::insert_into(vehicle_events_pg_schema::table)
            .values(&plan.inserts)
            .on_conflict_do_nothing()
            .execute(conn)
            .await?;
    }

    let mut updated = 0;

    for update in &plan.updates {
        updated += diesel::update(
            vehicle_events_pg_schema::table
                .filter(vehicle_events_pg_schema::dsl::trip_stop_hash.eq(&update.trip_stop_hash)),
        )
        .set((
            vehicle_events_pg_schema::dsl::vp_move_timestamp.eq(update.vp_move_timestamp),
            vehicle_events_pg_schema::dsl::vp_stop_timestamp.eq(update.vp_stop_timestamp),
            vehicle_events_pg_schema::dsl::tu_stop_timestamp.eq(update.tu_stop_timestamp),
            vehicle_events_pg_schema::dsl::updated_on.eq(now),
        ))
        .execute(conn)
        .await?;
    }

    Ok((inserted, updated))
}
