//! Batch reconciliation pipeline.
//!
//! One invocation drains up to six unprocessed file groups, oldest
//! partition first. Each group runs normalize, merge, trip resolution,
//! event linking, and metrics in strict sequence; a failure anywhere in a
//! group marks that group failed and moves on to the next. A shutdown
//! flag is polled between groups so an in-flight group always finishes.

use crate::error::HeadwayError;
use crate::ledger::{self, FileGroup};
use crate::merge::{StagedBatch, apply_merge, fetch_existing, plan_merge};
use crate::metrics::update_metrics;
use crate::normalize::trip_updates::normalize_trip_updates;
use crate::normalize::vehicle_positions::normalize_vehicle_positions;
use crate::postgres_tools::HeadwayPostgresPool;
use crate::service_time::service_date_for_unix;
use crate::sources::{RowSource, SourceKind};
use crate::static_lookup::patterns::refresh_route_patterns;
use crate::static_lookup::{active_version_for_date, parent_station_map};
use crate::trips::{
    backfill_start_times, classify_trip_branches, link_adjacent_events, resolve_static_trips,
    seed_trips,
};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use diesel_async::AsyncPgConnection;
use itertools::Itertools;
use log::{error, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Older backlog drains first; the newest partitions wait for the next
/// cycle so their batch can keep accumulating.
pub const GROUPS_PER_CYCLE: usize = 6;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchSummary {
    pub groups_processed: usize,
    pub groups_failed: usize,
    pub events_staged: usize,
    pub events_inserted: usize,
    pub events_updated: usize,
}

struct GroupOutcome {
    staged: usize,
    inserted: usize,
    updated: usize,
}

async fn process_group(
    conn: &mut AsyncPgConnection,
    source: &impl RowSource,
    group: &FileGroup,
    tz: Tz,
) -> Result<GroupOutcome, HeadwayError> {
    let group_date = service_date_for_unix(group.partition_timestamp, tz).ok_or_else(|| {
        HeadwayError::InvalidTime(format!(
            "partition timestamp {}",
            group.partition_timestamp
        ))
    })?;

    let static_version_key = active_version_for_date(conn, group_date).await?;
    let parent_stations = parent_station_map(conn, static_version_key).await?;

    let position_rows = source.vehicle_positions(&group.paths_for(SourceKind::VehiclePositions))?;
    let update_rows = source.trip_updates(&group.paths_for(SourceKind::TripUpdates))?;

    let mut staged = StagedBatch::new();
    staged.stage(normalize_vehicle_positions(
        position_rows,
        &parent_stations,
        static_version_key,
        tz,
    ));
    staged.stage(normalize_trip_updates(
        update_rows,
        &parent_stations,
        static_version_key,
        tz,
    ));

    if staged.is_empty() {
        return Ok(GroupOutcome {
            staged: 0,
            inserted: 0,
            updated: 0,
        });
    }

    let watermark = Utc::now();
    // metrics recompute keys off updated_on strictly after this
    let metrics_since = watermark - chrono::Duration::seconds(1);

    let existing = fetch_existing(conn, &staged.keys()).await?;
    let plan = plan_merge(&staged, &existing, watermark);
    let (inserted, updated) = apply_merge(conn, &plan, watermark).await?;

    let touched_dates: Vec<NaiveDate> = staged
        .events()
        .map(|event| event.service_date)
        .unique()
        .sorted()
        .collect();

    let now = Utc::now();
    seed_trips(conn, &staged, now).await?;

    for service_date in touched_dates {
        // pre-cutoff rows land on the previous service date, which may sit
        // under a different schedule version than the group itself
        let date_version = active_version_for_date(conn, service_date).await?;

        refresh_route_patterns(conn, date_version, service_date).await?;
        classify_trip_branches(conn, service_date, now).await?;
        resolve_static_trips(conn, date_version, service_date, now).await?;
        backfill_start_times(conn, service_date, tz, now).await?;
        link_adjacent_events(conn, date_version, service_date, now).await?;
        update_metrics(conn, service_date, metrics_since, now).await?;
    }

    Ok(GroupOutcome {
        staged: staged.len(),
        inserted,
        updated,
    })
}

pub async fn run_batch(
    pool: &HeadwayPostgresPool,
    source: &impl RowSource,
    tz: Tz,
    shutdown: &Arc<AtomicBool>,
) -> Result<BatchSummary, HeadwayError> {
    let mut conn = pool.get().await?;

    let groups = ledger::unprocessed_groups(&mut conn, GROUPS_PER_CYCLE).await?;
    let mut summary = BatchSummary::default();

    for group in groups {
        if shutdown.load(Ordering::Relaxed) {
            info!("shutdown requested, leaving remaining groups for the next run");
            break;
        }

        let started = std::time::Instant::now();
        info!(
            "group start partition={} files={}",
            group.partition_timestamp,
            group.entries.len()
        );

        match process_group(&mut conn, source, &group, tz).await {
            Ok(outcome) => {
                ledger::mark_group(&mut conn, &group.ids(), false, Utc::now()).await?;
                summary.groups_processed += 1;
                summary.events_staged += outcome.staged;
                summary.events_inserted += outcome.inserted;
                summary.events_updated += outcome.updated;
                info!(
                    "group complete partition={} staged={} inserted={} updated={} elapsed_ms={}",
                    group.partition_timestamp,
                    outcome.staged,
                    outcome.inserted,
                    outcome.updated,
                    started.elapsed().as_millis()
                );
            }
            Err(err) => {
                error!(
                    "group failed partition={}: {}",
                    group.partition_timestamp, err
                );
                // marked processed anyway so the group cannot retry forever
                ledger::mark_group(&mut conn, &group.ids(), true, Utc::now()).await?;
                summary.groups_failed += 1;
            }
        }
    }

    Ok(summary)
}
