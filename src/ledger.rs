//! Ingest file ledger.
//!
//! Every source file the pipeline may consume is registered here first.
//! Groups share a partition timestamp (the files flattened from the same
//! source window) and are drained oldest-first. Failed groups are still
//! marked processed so a bad file cannot wedge the loop; operators clear
//! the failed flag to force a retry.

use crate::error::HeadwayError;
use crate::models;
use crate::schema::perf::ingest_files as ingest_files_pg_schema;
use crate::sources::SourceKind;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use itertools::Itertools;
use std::hash::Hasher;

/// Stable ledger id so re-registering a file is a no-op.
pub fn file_id(kind: SourceKind, path: &str) -> i64 {
    let mut hasher = siphasher::sip::SipHasher24::new_with_keys(0, 0);
    hasher.write(kind.as_str().as_bytes());
    hasher.write(&[0x1e]);
    hasher.write(path.as_bytes());
    hasher.finish() as i64
}

#[derive(Clone, Debug)]
pub struct FileGroup {
    pub partition_timestamp: i64,
    pub entries: Vec<models::IngestFile>,
}

impl FileGroup {
    pub fn ids(&self) -> Vec<i64> {
        self.entries.iter().map(|entry| entry.id).collect()
    }

    pub fn paths_for(&self, kind: SourceKind) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.source_kind == kind.as_str())
            .map(|entry| entry.path.clone())
            .collect()
    }
}

pub fn group_by_partition(files: Vec<models::IngestFile>, limit: usize) -> Vec<FileGroup> {
    files
        .into_iter()
        .chunk_by(|file| file.partition_timestamp)
        .into_iter()
        .map(|(partition_timestamp, entries)| FileGroup {
            partition_timestamp,
            entries: entries.collect(),
        })
        .take(limit)
        .collect()
}

pub async fn register_file(
    conn: &mut AsyncPgConnection,
    kind: SourceKind,
    path: &str,
    partition_timestamp: i64,
    now: DateTime<Utc>,
) -> Result<bool, HeadwayError> {
    let row = models::IngestFile {
        id: file_id(kind, path),
        source_kind: kind.as_str().to_string(),
        path: path.to_string(),
        partition_timestamp,
        processed: false,
        failed: false,
        created_on: now,
        updated_on: now,
    };

    let inserted = diesel::insert_into(ingest_files_pg_schema::table)
        .values(&row)
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;

    Ok(inserted == 1)
}

/// Unprocessed file groups, oldest partition first, capped at `limit`
/// groups.
pub async fn unprocessed_groups(
    conn: &mut AsyncPgConnection,
    limit: usize,
) -> Result<Vec<FileGroup>, HeadwayError> {
    let files = ingest_files_pg_schema::table
        .filter(ingest_files_pg_schema::dsl::processed.eq(false))
        .order((
            ingest_files_pg_schema::dsl::partition_timestamp.asc(),
            ingest_files_pg_schema::dsl::path.asc(),
        ))
        .select(models::IngestFile::as_select())
        .load::<models::IngestFile>(conn)
        .await?;

    Ok(group_by_partition(files, limit))
}

/// Processed is set even when the group failed.
pub async fn mark_group(
    conn: &mut AsyncPgConnection,
    ids: &[i64],
    failed: bool,
    now: DateTime<Utc>,
) -> Result<usize, HeadwayError> {
    let marked = diesel::update(
        ingest_files_pg_schema::table.filter(ingest_files_pg_schema::dsl::id.eq_any(ids)),
    )
    .set((
        ingest_files_pg_schema::dsl::processed.eq(true),
        ingest_files_pg_schema::dsl::failed.eq(failed),
        ingest_files_pg_schema::dsl::updated_on.eq(now),
    ))
    .execute(conn)
    .await?;

    Ok(marked)
}
