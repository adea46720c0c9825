//! Source file readers.
//!
//! The pipeline consumes flattened realtime rows from files referenced by
//! the ingest ledger. `RowSource` is the seam; the JSON-lines reader is
//! the concrete implementation used by the binary and by tests.

use crate::error::HeadwayError;
use crate::normalize::trip_updates::RawTripUpdate;
use crate::normalize::vehicle_positions::RawVehiclePosition;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    VehiclePositions,
    TripUpdates,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::VehiclePositions => "rt_vehicle_positions",
            SourceKind::TripUpdates => "rt_trip_updates",
        }
    }

    pub fn parse(input: &str) -> Option<SourceKind> {
        match input {
            "rt_vehicle_positions" => Some(SourceKind::VehiclePositions),
            "rt_trip_updates" => Some(SourceKind::TripUpdates),
            _ => None,
        }
    }
}

pub trait RowSource {
    fn vehicle_positions(&self, paths: &[String]) -> Result<Vec<RawVehiclePosition>, HeadwayError>;
    fn trip_updates(&self, paths: &[String]) -> Result<Vec<RawTripUpdate>, HeadwayError>;
}

pub fn parse_json_lines<T: DeserializeOwned>(text: &str) -> Result<Vec<T>, HeadwayError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str::<T>(line)
                .map_err(|err| HeadwayError::SourceRead(format!("bad row: {}", err)))
        })
        .collect()
}

/// One JSON object per line, one file per ledger path, rooted at a local
/// directory.
pub struct JsonLinesSource {
    root: PathBuf,
}

impl JsonLinesSource {
    pub fn new(root: impl AsRef<Path>) -> JsonLinesSource {
        JsonLinesSource {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn read_rows<T: DeserializeOwned>(
        &self,
        paths: &[String],
    ) -> Result<Vec<T>, HeadwayError> {
        let mut rows = Vec::new();

        for path in paths {
            let full_path = self.root.join(path);
            let text = std::fs::read_to_string(&full_path).map_err(|err| {
                HeadwayError::SourceRead(format!("{}: {}", full_path.display(), err))
            })?;
            rows.extend(parse_json_lines(&text)?);
        }

        Ok(rows)
    }
}

impl RowSource for JsonLinesSource {
    fn vehicle_positions(&self, paths: &[String]) -> Result<Vec<RawVehiclePosition>, HeadwayError> {
        self.read_rows(paths)
    }

    fn trip_updates(&self, paths: &[String]) -> Result<Vec<RawTripUpdate>, HeadwayError> {
        self.read_rows(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_round_trips_through_its_label() {
        for kind in [SourceKind::VehiclePositions, SourceKind::TripUpdates] {
            assert_eq!(SourceKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(SourceKind::parse("rt_alerts"), None);
    }

    #[test]
    fn json_lines_skip_blanks_and_parse_each_row() {
        let text = "\
{\"vehicle_id\": \"v1\"}\n\
\n\
  \n\
{\"vehicle_id\": \"v2\"}\n";

        #[derive(serde::Deserialize)]
        struct Row {
            vehicle_id: String,
        }

        let rows: Vec<Row> = parse_json_lines(text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].vehicle_id, "v2");
    }

    #[test]
    fn malformed_rows_fail_the_read() {
        #[derive(serde::Deserialize)]
        struct Row {
            #[allow(dead_code)]
            vehicle_id: String,
        }

        let result: Result<Vec<Row>, _> = parse_json_lines("{\"vehicle_id\": 17}");
        assert!(matches!(result, Err(HeadwayError::SourceRead(_))));
    }
}
