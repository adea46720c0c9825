use chrono::NaiveDate;

/// Error taxonomy for the reconciliation core.
///
/// Most of these are fatal to a single record or a single file group,
/// never to the whole batch loop. The pipeline catches them at the group
/// boundary and marks the group failed in the ingest ledger.
#[derive(thiserror::Error, Debug)]
pub enum HeadwayError {
    #[error("required identity field `{0}` missing from record")]
    MissingField(String),

    #[error("no static schedule version covers service date {0}")]
    NoMatchingSchedule(NaiveDate),

    #[error("invalid wall clock time `{0}`")]
    InvalidTime(String),

    #[error("source read failed: {0}")]
    SourceRead(String),

    #[error("storage error: {0}")]
    Storage(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(String),
}

impl<E: std::fmt::Debug> From<bb8::RunError<E>> for HeadwayError {
    fn from(e: bb8::RunError<E>) -> Self {
        HeadwayError::Pool(format!("{:?}", e))
    }
}
