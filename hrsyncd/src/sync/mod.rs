pub mod engine;
pub mod flatten;

use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub use engine::{
    ResourceTally, StepFailure, StepReport, SyncEngine, SyncError, SyncOptions, SyncResource,
    SyncState, SyncSummary, TeamScopePolicy,
};
pub use flatten::{FlatIteration, derive_time_frame, flatten_tree, validate_iteration};

/// A problem with one fetched record. Counted and logged; never aborts a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("malformed date in `{field}`: {value}")]
    MalformedDate { field: &'static str, value: String },
    #[error("malformed id `{0}`")]
    MalformedId(String),
}

/// Parses an RFC 3339 timestamp into unix seconds.
pub(crate) fn parse_timestamp(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<i64>, RecordError> {
    let Some(value) = value.filter(|value| !value.trim().is_empty()) else {
        return Ok(None);
    };
    OffsetDateTime::parse(value, &Rfc3339)
        .map(|parsed| Some(parsed.unix_timestamp()))
        .map_err(|_| RecordError::MalformedDate {
            field,
            value: value.to_string(),
        })
}
