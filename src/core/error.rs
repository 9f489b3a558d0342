use thiserror::Error;

use crate::tracking::TrackingHandle;

#[derive(Error, Debug)]
pub enum TrackError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported record shape: {0}")]
    UnsupportedShape(String),

    #[error("Instance {0} is already registered")]
    AlreadyRegistered(TrackingHandle),

    #[error("Instance is not tracked: {0}")]
    NotTracked(String),

    #[error("Field '{field}' not found on record '{record}'")]
    FieldNotFound { record: String, field: String },

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("No row in '{table}' matched identity {key}")]
    RowNotFound { table: String, key: String },

    #[error("Persisting {record} columns [{}] failed: {source}", columns.join(", "))]
    Persistence {
        record: String,
        columns: Vec<String>,
        #[source]
        source: Box<TrackError>,
    },

    #[error("Cancelled after {processed} processed items")]
    Cancelled { processed: usize },
}

impl TrackError {
    /// Returns `true` when the error came out of the execution sink and the
    /// record's dirty state was left in place for a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }

    /// Column subset attempted by a failed persist, if any.
    pub fn attempted_columns(&self) -> Option<&[String]> {
        match self {
            Self::Persistence { columns, .. } => Some(columns),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackError>;
