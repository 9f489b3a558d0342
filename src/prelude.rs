//! Everything a typical application needs in one import.

pub use crate::{
    ChangeTracker, FieldValue, Materialized, Persistable, Record, Result, TrackError, Tracked,
    TrackingConfig, Value,
};
