use std::ops::Deref;
use std::sync::Arc;

use crate::core::{Result, TrackError, Value};
use crate::record::{Persistable, Record, RecordDescriptor, RecordSnapshot};
use crate::tracking::{ChangeSet, Tracked, TrackingHandle};

/// A record read from a data source, wrapped or not depending on
/// `TrackingConfig::enable_tracking`.
#[derive(Debug)]
pub enum Materialized<R: Record> {
    Tracked(Tracked<R>),
    Plain(R),
}

impl<R: Record> Materialized<R> {
    pub fn is_tracked(&self) -> bool {
        matches!(self, Self::Tracked(_))
    }

    pub fn as_tracked(&self) -> Option<&Tracked<R>> {
        match self {
            Self::Tracked(tracked) => Some(tracked),
            Self::Plain(_) => None,
        }
    }

    pub fn as_tracked_mut(&mut self) -> Option<&mut Tracked<R>> {
        match self {
            Self::Tracked(tracked) => Some(tracked),
            Self::Plain(_) => None,
        }
    }

    /// Writes a field by name. Dirty detection only happens for tracked
    /// records.
    pub fn set_field(&mut self, field: &str, value: impl Into<Value>) -> Result<()> {
        match self {
            Self::Tracked(tracked) => tracked.set_field(field, value),
            Self::Plain(record) => {
                if field.is_empty() {
                    return Err(TrackError::InvalidArgument(
                        "field name must not be empty".to_string(),
                    ));
                }
                let descriptor = R::descriptor().require_field(field)?;
                record.set(descriptor.name, value.into())
            }
        }
    }

    pub fn into_inner(self) -> R {
        match self {
            Self::Tracked(tracked) => tracked.into_inner(),
            Self::Plain(record) => record,
        }
    }
}

impl<R: Record> Deref for Materialized<R> {
    type Target = R;

    fn deref(&self) -> &R {
        match self {
            Self::Tracked(tracked) => tracked.record(),
            Self::Plain(record) => record,
        }
    }
}

impl<R: Record> Persistable for Materialized<R> {
    fn record_descriptor(&self) -> &'static RecordDescriptor {
        R::descriptor()
    }

    fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot::capture::<R>(self)
    }

    fn change_set(&self) -> Option<&Arc<ChangeSet>> {
        self.as_tracked().map(|tracked| tracked.change_set())
    }

    fn tracking_handle(&self) -> Option<TrackingHandle> {
        self.as_tracked().map(|tracked| tracked.handle())
    }
}
