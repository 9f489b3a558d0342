//! Change tracking and selective persistence for database-backed records.
//!
//! Wrap a record in [`Tracked`], mutate it, and [`SelectivePersistence`]
//! writes only the columns whose values actually changed.
//!
//! ```
//! use changetrack::{ChangeTracker, Record, TrackingConfig};
//!
//! #[derive(Record, Debug, Default, Clone)]
//! #[record(table = "customers")]
//! struct Customer {
//!     id: i64,
//!     email: String,
//! }
//!
//! # tokio_test::block_on(async {
//! let (tracker, sink) = ChangeTracker::in_memory(TrackingConfig::new())?;
//! let stored = Customer { id: 1, email: "old@example.com".into() };
//! sink.seed(&stored).await?;
//!
//! let mut customer = tracker.track(stored)?;
//! customer.set_email("new@example.com".to_string());
//! assert!(customer.is_dirty());
//!
//! assert!(tracker.persist_dirty(&customer).await?);
//! assert!(!customer.is_dirty());
//! # Ok::<(), changetrack::TrackError>(())
//! # }).unwrap();
//! ```

extern crate self as changetrack;

pub mod config;
pub mod core;
pub mod facade;
pub mod persistence;
pub mod record;
pub mod tracking;

// Re-export main types for convenience
pub use crate::config::TrackingConfig;
pub use crate::core::{FieldValue, Result, TrackError, Value};
pub use facade::{ChangeTracker, Materialized};
pub use persistence::{
    BatchOrchestrator, BatchReport, CancellationToken, ExecutionSink, MemorySink,
    SelectivePersistence, SqlStatementGenerator, StatementGenerator, WriteMode, WriteStatement,
};
pub use record::{FieldDescriptor, Persistable, Record, RecordDescriptor, RecordSnapshot};
pub use tracking::{ChangeSet, Tracked, TrackedInstanceRegistry, TrackingHandle};

// Re-export derive macro
pub use changetrack_derive::Record;

pub mod prelude;
