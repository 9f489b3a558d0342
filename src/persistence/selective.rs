use std::sync::Arc;

use tracing::{Instrument, Level, event, info_span};

use crate::core::{Result, TrackError};
use crate::persistence::sink::ExecutionSink;
use crate::persistence::statement::{StatementGenerator, WriteStatement};
use crate::record::{Persistable, RecordDescriptor};
use crate::tracking::ChangeSet;

/// Writes only what changed.
///
/// Tracked wrappers get a write restricted to their dirty columns, plain
/// records a full write. The change set is cleared only after the sink
/// reports success; any failure leaves it as it was so the same call can be
/// repeated.
#[derive(Clone)]
pub struct SelectivePersistence {
    generator: Arc<dyn StatementGenerator>,
    sink: Arc<dyn ExecutionSink>,
}

impl SelectivePersistence {
    pub fn new(generator: Arc<dyn StatementGenerator>, sink: Arc<dyn ExecutionSink>) -> Self {
        Self { generator, sink }
    }

    pub fn sink(&self) -> &Arc<dyn ExecutionSink> {
        &self.sink
    }

    /// Persists `instance` and returns whether a write took effect.
    ///
    /// Returns `Ok(false)` without contacting the sink when a tracked
    /// instance is clean.
    pub async fn persist_dirty<T: Persistable + ?Sized>(&self, instance: &T) -> Result<bool> {
        let descriptor = instance.record_descriptor();
        let span = info_span!(
            "persist_dirty",
            record = descriptor.type_name,
            handle = ?instance.tracking_handle()
        );

        async move {
            match instance.change_set() {
                Some(change_set) => self.persist_restricted(instance, change_set).await,
                None => self.persist_full(instance).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn persist_restricted<T: Persistable + ?Sized>(
        &self,
        instance: &T,
        change_set: &Arc<ChangeSet>,
    ) -> Result<bool> {
        if !change_set.is_dirty() {
            event!(Level::TRACE, "instance is clean, nothing to write");
            return Ok(false);
        }

        let fields = change_set.dirty_fields();
        let statement = self
            .generator
            .build_restricted_write(&instance.snapshot(), &fields)?;

        if statement.is_empty() {
            // Only ignored fields were flagged.
            change_set.mark_clean();
            return Ok(false);
        }

        let descriptor = instance.record_descriptor();
        let affected = self.execute(descriptor, &statement).await?;
        if affected == 0 {
            return Err(Self::persistence_error(
                descriptor,
                &statement,
                TrackError::RowNotFound {
                    table: statement.table.clone(),
                    key: statement.key.to_string(),
                },
            ));
        }

        change_set.mark_clean();
        event!(
            Level::DEBUG,
            columns = ?statement.columns(),
            "restricted write applied"
        );
        Ok(true)
    }

    async fn persist_full<T: Persistable + ?Sized>(&self, instance: &T) -> Result<bool> {
        let statement = self.generator.build_full_write(&instance.snapshot())?;
        let affected = self
            .execute(instance.record_descriptor(), &statement)
            .await?;

        event!(Level::DEBUG, affected, "full write applied");
        Ok(affected > 0)
    }

    async fn execute(
        &self,
        descriptor: &RecordDescriptor,
        statement: &WriteStatement,
    ) -> Result<u64> {
        self.sink.execute(statement).await.map_err(|err| {
            event!(Level::ERROR, error = %err, sql = %statement.to_sql(), "write failed");
            Self::persistence_error(descriptor, statement, err)
        })
    }

    fn persistence_error(
        descriptor: &RecordDescriptor,
        statement: &WriteStatement,
        source: TrackError,
    ) -> TrackError {
        TrackError::Persistence {
            record: descriptor.type_name.to_string(),
            columns: statement.columns(),
            source: Box::new(source),
        }
    }
}
