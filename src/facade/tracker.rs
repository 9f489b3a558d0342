use std::collections::BTreeMap;
use std::sync::Arc;

use futures::Stream;

use crate::config::TrackingConfig;
use crate::core::{Result, Value};
use crate::facade::Materialized;
use crate::persistence::{
    BatchOrchestrator, CancellationToken, ExecutionSink, MemorySink, SelectivePersistence,
    SqlStatementGenerator, StatementGenerator,
};
use crate::record::{Persistable, Record};
use crate::tracking::{Tracked, TrackedInstanceRegistry};

/// Entry point tying configuration, the instance registry and selective
/// persistence together.
///
/// Each tracker owns its registry, so wrappers created through different
/// trackers never see each other.
pub struct ChangeTracker {
    config: TrackingConfig,
    registry: Arc<TrackedInstanceRegistry>,
    persistence: Arc<SelectivePersistence>,
}

impl ChangeTracker {
    pub fn new(
        config: TrackingConfig,
        generator: Arc<dyn StatementGenerator>,
        sink: Arc<dyn ExecutionSink>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry: Arc::new(TrackedInstanceRegistry::new()),
            persistence: Arc::new(SelectivePersistence::new(generator, sink)),
        })
    }

    /// Uses the bundled SQL generator, honouring `config.table_prefix`.
    pub fn with_sink(config: TrackingConfig, sink: Arc<dyn ExecutionSink>) -> Result<Self> {
        let generator = match &config.table_prefix {
            Some(prefix) => SqlStatementGenerator::with_table_prefix(prefix.clone()),
            None => SqlStatementGenerator::new(),
        };
        Self::new(config, Arc::new(generator), sink)
    }

    /// Tracker backed by a fresh [`MemorySink`], returned for inspection.
    pub fn in_memory(config: TrackingConfig) -> Result<(Self, Arc<MemorySink>)> {
        let sink = Arc::new(MemorySink::new());
        let tracker = Self::with_sink(config, sink.clone())?;
        Ok((tracker, sink))
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TrackedInstanceRegistry> {
        &self.registry
    }

    pub fn persistence(&self) -> &Arc<SelectivePersistence> {
        &self.persistence
    }

    pub fn track<R: Record>(&self, record: R) -> Result<Tracked<R>> {
        Tracked::wrap_in(record, Arc::clone(&self.registry))
    }

    pub fn track_new<R: Record + Default>(&self) -> Result<Tracked<R>> {
        Tracked::new_in(Arc::clone(&self.registry))
    }

    pub fn track_copy<R: Record + Default>(&self, source: &R) -> Result<Tracked<R>> {
        Tracked::copy_from_in(source, Arc::clone(&self.registry))
    }

    pub fn track_row<R: Record + Default>(
        &self,
        row: BTreeMap<String, Value>,
    ) -> Result<Tracked<R>> {
        Tracked::from_values_in(row, Arc::clone(&self.registry))
    }

    /// Hands a record read from a data source to the caller, wrapped only
    /// when tracking is enabled.
    pub fn materialize<R: Record>(&self, record: R) -> Result<Materialized<R>> {
        if self.config.enable_tracking {
            Ok(Materialized::Tracked(self.track(record)?))
        } else {
            Ok(Materialized::Plain(record))
        }
    }

    pub fn is_tracked<T: Persistable + ?Sized>(&self, instance: &T) -> bool {
        self.registry.is_tracked(instance)
    }

    pub async fn persist_dirty<T: Persistable + ?Sized>(&self, instance: &T) -> Result<bool> {
        self.persistence.persist_dirty(instance).await
    }

    pub fn orchestrator(&self) -> BatchOrchestrator {
        BatchOrchestrator::new(Arc::clone(&self.persistence))
    }

    pub fn orchestrator_with(&self, cancellation: CancellationToken) -> BatchOrchestrator {
        BatchOrchestrator::with_cancellation(Arc::clone(&self.persistence), cancellation)
    }

    /// Persists `items` in chunks of the configured batch size.
    pub async fn process_in_batches<S, T>(&self, items: S) -> Result<usize>
    where
        S: Stream<Item = Result<T>> + Send,
        T: Persistable,
    {
        self.orchestrator()
            .process_in_batches(items, self.config.batch_size)
            .await
    }
}
