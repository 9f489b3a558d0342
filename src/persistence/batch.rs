use std::pin::{Pin, pin};
use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};
use log::warn;
use tracing::{Level, event};

use crate::core::{Result, TrackError};
use crate::persistence::selective::SelectivePersistence;
use crate::record::Persistable;

/// Cooperative cancellation shared between a driver and its caller.
///
/// Checked before every draw and before every write; a write already handed
/// to the sink always runs to completion.
pub use tokio_util::sync::CancellationToken;

/// Outcome of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    /// Zero-based chunk position in the stream.
    pub index: usize,
    /// Items drawn for this chunk.
    pub items: usize,
    /// Items for which a write took effect.
    pub persisted: usize,
}

struct BatchState<'a, T> {
    items: Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>,
    index: usize,
    processed: usize,
    exhausted: bool,
}

/// Drives selective persistence over a lazy, possibly unbounded sequence.
///
/// Items are persisted one at a time in arrival order. Errors from the
/// sequence or from persistence stop the run immediately.
#[derive(Clone)]
pub struct BatchOrchestrator {
    persistence: Arc<SelectivePersistence>,
    cancellation: CancellationToken,
}

impl BatchOrchestrator {
    pub fn new(persistence: Arc<SelectivePersistence>) -> Self {
        Self::with_cancellation(persistence, CancellationToken::new())
    }

    pub fn with_cancellation(
        persistence: Arc<SelectivePersistence>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            persistence,
            cancellation,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Persists every item and returns how many writes took effect.
    pub async fn process_all<S, T>(&self, items: S) -> Result<usize>
    where
        S: Stream<Item = Result<T>>,
        T: Persistable,
    {
        let mut items = pin!(items);
        let mut processed = 0;
        let mut persisted = 0;

        loop {
            self.check_cancelled(processed)?;
            let Some(item) = items.next().await else {
                break;
            };
            let item = item?;
            self.check_cancelled(processed)?;

            if self.persistence.persist_dirty(&item).await? {
                persisted += 1;
            }
            processed += 1;
        }

        event!(Level::DEBUG, processed, persisted, "stream processed");
        Ok(persisted)
    }

    /// Splits `items` into chunks of `batch_size` and yields a report after
    /// each chunk is persisted. Nothing more is drawn from `items` until the
    /// report is consumed.
    ///
    /// The stream ends after the first error, including a cancellation.
    pub fn batches<'a, S, T>(
        &'a self,
        items: S,
        batch_size: usize,
    ) -> impl Stream<Item = Result<BatchReport>> + Send + 'a
    where
        S: Stream<Item = Result<T>> + Send + 'a,
        T: Persistable + 'a,
    {
        let state = BatchState {
            items: Box::pin(items),
            index: 0,
            processed: 0,
            exhausted: false,
        };

        stream::unfold(Some(state), move |state| async move {
            let mut state = state?;
            if state.exhausted {
                return None;
            }

            match self.next_batch(&mut state, batch_size).await {
                Ok(Some(report)) => Some((Ok(report), Some(state))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    /// Runs [`BatchOrchestrator::batches`] to completion and returns the
    /// number of writes that took effect.
    pub async fn process_in_batches<S, T>(&self, items: S, batch_size: usize) -> Result<usize>
    where
        S: Stream<Item = Result<T>> + Send,
        T: Persistable,
    {
        let mut batches = pin!(self.batches(items, batch_size));
        let mut persisted = 0;
        while let Some(report) = batches.next().await {
            persisted += report?.persisted;
        }
        Ok(persisted)
    }

    async fn next_batch<T: Persistable>(
        &self,
        state: &mut BatchState<'_, T>,
        batch_size: usize,
    ) -> Result<Option<BatchReport>> {
        if batch_size == 0 {
            return Err(TrackError::InvalidArgument(
                "batch size must be greater than zero".to_string(),
            ));
        }
        self.check_cancelled(state.processed)?;

        let mut chunk = Vec::with_capacity(batch_size);
        while chunk.len() < batch_size {
            if !chunk.is_empty() {
                self.check_cancelled(state.processed)?;
            }
            match state.items.next().await {
                Some(item) => chunk.push(item?),
                None => {
                    state.exhausted = true;
                    break;
                }
            }
        }

        if chunk.is_empty() {
            return Ok(None);
        }

        let mut persisted = 0;
        for item in &chunk {
            self.check_cancelled(state.processed)?;
            if self.persistence.persist_dirty(item).await? {
                persisted += 1;
            }
            state.processed += 1;
        }

        let report = BatchReport {
            index: state.index,
            items: chunk.len(),
            persisted,
        };
        state.index += 1;

        event!(
            Level::DEBUG,
            index = report.index,
            items = report.items,
            persisted = report.persisted,
            "batch persisted"
        );
        Ok(Some(report))
    }

    fn check_cancelled(&self, processed: usize) -> Result<()> {
        if self.cancellation.is_cancelled() {
            warn!("batch persistence cancelled after {} items", processed);
            return Err(TrackError::Cancelled { processed });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::sink::MemorySink;
    use crate::persistence::statement::SqlStatementGenerator;
    use crate::record::testing::{Contact, contact};

    async fn setup(rows: i64) -> (BatchOrchestrator, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        for id in 1..=rows {
            sink.seed(&contact(id)).await.unwrap();
        }
        let persistence =
            SelectivePersistence::new(Arc::new(SqlStatementGenerator::new()), sink.clone());
        (BatchOrchestrator::new(Arc::new(persistence)), sink)
    }

    fn contacts(count: i64) -> impl Stream<Item = Result<Contact>> + Send {
        stream::iter((1..=count).map(|id| Ok(contact(id))))
    }

    #[tokio::test]
    async fn process_all_counts_effective_writes() {
        let (orchestrator, sink) = setup(3).await;
        let persisted = orchestrator.process_all(contacts(5)).await.unwrap();

        assert_eq!(persisted, 3);
        assert_eq!(sink.attempts(), 5);
    }

    #[tokio::test]
    async fn stream_errors_abort_processing() {
        let (orchestrator, sink) = setup(5).await;
        let items = stream::iter(vec![
            Ok(contact(1)),
            Err(TrackError::Execution("cursor closed".to_string())),
            Ok(contact(2)),
        ]);

        let err = orchestrator.process_all(items).await.unwrap_err();
        assert!(matches!(err, TrackError::Execution(_)));
        assert_eq!(sink.attempts(), 1);
    }

    #[tokio::test]
    async fn chunks_cover_the_stream_in_order() {
        let (orchestrator, sink) = setup(7).await;
        let reports: Vec<BatchReport> = orchestrator
            .batches(contacts(7), 3)
            .map(|report| report.unwrap())
            .collect()
            .await;

        let sizes: Vec<usize> = reports.iter().map(|report| report.items).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(reports[2].index, 2);

        let keys: Vec<_> = sink.history().await.into_iter().map(|s| s.key).collect();
        let expected: Vec<_> = (1..=7).map(crate::core::Value::Integer).collect();
        assert_eq!(keys, expected);
    }

    #[tokio::test]
    async fn cancellation_between_chunks_stops_drawing() {
        let (orchestrator, sink) = setup(25).await;
        let token = orchestrator.cancellation_token();
        let mut batches = pin!(orchestrator.batches(contacts(25), 10));

        assert_eq!(batches.next().await.unwrap().unwrap().items, 10);
        assert_eq!(batches.next().await.unwrap().unwrap().items, 10);
        token.cancel();

        let err = batches.next().await.unwrap().unwrap_err();
        assert!(matches!(err, TrackError::Cancelled { processed: 20 }));
        assert!(batches.next().await.is_none());
        assert_eq!(sink.attempts(), 20);
    }

    #[tokio::test]
    async fn zero_batch_size_is_rejected() {
        let (orchestrator, _sink) = setup(1).await;
        let err = orchestrator
            .process_in_batches(contacts(1), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackError::InvalidArgument(_)));
    }
}
