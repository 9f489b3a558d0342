use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::{Result, TrackError, Value};
use crate::persistence::statement::WriteStatement;
use crate::record::Persistable;

/// Executes keyed writes against the underlying store.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    /// Runs `statement` and returns the number of rows it affected.
    async fn execute(&self, statement: &WriteStatement) -> Result<u64>;
}

type Row = BTreeMap<String, Value>;

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, HashMap<Value, Row>>,
    history: Vec<WriteStatement>,
}

/// In-memory execution sink.
///
/// Rows are keyed by table and identity value. Statements update existing
/// rows only; a statement whose key matches nothing affects zero rows. Every
/// executed statement is kept in the history. `fail_next` makes the next
/// calls fail before touching any row, which is how a lost connection looks
/// to the persistence layer.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
    pending_failures: AtomicUsize,
    attempts: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the current values of `record` as a row, replacing any row with
    /// the same identity.
    pub async fn seed<T: Persistable + ?Sized>(&self, record: &T) -> Result<()> {
        let snapshot = record.snapshot();
        let key = snapshot.identity().cloned().ok_or_else(|| {
            TrackError::InvalidArgument(format!(
                "cannot seed {} without an identity",
                snapshot.descriptor.type_name
            ))
        })?;

        let row: Row = snapshot
            .descriptor
            .fields
            .iter()
            .map(|field| {
                let value = snapshot.get(field.name).cloned().unwrap_or(Value::Null);
                (field.column.to_string(), value)
            })
            .collect();

        let mut state = self.state.lock().await;
        state
            .tables
            .entry(snapshot.descriptor.table.to_string())
            .or_default()
            .insert(key, row);
        Ok(())
    }

    pub async fn row(&self, table: &str, key: &Value) -> Option<Row> {
        let state = self.state.lock().await;
        state.tables.get(table).and_then(|rows| rows.get(key)).cloned()
    }

    pub async fn history(&self) -> Vec<WriteStatement> {
        self.state.lock().await.history.clone()
    }

    /// Number of statements that reached the sink, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Acquire)
    }

    /// Makes the next `count` executions fail.
    pub fn fail_next(&self, count: usize) {
        self.pending_failures.store(count, Ordering::Release);
    }

    fn take_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                pending.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl ExecutionSink for MemorySink {
    async fn execute(&self, statement: &WriteStatement) -> Result<u64> {
        self.attempts.fetch_add(1, Ordering::AcqRel);
        if self.take_failure() {
            return Err(TrackError::Execution(format!(
                "connection lost while writing to '{}'",
                statement.table
            )));
        }

        let mut state = self.state.lock().await;
        let affected = match state
            .tables
            .get_mut(&statement.table)
            .and_then(|rows| rows.get_mut(&statement.key))
        {
            Some(row) => {
                for (column, value) in &statement.assignments {
                    row.insert(column.clone(), value.clone());
                }
                1
            }
            None => 0,
        };

        state.history.push(statement.clone());
        Ok(affected)
    }
}
