//! Selective persistence of tracked records and the batch stream driver.

pub mod batch;
pub mod selective;
pub mod sink;
pub mod statement;

pub use batch::{BatchOrchestrator, BatchReport, CancellationToken};
pub use selective::SelectivePersistence;
pub use sink::{ExecutionSink, MemorySink};
pub use statement::{SqlStatementGenerator, StatementGenerator, WriteMode, WriteStatement};
