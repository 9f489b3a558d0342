use std::collections::BTreeSet;

use crate::core::{Result, TrackError, Value};
use crate::record::RecordSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Only the dirty columns are written.
    Restricted,
    /// Every non-ignored column is written.
    Full,
}

/// Keyed write against one row, ready for an execution sink.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteStatement {
    pub table: String,
    pub key_column: String,
    pub key: Value,
    pub assignments: Vec<(String, Value)>,
    pub mode: WriteMode,
}

impl WriteStatement {
    pub fn columns(&self) -> Vec<String> {
        self.assignments
            .iter()
            .map(|(column, _)| column.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn to_sql(&self) -> String {
        let set_clauses: Vec<String> = self
            .assignments
            .iter()
            .map(|(column, value)| format!("{} = {}", column, value.to_sql_literal()))
            .collect();

        format!(
            "UPDATE {} SET {} WHERE {} = {}",
            self.table,
            set_clauses.join(", "),
            self.key_column,
            self.key.to_sql_literal()
        )
    }
}

/// Builds writes for a record snapshot.
///
/// Implementations must never put ignored columns or the identity column in
/// the assignments; the identity goes to the key clause.
pub trait StatementGenerator: Send + Sync {
    fn build_restricted_write(
        &self,
        record: &RecordSnapshot,
        fields: &BTreeSet<String>,
    ) -> Result<WriteStatement>;

    fn build_full_write(&self, record: &RecordSnapshot) -> Result<WriteStatement>;
}

/// Default generator producing `UPDATE ... SET ... WHERE <identity> = ...`.
#[derive(Debug, Clone, Default)]
pub struct SqlStatementGenerator {
    table_prefix: Option<String>,
}

impl SqlStatementGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table_prefix(prefix: impl Into<String>) -> Self {
        Self {
            table_prefix: Some(prefix.into()),
        }
    }

    fn table_name(&self, record: &RecordSnapshot) -> String {
        match &self.table_prefix {
            Some(prefix) => format!("{}{}", prefix, record.descriptor.table),
            None => record.descriptor.table.to_string(),
        }
    }

    fn build(
        &self,
        record: &RecordSnapshot,
        mode: WriteMode,
        include: impl Fn(&str) -> bool,
    ) -> Result<WriteStatement> {
        let descriptor = record.descriptor;
        let identity = descriptor.identity_field().ok_or_else(|| {
            TrackError::UnsupportedShape(format!(
                "{} has no identity field '{}'",
                descriptor.type_name, descriptor.identity
            ))
        })?;
        let key = record.identity().cloned().ok_or_else(|| {
            TrackError::InvalidArgument(format!(
                "{} has no persisted identity in '{}'",
                descriptor.type_name, descriptor.identity
            ))
        })?;

        let assignments = descriptor
            .fields
            .iter()
            .filter(|field| field.name != identity.name && !field.is_ignored())
            .filter(|field| include(field.name))
            .map(|field| {
                let value = record.get(field.name).cloned().unwrap_or(Value::Null);
                (field.column.to_string(), value)
            })
            .collect();

        Ok(WriteStatement {
            table: self.table_name(record),
            key_column: identity.column.to_string(),
            key,
            assignments,
            mode,
        })
    }
}

impl StatementGenerator for SqlStatementGenerator {
    fn build_restricted_write(
        &self,
        record: &RecordSnapshot,
        fields: &BTreeSet<String>,
    ) -> Result<WriteStatement> {
        if let Some(unknown) = fields
            .iter()
            .find(|field| record.descriptor.field(field.as_str()).is_none())
        {
            return Err(TrackError::FieldNotFound {
                record: record.descriptor.type_name.to_string(),
                field: unknown.clone(),
            });
        }

        self.build(record, WriteMode::Restricted, |name| fields.contains(name))
    }

    fn build_full_write(&self, record: &RecordSnapshot) -> Result<WriteStatement> {
        self.build(record, WriteMode::Full, |_| true)
    }
}
