//! Target store collaborators.
//!
//! The import pipeline talks to the target through two narrow traits:
//! [`SchemaApplier`] receives the printed DDL once, [`TargetStore`] receives
//! batches of row mutations. Two implementations ship with the crate:
//! [`MemoryStore`] for tests and dry runs, and [`JsonlStore`] which writes
//! one JSON-lines file per table.

mod jsonl;

pub use jsonl::{read_column, JsonlStore};

use crate::data::TargetValue;
use crate::error::StoreError;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// One row insert for the target
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<TargetValue>,
}

impl Mutation {
    pub fn new(table: impl Into<String>, columns: Vec<String>, values: Vec<TargetValue>) -> Self {
        Self {
            table: table.into(),
            columns,
            values,
        }
    }

    /// Approximate size on the wire, counted against batch byte limits
    pub fn byte_size(&self) -> usize {
        self.table.len()
            + self.columns.iter().map(String::len).sum::<usize>()
            + self.values.iter().map(TargetValue::byte_size).sum::<usize>()
    }

    pub fn value(&self, column: &str) -> Option<&TargetValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }
}

/// Applies batches of row mutations. A batch is applied atomically or not
/// at all.
pub trait TargetStore: Send + Sync {
    fn apply(&self, batch: &[Mutation]) -> Result<(), StoreError>;
}

/// Applies the converted schema's DDL statements
pub trait SchemaApplier: Send + Sync {
    fn apply_schema(&self, statements: &[String]) -> Result<(), StoreError>;
}

/// In-memory store with scripted failures.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<Mutation>>,
    batch_sizes: Mutex<Vec<usize>>,
    schema: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<StoreError>>,
    attempts: Mutex<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `apply` call fail with `error`. Calls queue up.
    pub fn fail_next(&self, error: StoreError) {
        self.failures.lock().push_back(error);
    }

    pub fn fail_next_n(&self, n: usize, error: StoreError) {
        let mut failures = self.failures.lock();
        for _ in 0..n {
            failures.push_back(error.clone());
        }
    }

    pub fn rows(&self) -> Vec<Mutation> {
        self.rows.lock().clone()
    }

    pub fn rows_for(&self, table: &str) -> Vec<Mutation> {
        self.rows
            .lock()
            .iter()
            .filter(|m| m.table == table)
            .cloned()
            .collect()
    }

    /// Row count of every successfully applied batch, in order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    pub fn schema(&self) -> Vec<String> {
        self.schema.lock().clone()
    }

    /// Number of `apply` calls, failed ones included
    pub fn attempts(&self) -> u64 {
        *self.attempts.lock()
    }
}

impl TargetStore for MemoryStore {
    fn apply(&self, batch: &[Mutation]) -> Result<(), StoreError> {
        *self.attempts.lock() += 1;
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        self.rows.lock().extend_from_slice(batch);
        self.batch_sizes.lock().push(batch.len());
        Ok(())
    }
}

impl SchemaApplier for MemoryStore {
    fn apply_schema(&self, statements: &[String]) -> Result<(), StoreError> {
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        self.schema.lock().extend_from_slice(statements);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_failures_then_success() {
        let store = MemoryStore::new();
        store.fail_next(StoreError::Transient("busy".into()));
        let batch = vec![Mutation::new("t", vec!["a".into()], vec![TargetValue::Int64(1)])];

        assert!(store.apply(&batch).is_err());
        assert!(store.apply(&batch).is_ok());
        assert_eq!(store.attempts(), 2);
        assert_eq!(store.batch_sizes(), vec![1]);
        assert_eq!(store.rows_for("t").len(), 1);
    }

    #[test]
    fn test_mutation_size_and_lookup() {
        let m = Mutation::new(
            "users",
            vec!["id".into(), "name".into()],
            vec![TargetValue::Int64(7), TargetValue::String("ann".into())],
        );
        assert_eq!(m.byte_size(), 5 + 6 + 8 + 3);
        assert_eq!(m.value("name"), Some(&TargetValue::String("ann".into())));
        assert_eq!(m.value("nope"), None);
    }
}
