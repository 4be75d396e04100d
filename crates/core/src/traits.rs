//! Row-store collaborator
//!
//! The core never talks to a database driver directly. Everything that
//! reaches a backend goes through [`RowStore`]: parameterized SQL text in,
//! rows out. Connection management, pooling, timeouts and retries belong to
//! the implementation.
//!
//! Thread safety: all methods must be safe to call concurrently from
//! multiple threads (requires Send + Sync).

use crate::error::Result;
use crate::value::Value;
use std::sync::Arc;

/// One result row
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row; `values` is positional against `columns`
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Row { columns, values }
    }

    /// Column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Value by position
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value by column name (case-insensitive)
    pub fn get_by_name(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|i| self.values.get(i))
    }

    /// Consume into (column, value) pairs
    pub fn into_pairs(self) -> impl Iterator<Item = (String, Value)> {
        let columns = self.columns;
        self.values
            .into_iter()
            .enumerate()
            .map(move |(i, v)| (columns[i].clone(), v))
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Backend capable of executing parameterized SQL
///
/// Implementations report every failure (connection loss, timeout,
/// constraint violation) as `Error::BackendUnavailable`.
pub trait RowStore: Send + Sync {
    /// Execute a statement that returns rows
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the statement cannot be executed.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement that modifies rows, returning the affected count
    ///
    /// For an `UPDATE` the count should be the rows matched by the `WHERE`
    /// clause. Drivers that only report changed rows return 0 for an update
    /// that rewrites identical values; callers confirm absence separately
    /// before treating 0 as a missing row.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the statement cannot be executed.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute one statement once per parameter set, atomically
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if any execution fails; no parameter set
    /// is applied in that case.
    fn execute_batch(&self, sql: &str, param_sets: &[Vec<Value>]) -> Result<u64>;

    /// Execute an INSERT and return the key the backend generated for it
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the insert fails or yields no key.
    fn insert_returning_key(&self, sql: &str, params: &[Value]) -> Result<Value>;
}

impl<T: RowStore + ?Sized> RowStore for Arc<T> {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        (**self).query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        (**self).execute(sql, params)
    }

    fn execute_batch(&self, sql: &str, param_sets: &[Vec<Value>]) -> Result<u64> {
        (**self).execute_batch(sql, param_sets)
    }

    fn insert_returning_key(&self, sql: &str, params: &[Value]) -> Result<Value> {
        (**self).insert_returning_key(sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_access() {
        let columns: Arc<[String]> = vec!["id".to_string(), "Name".to_string()].into();
        let row = Row::new(columns, vec![Value::Int(1), Value::Text("Elvis".into())]);
        assert_eq!(row.len(), 2);
        assert_eq!(row.get(0), Some(&Value::Int(1)));
        assert_eq!(row.get_by_name("name"), Some(&Value::Text("Elvis".into())));
        assert!(row.get_by_name("age").is_none());

        let pairs: Vec<(String, Value)> = row.into_pairs().collect();
        assert_eq!(pairs[1].0, "Name");
    }
}
