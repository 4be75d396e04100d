//! Backend access
//!
//! Executes generated statements against the row-store collaborator and
//! decodes rows into records of declared field types. Decoding is
//! all-or-nothing: one undecodable row fails the whole fetch, so nothing
//! from a bad response reaches the cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tessera_core::{EntityKey, Error, Record, Result, Row, RowStore, TableMapping, Value};
use tessera_sql::SqlGenerator;
use tracing::{debug, info};

/// Row store plus statement generator, with round-trip accounting
pub struct Backend {
    rows: Arc<dyn RowStore>,
    generator: SqlGenerator,
    round_trips: AtomicU64,
}

impl Backend {
    /// Wrap a row store
    pub fn new(rows: Arc<dyn RowStore>, generator: SqlGenerator) -> Self {
        Backend {
            rows,
            generator,
            round_trips: AtomicU64::new(0),
        }
    }

    /// The statement generator
    pub fn generator(&self) -> &SqlGenerator {
        &self.generator
    }

    /// Row-store calls issued so far
    pub fn round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::Relaxed)
    }

    fn trip(&self, table: &str, operation: &'static str) {
        self.round_trips.fetch_add(1, Ordering::Relaxed);
        debug!(target: "tessera::store", table, operation, "Backend round trip");
    }

    /// Create the table and its indexes
    ///
    /// # Errors
    ///
    /// `UnsupportedDialectFeature` if an index cannot be expressed (checked
    /// before any DDL runs), `BackendUnavailable` if DDL fails.
    pub fn create_schema(&self, mapping: &TableMapping) -> Result<()> {
        let indexes = self.generator.create_indexes(mapping)?;
        let table = self.generator.create_table(mapping);
        self.trip(mapping.table(), "create table");
        self.rows.execute(&table, &[])?;
        for ddl in indexes {
            self.trip(mapping.table(), "create index");
            self.rows.execute(&ddl, &[])?;
        }
        info!(target: "tessera::store", table = mapping.table(), "Created table");
        Ok(())
    }

    /// Fetch the rows for `keys` in one round trip
    pub fn fetch_keys(&self, mapping: &TableMapping, keys: &[EntityKey]) -> Result<Vec<Record>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let stmt = self.generator.select_by_keys(mapping, keys.len())?;
        let params: Vec<Value> = keys.iter().map(EntityKey::to_value).collect();
        self.trip(mapping.table(), "select by keys");
        let rows = self.rows.query(&stmt.sql, &params)?;
        decode_rows(mapping, rows)
    }

    /// Fetch every row, ordered by key
    pub fn fetch_all(&self, mapping: &TableMapping) -> Result<Vec<Record>> {
        let sql = self.generator.select_all(mapping);
        self.trip(mapping.table(), "select all");
        let rows = self.rows.query(&sql, &[])?;
        decode_rows(mapping, rows)
    }

    /// Row count without loading rows
    pub fn count(&self, mapping: &TableMapping) -> Result<usize> {
        let sql = self.generator.count(mapping);
        self.trip(mapping.table(), "count");
        let rows = self.rows.query(&sql, &[])?;
        let count = scalar(&rows)
            .and_then(Value::as_int)
            .ok_or_else(|| Error::backend("count", "expected one integer column"))?;
        usize::try_from(count).map_err(|_| Error::backend("count", "negative row count"))
    }

    /// Largest integer key, `None` for an empty table
    pub fn max_key(&self, mapping: &TableMapping) -> Result<Option<i64>> {
        let sql = self.generator.max_key(mapping);
        self.trip(mapping.table(), "max key");
        let rows = self.rows.query(&sql, &[])?;
        match scalar(&rows) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_int()
                .map(Some)
                .ok_or_else(|| Error::backend("max key", "key column is not an integer")),
        }
    }

    /// Insert one row, returning the backend-generated key if the key
    /// column is generated
    pub fn insert(&self, mapping: &TableMapping, record: &Record) -> Result<Option<EntityKey>> {
        let stmt = self.generator.insert(mapping);
        let params = stmt.bind(record);
        self.trip(mapping.table(), "insert");
        if !mapping.key_column().generated {
            self.rows.execute(&stmt.sql, &params)?;
            return Ok(None);
        }
        let raw = self.rows.insert_returning_key(&stmt.sql, &params)?;
        let key = mapping
            .key_column()
            .scalar_type
            .decode(&mapping.key_column().field, raw)
            .ok()
            .as_ref()
            .and_then(EntityKey::from_value)
            .ok_or_else(|| Error::backend("insert", "row store returned no usable key"))?;
        Ok(Some(key))
    }

    /// Insert rows whose keys are already assigned
    ///
    /// Rows go out as one multi-row INSERT when they fit in a single
    /// statement: at most `batch_size` rows and within the dialect's
    /// parameter and row limits. Larger sets run the single-row statement
    /// through `execute_batch`, which the row store applies atomically.
    pub fn insert_many(&self, mapping: &TableMapping, records: &[Record], batch_size: usize) -> Result<u64> {
        let per_statement = self.generator.insert_rows_per_statement(mapping, batch_size);
        match records.len() {
            0 => Ok(0),
            1 => self.insert(mapping, &records[0]).map(|_| 1),
            n if n <= per_statement && self.generator.dialect().supports_multi_row_insert() => {
                let stmt = self.generator.insert_many(mapping, n)?;
                let params = stmt.bind_many(records)?;
                self.trip(mapping.table(), "multi-row insert");
                self.rows.execute(&stmt.sql, &params)
            }
            n => {
                if n > per_statement {
                    debug!(
                        target: "tessera::store",
                        table = mapping.table(),
                        rows = n,
                        per_statement,
                        "Insert exceeds one statement, batching single-row inserts"
                    );
                }
                let stmt = self.generator.insert(mapping);
                let param_sets: Vec<Vec<Value>> = records.iter().map(|r| stmt.bind(r)).collect();
                self.trip(mapping.table(), "batch insert");
                self.rows.execute_batch(&stmt.sql, &param_sets)
            }
        }
    }

    /// Update every non-key column of one row, returning the matched count
    ///
    /// A type with no column besides its key has nothing to set; the row is
    /// looked up instead so the count still reports whether it exists.
    pub fn update(&self, mapping: &TableMapping, record: &Record) -> Result<u64> {
        let Some(stmt) = self.generator.update(mapping) else {
            let key = mapping
                .entity_type()
                .key_of(record)
                .ok_or_else(|| Error::illegal(format!("{} record has no key", mapping.table())))?;
            return self.exists(mapping, &key).map(u64::from);
        };
        self.trip(mapping.table(), "update");
        self.rows.execute(&stmt.sql, &stmt.bind(record))
    }

    /// Whether a row for `key` is present
    pub fn exists(&self, mapping: &TableMapping, key: &EntityKey) -> Result<bool> {
        Ok(!self
            .fetch_keys(mapping, std::slice::from_ref(key))?
            .is_empty())
    }

    /// Delete the rows for `keys` in one round trip
    pub fn delete_keys(&self, mapping: &TableMapping, keys: &[EntityKey]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let stmt = self.generator.delete_by_keys(mapping, keys.len())?;
        let params: Vec<Value> = keys.iter().map(EntityKey::to_value).collect();
        self.trip(mapping.table(), "delete by keys");
        self.rows.execute(&stmt.sql, &params)
    }

    /// Delete every row
    pub fn delete_all(&self, mapping: &TableMapping) -> Result<u64> {
        let sql = self.generator.delete_all(mapping);
        self.trip(mapping.table(), "delete all");
        self.rows.execute(&sql, &[])
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("dialect", &self.generator.dialect().name())
            .field("round_trips", &self.round_trips())
            .finish()
    }
}

fn scalar(rows: &[Row]) -> Option<&Value> {
    rows.first().and_then(|r| r.get(0))
}

/// Decode backend rows into records of the declared field types
pub fn decode_rows(mapping: &TableMapping, rows: Vec<Row>) -> Result<Vec<Record>> {
    rows.iter().map(|row| decode_row(mapping, row)).collect()
}

fn decode_row(mapping: &TableMapping, row: &Row) -> Result<Record> {
    let mut record = Record::new();
    for column in mapping.columns() {
        let raw = row.get_by_name(&column.name).cloned().ok_or_else(|| {
            Error::backend(
                "decode",
                format!("row of {} has no column '{}'", mapping.table(), column.name),
            )
        })?;
        let value = column.scalar_type.decode(&column.field, raw)?;
        record.set(column.field.clone(), value);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{EntityType, ScalarType};

    fn mapping() -> TableMapping {
        TableMapping::derive(Arc::new(
            EntityType::builder("Person")
                .key("id", ScalarType::Integer)
                .field("name", ScalarType::varchar(50))
                .field("active", ScalarType::Boolean)
                .build()
                .unwrap(),
        ))
    }

    fn row(values: Vec<Value>) -> Row {
        let columns: Arc<[String]> = vec!["id".to_string(), "name".to_string(), "active".to_string()].into();
        Row::new(columns, values)
    }

    #[test]
    fn test_decode_restores_declared_types() {
        let records = decode_rows(
            &mapping(),
            vec![row(vec![Value::Int(1), Value::Text("Elvis".into()), Value::Int(1)])],
        )
        .unwrap();
        assert_eq!(records[0].get("active"), Some(&Value::Bool(true)));
        assert_eq!(records[0].get("name"), Some(&Value::Text("Elvis".into())));
    }

    #[test]
    fn test_decode_is_all_or_nothing() {
        let result = decode_rows(
            &mapping(),
            vec![
                row(vec![Value::Int(1), Value::Text("a".into()), Value::Int(0)]),
                row(vec![Value::Text("x".into()), Value::Text("b".into()), Value::Int(0)]),
            ],
        );
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn test_missing_column_is_backend_error() {
        let columns: Arc<[String]> = vec!["id".to_string()].into();
        let result = decode_rows(&mapping(), vec![Row::new(columns, vec![Value::Int(1)])]);
        assert!(result.unwrap_err().is_backend());
    }
}
