//! SQLite row store
//!
//! A [`RowStore`] over a single `rusqlite` connection guarded by a mutex.
//! Values are bound by storage class: booleans as 0/1, decimals and
//! date/time values as ISO text. Rows come back as raw storage classes;
//! decoding into declared types happens above this layer.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use std::sync::Arc;
use tessera_core::{Error, Result, Row, RowStore, Value};
use tracing::debug;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Row store backed by SQLite
pub struct SqliteRowStore {
    conn: Mutex<Connection>,
}

impl SqliteRowStore {
    /// Open a private in-memory database
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if SQLite cannot be initialised.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::backend("open", e))?;
        Ok(SqliteRowStore {
            conn: Mutex::new(conn),
        })
    }

    /// Open (or create) a database file
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::backend("open", e))?;
        Ok(SqliteRowStore {
            conn: Mutex::new(conn),
        })
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Decimal(d) => SqlValue::Text(d.clone()),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::Date(d) => SqlValue::Text(format_date(d)),
        Value::Time(t) => SqlValue::Text(format_time(t)),
        Value::DateTime(dt) => SqlValue::Text(format_datetime(dt)),
    }
}

fn format_date(d: &NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

fn format_time(t: &NaiveTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

impl RowStore for SqliteRowStore {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(sql)
            .map_err(|e| Error::backend("prepare", e))?;
        let columns: Arc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>()
            .into();
        let width = columns.len();
        let mut rows = stmt
            .query(params_from_iter(params.iter().map(to_sql)))
            .map_err(|e| Error::backend("query", e))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| Error::backend("query", e))? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                let value = row.get_ref(i).map_err(|e| Error::backend("query", e))?;
                values.push(from_sql(value));
            }
            out.push(Row::new(Arc::clone(&columns), values));
        }
        debug!(target: "tessera::sqlite", rows = out.len(), "query");
        Ok(out)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(sql)
            .map_err(|e| Error::backend("prepare", e))?;
        let changed = stmt
            .execute(params_from_iter(params.iter().map(to_sql)))
            .map_err(|e| Error::backend("execute", e))?;
        Ok(changed as u64)
    }

    fn execute_batch(&self, sql: &str, param_sets: &[Vec<Value>]) -> Result<u64> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::backend("begin", e))?;
        let mut total = 0u64;
        {
            let mut stmt = tx
                .prepare_cached(sql)
                .map_err(|e| Error::backend("prepare", e))?;
            for params in param_sets {
                total += stmt
                    .execute(params_from_iter(params.iter().map(to_sql)))
                    .map_err(|e| Error::backend("execute batch", e))? as u64;
            }
        }
        tx.commit().map_err(|e| Error::backend("commit", e))?;
        Ok(total)
    }

    fn insert_returning_key(&self, sql: &str, params: &[Value]) -> Result<Value> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(sql)
            .map_err(|e| Error::backend("prepare", e))?;
        stmt.execute(params_from_iter(params.iter().map(to_sql)))
            .map_err(|e| Error::backend("insert", e))?;
        Ok(Value::Int(conn.last_insert_rowid()))
    }
}

impl std::fmt::Debug for SqliteRowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRowStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteRowStore {
        let store = SqliteRowStore::open_in_memory().unwrap();
        store
            .execute(
                "CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, born TEXT, ok INTEGER)",
                &[],
            )
            .unwrap();
        store
    }

    #[test]
    fn test_insert_and_query() {
        let store = store();
        let born = NaiveDate::from_ymd_opt(1935, 1, 8).unwrap();
        let key = store
            .insert_returning_key(
                "INSERT INTO t (name, born, ok) VALUES (?, ?, ?)",
                &[Value::Text("Elvis".into()), Value::Date(born), Value::Bool(true)],
            )
            .unwrap();
        assert_eq!(key, Value::Int(1));

        let rows = store
            .query("SELECT id, name, born, ok FROM t WHERE id = ?", &[Value::Int(1)])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("name"), Some(&Value::Text("Elvis".into())));
        assert_eq!(rows[0].get_by_name("born"), Some(&Value::Text("1935-01-08".into())));
        assert_eq!(rows[0].get_by_name("ok"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_execute_batch_is_atomic() {
        let store = store();
        store
            .execute("CREATE UNIQUE INDEX t_name ON t (name)", &[])
            .unwrap();
        let sets = vec![
            vec![Value::Text("a".into())],
            vec![Value::Text("a".into())],
        ];
        let err = store
            .execute_batch("INSERT INTO t (name) VALUES (?)", &sets)
            .unwrap_err();
        assert!(err.is_backend());
        let rows = store.query("SELECT COUNT(*) FROM t", &[]).unwrap();
        assert_eq!(rows[0].get(0), Some(&Value::Int(0)));
    }

    #[test]
    fn test_bad_sql_is_backend_error() {
        let store = store();
        assert!(store.query("SELECT nope FROM t", &[]).unwrap_err().is_backend());
    }
}
