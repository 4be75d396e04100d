//! Shared test fixtures for engine integration tests
//!
//! `RecordingRowStore` wraps the SQLite row store, records every statement
//! and can be switched into a failing mode to simulate an unavailable
//! backend. It can also report UPDATE counts the way changed-rows drivers
//! do, and hold `SELECT MAX` queries on one table until released.

#![allow(dead_code)]

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tessera_core::{EntityType, Error, IdAssignment, Result, Row, RowStore, ScalarType, Value};
use tessera_engine::{EntityStore, StoreConfig};
use tessera_sql::DialectKind;
use tessera_storage::SqliteRowStore;

/// One recorded row-store call
#[derive(Debug, Clone)]
pub struct Call {
    pub sql: String,
    pub params: Vec<Value>,
}

/// SQLite row store that records calls and can be made to fail
pub struct RecordingRowStore {
    inner: SqliteRowStore,
    calls: Mutex<Vec<Call>>,
    failing: AtomicBool,
    zero_updates: AtomicBool,
    held_table: Mutex<Option<String>>,
    released: Condvar,
    holding: AtomicUsize,
}

impl RecordingRowStore {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingRowStore {
            inner: SqliteRowStore::open_in_memory().unwrap(),
            calls: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            zero_updates: AtomicBool::new(false),
            held_table: Mutex::new(None),
            released: Condvar::new(),
            holding: AtomicUsize::new(0),
        })
    }

    /// Report 0 for every UPDATE, as drivers counting changed rows do for
    /// an update that rewrites identical values
    pub fn set_zero_updates(&self, zero: bool) {
        self.zero_updates.store(zero, Ordering::SeqCst);
    }

    /// Block `SELECT MAX` queries on `table` until [`release`](Self::release)
    pub fn hold_max_key(&self, table: &str) {
        *self.held_table.lock() = Some(format!("\"{}\"", table));
    }

    pub fn release(&self) {
        *self.held_table.lock() = None;
        self.released.notify_all();
    }

    /// Queries currently blocked by [`hold_max_key`](Self::hold_max_key)
    pub fn holding(&self) -> usize {
        self.holding.load(Ordering::SeqCst)
    }

    fn wait_if_held(&self, sql: &str) {
        if !sql.starts_with("SELECT MAX(") {
            return;
        }
        let mut held = self.held_table.lock();
        let mut waiting = false;
        while held.as_ref().map_or(false, |table| sql.contains(table.as_str())) {
            if !waiting {
                waiting = true;
                self.holding.fetch_add(1, Ordering::SeqCst);
            }
            self.released.wait(&mut held);
        }
        if waiting {
            self.holding.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Make every subsequent call fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn reset(&self) {
        self.calls.lock().clear();
    }

    /// Number of SELECTs issued since the last reset
    pub fn selects(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.sql.starts_with("SELECT"))
            .count()
    }

    /// Run SQL directly, bypassing the store and the recorder
    pub fn external(&self, sql: &str, params: &[Value]) -> u64 {
        self.inner.execute(sql, params).unwrap()
    }

    fn record(&self, sql: &str, params: &[Value]) -> Result<()> {
        self.calls.lock().push(Call {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::backend("test", "connection refused"));
        }
        Ok(())
    }
}

impl RowStore for RecordingRowStore {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.record(sql, params)?;
        self.wait_if_held(sql);
        self.inner.query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.record(sql, params)?;
        let count = self.inner.execute(sql, params)?;
        if sql.starts_with("UPDATE") && self.zero_updates.load(Ordering::SeqCst) {
            return Ok(0);
        }
        Ok(count)
    }

    fn execute_batch(&self, sql: &str, param_sets: &[Vec<Value>]) -> Result<u64> {
        self.record(sql, &param_sets.concat())?;
        self.inner.execute_batch(sql, param_sets)
    }

    fn insert_returning_key(&self, sql: &str, params: &[Value]) -> Result<Value> {
        self.record(sql, params)?;
        self.inner.insert_returning_key(sql, params)
    }
}

/// `Person{id:int(key), name:string(50), age:int}`
pub fn person_type(strategy: IdAssignment) -> EntityType {
    EntityType::builder("Person")
        .key("id", ScalarType::Integer)
        .field("name", ScalarType::varchar(50))
        .field("age", ScalarType::Integer)
        .id_assignment(strategy)
        .build()
        .unwrap()
}

/// Route engine logs to the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Store over a recording SQLite row store
pub fn sqlite_store() -> (Arc<EntityStore>, Arc<RecordingRowStore>) {
    init_tracing();
    let rows = RecordingRowStore::new();
    let store = EntityStore::new(
        Arc::clone(&rows) as Arc<dyn RowStore>,
        StoreConfig::for_dialect(DialectKind::Sqlite),
    )
    .unwrap();
    (Arc::new(store), rows)
}
