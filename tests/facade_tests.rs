//! Tests through the public facade only
//!
//! Everything here is reachable as `tessera::*`, the way an application
//! would use the crate.

use std::sync::Arc;
use tessera::storage::SqliteRowStore;
use tessera::{
    CachePolicy, Dialect, Draft, EntityStore, EntityType, Error, FnTrigger, IdAssignment, ScalarType,
    StoreConfig, Trigger, TriggerEvent, TriggerResult, Value, WorkerPool, CONFIG_FILE_NAME,
};

fn person() -> EntityType {
    EntityType::builder("Person")
        .key("id", ScalarType::Integer)
        .field("name", ScalarType::varchar(50))
        .field("age", ScalarType::Integer)
        .id_assignment(IdAssignment::Backend)
        .build()
        .unwrap()
}

#[test]
fn test_quick_start_flow() {
    let rows = Arc::new(SqliteRowStore::open_in_memory().unwrap());
    let store = EntityStore::new(rows, StoreConfig::for_dialect(tessera::DialectKind::Sqlite)).unwrap();
    let person = store.register(person()).unwrap();

    let elvis = store
        .persist(Draft::new(&person).with("name", "Elvis").with("age", 42i64))
        .unwrap();
    let same = store
        .get(&person, 1i64, store.default_policy())
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(&elvis, &same));
    assert_eq!(store.get_size(&person, CachePolicy::CacheFirst).unwrap(), 1);
}

#[test]
fn test_store_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(
        &path,
        "default_policy = \"force_refresh\"\ndialect = \"sqlite\"\ninsert_batch_size = 2\n",
    )
    .unwrap();

    let config = StoreConfig::from_file(&path).unwrap();
    assert_eq!(config.default_policy, CachePolicy::ForceRefresh);
    assert_eq!(config.insert_batch_size, 2);

    let rows = Arc::new(SqliteRowStore::open_in_memory().unwrap());
    let pool = WorkerPool::from_config(&config).unwrap();
    let store = Arc::new(EntityStore::new(rows, config).unwrap());
    let person = store.register(person()).unwrap();
    assert_eq!(store.generator().dialect().name(), "sqlite");

    let audit: Arc<dyn Trigger> = Arc::new(FnTrigger::new(
        "count",
        |_: &TriggerEvent| -> TriggerResult { Ok(()) },
    ));
    store.register_global_trigger(audit).unwrap();

    let drafts = (0..5)
        .map(|i| Draft::new(&person).with("name", format!("p{}", i)).with("age", i as i64))
        .collect();
    let created = store.persist_all(drafts).unwrap();
    assert_eq!(created.len(), 5);
    assert_eq!(created[4].get("age"), Some(Value::Int(4)));

    store.refresh_with(&pool).unwrap();
    assert_eq!(pool.stats().worker_count, 4);

    let stats = store.stats();
    assert_eq!(stats.triggers_fired, 5);
    assert_eq!(stats.trigger_failures, 0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "insert_batch_size = 0\n").unwrap();
    assert!(matches!(StoreConfig::from_file(&path), Err(Error::Config(_))));
}
