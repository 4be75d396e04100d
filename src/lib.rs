//! Tessera - identity-cached object-relational layer
//!
//! Tessera presents mutable, identity-stable domain objects backed by rows in
//! a relational store. Each (entity type, key) pair has exactly one canonical
//! in-memory instance; lookups take a per-call [`CachePolicy`] deciding how
//! far the local copy is trusted, and triggers observe every lifecycle
//! transition.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tessera::{CachePolicy, Draft, EntityStore, EntityType, IdAssignment, ScalarType, StoreConfig};
//! use tessera::storage::SqliteRowStore;
//!
//! let rows = Arc::new(SqliteRowStore::open_in_memory()?);
//! let store = EntityStore::new(rows, StoreConfig::default())?;
//!
//! let person = store.register(
//!     EntityType::builder("Person")
//!         .key("id", ScalarType::Integer)
//!         .field("name", ScalarType::varchar(50))
//!         .field("age", ScalarType::Integer)
//!         .id_assignment(IdAssignment::Backend)
//!         .build()?,
//! )?;
//!
//! let elvis = store.persist(Draft::new(&person).with("name", "Elvis").with("age", 42))?;
//! let same = store.get(&person, 1i64, CachePolicy::CacheOnly)?;
//! ```
//!
//! # Architecture
//!
//! - `tessera-core`: values, schema descriptors, field mapping, errors
//! - `tessera-sql`: dialects and statement generation
//! - `tessera-storage`: canonical instances and identity caches
//! - `tessera-engine`: policy resolution, triggers and the entity store

pub use tessera_core::{
    ColumnDescriptor, EntityKey, EntityType, EntityTypeBuilder, Error, EventKind, FieldDef,
    FieldMapping, IdAssignment, IndexDef, Record, Result, Row, RowStore, ScalarType, TableMapping,
    Value,
};
pub use tessera_engine::*;
pub use tessera_sql::{Dialect, DialectKind, SqlGenerator, Statement};
pub use tessera_storage::{IdentityCache, Instance, PutOutcome};

/// Identity-cache layer
pub use tessera_storage as storage;

/// Statement generation layer
pub use tessera_sql as sql;
