//! Identity-cache layer for Tessera
//!
//! This crate implements:
//! - Instance: the canonical in-memory object for one (type, key) pair
//! - IdentityCache: DashMap-backed per-type map from key to instance
//! - CacheRegistry: entity type name to cache
//! - SqliteRowStore: a SQLite-backed row store (feature `sqlite`)
//!
//! # Identity
//!
//! For any cache and key, repeated lookups return the same `Arc<Instance>`.
//! Updates replace the record inside that instance, so holders of an earlier
//! handle observe them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod instance;
pub mod registry;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use cache::{IdentityCache, PutOutcome, Reconciliation};
pub use instance::Instance;
pub use registry::CacheRegistry;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRowStore;
