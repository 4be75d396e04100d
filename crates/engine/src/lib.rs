//! Entity store engine for Tessera
//!
//! This crate orchestrates all lower layers:
//! - CachePolicy: per-call local-versus-backend precedence
//! - Backend: statement execution, row decoding, round-trip accounting
//! - TriggerDispatcher: global and per-type lifecycle callbacks
//! - EntityStore: registration, lookups, persist/delete, refresh
//! - RefreshExecutor: inline or worker-pool refresh
//!
//! The engine is the only component that knows about:
//! - The order of backend statement, cache update and trigger dispatch
//! - Id assignment for new rows
//! - Trigger failure retention

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod config;
pub mod draft;
pub mod executor;
pub mod policy;
pub mod store;
pub mod triggers;

pub use backend::Backend;
pub use config::{StoreConfig, CONFIG_FILE_NAME};
pub use draft::{Draft, DraftIntent};
pub use executor::{InlineExecutor, PoolStats, RefreshExecutor, RefreshTask, Rejected, WorkerPool};
pub use policy::{plan_lookup, plan_table, CachePolicy, LookupPlan, TableSource};
pub use store::{EntityStore, StoreStats};
pub use triggers::{DispatchReport, FnTrigger, Trigger, TriggerDispatcher, TriggerEvent, TriggerResult};
