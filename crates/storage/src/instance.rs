//! Canonical instances
//!
//! An [`Instance`] is the one live representation of an (entity type, key)
//! pair. Holders keep `Arc<Instance>` handles; refreshes and updates replace
//! the record inside the instance, so every holder observes them through the
//! same reference.
//!
//! # Thread Safety
//!
//! The record sits behind a `parking_lot::RwLock`. Readers always get a
//! complete record: either the one before a write or the one after it.

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tessera_core::{EntityKey, EntityType, Record, Value};

/// Identity-cache resident object
pub struct Instance {
    entity_type: Arc<EntityType>,
    key: EntityKey,
    record: RwLock<Record>,
    /// Number of in-place replacements since creation
    revision: AtomicU64,
}

impl Instance {
    pub(crate) fn new(entity_type: Arc<EntityType>, key: EntityKey, record: Record) -> Self {
        Instance {
            entity_type,
            key,
            record: RwLock::new(record),
            revision: AtomicU64::new(0),
        }
    }

    /// The instance's entity type
    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    /// The identity key; never changes
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// Current value of a field
    pub fn get(&self, field: &str) -> Option<Value> {
        self.record.read().get(field).cloned()
    }

    /// Copy of the current record
    pub fn snapshot(&self) -> Record {
        self.record.read().clone()
    }

    /// Number of in-place replacements applied so far
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Replace the record in place, returning the previous one
    pub(crate) fn replace(&self, record: Record) -> Record {
        let mut guard = self.record.write();
        let previous = std::mem::replace(&mut *guard, record);
        self.revision.fetch_add(1, Ordering::AcqRel);
        previous
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("entity_type", &self.entity_type.name())
            .field("key", &self.key)
            .field("revision", &self.revision())
            .field("record", &*self.record.read())
            .finish()
    }
}
