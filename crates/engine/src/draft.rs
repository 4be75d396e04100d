//! Mutation drafts
//!
//! A [`Draft`] is a detached set of field values with either "create" or
//! "modify existing key" intent. Drafts never enter the identity cache;
//! `EntityStore::persist` consumes them.

use std::sync::Arc;
use tessera_core::{EntityKey, EntityType, Record, Value};

/// What persisting a draft does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftIntent {
    /// Insert a new row
    Create,
    /// Merge values into the row with this key
    Modify(EntityKey),
}

/// Detached, not-yet-canonical field values
#[derive(Debug, Clone)]
pub struct Draft {
    entity_type: Arc<EntityType>,
    intent: DraftIntent,
    values: Record,
}

impl Draft {
    /// Draft of a new instance
    pub fn new(entity_type: &Arc<EntityType>) -> Self {
        Draft {
            entity_type: Arc::clone(entity_type),
            intent: DraftIntent::Create,
            values: Record::new(),
        }
    }

    /// Draft of changes to the instance with `key`
    pub fn modify(entity_type: &Arc<EntityType>, key: impl Into<EntityKey>) -> Self {
        Draft {
            entity_type: Arc::clone(entity_type),
            intent: DraftIntent::Modify(key.into()),
            values: Record::new(),
        }
    }

    /// Set a field value
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.values.set(field, value);
        self
    }

    /// Builder-style `set`
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.set(field, value);
        self
    }

    /// Target entity type
    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    /// Create or modify
    pub fn intent(&self) -> &DraftIntent {
        &self.intent
    }

    /// Values set so far
    pub fn values(&self) -> &Record {
        &self.values
    }

    /// Key the draft targets, if known before persisting
    pub fn key(&self) -> Option<EntityKey> {
        match &self.intent {
            DraftIntent::Modify(key) => Some(key.clone()),
            DraftIntent::Create => self.entity_type.key_of(&self.values),
        }
    }

    pub(crate) fn into_parts(self) -> (Arc<EntityType>, DraftIntent, Record) {
        (self.entity_type, self.intent, self.values)
    }
}
