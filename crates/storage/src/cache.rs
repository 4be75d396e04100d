//! Identity cache
//!
//! One [`IdentityCache`] per registered entity type maps identity keys to
//! canonical instances. At most one live instance exists per key: a `put`
//! for a cached key replaces the record inside the existing instance instead
//! of swapping the reference.
//!
//! # Design
//!
//! - DashMap: sharded, reads never block writers on other shards
//! - Entry API: the check-then-insert of `put` happens under the shard lock,
//!   so two racing puts for one key leave exactly one instance holding one
//!   of the two records
//! - Snapshots: `keys()`/`values()` copy out, callers iterate without locks
//!
//! # Synced Flag
//!
//! `is_synced()` is true once a full-table load has confirmed the cache
//! contents. Only then does an empty cache mean "zero rows".

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tessera_core::{EntityKey, EntityType, Error, Record, Result};
use tracing::debug;

use crate::instance::Instance;

/// What a `put` did to the cache
#[derive(Debug, Clone, PartialEq)]
pub enum PutOutcome {
    /// A new canonical instance was created
    Created,
    /// An existing instance's record changed
    Updated {
        /// Record before the update
        previous: Record,
    },
    /// The existing instance already held these values
    Unchanged,
}

impl PutOutcome {
    /// Whether the cache contents changed
    pub fn is_change(&self) -> bool {
        !matches!(self, PutOutcome::Unchanged)
    }
}

/// Result of reconciling the cache against a full backend snapshot
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Canonical instances matching the snapshot, ordered by key
    pub instances: Vec<Arc<Instance>>,
    /// Per-instance outcome, aligned with `instances`
    pub outcomes: Vec<PutOutcome>,
    /// Instances dropped because the snapshot no longer holds them
    pub removed: Vec<Arc<Instance>>,
}

/// Per-type concurrent map from key to canonical instance
#[derive(Debug)]
pub struct IdentityCache {
    entity_type: Arc<EntityType>,
    entries: DashMap<EntityKey, Arc<Instance>>,
    synced: AtomicBool,
}

impl IdentityCache {
    /// Create an empty cache for `entity_type`
    pub fn new(entity_type: Arc<EntityType>) -> Self {
        IdentityCache {
            entity_type,
            entries: DashMap::new(),
            synced: AtomicBool::new(false),
        }
    }

    /// The cached entity type
    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    /// Canonical instance for `key`
    pub fn get(&self, key: &EntityKey) -> Option<Arc<Instance>> {
        self.entries.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Whether `key` has a canonical instance
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Store a record under its identity field
    ///
    /// Creates the canonical instance on first sight of the key, otherwise
    /// replaces the existing instance's record in place.
    ///
    /// # Errors
    ///
    /// Returns `IllegalArgument` if the record has no usable identity value.
    pub fn put(&self, record: Record) -> Result<(Arc<Instance>, PutOutcome)> {
        let key = self.entity_type.key_of(&record).ok_or_else(|| {
            Error::illegal(format!(
                "{} record has no value for key field '{}'",
                self.entity_type.name(),
                self.entity_type.key_field().name
            ))
        })?;
        Ok(self.put_keyed(key, record))
    }

    fn put_keyed(&self, key: EntityKey, record: Record) -> (Arc<Instance>, PutOutcome) {
        match self.entries.entry(key) {
            Entry::Occupied(entry) => {
                let instance = Arc::clone(entry.get());
                let previous = instance.replace(record);
                let outcome = if instance.snapshot() == previous {
                    PutOutcome::Unchanged
                } else {
                    PutOutcome::Updated { previous }
                };
                (instance, outcome)
            }
            Entry::Vacant(entry) => {
                let instance = Arc::new(Instance::new(
                    Arc::clone(&self.entity_type),
                    entry.key().clone(),
                    record,
                ));
                entry.insert(Arc::clone(&instance));
                (instance, PutOutcome::Created)
            }
        }
    }

    /// Remove `key`, returning the instance that was cached
    pub fn remove(&self, key: &EntityKey) -> Option<Arc<Instance>> {
        self.entries.remove(key).map(|(_, instance)| instance)
    }

    /// Remove every key in `keys`, returning the instances that were cached
    pub fn remove_all<'a>(&self, keys: impl IntoIterator<Item = &'a EntityKey>) -> Vec<Arc<Instance>> {
        keys.into_iter().filter_map(|k| self.remove(k)).collect()
    }

    /// Split `keys` into cached instances and keys that must be fetched
    ///
    /// Duplicate keys are reported once, in first-seen order.
    pub fn partition(&self, keys: &[EntityKey]) -> (Vec<Arc<Instance>>, Vec<EntityKey>) {
        let mut seen = HashSet::with_capacity(keys.len());
        let mut hits = Vec::new();
        let mut misses = Vec::new();
        for key in keys {
            if !seen.insert(key) {
                continue;
            }
            match self.get(key) {
                Some(instance) => hits.push(instance),
                None => misses.push(key.clone()),
            }
        }
        (hits, misses)
    }

    /// Merge a complete backend snapshot of the table
    ///
    /// Every record is put (in place for cached keys); cached keys absent
    /// from the snapshot are removed. Marks the cache synced.
    ///
    /// # Errors
    ///
    /// Returns `IllegalArgument` if a record has no identity value; the cache
    /// is left untouched in that case.
    pub fn reconcile(&self, records: Vec<Record>) -> Result<Reconciliation> {
        let keyed = self.keyed(records)?;
        let live: HashSet<&EntityKey> = keyed.iter().map(|(k, _)| k).collect();
        let stale: Vec<EntityKey> = self
            .keys()
            .into_iter()
            .filter(|k| !live.contains(k))
            .collect();

        let mut reconciliation = Reconciliation {
            removed: self.remove_all(stale.iter()),
            ..Reconciliation::default()
        };
        for (key, record) in keyed {
            let (instance, outcome) = self.put_keyed(key, record);
            reconciliation.instances.push(instance);
            reconciliation.outcomes.push(outcome);
        }
        self.mark_synced(true);
        debug!(
            target: "tessera::cache",
            entity_type = self.entity_type.name(),
            rows = reconciliation.instances.len(),
            removed = reconciliation.removed.len(),
            "Reconciled full snapshot"
        );
        Ok(reconciliation)
    }

    /// Merge a batch of records, all-or-nothing on key validation
    ///
    /// # Errors
    ///
    /// Returns `IllegalArgument` if any record has no identity value; no
    /// record is merged in that case.
    pub fn put_all(&self, records: Vec<Record>) -> Result<Vec<(Arc<Instance>, PutOutcome)>> {
        let keyed = self.keyed(records)?;
        Ok(keyed
            .into_iter()
            .map(|(key, record)| self.put_keyed(key, record))
            .collect())
    }

    fn keyed(&self, records: Vec<Record>) -> Result<Vec<(EntityKey, Record)>> {
        records
            .into_iter()
            .map(|record| {
                let key = self.entity_type.key_of(&record).ok_or_else(|| {
                    Error::illegal(format!(
                        "{} record has no value for key field '{}'",
                        self.entity_type.name(),
                        self.entity_type.key_field().name
                    ))
                })?;
                Ok((key, record))
            })
            .collect()
    }

    /// Snapshot of cached keys, sorted
    pub fn keys(&self) -> Vec<EntityKey> {
        let mut keys: Vec<EntityKey> = self.entries.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Snapshot of cached instances, sorted by key
    pub fn values(&self) -> Vec<Arc<Instance>> {
        let mut values: Vec<Arc<Instance>> =
            self.entries.iter().map(|r| Arc::clone(r.value())).collect();
        values.sort_by(|a, b| a.key().cmp(b.key()));
        values
    }

    /// Number of cached instances
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every instance, returning them
    pub fn clear(&self) -> Vec<Arc<Instance>> {
        let keys = self.keys();
        self.remove_all(keys.iter())
    }

    /// Whether a full-table load has confirmed the contents
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Set or clear the synced flag
    pub fn mark_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{ScalarType, Value};

    fn cache() -> IdentityCache {
        IdentityCache::new(Arc::new(
            EntityType::builder("Person")
                .key("id", ScalarType::Integer)
                .field("name", ScalarType::text())
                .field("age", ScalarType::Integer)
                .build()
                .unwrap(),
        ))
    }

    fn person(id: i64, name: &str, age: i64) -> Record {
        Record::new()
            .with("id", id)
            .with("name", name)
            .with("age", age)
    }

    #[test]
    fn test_put_then_get_returns_same_instance() {
        let cache = cache();
        let (first, outcome) = cache.put(person(1, "Elvis", 42)).unwrap();
        assert_eq!(outcome, PutOutcome::Created);

        let again = cache.get(&EntityKey::Int(1)).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(cache.contains(&EntityKey::Int(1)));
        assert!(!cache.contains(&EntityKey::Int(2)));
    }

    #[test]
    fn test_put_existing_updates_in_place() {
        let cache = cache();
        let (held, _) = cache.put(person(1, "Elvis", 42)).unwrap();
        let (second, outcome) = cache.put(person(1, "Elvis", 50)).unwrap();

        assert!(Arc::ptr_eq(&held, &second));
        assert_eq!(held.get("age"), Some(Value::Int(50)));
        match outcome {
            PutOutcome::Updated { previous } => {
                assert_eq!(previous.get("age"), Some(&Value::Int(42)))
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let (_, outcome) = cache.put(person(1, "Elvis", 50)).unwrap();
        assert_eq!(outcome, PutOutcome::Unchanged);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_put_without_key_is_rejected() {
        let cache = cache();
        let err = cache.put(Record::new().with("name", "x")).unwrap_err();
        assert!(matches!(err, Error::IllegalArgument(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_and_remove_all() {
        let cache = cache();
        for id in 1..=4 {
            cache.put(person(id, "p", id)).unwrap();
        }
        let removed = cache.remove(&EntityKey::Int(1)).unwrap();
        assert_eq!(removed.key(), &EntityKey::Int(1));
        assert!(cache.remove(&EntityKey::Int(1)).is_none());

        let keys = [EntityKey::Int(2), EntityKey::Int(3), EntityKey::Int(9)];
        let removed = cache.remove_all(keys.iter());
        assert_eq!(removed.len(), 2);
        assert_eq!(cache.keys(), vec![EntityKey::Int(4)]);
    }

    #[test]
    fn test_partition() {
        let cache = cache();
        cache.put(person(1, "a", 1)).unwrap();
        let keys = [EntityKey::Int(1), EntityKey::Int(2), EntityKey::Int(3), EntityKey::Int(2)];
        let (hits, misses) = cache.partition(&keys);
        assert_eq!(hits.len(), 1);
        assert_eq!(misses, vec![EntityKey::Int(2), EntityKey::Int(3)]);
    }

    #[test]
    fn test_reconcile_preserves_identity_and_drops_vanished() {
        let cache = cache();
        let (one, _) = cache.put(person(1, "a", 1)).unwrap();
        cache.put(person(2, "b", 2)).unwrap();
        assert!(!cache.is_synced());

        let result = cache
            .reconcile(vec![person(1, "a", 10), person(3, "c", 3)])
            .unwrap();

        assert!(cache.is_synced());
        assert_eq!(cache.keys(), vec![EntityKey::Int(1), EntityKey::Int(3)]);
        assert!(Arc::ptr_eq(&one, &result.instances[0]));
        assert_eq!(one.get("age"), Some(Value::Int(10)));
        assert!(matches!(result.outcomes[0], PutOutcome::Updated { .. }));
        assert_eq!(result.outcomes[1], PutOutcome::Created);
        assert_eq!(result.removed.len(), 1);
        assert_eq!(result.removed[0].key(), &EntityKey::Int(2));
    }

    #[test]
    fn test_reconcile_rejects_keyless_without_touching_cache() {
        let cache = cache();
        cache.put(person(1, "a", 1)).unwrap();
        let err = cache.reconcile(vec![person(2, "b", 2), Record::new().with("name", "x")]);
        assert!(err.is_err());
        assert_eq!(cache.keys(), vec![EntityKey::Int(1)]);
        assert!(!cache.is_synced());
    }

    #[test]
    fn test_snapshots_are_detached() {
        let cache = cache();
        for id in 1..=3 {
            cache.put(person(id, "p", id)).unwrap();
        }
        let values = cache.values();
        cache.clear();
        assert_eq!(values.len(), 3);
        assert!(cache.is_empty());
        assert_eq!(values[0].key(), &EntityKey::Int(1));
    }

    static_assertions::assert_impl_all!(IdentityCache: Send, Sync);

    mod props {
        use super::*;
        use proptest::collection::{btree_set, vec};
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_reconcile_matches_snapshot_and_keeps_survivors(
                cached in btree_set(0i64..50, 0..30),
                live in btree_set(0i64..50, 0..30),
            ) {
                let cache = cache();
                let before: Vec<Arc<Instance>> = cached
                    .iter()
                    .map(|id| cache.put(person(*id, "old", 0)).unwrap().0)
                    .collect();

                let result = cache
                    .reconcile(live.iter().map(|id| person(*id, "new", 1)).collect())
                    .unwrap();

                let expected: Vec<EntityKey> = live.iter().map(|id| EntityKey::Int(*id)).collect();
                prop_assert_eq!(cache.keys(), expected);
                prop_assert_eq!(
                    result.removed.len(),
                    cached.difference(&live).count()
                );
                for instance in &before {
                    if let Some(current) = cache.get(instance.key()) {
                        prop_assert!(Arc::ptr_eq(instance, &current));
                        prop_assert_eq!(current.get("name"), Some(Value::Text("new".into())));
                    }
                }
            }

            #[test]
            fn prop_partition_splits_by_membership(
                cached in btree_set(0i64..40, 0..20),
                wanted in vec(0i64..40, 0..40),
            ) {
                let cache = cache();
                for id in &cached {
                    cache.put(person(*id, "p", *id)).unwrap();
                }
                let keys: Vec<EntityKey> = wanted.iter().map(|id| EntityKey::Int(*id)).collect();
                let (hits, misses) = cache.partition(&keys);

                for hit in &hits {
                    prop_assert!(cached.contains(&hit.key().as_int().unwrap()));
                }
                for miss in &misses {
                    prop_assert!(!cached.contains(&miss.as_int().unwrap()));
                }
                let distinct: std::collections::BTreeSet<i64> = wanted.iter().copied().collect();
                prop_assert_eq!(hits.len() + misses.len(), distinct.len());
            }
        }
    }
}
