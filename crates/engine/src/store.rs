//! Entity store
//!
//! [`EntityStore`] composes the pieces into the public API: registration,
//! policy-driven lookups, persist/delete, refresh and trigger management.
//! Storage variants are expressed by values (cache policy per call,
//! id-assignment strategy per type, trigger sets) on one component.
//!
//! # Ordering
//!
//! Every mutation runs in the same order: backend statement, cache update,
//! trigger dispatch. A failed backend call leaves the cache untouched; a
//! failing trigger never undoes the mutation that fired it.
//!
//! # Trigger failures
//!
//! Failures are logged, counted in [`StoreStats`] and retained until
//! [`EntityStore::take_trigger_failures`] drains them.

use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use tessera_core::{
    EntityKey, EntityType, Error, FieldMapping, IdAssignment, Record, Result, RowStore,
    TableMapping, Value,
};
use tessera_sql::{Dialect, SqlGenerator};
use tessera_storage::{CacheRegistry, IdentityCache, Instance, PutOutcome};
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::config::StoreConfig;
use crate::draft::{Draft, DraftIntent};
use crate::executor::RefreshExecutor;
use crate::policy::{dedup_keys, plan_lookup, plan_table, CachePolicy, TableSource};
use crate::triggers::{Trigger, TriggerDispatcher, TriggerEvent};

/// Store counters snapshot
///
/// Keyed lookups count one hit or miss per distinct key; `get_all` and
/// `get_size` count one per call. `ForceRefresh` lookups count neither.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Lookups served from the identity cache
    pub cache_hits: u64,
    /// Lookups the cache could not serve
    pub cache_misses: u64,
    /// Row-store calls issued
    pub backend_round_trips: u64,
    /// Trigger invocations
    pub triggers_fired: u64,
    /// Trigger invocations that failed
    pub trigger_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fired: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn add(counter: &AtomicU64, n: usize) {
        if n > 0 {
            counter.fetch_add(n as u64, Ordering::Relaxed);
        }
    }
}

/// Identity-cached entity storage over a row store
#[derive(Debug)]
pub struct EntityStore {
    config: StoreConfig,
    mapping: FieldMapping,
    caches: CacheRegistry,
    backend: Backend,
    triggers: TriggerDispatcher,
    /// Last key handed out per `Sequence` type, `None` until seeded
    sequences: DashMap<String, Arc<Mutex<Option<i64>>>>,
    failures: Mutex<Vec<Error>>,
    counters: Counters,
}

impl EntityStore {
    /// Create a store using the configured dialect
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is invalid.
    pub fn new(rows: Arc<dyn RowStore>, config: StoreConfig) -> Result<Self> {
        let dialect = config.dialect.dialect();
        Self::with_dialect(rows, dialect, config)
    }

    /// Create a store with an explicit dialect, ignoring `config.dialect`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is invalid.
    pub fn with_dialect(
        rows: Arc<dyn RowStore>,
        dialect: Arc<dyn Dialect>,
        config: StoreConfig,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            target: "tessera::store",
            dialect = dialect.name(),
            default_policy = %config.default_policy,
            "Opened entity store"
        );
        Ok(EntityStore {
            config,
            mapping: FieldMapping::new(),
            caches: CacheRegistry::new(),
            backend: Backend::new(rows, SqlGenerator::new(dialect)),
            triggers: TriggerDispatcher::new(),
            sequences: DashMap::new(),
            failures: Mutex::new(Vec::new()),
            counters: Counters::default(),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Statement generator for the active dialect
    pub fn generator(&self) -> &SqlGenerator {
        self.backend.generator()
    }

    /// Policy to use when the caller has no preference
    pub fn default_policy(&self) -> CachePolicy {
        self.config.default_policy
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register an entity type
    ///
    /// Creates its table and indexes first when `create_tables` is set; if
    /// that DDL fails the type stays unregistered.
    ///
    /// # Errors
    ///
    /// `DuplicateType` if the name is taken, `UnsupportedDialectFeature`
    /// for inexpressible indexes, `BackendUnavailable` if DDL fails.
    pub fn register(&self, entity_type: EntityType) -> Result<Arc<EntityType>> {
        if self.caches.is_registered(entity_type.name()) {
            return Err(Error::DuplicateType(entity_type.name().to_string()));
        }
        let entity_type = Arc::new(entity_type);
        if self.config.create_tables {
            self.backend
                .create_schema(&TableMapping::derive(Arc::clone(&entity_type)))?;
        }
        self.mapping.register(Arc::clone(&entity_type))?;
        self.caches.register(Arc::clone(&entity_type))?;
        info!(
            target: "tessera::store",
            entity_type = entity_type.name(),
            table = entity_type.table(),
            "Registered entity type"
        );
        Ok(entity_type)
    }

    /// Registered entity types, ordered by name
    pub fn entity_types(&self) -> Vec<Arc<EntityType>> {
        self.caches.entity_types()
    }

    /// Identity cache of a registered type
    ///
    /// # Errors
    ///
    /// Returns `UnregisteredType` if the type was never registered.
    pub fn cache(&self, entity_type: &EntityType) -> Result<Arc<IdentityCache>> {
        self.caches.cache(entity_type.name())
    }

    fn resolve(&self, entity_type: &EntityType) -> Result<(Arc<IdentityCache>, Arc<TableMapping>)> {
        let cache = self.caches.cache(entity_type.name())?;
        let mapping = self.mapping.table(entity_type.name())?;
        Ok((cache, mapping))
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Look up one instance
    ///
    /// # Errors
    ///
    /// `UnregisteredType` for unknown types; `BackendUnavailable` if a
    /// required fetch fails, in which case the cache is unchanged.
    pub fn get(
        &self,
        entity_type: &EntityType,
        key: impl Into<EntityKey>,
        policy: CachePolicy,
    ) -> Result<Option<Arc<Instance>>> {
        let key = key.into();
        Ok(self
            .get_some(entity_type, std::slice::from_ref(&key), policy)?
            .into_iter()
            .next())
    }

    /// Look up several instances with at most one backend round trip
    ///
    /// Returns the instances found, in requested-key order with duplicates
    /// collapsed.
    ///
    /// # Errors
    ///
    /// `UnregisteredType` for unknown types; `BackendUnavailable` if the
    /// fetch fails, in which case the cache is unchanged.
    pub fn get_some(
        &self,
        entity_type: &EntityType,
        keys: &[EntityKey],
        policy: CachePolicy,
    ) -> Result<Vec<Arc<Instance>>> {
        let (cache, mapping) = self.resolve(entity_type)?;
        let plan = plan_lookup(&cache, keys, policy);
        if policy != CachePolicy::ForceRefresh {
            Counters::add(&self.counters.hits, plan.hits.len());
            Counters::add(&self.counters.misses, plan.fetch.len() + plan.absent);
        }
        debug!(
            target: "tessera::policy",
            entity_type = entity_type.name(),
            %policy,
            hits = plan.hits.len(),
            fetch = plan.fetch.len(),
            "Planned lookup"
        );

        let mut found: FxHashMap<EntityKey, Arc<Instance>> = plan
            .hits
            .into_iter()
            .map(|i| (i.key().clone(), i))
            .collect();
        if !plan.fetch.is_empty() {
            for instance in self.fetch_and_merge(&cache, &mapping, &plan.fetch)? {
                found.insert(instance.key().clone(), instance);
            }
        }
        Ok(plan.keys.iter().filter_map(|k| found.remove(k)).collect())
    }

    /// Every instance of a type
    ///
    /// `CacheFirst` serves the local snapshot only once a full load has
    /// synced the cache; otherwise it loads the table and reconciles.
    pub fn get_all(&self, entity_type: &EntityType, policy: CachePolicy) -> Result<Vec<Arc<Instance>>> {
        let (cache, mapping) = self.resolve(entity_type)?;
        match plan_table(&cache, policy) {
            TableSource::Local => {
                Counters::add(&self.counters.hits, 1);
                Ok(cache.values())
            }
            TableSource::Backend => {
                if policy == CachePolicy::CacheFirst {
                    Counters::add(&self.counters.misses, 1);
                }
                self.reload(&cache, &mapping)
            }
        }
    }

    /// Number of instances of a type
    ///
    /// `CacheFirst` on an unsynced cache asks the backend for a count
    /// without loading rows; `ForceRefresh` reloads the table.
    pub fn get_size(&self, entity_type: &EntityType, policy: CachePolicy) -> Result<usize> {
        let (cache, mapping) = self.resolve(entity_type)?;
        match plan_table(&cache, policy) {
            TableSource::Local => {
                Counters::add(&self.counters.hits, 1);
                Ok(cache.len())
            }
            TableSource::Backend if policy == CachePolicy::ForceRefresh => {
                Ok(self.reload(&cache, &mapping)?.len())
            }
            TableSource::Backend => {
                Counters::add(&self.counters.misses, 1);
                self.backend.count(&mapping)
            }
        }
    }

    /// Fetch `keys`, merge into the cache and evict keys the backend no
    /// longer holds
    fn fetch_and_merge(
        &self,
        cache: &IdentityCache,
        mapping: &TableMapping,
        keys: &[EntityKey],
    ) -> Result<Vec<Arc<Instance>>> {
        let records = self.backend.fetch_keys(mapping, keys)?;
        let merged = cache.put_all(records)?;

        let returned: HashSet<&EntityKey> = merged.iter().map(|(i, _)| i.key()).collect();
        let vanished: Vec<EntityKey> = keys
            .iter()
            .filter(|k| !returned.contains(k))
            .cloned()
            .collect();
        let removed = cache.remove_all(vanished.iter());
        if !removed.is_empty() {
            warn!(
                target: "tessera::cache",
                entity_type = mapping.entity_type().name(),
                count = removed.len(),
                "Cached rows vanished from backend"
            );
        }

        let mut events = Vec::new();
        let mut instances = Vec::with_capacity(merged.len());
        for (instance, outcome) in merged {
            events.extend(merge_event(&instance, outcome));
            instances.push(instance);
        }
        events.extend(removed.iter().map(removal_event));
        self.dispatch(events);
        Ok(instances)
    }

    /// Load the whole table and reconcile the cache against it
    fn reload(&self, cache: &IdentityCache, mapping: &TableMapping) -> Result<Vec<Arc<Instance>>> {
        let records = self.backend.fetch_all(mapping)?;
        let reconciliation = cache.reconcile(records)?;
        if !reconciliation.removed.is_empty() {
            warn!(
                target: "tessera::cache",
                entity_type = mapping.entity_type().name(),
                count = reconciliation.removed.len(),
                "Cached rows vanished from backend"
            );
        }
        let mut events: Vec<TriggerEvent> = reconciliation
            .instances
            .iter()
            .zip(reconciliation.outcomes)
            .filter_map(|(instance, outcome)| merge_event(instance, outcome))
            .collect();
        events.extend(reconciliation.removed.iter().map(removal_event));
        self.dispatch(events);
        Ok(reconciliation.instances)
    }

    // ========================================================================
    // Persist
    // ========================================================================

    /// Persist a draft, returning the canonical instance
    ///
    /// Creation fires `Created`; modification fires `Updated` when values
    /// actually changed.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` for drafts that violate the schema or key rules,
    /// `NotFound` when modifying a key the backend does not hold,
    /// `BackendUnavailable` if a statement fails.
    pub fn persist(&self, draft: Draft) -> Result<Arc<Instance>> {
        let (entity_type, intent, values) = draft.into_parts();
        let (cache, mapping) = self.resolve(&entity_type)?;
        match intent {
            DraftIntent::Create => self.create(&cache, &mapping, values),
            DraftIntent::Modify(key) => self.modify(&cache, &mapping, key, values),
        }
    }

    /// Persist several drafts
    ///
    /// Creations whose keys are known locally (`Caller`/`Sequence`) are
    /// grouped per type into multi-row inserts and run before the other
    /// drafts. Results are in draft order.
    pub fn persist_all(&self, drafts: Vec<Draft>) -> Result<Vec<Arc<Instance>>> {
        let mut slots: Vec<Option<Arc<Instance>>> = vec![None; drafts.len()];
        let mut batches: Vec<(Arc<EntityType>, Vec<usize>, Vec<Record>)> = Vec::new();
        let mut singles = Vec::new();

        for (i, draft) in drafts.into_iter().enumerate() {
            let batchable = *draft.intent() == DraftIntent::Create
                && draft.entity_type().id_assignment() != IdAssignment::Backend;
            if !batchable {
                singles.push((i, draft));
                continue;
            }
            let (entity_type, _, values) = draft.into_parts();
            match batches.iter_mut().find(|(t, _, _)| t.name() == entity_type.name()) {
                Some((_, indices, records)) => {
                    indices.push(i);
                    records.push(values);
                }
                None => batches.push((entity_type, vec![i], vec![values])),
            }
        }

        for (entity_type, indices, records) in batches {
            let instances = self.create_batch(&entity_type, records)?;
            for (i, instance) in indices.into_iter().zip(instances) {
                slots[i] = Some(instance);
            }
        }
        for (i, draft) in singles {
            slots[i] = Some(self.persist(draft)?);
        }
        Ok(slots.into_iter().flatten().collect())
    }

    fn create(&self, cache: &IdentityCache, mapping: &TableMapping, values: Record) -> Result<Arc<Instance>> {
        let entity_type = mapping.entity_type();
        let key_field = entity_type.key_field().name.clone();
        let mut record = values;

        match entity_type.id_assignment() {
            IdAssignment::Caller => {
                require_key(entity_type, &record)?;
                entity_type.check_record(&record)?;
            }
            IdAssignment::Backend => {
                reject_key(entity_type, &record)?;
                let mut candidate = record.clone();
                candidate.set(key_field.clone(), Value::Int(0));
                entity_type.check_record(&candidate)?;
            }
            IdAssignment::Sequence => {
                reject_key(entity_type, &record)?;
                record.set(key_field.clone(), self.allocate_keys(mapping, 1)?);
                entity_type.check_record(&record)?;
            }
        }

        if let Some(key) = self.backend.insert(mapping, &record)? {
            record.set(key_field, key.to_value());
        }
        let (instance, outcome) = cache.put(record)?;
        self.dispatch(merge_event(&instance, outcome).into_iter().collect());
        Ok(instance)
    }

    fn create_batch(&self, entity_type: &EntityType, values: Vec<Record>) -> Result<Vec<Arc<Instance>>> {
        let (cache, mapping) = self.resolve(entity_type)?;
        let entity_type = mapping.entity_type();
        let key_field = entity_type.key_field().name.clone();
        let mut records = values;

        match entity_type.id_assignment() {
            IdAssignment::Caller => {
                let mut seen = HashSet::with_capacity(records.len());
                for record in &records {
                    let key = require_key(entity_type, record)?;
                    if !seen.insert(key.clone()) {
                        return Err(Error::illegal(format!(
                            "{} key {} appears twice in one batch",
                            entity_type.name(),
                            key
                        )));
                    }
                }
            }
            IdAssignment::Sequence => {
                for record in &records {
                    reject_key(entity_type, record)?;
                }
                let first = self.allocate_keys(&mapping, records.len())?;
                for (offset, record) in records.iter_mut().enumerate() {
                    record.set(key_field.clone(), first + offset as i64);
                }
            }
            IdAssignment::Backend => {
                return records
                    .into_iter()
                    .map(|r| self.create(&cache, &mapping, r))
                    .collect();
            }
        }
        for record in &records {
            entity_type.check_record(record)?;
        }

        self.backend
            .insert_many(&mapping, &records, self.config.insert_batch_size)?;
        let merged = cache.put_all(records)?;
        let mut events = Vec::new();
        let mut instances = Vec::with_capacity(merged.len());
        for (instance, outcome) in merged {
            events.extend(merge_event(&instance, outcome));
            instances.push(instance);
        }
        self.dispatch(events);
        Ok(instances)
    }

    fn modify(
        &self,
        cache: &IdentityCache,
        mapping: &TableMapping,
        key: EntityKey,
        values: Record,
    ) -> Result<Arc<Instance>> {
        let entity_type = mapping.entity_type();
        let key_field = entity_type.key_field().name.clone();
        if let Some(value) = values.get(&key_field) {
            if EntityKey::from_value(value).as_ref() != Some(&key) {
                return Err(Error::illegal(format!(
                    "{} key {} cannot be changed",
                    entity_type.name(),
                    key
                )));
            }
        }

        let base = match cache.get(&key) {
            Some(instance) => instance.snapshot(),
            None => self
                .backend
                .fetch_keys(mapping, std::slice::from_ref(&key))?
                .into_iter()
                .next()
                .ok_or_else(|| not_found(entity_type, &key))?,
        };
        let mut record = base.clone();
        record.merge(&values);
        record.set(key_field, key.to_value());
        entity_type.check_record(&record)?;

        // a changed-rows count is 0 for a no-op update; only absence means gone
        if self.backend.update(mapping, &record)? == 0 && !self.backend.exists(mapping, &key)? {
            if let Some(gone) = cache.remove(&key) {
                self.dispatch(vec![removal_event(&gone)]);
            }
            return Err(not_found(entity_type, &key));
        }

        let (instance, _) = cache.put(record)?;
        let after = instance.snapshot();
        if after != base {
            self.dispatch(vec![TriggerEvent::updated(
                Arc::clone(entity_type),
                key,
                base,
                after,
            )]);
        }
        Ok(instance)
    }

    /// First of `count` fresh keys for a `Sequence` type
    ///
    /// Seeds from `SELECT MAX(key)` on first use. Keys burned by failed
    /// inserts are not reused. Each type has its own lock, so seeding one
    /// type never waits on another.
    fn allocate_keys(&self, mapping: &TableMapping, count: usize) -> Result<i64> {
        let name = mapping.entity_type().name();
        let sequence = Arc::clone(
            self.sequences
                .entry(name.to_string())
                .or_default()
                .value(),
        );
        let mut last = sequence.lock();
        let current = match *last {
            Some(current) => current,
            None => self.backend.max_key(mapping)?.unwrap_or(0),
        };
        *last = Some(current + count as i64);
        Ok(current + 1)
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Delete one instance; `false` if the backend held no such row
    pub fn delete(&self, instance: &Arc<Instance>) -> Result<bool> {
        let deleted = self.delete_keys(instance.entity_type(), std::slice::from_ref(instance.key()))?;
        Ok(deleted > 0)
    }

    /// Delete several instances, one round trip per entity type
    pub fn delete_instances(&self, instances: &[Arc<Instance>]) -> Result<u64> {
        let mut deleted = 0;
        for (entity_type, keys) in group_by_type(instances) {
            deleted += self.delete_keys(&entity_type, &keys)?;
        }
        Ok(deleted)
    }

    /// Delete rows by key and evict them from the cache
    ///
    /// Fires `Deleted` for every key whose values were known: cached keys,
    /// plus uncached keys read back first when any trigger observes the type.
    pub fn delete_keys(&self, entity_type: &EntityType, keys: &[EntityKey]) -> Result<u64> {
        let (cache, mapping) = self.resolve(entity_type)?;
        let keys = dedup_keys(keys);
        if keys.is_empty() {
            return Ok(0);
        }
        let entity_type = mapping.entity_type();

        let (hits, misses) = cache.partition(&keys);
        let mut before: FxHashMap<EntityKey, Record> = hits
            .iter()
            .map(|i| (i.key().clone(), i.snapshot()))
            .collect();
        if !misses.is_empty() && self.triggers.has_triggers(entity_type.name()) {
            for record in self.backend.fetch_keys(&mapping, &misses)? {
                if let Some(key) = entity_type.key_of(&record) {
                    before.insert(key, record);
                }
            }
        }

        let deleted = self.backend.delete_keys(&mapping, &keys)?;
        cache.remove_all(keys.iter());
        let events = keys
            .iter()
            .filter_map(|k| {
                before
                    .remove(k)
                    .map(|r| TriggerEvent::deleted(Arc::clone(entity_type), k.clone(), Some(r)))
            })
            .collect();
        self.dispatch(events);
        Ok(deleted)
    }

    /// Delete every row of a type
    ///
    /// Leaves the cache empty and synced. `Deleted` fires for the instances
    /// that were cached.
    pub fn delete_all(&self, entity_type: &EntityType) -> Result<u64> {
        let (cache, mapping) = self.resolve(entity_type)?;
        let deleted = self.backend.delete_all(&mapping)?;
        let removed = cache.clear();
        cache.mark_synced(true);
        self.dispatch(removed.iter().map(removal_event).collect());
        Ok(deleted)
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Refresh every cache on the calling thread
    ///
    /// Synced caches reload their table; others re-read their cached keys.
    /// All types are attempted; the first error is returned.
    pub fn refresh(&self) -> Result<()> {
        let mut first_error = None;
        for cache in self.caches.caches() {
            if let Err(e) = self.refresh_cache(&cache) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Refresh every cache, one task per type on `executor`
    ///
    /// Blocks until all tasks have finished.
    pub fn refresh_with(self: &Arc<Self>, executor: &dyn RefreshExecutor) -> Result<()> {
        let caches = self.caches.caches();
        let expected = caches.len();
        let (tx, rx) = mpsc::channel();
        for cache in caches {
            let store = Arc::clone(self);
            let tx = tx.clone();
            executor.execute(Box::new(move || {
                let _ = tx.send(store.refresh_cache(&cache));
            }));
        }
        drop(tx);

        let mut completed = 0;
        let mut first_error = None;
        for result in rx {
            completed += 1;
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        if completed < expected {
            return Err(Error::backend(
                "refresh",
                format!("{} refresh task(s) did not complete", expected - completed),
            ));
        }
        Ok(())
    }

    /// Re-read specific instances, one round trip per entity type
    pub fn refresh_instances(&self, instances: &[Arc<Instance>]) -> Result<()> {
        for (entity_type, keys) in group_by_type(instances) {
            self.refresh_keys(&entity_type, &keys)?;
        }
        Ok(())
    }

    /// Re-read keys from the backend, updating cached instances in place
    pub fn refresh_keys(&self, entity_type: &EntityType, keys: &[EntityKey]) -> Result<Vec<Arc<Instance>>> {
        self.get_some(entity_type, keys, CachePolicy::ForceRefresh)
    }

    fn refresh_cache(&self, cache: &IdentityCache) -> Result<()> {
        let mapping = self.mapping.table(cache.entity_type().name())?;
        if cache.is_synced() {
            self.reload(cache, &mapping)?;
            return Ok(());
        }
        let keys = cache.keys();
        if !keys.is_empty() {
            self.fetch_and_merge(cache, &mapping, &keys)?;
        }
        Ok(())
    }

    // ========================================================================
    // Triggers
    // ========================================================================

    /// Register a trigger for events of every type
    pub fn register_global_trigger(&self, trigger: Arc<dyn Trigger>) -> Result<bool> {
        self.triggers.register_global(trigger)
    }

    /// Register a trigger for events of one registered type
    ///
    /// # Errors
    ///
    /// `UnregisteredType` for unknown types, `IllegalArgument` for an
    /// unnamed trigger.
    pub fn register_trigger(&self, entity_type: &EntityType, trigger: Arc<dyn Trigger>) -> Result<bool> {
        self.caches.cache(entity_type.name())?;
        self.triggers.register_for_type(entity_type.name(), trigger)
    }

    /// Remove a global trigger
    pub fn remove_global_trigger(&self, trigger: &Arc<dyn Trigger>) -> bool {
        self.triggers.unregister_global(trigger)
    }

    /// Remove a type trigger
    pub fn remove_trigger(&self, entity_type: &EntityType, trigger: &Arc<dyn Trigger>) -> bool {
        self.triggers.unregister_for_type(entity_type.name(), trigger)
    }

    fn dispatch(&self, events: Vec<TriggerEvent>) {
        for event in events {
            let report = self.triggers.fire(&event);
            Counters::add(&self.counters.fired, report.fired);
            if !report.failures.is_empty() {
                Counters::add(&self.counters.failed, report.failures.len());
                self.failures.lock().extend(report.failures);
            }
        }
    }

    /// Drain the retained trigger failures
    pub fn take_trigger_failures(&self) -> Vec<Error> {
        std::mem::take(&mut *self.failures.lock())
    }

    /// Counters snapshot
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            cache_hits: self.counters.hits.load(Ordering::Relaxed),
            cache_misses: self.counters.misses.load(Ordering::Relaxed),
            backend_round_trips: self.backend.round_trips(),
            triggers_fired: self.counters.fired.load(Ordering::Relaxed),
            trigger_failures: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

fn merge_event(instance: &Arc<Instance>, outcome: PutOutcome) -> Option<TriggerEvent> {
    let entity_type = Arc::clone(instance.entity_type());
    let key = instance.key().clone();
    match outcome {
        PutOutcome::Created => Some(TriggerEvent::created(entity_type, key, instance.snapshot())),
        PutOutcome::Updated { previous } => Some(TriggerEvent::updated(
            entity_type,
            key,
            previous,
            instance.snapshot(),
        )),
        PutOutcome::Unchanged => None,
    }
}

fn removal_event(instance: &Arc<Instance>) -> TriggerEvent {
    TriggerEvent::deleted(
        Arc::clone(instance.entity_type()),
        instance.key().clone(),
        Some(instance.snapshot()),
    )
}

fn not_found(entity_type: &EntityType, key: &EntityKey) -> Error {
    Error::NotFound {
        entity_type: entity_type.name().to_string(),
        key: key.to_string(),
    }
}

fn require_key(entity_type: &EntityType, record: &Record) -> Result<EntityKey> {
    entity_type.key_of(record).ok_or_else(|| {
        Error::illegal(format!(
            "{} assigns keys by caller but '{}' is missing",
            entity_type.name(),
            entity_type.key_field().name
        ))
    })
}

fn reject_key(entity_type: &EntityType, record: &Record) -> Result<()> {
    match record.get(&entity_type.key_field().name) {
        None | Some(Value::Null) => Ok(()),
        Some(_) => Err(Error::illegal(format!(
            "{} keys are assigned by the store; do not set '{}'",
            entity_type.name(),
            entity_type.key_field().name
        ))),
    }
}

fn group_by_type(instances: &[Arc<Instance>]) -> Vec<(Arc<EntityType>, Vec<EntityKey>)> {
    let mut groups: Vec<(Arc<EntityType>, Vec<EntityKey>)> = Vec::new();
    for instance in instances {
        let name = instance.entity_type().name();
        match groups.iter_mut().find(|(t, _)| t.name() == name) {
            Some((_, keys)) => keys.push(instance.key().clone()),
            None => groups.push((Arc::clone(instance.entity_type()), vec![instance.key().clone()])),
        }
    }
    groups
}
