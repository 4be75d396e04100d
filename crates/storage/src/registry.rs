//! Cache registry
//!
//! Maps entity type names to their identity caches. Owned by whichever
//! component constructs the store; there is no process-global registry.
//! Lookups against unregistered types fail with `UnregisteredType`.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tessera_core::{EntityType, Error, Result};
use tracing::info;

use crate::cache::IdentityCache;

/// Registry of per-type identity caches
#[derive(Debug, Default)]
pub struct CacheRegistry {
    caches: DashMap<String, Arc<IdentityCache>>,
}

impl CacheRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        CacheRegistry::default()
    }

    /// Create the cache for a newly registered type
    ///
    /// # Errors
    ///
    /// Returns `DuplicateType` if the name is taken.
    pub fn register(&self, entity_type: Arc<EntityType>) -> Result<Arc<IdentityCache>> {
        match self.caches.entry(entity_type.name().to_string()) {
            Entry::Occupied(_) => Err(Error::DuplicateType(entity_type.name().to_string())),
            Entry::Vacant(entry) => {
                let cache = Arc::new(IdentityCache::new(Arc::clone(&entity_type)));
                entry.insert(Arc::clone(&cache));
                info!(
                    target: "tessera::cache",
                    entity_type = entity_type.name(),
                    "Registered identity cache"
                );
                Ok(cache)
            }
        }
    }

    /// Cache of a registered type
    ///
    /// # Errors
    ///
    /// Returns `UnregisteredType` if the type was never registered.
    pub fn cache(&self, type_name: &str) -> Result<Arc<IdentityCache>> {
        self.caches
            .get(type_name)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| Error::UnregisteredType(type_name.to_string()))
    }

    /// Whether a type is registered
    pub fn is_registered(&self, type_name: &str) -> bool {
        self.caches.contains_key(type_name)
    }

    /// Snapshot of every cache, ordered by type name
    pub fn caches(&self) -> Vec<Arc<IdentityCache>> {
        let mut caches: Vec<Arc<IdentityCache>> =
            self.caches.iter().map(|r| Arc::clone(r.value())).collect();
        caches.sort_by(|a, b| a.entity_type().name().cmp(b.entity_type().name()));
        caches
    }

    /// Registered entity types, ordered by name
    pub fn entity_types(&self) -> Vec<Arc<EntityType>> {
        self.caches()
            .into_iter()
            .map(|c| Arc::clone(c.entity_type()))
            .collect()
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::ScalarType;

    fn ty(name: &str) -> Arc<EntityType> {
        Arc::new(
            EntityType::builder(name)
                .key("id", ScalarType::Integer)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = CacheRegistry::new();
        let cache = registry.register(ty("Person")).unwrap();
        let same = registry.cache("Person").unwrap();
        assert!(Arc::ptr_eq(&cache, &same));
        assert!(registry.is_registered("Person"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregistered_lookup_fails() {
        let registry = CacheRegistry::new();
        assert!(matches!(
            registry.cache("Ghost"),
            Err(Error::UnregisteredType(name)) if name == "Ghost"
        ));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = CacheRegistry::new();
        registry.register(ty("Person")).unwrap();
        assert!(matches!(
            registry.register(ty("Person")),
            Err(Error::DuplicateType(_))
        ));
    }

    #[test]
    fn test_listing_is_sorted() {
        let registry = CacheRegistry::new();
        registry.register(ty("Zebra")).unwrap();
        registry.register(ty("Apple")).unwrap();
        let names: Vec<String> = registry
            .entity_types()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, vec!["Apple", "Zebra"]);
    }
}
