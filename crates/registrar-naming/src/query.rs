//! Client lookups
//!
//! Service and catalog lookups are served from a short-lived cache in front of
//! the store. Every committed change bumps the generation of the affected
//! service and of the catalog. A cached value remembers the generation it was
//! computed at and is only served while that generation is current, so a fill
//! that raced a write is never returned after the write.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use moka::sync::Cache;

use registrar_api::Lease;

use crate::config::QueryConfig;
use crate::store::{RegistryEvent, RegistryListener, RegistryStore};

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
enum CacheKey {
    Service(String),
    Catalog,
}

#[derive(Clone)]
enum CacheValue {
    Service(Arc<Vec<Lease>>),
    Catalog(Arc<BTreeMap<String, Vec<Lease>>>),
}

#[derive(Clone)]
struct Cached {
    generation: u64,
    value: CacheValue,
}

/// Cache half of the engine, registered as a store listener
struct LookupCache {
    entries: Cache<CacheKey, Cached>,
    /// Changes seen per key
    generations: DashMap<CacheKey, u64>,
}

impl LookupCache {
    fn generation_of(&self, key: &CacheKey) -> u64 {
        self.generations.get(key).map(|g| *g).unwrap_or(0)
    }

    fn bump(&self, key: CacheKey) {
        *self.generations.entry(key.clone()).or_insert(0) += 1;
        self.entries.invalidate(&key);
    }

    /// Cached value of `key` if no change happened since it was computed
    fn current(&self, key: &CacheKey) -> Option<CacheValue> {
        let cached = self.entries.get(key)?;
        (cached.generation == self.generation_of(key)).then_some(cached.value)
    }

    fn get_or_fill(&self, key: CacheKey, fill: impl FnOnce() -> CacheValue) -> CacheValue {
        if let Some(value) = self.current(&key) {
            metrics::counter!("registrar_query_cache_hits_total").increment(1);
            return value;
        }
        metrics::counter!("registrar_query_cache_misses_total").increment(1);

        // Read before the fill: a write landing after this point leaves the
        // entry behind the current generation
        let generation = self.generation_of(&key);
        let value = fill();
        self.entries.insert(
            key,
            Cached {
                generation,
                value: value.clone(),
            },
        );
        value
    }
}

impl RegistryListener for LookupCache {
    fn on_change(&self, event: &RegistryEvent) {
        self.bump(CacheKey::Service(event.service_name().to_string()));
        self.bump(CacheKey::Catalog);
    }
}

/// Read side of the registry
pub struct QueryEngine {
    store: Arc<RegistryStore>,
    cache: Arc<LookupCache>,
}

impl QueryEngine {
    /// Build the engine and subscribe its cache to `store`
    pub fn new(store: Arc<RegistryStore>, config: &QueryConfig) -> Self {
        let cache = Arc::new(LookupCache {
            entries: Cache::builder()
                .max_capacity(config.cache_capacity)
                .time_to_live(config.cache_ttl)
                .build(),
            generations: DashMap::new(),
        });
        store.add_listener(cache.clone());
        Self { store, cache }
    }

    /// UP leases of a service ordered by instance id; empty for unknown services
    pub fn lookup(&self, service_name: &str) -> Arc<Vec<Lease>> {
        let value = self
            .cache
            .get_or_fill(CacheKey::Service(service_name.to_string()), || {
                let leases = self
                    .store
                    .snapshot_for(service_name)
                    .into_iter()
                    .filter(Lease::is_up)
                    .collect();
                CacheValue::Service(Arc::new(leases))
            });
        match value {
            CacheValue::Service(leases) => leases,
            CacheValue::Catalog(_) => Arc::new(Vec::new()),
        }
    }

    /// UP leases of every service; services without any are omitted
    pub fn lookup_all(&self) -> Arc<BTreeMap<String, Vec<Lease>>> {
        let value = self.cache.get_or_fill(CacheKey::Catalog, || {
            let catalog = self
                .store
                .snapshot()
                .services
                .into_iter()
                .filter_map(|(service, leases)| {
                    let up: Vec<Lease> = leases.into_iter().filter(Lease::is_up).collect();
                    (!up.is_empty()).then_some((service, up))
                })
                .collect();
            CacheValue::Catalog(Arc::new(catalog))
        });
        match value {
            CacheValue::Catalog(catalog) => catalog,
            CacheValue::Service(_) => Arc::new(BTreeMap::new()),
        }
    }

    /// One lease in any status, read through to the store
    pub fn lookup_instance(&self, service_name: &str, instance_id: &str) -> Option<Lease> {
        self.store.get(service_name, instance_id)
    }
}
