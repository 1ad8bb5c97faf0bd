//! Tiered Cache Facade
//!
//! Public entry point: wraps the [`TierEngine`] and consults the configured
//! [`EvictionPolicy`] after every `put`, `get` and `remove`.
//!
//! # Example
//!
//! ```
//! use tiered_cache::adapters::JsonSerializer;
//! use tiered_cache::cache::{kb, CacheConfig, TierCache};
//!
//! let config = CacheConfig::default()
//!     .with_entries_limit(100)
//!     .with_pages(kb(64), 4);
//! let cache: TierCache<String> = TierCache::builder(config)
//!     .serializer(JsonSerializer::new())
//!     .build()
//!     .unwrap();
//!
//! cache.put("greeting", "hello".to_string()).unwrap();
//! assert_eq!(cache.get("greeting").unwrap(), Some("hello".to_string()));
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::config::CacheConfig;
use super::engine::TierEngine;
use super::entry::{Entry, RemovedEntry, Tier};
use super::metrics::{CacheMetrics, LatencyTracker};
use super::policy::ImmediatePolicy;
use super::stats::CacheStats;
use crate::adapters::InMemoryStore;
use crate::domain::{BackingStore, DisposalReport, EvictionPolicy, OverflowDisposer, Serializer};
use crate::error::{Error, Result};

/// Three-tier object cache
pub struct TierCache<V> {
    engine: Arc<TierEngine<V>>,
    disposer: Arc<dyn OverflowDisposer>,
    policy: Arc<dyn EvictionPolicy>,
}

impl<V> std::fmt::Debug for TierCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierCache").finish_non_exhaustive()
    }
}

impl<V> TierCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Start building a cache with `config`
    pub fn builder(config: CacheConfig) -> TierCacheBuilder<V> {
        TierCacheBuilder::new(config)
    }

    /// Store `value` under `key` with the configured default TTL
    pub fn put(&self, key: impl Into<String>, value: V) -> Result<Arc<Entry<V>>> {
        let ttl = self.engine.config().default_ttl;
        self.store(key.into(), value, ttl)
    }

    /// Store `value` under `key`, expiring after `ttl`
    pub fn put_with_ttl(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: Duration,
    ) -> Result<Arc<Entry<V>>> {
        self.store(key.into(), value, Some(ttl))
    }

    fn store(&self, key: String, value: V, ttl: Option<Duration>) -> Result<Arc<Entry<V>>> {
        let tracker = LatencyTracker::start();
        let entry = self.engine.insert(key, value, ttl)?;
        self.engine.metrics().record_put_latency(tracker.elapsed());
        self.policy.on_mutation(&self.disposer)?;
        Ok(entry)
    }

    /// Current value of `key`, or `None` if absent or expired
    pub fn get(&self, key: &str) -> Result<Option<V>> {
        let tracker = LatencyTracker::start();
        let value = self.engine.get(key)?;
        self.engine.metrics().record_get_latency(tracker.elapsed());
        self.policy.on_mutation(&self.disposer)?;
        Ok(value)
    }

    /// Remove `key` from whichever tier holds it
    pub fn remove(&self, key: &str) -> Result<Option<RemovedEntry<V>>> {
        let removed = self.engine.remove(key)?;
        self.policy.on_mutation(&self.disposer)?;
        Ok(removed)
    }

    /// True if `key` is indexed (it may have expired but not yet been swept)
    pub fn contains_key(&self, key: &str) -> bool {
        self.engine.contains_key(key)
    }

    /// Tier holding `key`
    pub fn tier_of(&self, key: &str) -> Option<Tier> {
        self.engine.tier_of(key)
    }

    /// Remove every expired entry, returning how many were removed
    pub fn dispose_expired(&self) -> Result<usize> {
        self.engine.dispose_expired()
    }

    /// Demote heap entries beyond the entries limit
    pub fn dispose_heap_overflow(&self) -> Result<DisposalReport> {
        self.engine.dispose_heap_overflow()
    }

    /// Externalize off-heap entries beyond page capacity
    pub fn dispose_off_heap_overflow(&self) -> Result<DisposalReport> {
        self.engine.dispose_off_heap_overflow()
    }

    /// Heap pass then off-heap pass
    pub fn dispose_overflow(&self) -> Result<DisposalReport> {
        self.disposer.dispose_overflow()
    }

    /// Drop the least-recently-used heap entry
    pub fn remove_lru_heap(&self) -> Result<Option<RemovedEntry<V>>> {
        self.engine.remove_lru_heap()
    }

    /// Drop the least-recently-used off-heap entry
    pub fn remove_lru_off_heap(&self) -> Result<Option<RemovedEntry<V>>> {
        self.engine.remove_lru_off_heap()
    }

    /// Clear every tier and the backing store
    pub fn reset(&self) -> Result<()> {
        self.engine.reset()
    }

    /// Occupancy of every tier
    pub fn stats(&self) -> Result<CacheStats> {
        self.engine.stats()
    }

    /// Hit, miss, movement and latency counters
    pub fn metrics(&self) -> &CacheMetrics {
        self.engine.metrics()
    }

    /// Configuration the cache was built with
    pub fn config(&self) -> &CacheConfig {
        self.engine.config()
    }

    /// Name of the active eviction policy
    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// The underlying engine
    pub fn engine(&self) -> &Arc<TierEngine<V>> {
        &self.engine
    }
}

impl<V> Clone for TierCache<V> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            disposer: self.disposer.clone(),
            policy: self.policy.clone(),
        }
    }
}

/// Builder for [`TierCache`]
///
/// A serializer is required. The store defaults to [`InMemoryStore`] and
/// the policy to [`ImmediatePolicy`].
pub struct TierCacheBuilder<V> {
    config: CacheConfig,
    serializer: Option<Arc<dyn Serializer<V>>>,
    store: Option<Arc<dyn BackingStore>>,
    policy: Option<Arc<dyn EvictionPolicy>>,
}

impl<V> TierCacheBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Start from `config` with no serializer, store or policy set
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            serializer: None,
            store: None,
            policy: None,
        }
    }

    /// Serializer used for off-heap and externalized copies
    pub fn serializer(mut self, serializer: impl Serializer<V> + 'static) -> Self {
        self.serializer = Some(Arc::new(serializer));
        self
    }

    /// Like [`Self::serializer`], for an already shared serializer
    pub fn shared_serializer(mut self, serializer: Arc<dyn Serializer<V>>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Backing store for the cold tier
    pub fn store(mut self, store: impl BackingStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Like [`Self::store`], for a store shared with the caller
    pub fn shared_store(mut self, store: Arc<dyn BackingStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Policy deciding when overflow is disposed
    pub fn policy(mut self, policy: impl EvictionPolicy + 'static) -> Self {
        self.policy = Some(Arc::new(policy));
        self
    }

    /// Like [`Self::policy`], for an already shared policy
    pub fn shared_policy(mut self, policy: Arc<dyn EvictionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Validate the configuration and allocate the initial pages
    pub fn build(self) -> Result<TierCache<V>> {
        let serializer = self
            .serializer
            .ok_or_else(|| Error::Config("a serializer is required".into()))?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()) as Arc<dyn BackingStore>);
        let policy = self
            .policy
            .unwrap_or_else(|| Arc::new(ImmediatePolicy) as Arc<dyn EvictionPolicy>);

        let engine = Arc::new(TierEngine::new(self.config, serializer, store)?);
        let disposer: Arc<dyn OverflowDisposer> = engine.clone();
        debug!(policy = policy.name(), "tiered cache built");

        Ok(TierCache {
            engine,
            disposer,
            policy,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
