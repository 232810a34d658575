//! In-process tier backed by moka
//!
//! Entries carry their own TTL through [`moka::Expiry`], so a value
//! backfilled from a slower tier keeps only its remaining lifetime.

use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::Expiry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{EvictionPolicyKind, TierConfig};

/// Value stored in the memory tier
#[derive(Debug, Clone)]
pub(crate) struct MemoryEntry<V> {
    pub(crate) value: V,
    pub(crate) ttl: Duration,
    pub(crate) weight: u32,
}

struct EntryExpiry;

impl<V> Expiry<String, MemoryEntry<V>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &MemoryEntry<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &MemoryEntry<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Removal counters fed by the eviction listener
#[derive(Debug, Default)]
pub(crate) struct RemovalCounters {
    pub(crate) evictions: AtomicU64,
    pub(crate) expirations: AtomicU64,
}

/// Bounded, per-entry TTL memory tier
#[derive(Clone)]
pub(crate) struct MemoryTier<V: Clone + Send + Sync + 'static> {
    inner: Cache<String, MemoryEntry<V>>,
    weighted: bool,
    removals: Arc<RemovalCounters>,
}

impl<V: Clone + Send + Sync + 'static> MemoryTier<V> {
    pub(crate) fn new(config: &TierConfig) -> Self {
        let removals = Arc::new(RemovalCounters::default());
        let listener_counters = Arc::clone(&removals);

        let policy = match config.eviction_policy {
            EvictionPolicyKind::Lru => EvictionPolicy::lru(),
            EvictionPolicyKind::TinyLfu => EvictionPolicy::tiny_lfu(),
        };

        let builder = Cache::<String, MemoryEntry<V>>::builder()
            .eviction_policy(policy)
            .expire_after(EntryExpiry)
            .eviction_listener(move |_key, _value, cause| match cause {
                RemovalCause::Size => {
                    listener_counters.evictions.fetch_add(1, Ordering::Relaxed);
                }
                RemovalCause::Expired => {
                    listener_counters.expirations.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            });

        let (inner, weighted) = match config.max_bytes {
            Some(max_bytes) => (
                builder
                    .max_capacity(max_bytes)
                    .weigher(|_key: &String, entry: &MemoryEntry<V>| entry.weight)
                    .build(),
                true,
            ),
            None => (builder.max_capacity(config.max_entries).build(), false),
        };

        Self {
            inner,
            weighted,
            removals,
        }
    }

    /// Whether entries are weighed by size
    pub(crate) fn is_weighted(&self) -> bool {
        self.weighted
    }

    pub(crate) async fn get(&self, key: &str) -> Option<MemoryEntry<V>> {
        self.inner.get(key).await
    }

    pub(crate) async fn insert(&self, key: String, entry: MemoryEntry<V>) {
        self.inner.insert(key, entry).await;
    }

    pub(crate) async fn remove(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub(crate) async fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks().await;
    }

    pub(crate) fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    pub(crate) fn weighted_size(&self) -> u64 {
        self.inner.weighted_size()
    }

    pub(crate) fn evictions(&self) -> u64 {
        self.removals.evictions.load(Ordering::Relaxed)
    }

    pub(crate) fn expirations(&self) -> u64 {
        self.removals.expirations.load(Ordering::Relaxed)
    }
}
