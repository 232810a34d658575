//! The memory → distributed → persisted chain
//!
//! ```text
//!  get(key) ──► memory ──hit──► return
//!                 │miss
//!                 ▼
//!            distributed ──hit──► backfill memory ──► return
//!                 │miss / error / timeout (skipped, counted)
//!                 ▼
//!             persisted ──hit──► backfill distributed + memory ──► return
//!                 │miss
//!                 ▼
//!               None
//! ```
//!
//! Remote tiers store a JSON envelope holding the value, its creation time,
//! TTL and tags, so a backfilled entry keeps its remaining lifetime and stays
//! reachable by tag invalidation.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::task::TaskTracker;

use crate::backend::{DistributedBackend, PersistedStore};
use crate::config::{BackfillMode, CacheConfig, TierConfig};
use crate::error::CacheError;
use crate::key::{item_tag, user_tag, CacheKey};
use crate::memory::{MemoryEntry, MemoryTier};
use crate::metrics::{CacheCounters, CacheMetrics};

/// Storage tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// In-process
    Memory,
    /// Shared network cache
    Distributed,
    /// Durable store
    Persisted,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tier::Memory => "memory",
            Tier::Distributed => "distributed",
            Tier::Persisted => "persisted",
        })
    }
}

/// A value found in some tier
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit<V> {
    /// Cached value
    pub value: V,
    /// Tier that served it
    pub tier: Tier,
    /// Lookup latency
    pub latency: Duration,
}

/// Result of [`TieredCache::get_or_generate`]
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup<V> {
    /// Cached or freshly generated value
    pub value: V,
    /// Serving tier; `None` when generated
    pub tier: Option<Tier>,
}

impl<V> CacheLookup<V> {
    /// Served from cache
    #[inline]
    #[must_use]
    pub fn is_hit(&self) -> bool {
        self.tier.is_some()
    }
}

/// Write options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheWriteOptions {
    /// Entry lifetime; each tier's default when absent
    pub ttl: Option<Duration>,
    /// Tags for invalidation
    pub tags: Vec<String>,
    /// Tiers to write; every configured tier when absent
    pub tiers: Option<Vec<Tier>>,
}

impl CacheWriteOptions {
    /// Options carrying the tags of a key
    #[must_use]
    pub fn for_key(key: &CacheKey) -> Self {
        Self {
            tags: key.tags().to_vec(),
            ..Self::default()
        }
    }

    /// Set the lifetime
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Add a tag
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Write only to the given tiers
    #[must_use]
    pub fn only_tiers(mut self, tiers: impl IntoIterator<Item = Tier>) -> Self {
        self.tiers = Some(tiers.into_iter().collect());
        self
    }

    fn includes(&self, tier: Tier) -> bool {
        self.tiers.as_ref().map_or(true, |t| t.contains(&tier))
    }
}

/// Event that makes cached entries stale
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationTrigger {
    /// User retook the quiz or changed favorites; drops `user:<id>` entries
    UserActivity {
        /// User
        user_id: String,
    },
    /// Catalog items changed; drops `item:<id>` entries
    ContentUpdate {
        /// Changed items
        item_ids: Vec<String>,
    },
    /// Drops entries created longer ago than `max_age`
    TimeBased {
        /// Maximum entry age
        max_age: Duration,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<V> {
    value: V,
    created_at: DateTime<Utc>,
    ttl_ms: u64,
    #[serde(default)]
    tags: Vec<String>,
}

impl<V> Envelope<V> {
    fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let age = (now - self.created_at).to_std().unwrap_or(Duration::ZERO);
        Duration::from_millis(self.ttl_ms)
            .checked_sub(age)
            .filter(|d| !d.is_zero())
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn delta(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

enum RemoteBackend {
    Distributed(Arc<dyn DistributedBackend>),
    Persisted(Arc<dyn PersistedStore>),
}

struct Remote {
    tier: Tier,
    timeout: Duration,
    default_ttl: Duration,
    backend: RemoteBackend,
}

impl Remote {
    fn new(tier: Tier, config: &TierConfig, backend: RemoteBackend) -> Self {
        Self {
            tier,
            timeout: config.timeout(),
            default_ttl: config.ttl(),
            backend,
        }
    }

    fn timed_out(&self) -> CacheError {
        CacheError::Timeout {
            tier: self.tier,
            timeout_ms: millis(self.timeout),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let fut = match &self.backend {
            RemoteBackend::Distributed(b) => b.get(key),
            RemoteBackend::Persisted(p) => p.get(key),
        };
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| self.timed_out())?
    }

    async fn set(&self, key: &str, bytes: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let fut = match &self.backend {
            RemoteBackend::Distributed(b) => b.set(key, bytes, ttl),
            RemoteBackend::Persisted(p) => p.set(key, bytes, ttl),
        };
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| self.timed_out())?
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let fut = match &self.backend {
            RemoteBackend::Distributed(b) => b.delete(key),
            RemoteBackend::Persisted(p) => p.delete(key),
        };
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| self.timed_out())?
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let fut = match &self.backend {
            RemoteBackend::Distributed(b) => b.purge_expired(),
            RemoteBackend::Persisted(p) => p.purge_expired(),
        };
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| self.timed_out())?
    }
}

#[derive(Debug, Clone)]
struct KeyMeta {
    tags: Vec<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Key → tags/lifetime and tag → keys
#[derive(Debug, Default)]
struct KeyIndex {
    keys: DashMap<String, KeyMeta>,
    tags: DashMap<String, HashSet<String>>,
}

impl KeyIndex {
    /// Replace the tags and lifetime of `key`
    ///
    /// The key's map entry stays locked while tag links are rewritten, so
    /// concurrent writers of one key never leave stale links behind. Lock
    /// order is always key entry, then tag entries.
    fn record(&self, key: &str, tags: &[String], created_at: DateTime<Utc>, ttl: Duration) {
        let meta = KeyMeta {
            tags: tags.to_vec(),
            created_at,
            expires_at: created_at + delta(ttl),
        };
        match self.keys.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                self.unlink(key, &entry.get().tags);
                self.link(key, tags);
                entry.insert(meta);
            }
            Entry::Vacant(entry) => {
                self.link(key, tags);
                entry.insert(meta);
            }
        }
    }

    fn forget(&self, key: &str) {
        self.forget_if(key, |_| true);
    }

    fn forget_if(&self, key: &str, predicate: impl Fn(&KeyMeta) -> bool) -> bool {
        match self.keys.entry(key.to_string()) {
            Entry::Occupied(entry) if predicate(entry.get()) => {
                self.unlink(key, &entry.get().tags);
                entry.remove();
                true
            }
            _ => false,
        }
    }

    fn link(&self, key: &str, tags: &[String]) {
        for tag in tags {
            self.tags
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    fn unlink(&self, key: &str, tags: &[String]) {
        for tag in tags {
            if let Some(mut keys) = self.tags.get_mut(tag) {
                keys.remove(key);
            }
            self.tags.remove_if(tag, |_, keys| keys.is_empty());
        }
    }

    fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        self.tags
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn keys_created_before(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.keys
            .iter()
            .filter(|e| e.created_at < cutoff)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Drop expired records, returning the keys removed
    fn purge_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .keys
            .iter()
            .filter(|e| e.expires_at <= now)
            .map(|e| e.key().clone())
            .collect();
        expired
            .into_iter()
            .filter(|key| self.forget_if(key, |meta| meta.expires_at <= now))
            .collect()
    }
}

struct Inner<V: Clone + Send + Sync + 'static> {
    config: CacheConfig,
    memory: MemoryTier<V>,
    remotes: Vec<Remote>,
    index: KeyIndex,
    counters: CacheCounters,
    backfills: TaskTracker,
}

/// Builder for a [`TieredCache`] with remote tiers
pub struct TieredCacheBuilder<V> {
    config: CacheConfig,
    distributed: Option<Arc<dyn DistributedBackend>>,
    persisted: Option<Arc<dyn PersistedStore>>,
    _value: std::marker::PhantomData<fn() -> V>,
}

impl<V> TieredCacheBuilder<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Attach the distributed tier
    #[must_use]
    pub fn with_distributed(mut self, backend: Arc<dyn DistributedBackend>) -> Self {
        self.distributed = Some(backend);
        self
    }

    /// Attach the persisted tier
    #[must_use]
    pub fn with_persisted(mut self, store: Arc<dyn PersistedStore>) -> Self {
        self.persisted = Some(store);
        self
    }

    /// Build the cache; a remote tier is active when attached and enabled
    pub fn build(self) -> Result<TieredCache<V>, CacheError> {
        self.config.validate()?;
        let mut remotes = Vec::new();
        if let Some(backend) = self.distributed.filter(|_| self.config.distributed.enabled) {
            remotes.push(Remote::new(
                Tier::Distributed,
                &self.config.distributed,
                RemoteBackend::Distributed(backend),
            ));
        }
        if let Some(store) = self.persisted.filter(|_| self.config.persisted.enabled) {
            remotes.push(Remote::new(
                Tier::Persisted,
                &self.config.persisted,
                RemoteBackend::Persisted(store),
            ));
        }
        tracing::debug!(
            tiers = remotes.len() + 1,
            backfill = ?self.config.backfill,
            "tiered cache built"
        );
        Ok(TieredCache {
            inner: Arc::new(Inner {
                memory: MemoryTier::new(&self.config.memory),
                config: self.config,
                remotes,
                index: KeyIndex::default(),
                counters: CacheCounters::default(),
                backfills: TaskTracker::new(),
            }),
        })
    }
}

/// Multi-tier cache for serializable values
///
/// Cloning is cheap and shares the tiers.
pub struct TieredCache<V: Clone + Send + Sync + 'static> {
    inner: Arc<Inner<V>>,
}

impl<V: Clone + Send + Sync + 'static> Clone for TieredCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> fmt::Debug for TieredCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredCache")
            .field("remote_tiers", &self.inner.remotes.len())
            .field("memory_entries", &self.inner.memory.entry_count())
            .finish_non_exhaustive()
    }
}

impl<V> TieredCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Start building a cache
    #[must_use]
    pub fn builder(config: CacheConfig) -> TieredCacheBuilder<V> {
        TieredCacheBuilder {
            config,
            distributed: None,
            persisted: None,
            _value: std::marker::PhantomData,
        }
    }

    /// Memory-only cache
    pub fn memory_only(config: CacheConfig) -> Result<Self, CacheError> {
        Self::builder(config).build()
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Active tiers, fastest first
    #[must_use]
    pub fn tiers(&self) -> Vec<Tier> {
        std::iter::once(Tier::Memory)
            .chain(self.inner.remotes.iter().map(|r| r.tier))
            .collect()
    }

    /// Whether the memory tier holds a key
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.inner.memory.contains(key)
    }

    /// Entries in the memory tier
    #[inline]
    #[must_use]
    pub fn len(&self) -> u64 {
        self.inner.memory.entry_count()
    }

    /// Memory tier is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Probe each tier in order, backfilling faster tiers on a lower-tier hit
    pub async fn get(&self, key: &str) -> Option<CacheHit<V>> {
        let start = Instant::now();

        if let Some(entry) = self.inner.memory.get(key).await {
            let latency = start.elapsed();
            self.inner.counters.record_hit(Tier::Memory, latency);
            tracing::trace!(key, tier = %Tier::Memory, "cache hit");
            return Some(CacheHit {
                value: entry.value,
                tier: Tier::Memory,
                latency,
            });
        }

        for (position, remote) in self.inner.remotes.iter().enumerate() {
            let bytes = match remote.get(key).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(err) => {
                    self.inner.counters.record_tier_error();
                    tracing::warn!(key, tier = %remote.tier, error = %err, "tier skipped");
                    continue;
                }
            };
            let envelope: Envelope<V> = match serde_json::from_slice(&bytes) {
                Ok(envelope) => envelope,
                Err(err) => {
                    self.inner.counters.record_tier_error();
                    tracing::warn!(key, tier = %remote.tier, error = %err, "undecodable entry skipped");
                    continue;
                }
            };
            let Some(remaining) = envelope.remaining(Utc::now()) else {
                continue;
            };

            let value = envelope.value.clone();
            self.schedule_backfill(key, envelope, bytes, remaining, position)
                .await;

            let latency = start.elapsed();
            self.inner.counters.record_hit(remote.tier, latency);
            tracing::debug!(key, tier = %remote.tier, "cache hit");
            return Some(CacheHit {
                value,
                tier: remote.tier,
                latency,
            });
        }

        self.inner.counters.record_miss(start.elapsed());
        tracing::trace!(key, "cache miss");
        None
    }

    async fn schedule_backfill(
        &self,
        key: &str,
        envelope: Envelope<V>,
        bytes: Vec<u8>,
        remaining: Duration,
        position: usize,
    ) {
        match self.inner.config.backfill {
            BackfillMode::Inline => {
                self.backfill(key.to_string(), envelope, bytes, remaining, position)
                    .await;
            }
            BackfillMode::Background => {
                let this = self.clone();
                let key = key.to_string();
                self.inner.backfills.spawn(async move {
                    this.backfill(key, envelope, bytes, remaining, position).await;
                });
            }
        }
    }

    async fn backfill(
        &self,
        key: String,
        envelope: Envelope<V>,
        bytes: Vec<u8>,
        remaining: Duration,
        position: usize,
    ) {
        let weight = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        for remote in &self.inner.remotes[..position] {
            let ttl = remaining.min(remote.default_ttl);
            if let Err(err) = remote.set(&key, bytes.clone(), ttl).await {
                self.inner.counters.record_tier_error();
                tracing::warn!(key = %key, tier = %remote.tier, error = %err, "backfill failed");
            }
        }
        self.inner
            .memory
            .insert(
                key.clone(),
                MemoryEntry {
                    value: envelope.value,
                    ttl: remaining.min(self.inner.config.memory.ttl()),
                    weight,
                },
            )
            .await;
        self.inner.index.record(
            &key,
            &envelope.tags,
            envelope.created_at,
            Duration::from_millis(envelope.ttl_ms),
        );
        self.inner.counters.record_backfill();
        tracing::trace!(key = %key, "backfilled");
    }

    /// Write a value to the selected tiers
    ///
    /// Remote tier failures are logged and counted; only an unencodable value
    /// is an error.
    pub async fn set(
        &self,
        key: &str,
        value: V,
        options: CacheWriteOptions,
    ) -> Result<(), CacheError> {
        let created_at = Utc::now();
        let mut longest = Duration::ZERO;

        for remote in self.inner.remotes.iter().filter(|r| options.includes(r.tier)) {
            let ttl = options.ttl.unwrap_or(remote.default_ttl);
            let bytes = serde_json::to_vec(&Envelope {
                value: value.clone(),
                created_at,
                ttl_ms: millis(ttl),
                tags: options.tags.clone(),
            })?;
            match remote.set(key, bytes, ttl).await {
                Ok(()) => longest = longest.max(ttl),
                Err(err) => {
                    self.inner.counters.record_tier_error();
                    tracing::warn!(key, tier = %remote.tier, error = %err, "tier write skipped");
                }
            }
        }

        if options.includes(Tier::Memory) {
            let ttl = options.ttl.unwrap_or_else(|| self.inner.config.memory.ttl());
            let weight = if self.inner.memory.is_weighted() {
                u32::try_from(serde_json::to_vec(&value)?.len()).unwrap_or(u32::MAX)
            } else {
                1
            };
            self.inner
                .memory
                .insert(key.to_string(), MemoryEntry { value, ttl, weight })
                .await;
            longest = longest.max(ttl);
        }

        self.inner
            .index
            .record(key, &options.tags, created_at, longest);
        tracing::trace!(key, ttl_ms = millis(longest), "cache set");
        Ok(())
    }

    /// Write a batch with shared options, returning how many were written
    pub async fn set_many<I>(&self, entries: I, options: CacheWriteOptions) -> Result<usize, CacheError>
    where
        I: IntoIterator<Item = (String, V)>,
    {
        let mut written = 0;
        for (key, value) in entries {
            self.set(&key, value, options.clone()).await?;
            written += 1;
        }
        Ok(written)
    }

    /// Look up a key, generating and writing through on a full miss
    ///
    /// A failed generation writes nothing.
    pub async fn get_or_generate<F, Fut, E>(
        &self,
        key: &str,
        options: CacheWriteOptions,
        generate: F,
    ) -> Result<CacheLookup<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(CacheLookup {
                value: hit.value,
                tier: Some(hit.tier),
            });
        }
        let value = generate().await?;
        if let Err(err) = self.set(key, value.clone(), options).await {
            tracing::warn!(key, error = %err, "generated value not cached");
        }
        Ok(CacheLookup { value, tier: None })
    }

    /// Remove a key from every tier
    pub async fn invalidate(&self, key: &str) {
        self.inner.memory.remove(key).await;
        for remote in &self.inner.remotes {
            if let Err(err) = remote.delete(key).await {
                self.inner.counters.record_tier_error();
                tracing::warn!(key, tier = %remote.tier, error = %err, "tier delete failed");
            }
        }
        self.inner.index.forget(key);
    }

    /// Remove every key carrying a tag, returning how many were removed
    pub async fn invalidate_tag(&self, tag: &str) -> usize {
        let keys = self.inner.index.keys_for_tag(tag);
        for key in &keys {
            self.invalidate(key).await;
        }
        tracing::debug!(tag, removed = keys.len(), "tag invalidated");
        keys.len()
    }

    /// Apply an invalidation trigger, returning how many keys were removed
    pub async fn apply_trigger(&self, trigger: InvalidationTrigger) -> usize {
        match trigger {
            InvalidationTrigger::UserActivity { user_id } => {
                self.invalidate_tag(&user_tag(&user_id)).await
            }
            InvalidationTrigger::ContentUpdate { item_ids } => {
                let mut removed = 0;
                for id in &item_ids {
                    removed += self.invalidate_tag(&item_tag(id)).await;
                }
                removed
            }
            InvalidationTrigger::TimeBased { max_age } => {
                let cutoff = Utc::now() - delta(max_age);
                let keys = self.inner.index.keys_created_before(cutoff);
                for key in &keys {
                    self.invalidate(key).await;
                }
                keys.len()
            }
        }
    }

    /// Run memory-tier maintenance and drop expired records everywhere
    ///
    /// Returns the number of expired index records removed.
    pub async fn cleanup(&self) -> usize {
        self.inner.memory.run_pending_tasks().await;
        for remote in &self.inner.remotes {
            match remote.purge_expired().await {
                Ok(purged) if purged > 0 => {
                    tracing::debug!(tier = %remote.tier, purged, "expired entries purged");
                }
                Ok(_) => {}
                Err(err) => {
                    self.inner.counters.record_tier_error();
                    tracing::warn!(tier = %remote.tier, error = %err, "purge failed");
                }
            }
        }
        // moka only drops short per-entry expiries when its timer wheel ticks
        let purged = self.inner.index.purge_expired(Utc::now());
        for key in &purged {
            self.inner.memory.remove(key).await;
        }
        if !purged.is_empty() {
            self.inner.memory.run_pending_tasks().await;
        }
        purged.len()
    }

    /// Current metrics
    #[must_use]
    pub fn metrics(&self) -> CacheMetrics {
        let memory = &self.inner.memory;
        self.inner.counters.snapshot(
            memory.entry_count(),
            memory.weighted_size(),
            memory.evictions(),
            memory.expirations(),
        )
    }

    /// Wait for background backfills started so far
    pub async fn flush_backfills(&self) {
        let tracker = &self.inner.backfills;
        tracker.close();
        tracker.wait().await;
        tracker.reopen();
    }

    /// Wait for background backfills and stop accepting new ones
    pub async fn shutdown(&self) {
        let tracker = &self.inner.backfills;
        tracker.close();
        tracker.wait().await;
        self.inner.memory.run_pending_tasks().await;
        tracing::debug!("tiered cache shut down");
    }
}
