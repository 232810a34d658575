//! Cache counters and the metrics snapshot

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::Tier;

/// Point-in-time cache metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    /// Hits on any tier
    pub hits: u64,
    /// Hits served by the memory tier
    pub memory_hits: u64,
    /// Hits served by the distributed tier
    pub distributed_hits: u64,
    /// Hits served by the persisted tier
    pub persisted_hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Memory entries evicted for size
    pub evictions: u64,
    /// Memory entries removed on expiry
    pub expirations: u64,
    /// Faster-tier repopulations after a lower-tier hit
    pub backfills: u64,
    /// Remote tier failures and timeouts
    pub tier_errors: u64,
    /// Mean lookup latency in microseconds
    pub avg_retrieval_latency_us: f64,
    /// Entries in the memory tier
    pub current_size: u64,
    /// Weighted size of the memory tier (bytes when byte-bounded)
    pub weighted_size: u64,
    /// `hits / (hits + misses)`, 0 before any lookup
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    memory_hits: AtomicU64,
    distributed_hits: AtomicU64,
    persisted_hits: AtomicU64,
    misses: AtomicU64,
    backfills: AtomicU64,
    tier_errors: AtomicU64,
    lookups: AtomicU64,
    latency_us: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn record_hit(&self, tier: Tier, latency: Duration) {
        let counter = match tier {
            Tier::Memory => &self.memory_hits,
            Tier::Distributed => &self.distributed_hits,
            Tier::Persisted => &self.persisted_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.record_lookup(latency);
    }

    pub(crate) fn record_miss(&self, latency: Duration) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.record_lookup(latency);
    }

    pub(crate) fn record_backfill(&self) {
        self.backfills.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tier_error(&self) {
        self.tier_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_lookup(&self, latency: Duration) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.latency_us.fetch_add(micros, Ordering::Relaxed);
    }

    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn snapshot(
        &self,
        current_size: u64,
        weighted_size: u64,
        evictions: u64,
        expirations: u64,
    ) -> CacheMetrics {
        let memory_hits = self.memory_hits.load(Ordering::Relaxed);
        let distributed_hits = self.distributed_hits.load(Ordering::Relaxed);
        let persisted_hits = self.persisted_hits.load(Ordering::Relaxed);
        let hits = memory_hits + distributed_hits + persisted_hits;
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = self.lookups.load(Ordering::Relaxed);

        let hit_rate = if hits + misses == 0 {
            0.0
        } else {
            hits as f64 / (hits + misses) as f64
        };
        let avg_retrieval_latency_us = if lookups == 0 {
            0.0
        } else {
            self.latency_us.load(Ordering::Relaxed) as f64 / lookups as f64
        };

        CacheMetrics {
            hits,
            memory_hits,
            distributed_hits,
            persisted_hits,
            misses,
            evictions,
            expirations,
            backfills: self.backfills.load(Ordering::Relaxed),
            tier_errors: self.tier_errors.load(Ordering::Relaxed),
            avg_retrieval_latency_us,
            current_size,
            weighted_size,
            hit_rate,
        }
    }
}
