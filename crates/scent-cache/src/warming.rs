//! Cache warming under concurrency, time and memory budgets
//!
//! Items are loaded highest priority first. A run stops early when the
//! wall-clock budget is spent or the next value would exceed the byte budget.

use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::tiered::{CacheWriteOptions, TieredCache};

/// Warming priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Warmed first
    High,
    /// Warmed after high
    Medium,
    /// Warmed last
    Low,
}

/// One key to warm
#[derive(Debug, Clone, PartialEq)]
pub struct WarmItem {
    /// Cache key
    pub key: String,
    /// Priority
    pub priority: Priority,
    /// Tags applied on write
    pub tags: Vec<String>,
    /// Lifetime; tier defaults when absent
    pub ttl: Option<Duration>,
}

impl WarmItem {
    /// Item with no tags and default lifetime
    #[must_use]
    pub fn new(key: impl Into<String>, priority: Priority) -> Self {
        Self {
            key: key.into(),
            priority,
            tags: Vec::new(),
            ttl: None,
        }
    }

    /// Add tags
    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Set the lifetime
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Keys to warm in one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarmingPlan {
    items: Vec<WarmItem>,
}

impl WarmingPlan {
    /// Empty plan
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item
    #[must_use]
    pub fn with_item(mut self, item: WarmItem) -> Self {
        self.items.push(item);
        self
    }

    /// Add an item in place
    pub fn push(&mut self, item: WarmItem) {
        self.items.push(item);
    }

    /// Planned items
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Nothing planned
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items ordered by priority, insertion order within a priority
    fn ordered(mut self) -> Vec<WarmItem> {
        self.items.sort_by_key(|item| item.priority);
        self.items
    }
}

/// Budgets for one warming run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmingLimits {
    /// Loads in flight at once
    pub max_concurrency: usize,
    /// Wall-clock budget
    pub max_duration: Duration,
    /// Serialized bytes written
    pub max_bytes: u64,
}

impl Default for WarmingLimits {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_duration: Duration::from_secs(30),
            max_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every item was processed
    Completed,
    /// Wall-clock budget spent
    TimeBudget,
    /// Byte budget would be exceeded
    MemoryBudget,
}

/// Outcome of one warming run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmingReport {
    /// Items loaded and written
    pub warmed: usize,
    /// Items already in the memory tier
    pub skipped: usize,
    /// Items whose loader failed
    pub failed: usize,
    /// Items not processed because a budget ran out
    pub remaining: usize,
    /// Serialized bytes written
    pub bytes: u64,
    /// Run duration
    pub elapsed: Duration,
    /// Why the run ended
    pub stop_reason: StopReason,
}

/// Load and write the plan's keys into `cache`
///
/// Keys already in the memory tier are skipped without calling `loader`.
pub async fn warm<V, F, Fut, E>(
    cache: &TieredCache<V>,
    plan: WarmingPlan,
    loader: F,
    limits: WarmingLimits,
) -> WarmingReport
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<V, E>>,
    E: Display,
{
    let start = Instant::now();
    let deadline = start + limits.max_duration;
    let mut report = WarmingReport {
        warmed: 0,
        skipped: 0,
        failed: 0,
        remaining: 0,
        bytes: 0,
        elapsed: Duration::ZERO,
        stop_reason: StopReason::Completed,
    };

    let mut pending = Vec::new();
    for item in plan.ordered() {
        if cache.contains(&item.key) {
            report.skipped += 1;
        } else {
            pending.push(item);
        }
    }
    let total = pending.len();
    let mut processed = 0;

    let loader = &loader;
    let mut loads = stream::iter(pending)
        .map(|item| async move {
            let result = loader(item.key.clone()).await;
            (item, result)
        })
        .buffer_unordered(limits.max_concurrency.max(1));

    loop {
        let remaining_time = deadline.saturating_duration_since(Instant::now());
        let next = match tokio::time::timeout(remaining_time, loads.next()).await {
            Ok(Some(next)) => next,
            Ok(None) => break,
            Err(_) => {
                report.stop_reason = StopReason::TimeBudget;
                break;
            }
        };
        let (item, result) = next;

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                processed += 1;
                report.failed += 1;
                tracing::warn!(key = %item.key, error = %err, "warm load failed");
                continue;
            }
        };

        let size = serde_json::to_vec(&value).map_or(0, |b| b.len() as u64);
        if report.bytes + size > limits.max_bytes {
            report.stop_reason = StopReason::MemoryBudget;
            break;
        }

        let options = CacheWriteOptions {
            ttl: item.ttl,
            tags: item.tags,
            tiers: None,
        };
        processed += 1;
        match cache.set(&item.key, value, options).await {
            Ok(()) => {
                report.warmed += 1;
                report.bytes += size;
            }
            Err(err) => {
                report.failed += 1;
                tracing::warn!(key = %item.key, error = %err, "warm write failed");
            }
        }
    }

    report.remaining = total - processed;
    report.elapsed = start.elapsed();
    tracing::info!(
        warmed = report.warmed,
        skipped = report.skipped,
        failed = report.failed,
        remaining = report.remaining,
        bytes = report.bytes,
        stop = ?report.stop_reason,
        "cache warming finished"
    );
    report
}
