//! Scent Cache - multi-tier caching
//!
//! A generic cache over three tiers, fastest first:
//!
//! - **Memory**: moka, LRU or TinyLFU, per-entry TTL, entry or byte bound
//! - **Distributed**: a [`DistributedBackend`] shared between processes
//! - **Persisted**: a [`PersistedStore`] with the longest lifetime
//!
//! Lower-tier hits backfill faster tiers inline or as tracked background
//! tasks. Entries are indexed by tag for user, content and age-based
//! invalidation, and [`warming`] pre-populates hot keys under budgets.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod backend;
pub mod config;
pub mod error;
pub mod key;
mod memory;
pub mod metrics;
pub mod tiered;
pub mod warming;

pub use backend::{
    DistributedBackend, InMemoryDistributedBackend, InMemoryPersistedStore, PersistedStore,
};
pub use config::{BackfillMode, CacheConfig, EvictionPolicyKind, TierConfig, WarmingConfig};
pub use error::CacheError;
pub use key::{item_tag, user_tag, CacheKey};
pub use metrics::CacheMetrics;
pub use tiered::{
    CacheHit, CacheLookup, CacheWriteOptions, InvalidationTrigger, Tier, TieredCache,
    TieredCacheBuilder,
};
pub use warming::{warm, Priority, StopReason, WarmItem, WarmingLimits, WarmingPlan, WarmingReport};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
