//! Cache configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CacheError;
use crate::warming::WarmingLimits;

/// Memory-tier eviction policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicyKind {
    /// Least recently used
    #[default]
    Lru,
    /// Frequency-aware admission with LRU eviction
    TinyLfu,
}

/// How a lower-tier hit repopulates faster tiers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillMode {
    /// Backfill completes before the hit is returned
    #[default]
    Inline,
    /// Backfill runs as a tracked background task
    Background,
}

/// Settings for one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Whether the tier participates
    pub enabled: bool,
    /// Default entry lifetime in seconds
    pub ttl_secs: u64,
    /// Entry bound (memory tier)
    pub max_entries: u64,
    /// Byte bound (memory tier); replaces the entry bound when set
    #[serde(default)]
    pub max_bytes: Option<u64>,
    /// Eviction policy (memory tier)
    #[serde(default)]
    pub eviction_policy: EvictionPolicyKind,
    /// Per-call timeout in milliseconds (remote tiers)
    pub timeout_ms: u64,
}

impl TierConfig {
    /// Memory tier defaults: 5 minutes, 10k entries
    #[must_use]
    pub fn memory() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            max_entries: 10_000,
            max_bytes: None,
            eviction_policy: EvictionPolicyKind::Lru,
            timeout_ms: 0,
        }
    }

    /// Distributed tier defaults: 1 hour, 50ms calls
    #[must_use]
    pub fn distributed() -> Self {
        Self {
            ttl_secs: 3_600,
            timeout_ms: 50,
            ..Self::memory()
        }
    }

    /// Persisted tier defaults: 24 hours, 200ms calls
    #[must_use]
    pub fn persisted() -> Self {
        Self {
            ttl_secs: 86_400,
            timeout_ms: 200,
            ..Self::memory()
        }
    }

    /// Default entry lifetime
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Per-call timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Set the default lifetime
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = ttl.as_secs().max(1);
        self
    }

    /// Bound by entry count
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: u64) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Bound by approximate bytes
    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// Set the remote call timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// Scheduled warming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmingConfig {
    /// Run warming on a schedule
    pub enabled: bool,
    /// Seconds between runs
    pub interval_secs: u64,
    /// Concurrent loads
    pub max_concurrency: usize,
    /// Wall-clock budget per run in milliseconds
    pub max_duration_ms: u64,
    /// Byte budget per run
    pub max_bytes: u64,
}

impl Default for WarmingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 900,
            max_concurrency: 4,
            max_duration_ms: 30_000,
            max_bytes: 16 * 1024 * 1024,
        }
    }
}

impl WarmingConfig {
    /// Limits for one run
    #[must_use]
    pub fn limits(&self) -> WarmingLimits {
        WarmingLimits {
            max_concurrency: self.max_concurrency,
            max_duration: Duration::from_millis(self.max_duration_ms),
            max_bytes: self.max_bytes,
        }
    }

    /// Interval between runs
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Settings for the whole tier chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// In-process tier
    #[serde(default = "TierConfig::memory")]
    pub memory: TierConfig,
    /// Shared network tier
    #[serde(default = "TierConfig::distributed")]
    pub distributed: TierConfig,
    /// Durable tier
    #[serde(default = "TierConfig::persisted")]
    pub persisted: TierConfig,
    /// Backfill behaviour
    #[serde(default)]
    pub backfill: BackfillMode,
    /// Scheduled warming
    #[serde(default)]
    pub warming: WarmingConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory: TierConfig::memory(),
            distributed: TierConfig::distributed(),
            persisted: TierConfig::persisted(),
            backfill: BackfillMode::Inline,
            warming: WarmingConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Set the memory tier
    #[must_use]
    pub fn with_memory(mut self, memory: TierConfig) -> Self {
        self.memory = memory;
        self
    }

    /// Set the backfill mode
    #[must_use]
    pub fn with_backfill(mut self, mode: BackfillMode) -> Self {
        self.backfill = mode;
        self
    }

    /// Reject unusable settings
    pub fn validate(&self) -> Result<(), CacheError> {
        if !self.memory.enabled {
            return Err(CacheError::InvalidConfig("memory tier cannot be disabled".into()));
        }
        if self.memory.max_entries == 0 && self.memory.max_bytes.is_none() {
            return Err(CacheError::InvalidConfig("memory tier needs a size bound".into()));
        }
        for (name, tier) in [
            ("memory", &self.memory),
            ("distributed", &self.distributed),
            ("persisted", &self.persisted),
        ] {
            if tier.enabled && tier.ttl_secs == 0 {
                return Err(CacheError::InvalidConfig(format!("{name} ttl must be positive")));
            }
        }
        for (name, tier) in [("distributed", &self.distributed), ("persisted", &self.persisted)] {
            if tier.enabled && tier.timeout_ms == 0 {
                return Err(CacheError::InvalidConfig(format!(
                    "{name} timeout must be positive"
                )));
            }
        }
        if self.warming.max_concurrency == 0 {
            return Err(CacheError::InvalidConfig(
                "warming concurrency must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_and_ordered() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.memory.ttl() < config.distributed.ttl());
        assert!(config.distributed.ttl() < config.persisted.ttl());
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut config = CacheConfig::default();
        config.distributed.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"backfill":"background","memory":{"enabled":true,"ttl_secs":60,"max_entries":5,"timeout_ms":0}}"#)
                .unwrap();
        assert_eq!(config.backfill, BackfillMode::Background);
        assert_eq!(config.memory.max_entries, 5);
        assert_eq!(config.persisted, TierConfig::persisted());
    }
}
