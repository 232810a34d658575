//! Error types for the tiered cache

use crate::Tier;

/// Cache errors
///
/// Tier failures never reach callers of [`crate::TieredCache::get`]; the tier
/// is skipped and the error counted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    /// Tier backend failed or refused the call
    #[error("{tier} tier unavailable: {reason}")]
    Unavailable {
        /// Failing tier
        tier: Tier,
        /// Backend message
        reason: String,
    },

    /// Tier call exceeded its timeout
    #[error("{tier} tier timed out after {timeout_ms}ms")]
    Timeout {
        /// Slow tier
        tier: Tier,
        /// Configured timeout
        timeout_ms: u64,
    },

    /// Value could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Configuration is unusable
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),
}

impl CacheError {
    /// Backend failure for a tier
    #[must_use]
    pub fn unavailable(tier: Tier, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            tier,
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_tier() {
        let err = CacheError::Timeout {
            tier: Tier::Distributed,
            timeout_ms: 50,
        };
        assert_eq!(err.to_string(), "distributed tier timed out after 50ms");
        let err = CacheError::unavailable(Tier::Persisted, "connection refused");
        assert_eq!(err.to_string(), "persisted tier unavailable: connection refused");
    }
}
