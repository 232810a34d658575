//! Error types for the recommendation engine
//!
//! Component errors fold into one taxonomy. Most variants never reach a
//! caller of [`crate::RecommendationEngine::get_recommendations`]: they are
//! logged, counted and degraded. What does reach callers:
//! - the catalog is unreachable and nothing is cached
//! - the request was cancelled
//! - configuration or construction failed

use rust_decimal::Decimal;
use scent_bandit::BanditError;
use scent_cache::CacheError;
use scent_cost::{CostError, ProviderError, Window};
use scent_health::HealthError;
use scent_profile::{ProfileError, SimilarityError, StoreError};

/// Main engine error type
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Malformed or empty input
    #[error("validation failed: {0}")]
    Validation(String),

    /// AI provider call failed
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Spend would cross a budget ceiling
    #[error("{window} budget exceeded: projected ${projected} over ceiling ${ceiling}")]
    BudgetExceeded {
        /// Window whose ceiling was crossed
        window: Window,
        /// Configured ceiling
        ceiling: Decimal,
        /// Spend including the request
        projected: Decimal,
    },

    /// A cache tier could not be used
    #[error("cache unavailable: {0}")]
    CacheUnavailable(#[from] CacheError),

    /// Bandit state was unusable
    #[error("bandit state corrupted: {0}")]
    BanditStateCorruption(String),

    /// Composite health fell below the critical threshold
    #[error("health critical: score {score:.2}")]
    HealthCritical {
        /// Composite score
        score: f64,
    },

    /// Profile or catalog store failed
    #[error("store error: {0}")]
    Store(StoreError),

    /// External call exceeded its deadline
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Deadline that passed
        timeout_ms: u64,
    },

    /// Caller cancelled the request
    #[error("request cancelled")]
    Cancelled,

    /// Configuration is unusable
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the engine degrades this error instead of returning it
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Store(_) | Self::Cancelled | Self::Config(_))
    }

    /// Timeout for a named operation
    #[must_use]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout(timeout_ms) => Self::timeout("store", timeout_ms),
            other => Self::Store(other),
        }
    }
}

impl From<SimilarityError> for EngineError {
    fn from(err: SimilarityError) -> Self {
        match err {
            SimilarityError::Store(store) => store.into(),
            SimilarityError::InvalidOptions(msg) => Self::Validation(msg),
        }
    }
}

impl From<ProfileError> for EngineError {
    fn from(err: ProfileError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<CostError> for EngineError {
    fn from(err: CostError) -> Self {
        match err {
            CostError::BudgetExceeded {
                window,
                ceiling,
                projected,
            } => Self::BudgetExceeded {
                window,
                ceiling,
                projected,
            },
            CostError::InvalidConfig(msg) => Self::Config(msg),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<BanditError> for EngineError {
    fn from(err: BanditError) -> Self {
        match err {
            BanditError::InvalidConfig(msg) => Self::Config(msg),
            other => Self::BanditStateCorruption(other.to_string()),
        }
    }
}

impl From<HealthError> for EngineError {
    fn from(err: HealthError) -> Self {
        Self::Config(err.to_string())
    }
}
