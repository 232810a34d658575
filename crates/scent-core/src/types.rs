//! Request and response records of the recommendation path

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use scent_bandit::{Algorithm, BanditReport, DecisionContext};
use scent_cache::{CacheMetrics, Tier};
use scent_cost::{CostAnomaly, DegradeReason, GenerationPath, OperationMetrics, Quality, TokenUsage};
use scent_health::HealthStatus;
use scent_profile::FragranceItem;
use serde::{Deserialize, Serialize};

/// Options for one recommendation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationOptions {
    /// Items to return; the configured default when absent
    pub limit: Option<usize>,
    /// Bandit decision scope
    pub context: DecisionContext,
    /// Requesting user; results are cached per user when set
    pub user_id: Option<String>,
    /// Serve with this algorithm instead of asking the bandit
    pub algorithm: Option<Algorithm>,
    /// Attach explanations to items
    pub explain: bool,
    /// Explanation quality; the configured default when absent
    pub quality: Option<Quality>,
    /// Items never returned
    pub exclude_item_ids: Vec<String>,
}

impl Default for RecommendationOptions {
    fn default() -> Self {
        Self {
            limit: None,
            context: DecisionContext::Global,
            user_id: None,
            algorithm: None,
            explain: true,
            quality: None,
            exclude_item_ids: Vec::new(),
        }
    }
}

impl RecommendationOptions {
    /// Default options
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a result limit
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// With a decision context
    #[must_use]
    pub fn with_context(mut self, context: DecisionContext) -> Self {
        self.context = context;
        self
    }

    /// For a known user
    #[must_use]
    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Force an algorithm
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    /// With an explanation quality
    #[must_use]
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Skip explanations
    #[must_use]
    pub fn without_explanations(mut self) -> Self {
        self.explain = false;
        self
    }

    /// Exclude items, e.g. ones the user already owns
    #[must_use]
    pub fn excluding<S: Into<String>>(mut self, item_ids: impl IntoIterator<Item = S>) -> Self {
        self.exclude_item_ids.extend(item_ids.into_iter().map(Into::into));
        self
    }
}

/// One recommended catalog item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedItem {
    /// Catalog record
    pub item: FragranceItem,
    /// Ranking score in `[0, 1]`
    pub score: f64,
    /// Algorithm that ranked it
    pub algorithm: Algorithm,
    /// Why it was recommended
    pub explanation: Option<String>,
    /// How the explanation was produced
    pub explanation_path: Option<GenerationPath>,
}

/// Why a response is lower fidelity than requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// Similar profiles could not be fetched; served content-based
    NeighboursUnavailable,
    /// No similar profiles matched; served content-based
    NoNeighbours,
    /// Explanations did not finish before the request deadline
    ExplanationsTimedOut,
    /// An explanation fell back to a template
    Generation {
        /// Fallback cause
        reason: DegradeReason,
    },
}

impl Degradation {
    /// Caused by a passing condition; such responses are not cached
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::NoNeighbours)
    }
}

/// Timing and cost of one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceInfo {
    /// Algorithm the bandit (or caller) chose
    pub requested_algorithm: Algorithm,
    /// Algorithm that ranked the items
    pub algorithm: Algorithm,
    /// End-to-end latency
    pub total_ms: f64,
    /// Catalog items scored
    pub candidates: usize,
    /// Similar profiles used
    pub neighbours: usize,
    /// Explanations from AI providers
    pub ai_explanations: usize,
    /// Explanations from templates
    pub template_explanations: usize,
    /// Generation spend of this request
    pub generation_cost_usd: Decimal,
    /// Fidelity losses, deduplicated
    pub degradations: Vec<Degradation>,
}

/// Cache details of one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachingInfo {
    /// Recommendation cache key
    pub key: String,
    /// Served from cache
    pub cache_hit: bool,
    /// Serving tier on a hit
    pub tier: Option<Tier>,
    /// Response written to the cache
    pub stored: bool,
}

/// Result of [`crate::RecommendationEngine::get_recommendations`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationResponse {
    /// Ranked items, best first
    pub items: Vec<RecommendedItem>,
    /// Timing and cost
    pub performance: PerformanceInfo,
    /// Cache details
    pub caching: CachingInfo,
}

/// Values held by the engine's tiered cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CachedValue {
    /// Ranked recommendations
    Recommendations {
        /// Algorithm that ranked them
        algorithm: Algorithm,
        /// Items
        items: Vec<RecommendedItem>,
    },
    /// Generated explanation text
    Explanation {
        /// Text
        text: String,
        /// How it was produced
        path: GenerationPath,
    },
    /// Catalog candidate page
    Catalog(Vec<FragranceItem>),
}

/// Request path counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSummary {
    /// Requests served or failed
    pub total: u64,
    /// Requests that returned an error
    pub errors: u64,
    /// Requests served with lower fidelity
    pub degraded: u64,
    /// Requests in flight now
    pub in_flight: usize,
    /// Mean latency of recent requests
    pub avg_latency_ms: f64,
    /// 95th percentile latency of recent requests
    pub p95_latency_ms: f64,
}

/// Operator view across every component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    /// Report time
    pub generated_at: DateTime<Utc>,
    /// Request path
    pub requests: RequestSummary,
    /// Tiered cache
    pub cache: CacheMetrics,
    /// Global bandit context
    pub bandit: BanditReport,
    /// AI operations
    pub ai_operations: Vec<OperationMetrics>,
    /// Tokens in the last day
    pub token_usage: TokenUsage,
    /// Lifetime spend
    pub total_cost_usd: Decimal,
    /// Highest budget window utilization
    pub budget_utilization: f64,
    /// Latest cost anomaly check
    pub cost_anomaly: CostAnomaly,
    /// Latest health status, when the monitor has ticked
    pub health_status: Option<HealthStatus>,
}
