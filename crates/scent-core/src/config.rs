//! Engine configuration
//!
//! One structured record covering every component. Loaded from TOML with
//! every section optional; durations are integer milliseconds or seconds.
//!
//! ```toml
//! [recommendation]
//! default_limit = 12
//! max_concurrent_generations = 4
//!
//! [cost.budget]
//! daily = "25.00"
//!
//! [cache.memory]
//! enabled = true
//! ttl_secs = 120
//! max_entries = 5000
//! timeout_ms = 0
//! ```

use scent_bandit::BanditConfig;
use scent_cache::CacheConfig;
use scent_cost::{CostConfig, Quality};
use scent_health::HealthConfig;
use scent_profile::{ProfileConfig, SimilarityOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::EngineError;

/// Similar-profile search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Minimum similarity for a neighbour
    pub similarity_threshold: f64,
    /// Neighbours returned per search
    pub limit: usize,
    /// Profile store fetch timeout in milliseconds
    pub fetch_timeout_ms: u64,
    /// Candidates fetched per search
    pub candidate_pool: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            limit: 10,
            fetch_timeout_ms: 150,
            candidate_pool: 200,
        }
    }
}

impl SimilarityConfig {
    /// Default search options
    #[inline]
    #[must_use]
    pub fn options(&self) -> SimilarityOptions {
        SimilarityOptions {
            similarity_threshold: self.similarity_threshold,
            limit: self.limit,
        }
    }

    /// Fetch timeout
    #[inline]
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Request path settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    /// Items returned when the caller sets no limit
    pub default_limit: usize,
    /// AI generations allowed in flight
    pub max_concurrent_generations: usize,
    /// Requests in flight above which generation is template-only
    pub max_queue_depth: usize,
    /// Deadline for one request in milliseconds
    pub request_timeout_ms: u64,
    /// Content-based share of the hybrid score
    pub hybrid_content_weight: f64,
    /// Lifetime of cached recommendations in seconds
    pub cache_ttl_secs: u64,
    /// Catalog items considered per request
    pub catalog_limit: usize,
    /// Catalog fetch timeout in milliseconds
    pub store_timeout_ms: u64,
    /// Quality requested for explanations by default
    pub explanation_quality: Quality,
    /// Token estimate for one explanation
    pub explanation_tokens: u64,
    /// Trait sets whose recommendations are warmed ahead of demand
    pub warm_profiles: Vec<Vec<String>>,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_concurrent_generations: 8,
            max_queue_depth: 64,
            request_timeout_ms: 2_000,
            hybrid_content_weight: 0.6,
            cache_ttl_secs: 600,
            catalog_limit: 500,
            store_timeout_ms: 150,
            explanation_quality: Quality::Standard,
            explanation_tokens: 300,
            warm_profiles: vec![
                vec!["sophisticated".into(), "confident".into()],
                vec!["fresh".into(), "energetic".into()],
                vec!["romantic".into(), "elegant".into()],
                vec!["calm".into(), "natural".into()],
            ],
        }
    }
}

impl RecommendationConfig {
    /// Request deadline
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Cached recommendation lifetime
    #[inline]
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Catalog fetch timeout
    #[inline]
    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Profile builder
    pub profile: ProfileConfig,
    /// Similar-profile search
    pub similarity: SimilarityConfig,
    /// Bandit selector
    pub bandit: BanditConfig,
    /// Tiered cache
    pub cache: CacheConfig,
    /// Cost governance
    pub cost: CostConfig,
    /// Health monitor
    pub health: HealthConfig,
    /// Request path
    pub recommendation: RecommendationConfig,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a bandit configuration
    #[must_use]
    pub fn with_bandit(mut self, bandit: BanditConfig) -> Self {
        self.bandit = bandit;
        self
    }

    /// With a cache configuration
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// With a cost configuration
    #[must_use]
    pub fn with_cost(mut self, cost: CostConfig) -> Self {
        self.cost = cost;
        self
    }

    /// With a health configuration
    #[must_use]
    pub fn with_health(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    /// With request path settings
    #[must_use]
    pub fn with_recommendation(mut self, recommendation: RecommendationConfig) -> Self {
        self.recommendation = recommendation;
        self
    }

    /// Parse and validate TOML
    pub fn from_toml_str(source: &str) -> Result<Self, EngineError> {
        let config: Self =
            toml::from_str(source).map_err(|err| EngineError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|err| EngineError::Config(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<(), EngineError> {
        let profile = &self.profile;
        if !(profile.primary_ratio > 0.0 && profile.primary_ratio <= 1.0) {
            return Err(EngineError::Config("profile.primary_ratio must be in (0, 1]".into()));
        }
        if profile.max_primary == 0 {
            return Err(EngineError::Config("profile.max_primary must be positive".into()));
        }
        if !(0.0..=1.0).contains(&profile.consistency_weight) {
            return Err(EngineError::Config(
                "profile.consistency_weight must be in [0, 1]".into(),
            ));
        }

        let similarity = &self.similarity;
        if !(0.0..=1.0).contains(&similarity.similarity_threshold) {
            return Err(EngineError::Config(
                "similarity.similarity_threshold must be in [0, 1]".into(),
            ));
        }
        if similarity.fetch_timeout_ms == 0 {
            return Err(EngineError::Config("similarity.fetch_timeout_ms must be positive".into()));
        }

        self.bandit.validate()?;
        self.cache
            .validate()
            .map_err(|err| EngineError::Config(err.to_string()))?;
        self.cost.validate()?;
        self.health.validate()?;

        let rec = &self.recommendation;
        for (name, value) in [
            ("default_limit", rec.default_limit),
            ("max_concurrent_generations", rec.max_concurrent_generations),
            ("max_queue_depth", rec.max_queue_depth),
            ("catalog_limit", rec.catalog_limit),
        ] {
            if value == 0 {
                return Err(EngineError::Config(format!(
                    "recommendation.{name} must be positive"
                )));
            }
        }
        if rec.request_timeout_ms == 0 || rec.store_timeout_ms == 0 || rec.cache_ttl_secs == 0 {
            return Err(EngineError::Config(
                "recommendation timeouts and ttl must be positive".into(),
            ));
        }
        if rec.store_timeout_ms > rec.request_timeout_ms {
            return Err(EngineError::Config(
                "recommendation.store_timeout_ms exceeds the request timeout".into(),
            ));
        }
        if !(0.0..=1.0).contains(&rec.hybrid_content_weight) {
            return Err(EngineError::Config(
                "recommendation.hybrid_content_weight must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [recommendation]
            default_limit = 12
            hybrid_content_weight = 0.5

            [cost.budget]
            daily = "25.00"

            [bandit]
            seed = 7
            "#,
        )
        .unwrap();

        assert_eq!(config.recommendation.default_limit, 12);
        assert_eq!(config.recommendation.hybrid_content_weight, 0.5);
        assert_eq!(config.recommendation.max_queue_depth, 64);
        assert_eq!(config.cost.budget.daily, Some(dec!(25.00)));
        assert_eq!(config.bandit.seed, Some(7));
        assert_eq!(config.similarity.limit, 10);
    }

    #[test]
    fn inconsistent_values_rejected() {
        let err = EngineConfig::from_toml_str(
            r#"
            [recommendation]
            hybrid_content_weight = 1.5
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));

        let mut config = EngineConfig::default();
        config.recommendation.store_timeout_ms = 5_000;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.bandit.arms.clear();
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = EngineConfig::from_toml_str("[recommendation\n").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn load_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "[similarity]\nlimit = 3\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.similarity.limit, 3);

        let missing = EngineConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(missing.to_string().contains("missing.toml"));
    }
}
