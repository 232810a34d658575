//! Scent Core - the adaptive recommendation engine
//!
//! ```text
//!  quiz responses ──► ProfileBuilder ──► Profile
//!                                           │
//!                 ThompsonSelector ◄── get_recommendations ──► TieredCache
//!                   (algorithm)             │                 (memory/distributed/persisted)
//!                                           ▼
//!                       ranking (content / collaborative / hybrid)
//!                                           │
//!                        GenerationPipeline + CostGovernor (explanations)
//!
//!  HealthMonitor ◄── CacheHealth, BanditHealth, CostHealth, EngineHealth
//!        └──recovery──► EngineRecovery (failover, cache maintenance, throttle)
//! ```
//!
//! [`RecommendationEngine`] owns one instance of each component and is shared
//! behind an `Arc`; every operation takes `&self`.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod ranking;
pub mod stats;
pub mod types;

pub use config::{EngineConfig, RecommendationConfig, SimilarityConfig};
pub use engine::{
    EngineBuilder, RecommendationEngine, CATALOG_NAMESPACE, CATALOG_TAG, EXPLANATION_NAMESPACE,
    RECOMMENDATION_NAMESPACE,
};
pub use error::EngineError;
pub use health::{BanditHealth, CacheHealth, CostHealth, EngineHealth, EngineRecovery};
pub use stats::RequestStats;
pub use types::{
    CachedValue, CachingInfo, Degradation, PerformanceInfo, PerformanceReport,
    RecommendationOptions, RecommendationResponse, RecommendedItem, RequestSummary,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;
    use rust_decimal_macros::dec;
    use scent_bandit::{Algorithm, BanditConfig};
    use scent_cost::{GenerationPath, Quality};
    use scent_test_utils::{quiz, sample_content_store, sample_profile_store, ScriptedProvider};
    use std::sync::Arc;

    fn engine_with(provider: Arc<ScriptedProvider>) -> RecommendationEngine {
        EngineBuilder::new(EngineConfig::new().with_bandit(BanditConfig::default().with_seed(3)))
            .with_content_store(Arc::new(sample_content_store()))
            .with_profile_store(Arc::new(sample_profile_store()))
            .with_provider(provider)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn premium_explanations_are_billed_and_reused() {
        let provider = Arc::new(ScriptedProvider::new("standard", 100));
        let engine = engine_with(Arc::clone(&provider));
        let profile = engine.generate_profile(&quiz(&["fresh", "playful"], &[0.5, 0.5]), "s1");
        let options = RecommendationOptions::new()
            .with_algorithm(Algorithm::ContentBased)
            .with_quality(Quality::Premium);

        let first = engine
            .get_recommendations(&profile, options.clone().with_limit(2))
            .await
            .unwrap();
        assert_eq!(first.performance.ai_explanations, 2);
        assert_eq!(first.performance.generation_cost_usd, dec!(0.000036));
        assert!(first.items.iter().all(|i| matches!(
            &i.explanation_path,
            Some(GenerationPath::Ai { provider }) if provider == "standard"
        )));
        assert_eq!(provider.calls(), 2);

        let second = engine
            .get_recommendations(&profile, options.with_limit(3))
            .await
            .unwrap();
        assert!(!second.caching.cache_hit);
        assert_eq!(second.performance.ai_explanations, 3);
        assert_eq!(second.performance.generation_cost_usd, dec!(0.000018));
        assert_eq!(provider.calls(), 3);
        assert_eq!(engine.cost_governor().total_cost(), dec!(0.000054));
    }

    #[tokio::test]
    async fn failing_provider_degrades_to_templates() {
        let provider = Arc::new(ScriptedProvider::new("standard", 100).then_fail());
        let engine = engine_with(Arc::clone(&provider));
        let profile = engine.generate_profile(&quiz(&["calm"], &[1.0]), "s1");

        let response = engine
            .get_recommendations(
                &profile,
                RecommendationOptions::new()
                    .with_algorithm(Algorithm::ContentBased)
                    .with_quality(Quality::Premium)
                    .with_limit(1),
            )
            .await
            .unwrap();

        assert_eq!(response.performance.template_explanations, 1);
        assert!(!response.caching.stored);
        assert!(matches!(
            response.performance.degradations.as_slice(),
            [Degradation::Generation { .. }]
        ));
        assert_eq!(engine.performance_report().requests.degraded, 1);
    }
}
