//! Functional tests for the quiz → profile → recommendation path.
//!
//! Guarantees exercised here:
//! - A quiz produces a profile whose dominant traits drive the ranking.
//! - Repeated requests are served from the cache; personal entries are
//!   dropped on user activity and catalog-derived entries on content updates.
//! - Store outages degrade to content-based ranking instead of failing,
//!   unless nothing at all can be served.
//! - A spent budget turns explanations into zero-cost templates.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use scent_bandit::{Algorithm, BanditConfig};
use scent_cache::Tier;
use scent_core::{
    Degradation, EngineBuilder, EngineConfig, EngineError, RecommendationEngine,
    RecommendationOptions,
};
use scent_cost::{BudgetConfig, CostConfig, DegradeReason, GenerationPath, Quality};
use scent_profile::StoreError;
use scent_test_utils::{
    quiz, sample_content_store, sample_profile_store, stored_profile, DownStore, ScriptedProvider,
};
use std::sync::Arc;

fn config() -> EngineConfig {
    EngineConfig::new().with_bandit(BanditConfig::default().with_seed(42))
}

fn engine() -> RecommendationEngine {
    EngineBuilder::new(config())
        .with_content_store(Arc::new(sample_content_store()))
        .with_profile_store(Arc::new(sample_profile_store()))
        .build()
        .unwrap()
}

/// A sophisticated/confident quiz leads to the matching fragrances.
#[tokio::test]
async fn quiz_answers_drive_the_ranking() {
    let engine = engine();
    let profile = engine.generate_profile(&quiz(&["sophisticated", "confident"], &[0.6, 0.4]), "s1");
    assert_eq!(profile.lead_trait(), "sophisticated");

    let response = engine
        .get_recommendations(&profile, RecommendationOptions::new())
        .await
        .unwrap();

    assert!(!response.items.is_empty());
    assert!(response.items.len() <= 10);
    assert!(response
        .items
        .windows(2)
        .all(|pair| pair[0].score >= pair[1].score));
    assert!(response.items.iter().all(|i| i.explanation.is_some()));
    assert!(config().bandit.arms.contains(&response.performance.requested_algorithm));
    assert_eq!(response.performance.generation_cost_usd, Decimal::ZERO);
    assert!(response.performance.total_ms >= 0.0);

    let content = engine
        .get_recommendations(
            &profile,
            RecommendationOptions::new()
                .with_algorithm(Algorithm::ContentBased)
                .with_limit(1),
        )
        .await
        .unwrap();
    assert_eq!(content.items[0].item.id, "noir-01");
}

/// Hybrid ranking uses stored neighbours' favourites.
#[tokio::test]
async fn hybrid_blends_in_neighbours() {
    let engine = engine();
    let profile = engine.generate_profile(&quiz(&["sophisticated", "confident"], &[0.6, 0.4]), "s1");

    let response = engine
        .get_recommendations(
            &profile,
            RecommendationOptions::new()
                .with_algorithm(Algorithm::Hybrid)
                .with_limit(3),
        )
        .await
        .unwrap();

    assert_eq!(response.performance.algorithm, Algorithm::Hybrid);
    assert!(response.performance.neighbours >= 1);
    assert!(response.performance.degradations.is_empty());
    let top: Vec<&str> = response.items.iter().take(2).map(|i| i.item.id.as_str()).collect();
    assert!(top.contains(&"noir-01"));
    assert!(top.contains(&"rose-03"));
}

/// The second identical request is a memory-tier hit with identical items.
#[tokio::test]
async fn repeat_request_is_served_from_cache() {
    let engine = engine();
    let profile = engine.generate_profile(&quiz(&["fresh", "energetic"], &[0.5, 0.5]), "s1");
    let options = RecommendationOptions::new().with_algorithm(Algorithm::ContentBased);

    let first = engine.get_recommendations(&profile, options.clone()).await.unwrap();
    assert!(!first.caching.cache_hit);
    assert!(first.caching.stored);

    let second = engine.get_recommendations(&profile, options).await.unwrap();
    assert!(second.caching.cache_hit);
    assert_eq!(second.caching.tier, Some(Tier::Memory));
    assert_eq!(second.caching.key, first.caching.key);
    assert_eq!(second.items, first.items);
    assert!(engine.cache_metrics().hits >= 1);
}

/// User activity drops that user's entries and leaves others alone.
#[tokio::test]
async fn user_activity_invalidates_personal_entries() {
    let engine = engine();
    let profile = engine.generate_profile(&quiz(&["calm", "natural"], &[0.5, 0.5]), "s1");
    let base = RecommendationOptions::new().with_algorithm(Algorithm::ContentBased);

    engine
        .get_recommendations(&profile, base.clone().for_user("ava"))
        .await
        .unwrap();
    engine
        .get_recommendations(&profile, base.clone().for_user("ben"))
        .await
        .unwrap();

    assert!(engine.record_user_activity("ava").await >= 1);

    let ava = engine
        .get_recommendations(&profile, base.clone().for_user("ava"))
        .await
        .unwrap();
    let ben = engine
        .get_recommendations(&profile, base.for_user("ben"))
        .await
        .unwrap();
    assert!(!ava.caching.cache_hit);
    assert!(ben.caching.cache_hit);
}

/// A content update rebuilds every list derived from the catalog.
#[tokio::test]
async fn content_update_drops_catalog_derived_entries() {
    let engine = engine();
    let profile = engine.generate_profile(&quiz(&["romantic"], &[1.0]), "s1");
    let options = RecommendationOptions::new().with_algorithm(Algorithm::ContentBased);

    engine.get_recommendations(&profile, options.clone()).await.unwrap();
    let removed = engine
        .notify_content_update(vec!["rose-03".to_string()])
        .await;
    assert!(removed >= 2);

    let after = engine.get_recommendations(&profile, options).await.unwrap();
    assert!(!after.caching.cache_hit);
}

/// Saving a profile makes it a neighbour and clears the user's entries.
#[tokio::test]
async fn stored_profiles_become_neighbours() {
    let engine = EngineBuilder::new(config())
        .with_content_store(Arc::new(sample_content_store()))
        .build()
        .unwrap();
    let responses = quiz(&["fresh", "playful"], &[0.5, 0.5]);
    let profile = engine.generate_profile(&responses, "s1");
    let options = RecommendationOptions::new().with_algorithm(Algorithm::Collaborative);

    let cold = engine.get_recommendations(&profile, options.clone()).await.unwrap();
    assert_eq!(cold.performance.degradations, vec![Degradation::NoNeighbours]);

    engine
        .generate_and_store_profile(&responses, "s2", "p-dee", Some("dee"), vec!["aqua-06".into()])
        .await
        .unwrap();
    let similar = engine
        .find_similar_profiles(&profile, config().similarity.options())
        .await
        .unwrap();
    assert_eq!(similar.len(), 1);
    assert!(similar[0].similarity > 0.99);

    let warm = engine
        .get_recommendations(&profile, options.with_limit(1).for_user("eve"))
        .await
        .unwrap();
    assert_eq!(warm.performance.algorithm, Algorithm::Collaborative);
    assert_eq!(warm.items[0].item.id, "aqua-06");
}

/// A profile store outage serves content-based results and skips the cache.
#[tokio::test]
async fn profile_store_outage_degrades_to_content_based() {
    let engine = EngineBuilder::new(config())
        .with_content_store(Arc::new(sample_content_store()))
        .with_profile_store(Arc::new(DownStore))
        .build()
        .unwrap();
    let profile = engine.generate_profile(&quiz(&["bold"], &[1.0]), "s1");

    let response = engine
        .get_recommendations(
            &profile,
            RecommendationOptions::new().with_algorithm(Algorithm::Hybrid),
        )
        .await
        .unwrap();

    assert_eq!(response.performance.requested_algorithm, Algorithm::Hybrid);
    assert_eq!(response.performance.algorithm, Algorithm::ContentBased);
    assert_eq!(
        response.performance.degradations,
        vec![Degradation::NeighboursUnavailable]
    );
    assert!(!response.caching.stored);
    assert!(!response.items.is_empty());

    let err = engine
        .save_profile(stored_profile("p1", "u1", &["bold"], &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));
}

/// Without a catalog there is nothing to serve, so the request fails.
#[tokio::test]
async fn catalog_outage_without_cache_is_an_error() {
    let engine = EngineBuilder::new(config())
        .with_content_store(Arc::new(DownStore))
        .build()
        .unwrap();
    let profile = engine.generate_profile(&quiz(&["bold"], &[1.0]), "s1");

    let err = engine
        .get_recommendations(&profile, RecommendationOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Store(StoreError::Unavailable(_))));
    assert!(!err.is_recoverable());
    assert_eq!(engine.performance_report().requests.errors, 1);
}

/// Once the daily ceiling is reached explanations are templates at zero cost.
#[tokio::test]
async fn spent_budget_serves_template_explanations() {
    let provider = Arc::new(ScriptedProvider::new("standard", 100));
    let config = config().with_cost(
        CostConfig::default().with_budget(BudgetConfig::default().with_daily(dec!(0.00001))),
    );
    let engine = EngineBuilder::new(config)
        .with_content_store(Arc::new(sample_content_store()))
        .with_provider(Arc::clone(&provider) as Arc<dyn scent_cost::AiProvider>)
        .build()
        .unwrap();
    let profile = engine.generate_profile(&quiz(&["warm"], &[1.0]), "s1");

    let response = engine
        .get_recommendations(
            &profile,
            RecommendationOptions::new()
                .with_algorithm(Algorithm::ContentBased)
                .with_quality(Quality::Premium)
                .with_limit(2),
        )
        .await
        .unwrap();

    assert_eq!(response.performance.ai_explanations, 0);
    assert_eq!(response.performance.template_explanations, 2);
    assert_eq!(response.performance.generation_cost_usd, Decimal::ZERO);
    assert_eq!(
        response.performance.degradations,
        vec![Degradation::Generation {
            reason: DegradeReason::BudgetExhausted
        }]
    );
    assert!(response
        .items
        .iter()
        .all(|i| i.explanation_path == Some(GenerationPath::Template)));
    assert_eq!(provider.calls(), 0);
    assert_eq!(engine.cost_governor().total_cost(), Decimal::ZERO);
    assert!(engine.cost_governor().events().budget_exceeded >= 1);
}
