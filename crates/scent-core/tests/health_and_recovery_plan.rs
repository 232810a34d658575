//! Functional tests for health monitoring and automated recovery.
//!
//! Guarantees exercised here:
//! - Failing providers are detected from the request path and failed over.
//! - Recovery actions the engine cannot run itself reach the injected
//!   executor.
//! - Budget pressure throttles AI generation until an operator resumes it.
//! - A steady workload keeps the cache hit rate high.
//! - Background loops start with the engine and stop on shutdown.

use rust_decimal_macros::dec;
use scent_bandit::{Algorithm, BanditConfig};
use scent_cache::{CacheConfig, WarmingConfig};
use scent_core::{
    Degradation, EngineBuilder, EngineConfig, RecommendationConfig, RecommendationOptions,
};
use scent_cost::{BudgetConfig, CostConfig, DegradeReason, GenerationPath, Quality};
use scent_health::{
    HealthConfig, HealthStatus, IssueType, MetricThreshold, RecoveryAction, RecoveryOutcome,
};
use scent_test_utils::{
    quiz, sample_content_store, sample_profile_store, DownStore, RecordingSink, ScriptedExecutor,
    ScriptedProvider,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn config_with(thresholds: Vec<MetricThreshold>) -> EngineConfig {
    EngineConfig::new()
        .with_bandit(BanditConfig::default().with_seed(9))
        .with_health(HealthConfig::default().with_thresholds(thresholds))
}

fn premium(limit: usize) -> RecommendationOptions {
    RecommendationOptions::new()
        .with_algorithm(Algorithm::ContentBased)
        .with_quality(Quality::Premium)
        .with_limit(limit)
}

/// Provider failures go critical and the primary provider is disabled.
#[tokio::test]
async fn provider_failures_trigger_failover() {
    let economy = Arc::new(ScriptedProvider::new("economy", 100).then_fail());
    let standard = Arc::new(ScriptedProvider::new("standard", 100).then_fail());
    let engine = EngineBuilder::new(config_with(vec![MetricThreshold::higher_is_worse(
        "provider_failure_rate",
        0.2,
        0.5,
    )]))
    .with_content_store(Arc::new(sample_content_store()))
    .with_provider(economy.clone())
    .with_provider(standard.clone())
    .build()
    .unwrap();

    let alerts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&alerts);
    engine.on_alert(Arc::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let profile = engine.generate_profile(&quiz(&["fresh"], &[1.0]), "s1");
    let failed = engine.get_recommendations(&profile, premium(1)).await.unwrap();
    assert_eq!(
        failed.performance.degradations,
        vec![Degradation::Generation {
            reason: DegradeReason::ProviderFailure
        }]
    );
    assert_eq!((economy.calls(), standard.calls()), (1, 1));

    let evaluation = engine.check_health().await;
    assert_eq!(evaluation.status, HealthStatus::Critical);
    assert!(evaluation.recoveries.iter().any(|r| matches!(
        r,
        RecoveryOutcome::Resolved {
            issue: IssueType::ProviderConnectivity,
            action: RecoveryAction::FailoverProvider,
            ..
        }
    )));
    assert!(alerts.load(Ordering::SeqCst) >= 1);

    let governor = engine.cost_governor();
    assert!(!governor.provider("economy").unwrap().enabled);
    assert!(governor.provider("standard").unwrap().enabled);

    let other = engine.generate_profile(&quiz(&["calm"], &[1.0]), "s2");
    let recovered = engine.get_recommendations(&other, premium(1)).await.unwrap();
    assert_eq!(
        recovered.items[0].explanation_path,
        Some(GenerationPath::Ai {
            provider: "standard".into()
        })
    );
}

/// Store errors map to index degradation, which only the executor can fix.
#[tokio::test]
async fn store_errors_reach_the_external_executor() {
    let executor = Arc::new(ScriptedExecutor::succeeding(&[RecoveryAction::RebuildIndex]));
    let engine = EngineBuilder::new(config_with(vec![MetricThreshold::higher_is_worse(
        "store_error_rate",
        0.05,
        0.2,
    )]))
    .with_content_store(Arc::new(sample_content_store()))
    .with_profile_store(Arc::new(DownStore))
    .with_recovery_executor(Arc::clone(&executor) as Arc<dyn scent_health::RecoveryExecutor>)
    .build()
    .unwrap();

    let profile = engine.generate_profile(&quiz(&["bold"], &[1.0]), "s1");
    engine
        .get_recommendations(
            &profile,
            RecommendationOptions::new().with_algorithm(Algorithm::Collaborative),
        )
        .await
        .unwrap();

    let evaluation = engine.check_health().await;
    assert_eq!(evaluation.status, HealthStatus::Critical);
    assert_eq!(
        executor.calls(),
        vec![(RecoveryAction::RebuildIndex, IssueType::IndexDegradation)]
    );
    assert_eq!(engine.health_report().recoveries.len(), 1);
}

/// Budget pressure throttles generation; resuming lifts the throttle.
#[tokio::test]
async fn budget_pressure_throttles_generation() {
    let mut config = config_with(vec![MetricThreshold::higher_is_worse(
        "budget_utilization",
        0.3,
        0.5,
    )])
    .with_cost(
        CostConfig::default().with_budget(BudgetConfig::default().with_daily(dec!(0.00003))),
    );
    config.recommendation.explanation_tokens = 100;
    let engine = EngineBuilder::new(config)
        .with_content_store(Arc::new(sample_content_store()))
        .with_provider(Arc::new(ScriptedProvider::new("standard", 100)))
        .build()
        .unwrap();

    let profile = engine.generate_profile(&quiz(&["romantic"], &[1.0]), "s1");
    let first = engine.get_recommendations(&profile, premium(1)).await.unwrap();
    assert_eq!(first.performance.ai_explanations, 1);
    assert!(engine.cost_governor().budget_utilization() > 0.5);

    let evaluation = engine.check_health().await;
    assert!(evaluation.recoveries.iter().any(|r| matches!(
        r,
        RecoveryOutcome::Resolved {
            action: RecoveryAction::ThrottleGeneration,
            ..
        }
    )));
    assert!(engine.is_generation_throttled());

    let other = engine.generate_profile(&quiz(&["elegant"], &[1.0]), "s2");
    let throttled = engine.get_recommendations(&other, premium(1)).await.unwrap();
    assert_eq!(throttled.performance.ai_explanations, 0);
    assert_eq!(
        throttled.performance.degradations,
        vec![Degradation::Generation {
            reason: DegradeReason::Backpressure
        }]
    );

    engine.resume_generation();
    assert!(!engine.is_generation_throttled());
}

/// Repeated archetype traffic keeps the hit rate at or above 0.8.
#[tokio::test]
async fn steady_traffic_keeps_hit_rate_high() {
    let config = EngineConfig::new().with_bandit(BanditConfig::default().with_seed(9));
    let engine = EngineBuilder::new(config)
        .with_content_store(Arc::new(sample_content_store()))
        .with_profile_store(Arc::new(sample_profile_store()))
        .build()
        .unwrap();
    let archetypes = [
        ["sophisticated", "confident"],
        ["fresh", "energetic"],
        ["romantic", "elegant"],
        ["calm", "natural"],
        ["bold", "playful"],
    ];
    let profiles: Vec<_> = archetypes
        .iter()
        .enumerate()
        .map(|(i, traits)| engine.generate_profile(&quiz(traits, &[0.5, 0.5]), &format!("s{i}")))
        .collect();

    for round in 0..20 {
        for profile in &profiles {
            let response = engine
                .get_recommendations(
                    profile,
                    RecommendationOptions::new()
                        .with_algorithm(Algorithm::ContentBased)
                        .without_explanations(),
                )
                .await
                .unwrap();
            assert_eq!(response.caching.cache_hit, round > 0);
        }
    }

    let metrics = engine.cache_metrics();
    assert!(metrics.hit_rate >= 0.8, "hit rate {}", metrics.hit_rate);

    let evaluation = engine.check_health().await;
    let cache = evaluation
        .components
        .iter()
        .find(|c| c.component == "cache")
        .unwrap();
    assert!(cache.metrics["hit_rate"] >= 0.8);
    assert_ne!(evaluation.status, HealthStatus::Critical);
}

/// `start` runs the monitor and warming loops; `shutdown` stops both.
#[tokio::test]
async fn background_loops_start_and_stop() {
    let sink = Arc::new(RecordingSink::default());
    let mut config = EngineConfig::new()
        .with_bandit(BanditConfig::default().with_seed(9))
        .with_health(HealthConfig::default().with_interval(Duration::from_millis(20)))
        .with_cache(CacheConfig {
            warming: WarmingConfig {
                enabled: true,
                interval_secs: 3_600,
                ..WarmingConfig::default()
            },
            ..CacheConfig::default()
        });
    config.recommendation = RecommendationConfig {
        warm_profiles: vec![vec!["sophisticated".into(), "confident".into()]],
        ..RecommendationConfig::default()
    };
    let engine = Arc::new(
        EngineBuilder::new(config)
            .with_content_store(Arc::new(sample_content_store()))
            .with_profile_store(Arc::new(sample_profile_store()))
            .with_telemetry_sink(Arc::clone(&sink) as Arc<dyn scent_health::TelemetrySink>)
            .build()
            .unwrap(),
    );

    engine.start();
    engine.start();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!sink.snapshots().is_empty());
    assert!(engine.cache().contains("catalog:s:500"));

    let archetype =
        engine.generate_profile(&quiz(&["sophisticated", "confident"], &[0.5, 0.5]), "visitor");
    let warmed = engine
        .get_recommendations(
            &archetype,
            RecommendationOptions::new().with_algorithm(Algorithm::ContentBased),
        )
        .await
        .unwrap();
    assert!(warmed.caching.cache_hit);

    engine.shutdown().await;
    let snapshots = sink.snapshots().len();
    assert!(snapshots >= 1);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(sink.snapshots().len(), snapshots);
}
