//! Health sources and recovery actions for the engine's components
//!
//! Each component reports through a [`HealthSource`]. Failure and hit rates
//! are computed over the interval since the previous tick, so a component
//! that recovers stops looking unhealthy.
//!
//! [`EngineRecovery`] performs the recovery actions the engine owns and
//! hands the rest to an injected executor.

use async_trait::async_trait;
use chrono::Utc;
use scent_bandit::{DecisionContext, ThompsonSelector};
use scent_cache::TieredCache;
use scent_cost::{CostGovernor, WorkloadProfile};
use scent_health::{HealthSource, IssueType, RecoveryAction, RecoveryError, RecoveryExecutor};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::stats::{RateWindow, RequestStats};
use crate::types::CachedValue;

/// Lookups needed before a hit rate is reported
pub const MIN_LOOKUPS_FOR_HIT_RATE: u64 = 20;

/// Tiered cache health
pub struct CacheHealth {
    cache: TieredCache<CachedValue>,
    misses: RateWindow,
    tier_errors: RateWindow,
}

impl CacheHealth {
    /// Source over a cache
    #[must_use]
    pub fn new(cache: TieredCache<CachedValue>) -> Self {
        Self {
            cache,
            misses: RateWindow::default(),
            tier_errors: RateWindow::default(),
        }
    }
}

impl HealthSource for CacheHealth {
    fn component(&self) -> &str {
        "cache"
    }

    fn collect(&self) -> BTreeMap<String, f64> {
        let metrics = self.cache.metrics();
        let lookups = metrics.hits + metrics.misses;
        let mut out = BTreeMap::from([
            ("size".to_string(), metrics.current_size as f64),
            (
                "avg_latency_ms".to_string(),
                metrics.avg_retrieval_latency_us / 1_000.0,
            ),
            ("evictions".to_string(), metrics.evictions as f64),
        ]);
        if let Some(miss_rate) =
            self.misses
                .rate_at_least(lookups, metrics.misses, MIN_LOOKUPS_FOR_HIT_RATE)
        {
            out.insert("hit_rate".to_string(), 1.0 - miss_rate);
        }
        if let Some(rate) = self.tier_errors.rate(lookups, metrics.tier_errors) {
            out.insert("tier_error_rate".to_string(), rate);
        }
        out
    }
}

/// Bandit selector health
pub struct BanditHealth {
    bandit: Arc<ThompsonSelector>,
}

impl BanditHealth {
    /// Source over a selector
    #[must_use]
    pub fn new(bandit: Arc<ThompsonSelector>) -> Self {
        Self { bandit }
    }
}

impl HealthSource for BanditHealth {
    fn component(&self) -> &str {
        "bandit"
    }

    fn collect(&self) -> BTreeMap<String, f64> {
        let report = self.bandit.report(&DecisionContext::Global);
        let leader = report
            .arms
            .iter()
            .map(|arm| arm.win_probability)
            .fold(0.0_f64, f64::max);
        BTreeMap::from([
            ("selections".to_string(), self.bandit.total_selections() as f64),
            ("observations".to_string(), report.total_observations as f64),
            ("corruption_resets".to_string(), self.bandit.corruption_resets() as f64),
            ("leader_win_probability".to_string(), leader),
        ])
    }
}

/// Cost governor health
pub struct CostHealth {
    governor: Arc<CostGovernor>,
    failures: RateWindow,
}

impl CostHealth {
    /// Source over a governor
    #[must_use]
    pub fn new(governor: Arc<CostGovernor>) -> Self {
        Self {
            governor,
            failures: RateWindow::default(),
        }
    }
}

impl HealthSource for CostHealth {
    fn component(&self) -> &str {
        "cost"
    }

    fn collect(&self) -> BTreeMap<String, f64> {
        let (calls, errors) = self
            .governor
            .ai_metrics()
            .iter()
            .fold((0, 0), |(c, e), op| (c + op.count, e + op.errors));
        let anomaly = self.governor.detect_anomaly(Utc::now());
        let mut out = BTreeMap::from([
            (
                "budget_utilization".to_string(),
                self.governor.budget_utilization(),
            ),
            ("anomaly_magnitude".to_string(), anomaly.magnitude),
        ]);
        if let Some(rate) = self.failures.rate(calls, errors) {
            out.insert("provider_failure_rate".to_string(), rate);
        }
        out
    }
}

/// Request path health
pub struct EngineHealth {
    stats: Arc<RequestStats>,
    errors: RateWindow,
    store_errors: RateWindow,
}

impl EngineHealth {
    /// Source over request counters
    #[must_use]
    pub fn new(stats: Arc<RequestStats>) -> Self {
        Self {
            stats,
            errors: RateWindow::default(),
            store_errors: RateWindow::default(),
        }
    }
}

impl HealthSource for EngineHealth {
    fn component(&self) -> &str {
        "engine"
    }

    fn collect(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::from([
            ("queue_depth".to_string(), self.stats.in_flight() as f64),
            ("latency_p95_ms".to_string(), self.stats.p95_latency_ms()),
        ]);
        let (requests, errors) = self.stats.request_counts();
        if let Some(rate) = self.errors.rate(requests, errors) {
            out.insert("error_rate".to_string(), rate);
        }
        let (calls, failures) = self.stats.store_counts();
        if let Some(rate) = self.store_errors.rate(calls, failures) {
            out.insert("store_error_rate".to_string(), rate);
        }
        out
    }
}

/// Recovery actions the engine can perform itself
///
/// - `FailoverProvider` disables the provider currently ranked first
/// - `FlushCacheTier` runs cache maintenance
/// - `ThrottleGeneration` makes explanations template-only until resumed
///
/// Other actions go to the injected executor, or are unsupported.
pub struct EngineRecovery {
    governor: Arc<CostGovernor>,
    cache: TieredCache<CachedValue>,
    throttled: Arc<AtomicBool>,
    external: Option<Arc<dyn RecoveryExecutor>>,
}

impl EngineRecovery {
    /// Executor over engine components
    #[must_use]
    pub fn new(
        governor: Arc<CostGovernor>,
        cache: TieredCache<CachedValue>,
        throttled: Arc<AtomicBool>,
        external: Option<Arc<dyn RecoveryExecutor>>,
    ) -> Self {
        Self {
            governor,
            cache,
            throttled,
            external,
        }
    }

    fn failover(&self) -> Result<(), RecoveryError> {
        let action = RecoveryAction::FailoverProvider;
        let enabled = self.governor.providers().iter().filter(|p| p.enabled).count();
        if enabled < 2 {
            return Err(RecoveryError::Failed {
                action,
                reason: "no alternate provider".into(),
            });
        }
        let workload = WorkloadProfile::default()
            .with_weights(self.governor.config().selection_weights);
        let selection = self
            .governor
            .select_provider(&workload)
            .map_err(|err| RecoveryError::Failed {
                action,
                reason: err.to_string(),
            })?;
        self.governor
            .set_provider_enabled(&selection.primary.name, false)
            .map_err(|err| RecoveryError::Failed {
                action,
                reason: err.to_string(),
            })?;
        tracing::warn!(provider = %selection.primary.name, "provider disabled by failover");
        Ok(())
    }
}

#[async_trait]
impl RecoveryExecutor for EngineRecovery {
    async fn execute(&self, action: RecoveryAction, issue: IssueType) -> Result<(), RecoveryError> {
        match action {
            RecoveryAction::FailoverProvider => self.failover(),
            RecoveryAction::FlushCacheTier => {
                let removed = self.cache.cleanup().await;
                tracing::info!(removed, %issue, "cache maintenance for recovery");
                Ok(())
            }
            RecoveryAction::ThrottleGeneration => {
                self.throttled.store(true, Ordering::SeqCst);
                tracing::warn!(%issue, "AI generation throttled");
                Ok(())
            }
            other => match &self.external {
                Some(external) => external.execute(other, issue).await,
                None => Err(RecoveryError::Unsupported(other)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scent_bandit::{Algorithm, BanditConfig};
    use scent_cache::{CacheConfig, CacheWriteOptions};
    use scent_cost::CostConfig;
    use scent_test_utils::ScriptedExecutor;

    fn cache() -> TieredCache<CachedValue> {
        TieredCache::memory_only(CacheConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn cache_hit_rate_waits_for_traffic() {
        let cache = cache();
        let source = CacheHealth::new(cache.clone());
        cache
            .set("k", CachedValue::Catalog(Vec::new()), CacheWriteOptions::default())
            .await
            .unwrap();

        for _ in 0..5 {
            let _ = cache.get("k").await;
        }
        assert!(!source.collect().contains_key("hit_rate"));

        for i in 0..20 {
            let key = if i % 4 == 0 { "missing" } else { "k" };
            let _ = cache.get(key).await;
        }
        let metrics = source.collect();
        // 25 lookups, 5 misses
        assert!((metrics["hit_rate"] - 0.8).abs() < 1e-9);
        assert_eq!(metrics["tier_error_rate"], 0.0);
    }

    #[test]
    fn bandit_source_reports_counters() {
        let bandit = Arc::new(ThompsonSelector::new(BanditConfig::default().with_seed(1)).unwrap());
        bandit.record_outcome(&DecisionContext::Global, Algorithm::Hybrid, true);
        let metrics = BanditHealth::new(bandit).collect();
        assert_eq!(metrics["observations"], 1.0);
        assert_eq!(metrics["corruption_resets"], 0.0);
    }

    #[test]
    fn cost_failure_rate_recovers_after_quiet_interval() {
        let governor = Arc::new(CostGovernor::new(CostConfig::default()).unwrap());
        let source = CostHealth::new(governor.clone());
        governor.record_ai_metric("explanation", 100.0, false);
        governor.record_ai_metric("explanation", 100.0, true);
        assert_eq!(source.collect()["provider_failure_rate"], 0.5);
        assert!(!source.collect().contains_key("provider_failure_rate"));
        governor.record_ai_metric("explanation", 100.0, true);
        assert_eq!(source.collect()["provider_failure_rate"], 0.0);
    }

    #[test]
    fn engine_source_reports_queue_depth() {
        let stats = Arc::new(RequestStats::new());
        let source = EngineHealth::new(stats.clone());
        let (_guard, _) = stats.enter();
        stats.record(12.0, false, false);
        let metrics = source.collect();
        assert_eq!(metrics["queue_depth"], 1.0);
        assert_eq!(metrics["error_rate"], 1.0);
        assert!(!metrics.contains_key("store_error_rate"));
    }

    #[tokio::test]
    async fn failover_disables_the_leading_provider() {
        let governor = Arc::new(CostGovernor::new(CostConfig::default()).unwrap());
        let recovery = EngineRecovery::new(
            governor.clone(),
            cache(),
            Arc::new(AtomicBool::new(false)),
            None,
        );
        recovery
            .execute(RecoveryAction::FailoverProvider, IssueType::ProviderConnectivity)
            .await
            .unwrap();
        let disabled: Vec<_> = governor
            .providers()
            .into_iter()
            .filter(|p| !p.enabled)
            .map(|p| p.name)
            .collect();
        assert_eq!(disabled, vec!["standard".to_string()]);
    }

    #[tokio::test]
    async fn failover_needs_an_alternate() {
        let governor = Arc::new(CostGovernor::new(CostConfig::default()).unwrap());
        governor.set_provider_enabled("premium", false).unwrap();
        governor.set_provider_enabled("economy", false).unwrap();
        let recovery =
            EngineRecovery::new(governor, cache(), Arc::new(AtomicBool::new(false)), None);
        let err = recovery
            .execute(RecoveryAction::FailoverProvider, IssueType::ProviderConnectivity)
            .await
            .unwrap_err();
        assert!(matches!(err, RecoveryError::Failed { .. }));
    }

    #[tokio::test]
    async fn throttle_sets_the_flag_and_others_are_delegated() {
        let throttled = Arc::new(AtomicBool::new(false));
        let external = Arc::new(ScriptedExecutor::succeeding(&[RecoveryAction::RebuildIndex]));
        let recovery = EngineRecovery::new(
            Arc::new(CostGovernor::new(CostConfig::default()).unwrap()),
            cache(),
            throttled.clone(),
            Some(external.clone()),
        );

        recovery
            .execute(RecoveryAction::ThrottleGeneration, IssueType::BudgetExhaustion)
            .await
            .unwrap();
        assert!(throttled.load(Ordering::SeqCst));

        recovery
            .execute(RecoveryAction::RebuildIndex, IssueType::IndexDegradation)
            .await
            .unwrap();
        assert_eq!(
            external.calls(),
            vec![(RecoveryAction::RebuildIndex, IssueType::IndexDegradation)]
        );
    }

    #[tokio::test]
    async fn unsupported_without_an_executor() {
        let recovery = EngineRecovery::new(
            Arc::new(CostGovernor::new(CostConfig::default()).unwrap()),
            cache(),
            Arc::new(AtomicBool::new(false)),
            None,
        );
        let err = recovery
            .execute(RecoveryAction::ResetConnectionPool, IssueType::ConnectionExhaustion)
            .await
            .unwrap_err();
        assert_eq!(err, RecoveryError::Unsupported(RecoveryAction::ResetConnectionPool));
    }
}
