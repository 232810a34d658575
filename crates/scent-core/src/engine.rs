//! Recommendation engine
//!
//! Wires the profile builder, bandit, tiered cache, cost governor and health
//! monitor into one request path.
//!
//! ```text
//!  get_recommendations(profile, options)
//!        │
//!        ▼
//!   bandit picks algorithm ──► recommendation cache ──hit──► response
//!        │ miss
//!        ▼
//!   catalog (cache ─► content store)
//!        │
//!        ├─ content-based ───────────────┐
//!        ├─ collaborative ─► neighbours ─┤ (falls back to content-based)
//!        └─ hybrid ────────► neighbours ─┤
//!                                        ▼
//!                          rank ─► explanations (cache ─► pipeline)
//!                                        │
//!                                        ▼
//!                        write-through unless degraded ─► response
//! ```
//!
//! Explanation generation is bounded by a semaphore and the request deadline.
//! Under backpressure, when throttled by recovery, or when the budget is
//! spent, explanations fall back to templates and the response says so.

use futures::future::join_all;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use scent_bandit::{Algorithm, BanditReport, DecisionContext, Outcome, ThompsonSelector};
use scent_cache::{
    warm, CacheKey, CacheMetrics, CacheWriteOptions, DistributedBackend,
    InvalidationTrigger, PersistedStore, Priority, TieredCache, WarmItem, WarmingPlan,
    WarmingReport,
};
use scent_cost::{
    AiProvider, CostGovernor, DegradeReason, GenerationOutcome, GenerationPath,
    GenerationPipeline, GenerationRequest, MonthlyEstimate, MonthlyEstimateParams, Quality,
    TemplateGenerator, TokenUsage,
};
use scent_health::{
    AlertHandler, HealthEvaluation, HealthMonitor, HealthReport, HealthStatus, MonitorHandle,
    RecoveryExecutor, TelemetrySink,
};
use scent_profile::{
    calculate_similarity, ContentStore, FragranceItem, InMemoryContentStore,
    InMemoryProfileStore, Profile, ProfileBuilder, ProfileStore, QuizResponse, ScoredProfile,
    SimilarityEngine, SimilarityOptions, StoredProfile, TraitEmbedder,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::health::{BanditHealth, CacheHealth, CostHealth, EngineHealth, EngineRecovery};
use crate::ranking;
use crate::stats::RequestStats;
use crate::types::{
    CachedValue, CachingInfo, Degradation, PerformanceInfo, PerformanceReport,
    RecommendationOptions, RecommendationResponse, RecommendedItem,
};

/// Namespace of cached recommendation lists
pub const RECOMMENDATION_NAMESPACE: &str = "recs";
/// Namespace of cached explanations
pub const EXPLANATION_NAMESPACE: &str = "explain";
/// Namespace of cached catalog pages
pub const CATALOG_NAMESPACE: &str = "catalog";
/// Tag carried by every entry derived from the catalog
pub const CATALOG_TAG: &str = "catalog";

const EXPLANATION_KIND: &str = "explanation";

/// Assembles a [`RecommendationEngine`]
///
/// Stores default to in-memory implementations; cache tiers beyond memory
/// are only active when a backend is attached.
pub struct EngineBuilder {
    config: EngineConfig,
    profile_store: Option<Arc<dyn ProfileStore>>,
    content_store: Option<Arc<dyn ContentStore>>,
    distributed: Option<Arc<dyn DistributedBackend>>,
    persisted: Option<Arc<dyn PersistedStore>>,
    providers: Vec<Arc<dyn AiProvider>>,
    templates: Option<TemplateGenerator>,
    sink: Option<Arc<dyn TelemetrySink>>,
    executor: Option<Arc<dyn RecoveryExecutor>>,
}

impl EngineBuilder {
    /// Builder over a configuration
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            profile_store: None,
            content_store: None,
            distributed: None,
            persisted: None,
            providers: Vec::new(),
            templates: None,
            sink: None,
            executor: None,
        }
    }

    /// Stored profiles used for collaborative filtering
    #[must_use]
    pub fn with_profile_store(mut self, store: Arc<dyn ProfileStore>) -> Self {
        self.profile_store = Some(store);
        self
    }

    /// Fragrance catalog
    #[must_use]
    pub fn with_content_store(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.content_store = Some(store);
        self
    }

    /// Distributed cache tier
    #[must_use]
    pub fn with_distributed(mut self, backend: Arc<dyn DistributedBackend>) -> Self {
        self.distributed = Some(backend);
        self
    }

    /// Persisted cache tier
    #[must_use]
    pub fn with_persisted(mut self, store: Arc<dyn PersistedStore>) -> Self {
        self.persisted = Some(store);
        self
    }

    /// Register an AI provider; its name must match a configured profile
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn AiProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Replace the template set
    #[must_use]
    pub fn with_templates(mut self, templates: TemplateGenerator) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Health snapshot sink
    #[must_use]
    pub fn with_telemetry_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Executor for recovery actions the engine does not handle itself
    #[must_use]
    pub fn with_recovery_executor(mut self, executor: Arc<dyn RecoveryExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Validate the configuration and build every component
    pub fn build(self) -> Result<RecommendationEngine, EngineError> {
        let config = self.config;
        config.validate()?;

        let profiles = self
            .profile_store
            .unwrap_or_else(|| Arc::new(InMemoryProfileStore::new()) as Arc<dyn ProfileStore>);
        let content = self
            .content_store
            .unwrap_or_else(|| Arc::new(InMemoryContentStore::new()) as Arc<dyn ContentStore>);

        let mut cache_builder = TieredCache::builder(config.cache.clone());
        if let Some(backend) = self.distributed {
            cache_builder = cache_builder.with_distributed(backend);
        }
        if let Some(store) = self.persisted {
            cache_builder = cache_builder.with_persisted(store);
        }
        let cache: TieredCache<CachedValue> = cache_builder
            .build()
            .map_err(|err| EngineError::Config(err.to_string()))?;

        let bandit = Arc::new(ThompsonSelector::new(config.bandit.clone())?);
        let governor = Arc::new(CostGovernor::new(config.cost.clone())?);

        for profile in governor.providers() {
            let registered = self.providers.iter().any(|p| p.name() == profile.name);
            if profile.enabled && !registered {
                governor.set_provider_enabled(&profile.name, false)?;
                tracing::debug!(provider = %profile.name, "provider disabled: no implementation");
            }
        }
        for provider in &self.providers {
            if governor.provider(provider.name()).is_none() {
                tracing::warn!(
                    provider = provider.name(),
                    "provider has no cost profile and is never selected"
                );
            }
        }

        let mut pipeline = GenerationPipeline::new(Arc::clone(&governor))
            .with_timeout(config.cost.provider_timeout());
        for provider in self.providers {
            pipeline = pipeline.with_provider(provider);
        }
        if let Some(templates) = self.templates {
            pipeline = pipeline.with_templates(templates);
        }

        let stats = Arc::new(RequestStats::new());
        let throttled = Arc::new(AtomicBool::new(false));
        let recovery = EngineRecovery::new(
            Arc::clone(&governor),
            cache.clone(),
            Arc::clone(&throttled),
            self.executor,
        );
        let mut monitor = HealthMonitor::builder(config.health.clone())
            .with_source(Arc::new(CacheHealth::new(cache.clone())))
            .with_source(Arc::new(BanditHealth::new(Arc::clone(&bandit))))
            .with_source(Arc::new(CostHealth::new(Arc::clone(&governor))))
            .with_source(Arc::new(EngineHealth::new(Arc::clone(&stats))))
            .with_executor(Arc::new(recovery));
        if let Some(sink) = self.sink {
            monitor = monitor.with_sink(sink);
        }
        let monitor = Arc::new(monitor.build()?);

        let similarity = SimilarityEngine::new(Arc::clone(&profiles))
            .with_fetch_timeout(config.similarity.fetch_timeout())
            .with_candidate_pool(config.similarity.candidate_pool);

        tracing::info!(
            arms = config.bandit.arms.len(),
            tiers = ?cache.tiers(),
            providers = governor.providers().iter().filter(|p| p.enabled).count(),
            "recommendation engine built"
        );

        Ok(RecommendationEngine {
            builder: ProfileBuilder::with_config(config.profile.clone()),
            embedder: TraitEmbedder::default(),
            similarity,
            profiles,
            content,
            bandit,
            cache,
            governor,
            pipeline,
            monitor,
            stats,
            generation_permits: Semaphore::new(config.recommendation.max_concurrent_generations),
            throttled,
            shutdown: CancellationToken::new(),
            background: Mutex::new(Background::default()),
            config,
        })
    }
}

#[derive(Default)]
struct Background {
    monitor: Option<MonitorHandle>,
    warming: Option<JoinHandle<()>>,
}

/// Resolved per-request settings
#[derive(Debug, Clone)]
struct RequestPlan {
    algorithm: Algorithm,
    limit: usize,
    explain: bool,
    quality: Quality,
    excluded: Vec<String>,
}

impl RequestPlan {
    fn new(config: &EngineConfig, options: &RecommendationOptions, algorithm: Algorithm) -> Self {
        let mut excluded = options.exclude_item_ids.clone();
        excluded.sort();
        excluded.dedup();
        Self {
            algorithm,
            limit: options
                .limit
                .unwrap_or(config.recommendation.default_limit)
                .max(1),
            explain: options.explain,
            quality: options
                .quality
                .unwrap_or(config.recommendation.explanation_quality),
            excluded,
        }
    }

    fn cache_key(&self, profile: &Profile, user_id: Option<&str>) -> CacheKey {
        let explain = match (self.explain, self.quality) {
            (false, _) => "plain",
            (true, Quality::Standard) => "standard",
            (true, Quality::Premium) => "premium",
        };
        let mut parts = vec![
            profile.fingerprint(),
            self.algorithm.name().to_string(),
            self.limit.to_string(),
            explain.to_string(),
        ];
        if !self.excluded.is_empty() {
            parts.push(format!("x={}", self.excluded.join(",")));
        }
        match user_id {
            Some(user) => CacheKey::personalized(RECOMMENDATION_NAMESPACE, user, parts),
            None => CacheKey::shared(RECOMMENDATION_NAMESPACE, parts),
        }
    }
}

/// A computed (not cached) recommendation list
struct Computed {
    items: Vec<RecommendedItem>,
    algorithm: Algorithm,
    candidates: usize,
    neighbours: usize,
    ai_explanations: usize,
    template_explanations: usize,
    cost_usd: Decimal,
    degradations: Vec<Degradation>,
}

impl Computed {
    fn cacheable(&self) -> bool {
        !self.degradations.iter().any(Degradation::is_transient)
    }
}

#[derive(Clone)]
struct Explained {
    text: String,
    path: GenerationPath,
    cost_usd: Decimal,
    degraded: Option<DegradeReason>,
}

#[derive(Clone)]
enum WarmJob {
    Catalog,
    Recommendations {
        profile: Box<Profile>,
        algorithm: Algorithm,
    },
}

/// Adaptive recommendation engine
pub struct RecommendationEngine {
    config: EngineConfig,
    builder: ProfileBuilder,
    embedder: TraitEmbedder,
    similarity: SimilarityEngine,
    profiles: Arc<dyn ProfileStore>,
    content: Arc<dyn ContentStore>,
    bandit: Arc<ThompsonSelector>,
    cache: TieredCache<CachedValue>,
    governor: Arc<CostGovernor>,
    pipeline: GenerationPipeline,
    monitor: Arc<HealthMonitor>,
    stats: Arc<RequestStats>,
    generation_permits: Semaphore,
    throttled: Arc<AtomicBool>,
    shutdown: CancellationToken,
    background: Mutex<Background>,
}

impl RecommendationEngine {
    /// Builder over a configuration
    #[must_use]
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Profiles
    // -----------------------------------------------------------------------

    /// Build a profile from quiz responses; unusable input yields the default profile
    #[must_use]
    pub fn generate_profile(&self, responses: &[QuizResponse], session_id: &str) -> Profile {
        self.builder.generate_profile(responses, session_id)
    }

    /// Build a profile and store it for collaborative filtering
    ///
    /// The user's cached recommendations are invalidated.
    pub async fn generate_and_store_profile(
        &self,
        responses: &[QuizResponse],
        session_id: &str,
        profile_id: &str,
        user_id: Option<&str>,
        favorite_item_ids: Vec<String>,
    ) -> Result<StoredProfile, EngineError> {
        let stored = StoredProfile {
            profile_id: profile_id.to_string(),
            user_id: user_id.map(str::to_string),
            profile: self.generate_profile(responses, session_id),
            favorite_item_ids,
        };
        self.save_profile(stored.clone()).await?;
        Ok(stored)
    }

    /// Insert or replace a stored profile
    pub async fn save_profile(&self, stored: StoredProfile) -> Result<(), EngineError> {
        let user_id = stored.user_id.clone();
        let timeout = self.config.recommendation.store_timeout();
        let result = match tokio::time::timeout(timeout, self.profiles.save_profile(stored)).await {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => Err(EngineError::timeout(
                "save_profile",
                self.config.recommendation.store_timeout_ms,
            )),
        };
        self.stats.record_store_call(result.is_ok());
        result?;
        if let Some(user_id) = user_id {
            self.record_user_activity(&user_id).await;
        }
        Ok(())
    }

    /// Cosine similarity of two profile vectors in `[0, 1]`
    #[must_use]
    pub fn calculate_similarity(&self, a: &Profile, b: &Profile) -> f64 {
        calculate_similarity(a, b)
    }

    /// Stored profiles most similar to `profile`
    pub async fn find_similar_profiles(
        &self,
        profile: &Profile,
        options: SimilarityOptions,
    ) -> Result<Vec<ScoredProfile>, EngineError> {
        let result = self.similarity.find_similar_profiles(profile, options).await;
        self.stats.record_store_call(result.is_ok());
        Ok(result?)
    }

    // -----------------------------------------------------------------------
    // Algorithm selection
    // -----------------------------------------------------------------------

    /// Sample an algorithm for a context
    #[must_use]
    pub fn select_algorithm(&self, context: &DecisionContext) -> Algorithm {
        self.bandit.select_arm(context)
    }

    /// Record whether a served algorithm succeeded
    pub fn record_outcome(&self, context: &DecisionContext, algorithm: Algorithm, success: bool) {
        self.bandit.record_outcome(context, algorithm, success);
    }

    /// Record a user reaction to a served algorithm
    pub fn record_feedback(
        &self,
        context: &DecisionContext,
        algorithm: Algorithm,
        outcome: Outcome,
    ) {
        self.bandit.record_feedback(context, algorithm, outcome);
    }

    /// Arm statistics for a context
    #[must_use]
    pub fn bandit_report(&self, context: &DecisionContext) -> BanditReport {
        self.bandit.report(context)
    }

    /// Underlying selector
    #[inline]
    #[must_use]
    pub fn bandit(&self) -> &Arc<ThompsonSelector> {
        &self.bandit
    }

    // -----------------------------------------------------------------------
    // Recommendations
    // -----------------------------------------------------------------------

    /// Ranked recommendations for a profile
    pub async fn get_recommendations(
        &self,
        profile: &Profile,
        options: RecommendationOptions,
    ) -> Result<RecommendationResponse, EngineError> {
        self.get_recommendations_with_cancel(profile, options, CancellationToken::new())
            .await
    }

    /// [`Self::get_recommendations`], abandoned when `cancel` fires
    ///
    /// A cancelled request writes nothing to the cache and returns
    /// [`EngineError::Cancelled`]. Provider responses that completed before
    /// cancellation are still billed.
    pub async fn get_recommendations_with_cancel(
        &self,
        profile: &Profile,
        options: RecommendationOptions,
        cancel: CancellationToken,
    ) -> Result<RecommendationResponse, EngineError> {
        let started = Instant::now();
        let (_in_flight, depth) = self.stats.enter();
        let requested = options
            .algorithm
            .unwrap_or_else(|| self.bandit.select_arm(&options.context));
        let plan = RequestPlan::new(&self.config, &options, requested);
        let key = plan.cache_key(profile, options.user_id.as_deref());

        let result = self.serve(profile, &plan, &key, depth, &cancel, started).await;
        let total_ms = elapsed_ms(started);
        match &result {
            Ok(response) => {
                let degraded = !response.performance.degradations.is_empty();
                self.stats.record(total_ms, true, degraded);
                tracing::debug!(
                    algorithm = %response.performance.algorithm.name(),
                    items = response.items.len(),
                    cache_hit = response.caching.cache_hit,
                    degraded,
                    total_ms,
                    "recommendations served"
                );
            }
            Err(EngineError::Cancelled) => {
                self.stats.record(total_ms, true, false);
                tracing::debug!(total_ms, "recommendation request cancelled");
            }
            Err(err) => {
                self.stats.record(total_ms, false, false);
                tracing::warn!(error = %err, total_ms, "recommendation request failed");
            }
        }
        result.map(|mut response| {
            response.performance.total_ms = total_ms;
            response
        })
    }

    async fn serve(
        &self,
        profile: &Profile,
        plan: &RequestPlan,
        key: &CacheKey,
        depth: usize,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<RecommendationResponse, EngineError> {
        if let Some(hit) = self.cache.get(key.as_str()).await {
            match hit.value {
                CachedValue::Recommendations { algorithm, items } => {
                    let ai = items
                        .iter()
                        .filter(|i| {
                            i.explanation_path
                                .as_ref()
                                .is_some_and(|p| matches!(p, GenerationPath::Ai { .. }))
                        })
                        .count();
                    let explained = items.iter().filter(|i| i.explanation.is_some()).count();
                    return Ok(RecommendationResponse {
                        performance: PerformanceInfo {
                            requested_algorithm: plan.algorithm,
                            algorithm,
                            total_ms: 0.0,
                            candidates: 0,
                            neighbours: 0,
                            ai_explanations: ai,
                            template_explanations: explained - ai,
                            generation_cost_usd: Decimal::ZERO,
                            degradations: Vec::new(),
                        },
                        items,
                        caching: CachingInfo {
                            key: key.as_str().to_string(),
                            cache_hit: true,
                            tier: Some(hit.tier),
                            stored: false,
                        },
                    });
                }
                _ => tracing::warn!(
                    key = key.as_str(),
                    "unexpected value under recommendation key"
                ),
            }
        }

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let deadline = started + self.config.recommendation.request_timeout();
        let computed = self.compute(profile, plan, depth, cancel, deadline).await?;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let stored = computed.cacheable() && self.store_recommendations(key, &computed).await;
        Ok(RecommendationResponse {
            performance: PerformanceInfo {
                requested_algorithm: plan.algorithm,
                algorithm: computed.algorithm,
                total_ms: 0.0,
                candidates: computed.candidates,
                neighbours: computed.neighbours,
                ai_explanations: computed.ai_explanations,
                template_explanations: computed.template_explanations,
                generation_cost_usd: computed.cost_usd,
                degradations: computed.degradations,
            },
            items: computed.items,
            caching: CachingInfo {
                key: key.as_str().to_string(),
                cache_hit: false,
                tier: None,
                stored,
            },
        })
    }

    async fn store_recommendations(&self, key: &CacheKey, computed: &Computed) -> bool {
        let tagged = key
            .clone()
            .with_tag(CATALOG_TAG)
            .with_items(computed.items.iter().map(|i| i.item.id.as_str()));
        let options =
            CacheWriteOptions::for_key(&tagged).with_ttl(self.config.recommendation.cache_ttl());
        let value = CachedValue::Recommendations {
            algorithm: computed.algorithm,
            items: computed.items.clone(),
        };
        match self.cache.set(key.as_str(), value, options).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(key = key.as_str(), error = %err, "recommendations not cached");
                false
            }
        }
    }

    async fn compute(
        &self,
        profile: &Profile,
        plan: &RequestPlan,
        depth: usize,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<Computed, EngineError> {
        let catalog = self.catalog().await?;
        let content = ranking::content_scores(profile, &catalog, &self.embedder);
        let mut degradations = Vec::new();

        let (algorithm, scores, neighbours) = match plan.algorithm {
            Algorithm::ContentBased => (Algorithm::ContentBased, content, 0),
            requested => {
                match self
                    .similarity
                    .find_similar_profiles(profile, self.config.similarity.options())
                    .await
                {
                    Ok(found) => {
                        self.stats.record_store_call(true);
                        let collaborative = ranking::collaborative_scores(&found);
                        if collaborative.is_empty() {
                            degradations.push(Degradation::NoNeighbours);
                            (Algorithm::ContentBased, content, 0)
                        } else if requested == Algorithm::Collaborative {
                            (requested, collaborative, found.len())
                        } else {
                            let weight = self.config.recommendation.hybrid_content_weight;
                            let blended = ranking::hybrid_scores(&content, &collaborative, weight);
                            (requested, blended, found.len())
                        }
                    }
                    Err(err) => {
                        self.stats.record_store_call(false);
                        tracing::warn!(
                            algorithm = requested.name(),
                            error = %err,
                            "neighbours unavailable, serving content-based"
                        );
                        degradations.push(Degradation::NeighboursUnavailable);
                        (Algorithm::ContentBased, content, 0)
                    }
                }
            }
        };

        let ranked = ranking::rank_items(&catalog, &scores, &plan.excluded, plan.limit);
        let mut computed = Computed {
            items: Vec::with_capacity(ranked.len()),
            algorithm,
            candidates: catalog.len(),
            neighbours,
            ai_explanations: 0,
            template_explanations: 0,
            cost_usd: Decimal::ZERO,
            degradations,
        };

        let explanations: Vec<Option<Result<Explained, EngineError>>> =
            if plan.explain && !ranked.is_empty() {
                let pending = ranked.iter().map(|(item, score)| {
                    self.explain(profile, item, *score, plan.quality, depth, cancel)
                });
                match tokio::time::timeout_at(deadline, join_all(pending)).await {
                    Ok(results) => results.into_iter().map(Some).collect(),
                    Err(_) => {
                        tracing::warn!(
                            items = ranked.len(),
                            "explanations missed the request deadline"
                        );
                        computed.degradations.push(Degradation::ExplanationsTimedOut);
                        vec![None; ranked.len()]
                    }
                }
            } else {
                vec![None; ranked.len()]
            };

        for ((item, score), explained) in ranked.into_iter().zip(explanations) {
            let (explanation, explanation_path) = match explained {
                Some(result) => {
                    let explained = result?;
                    computed.cost_usd += explained.cost_usd;
                    if matches!(explained.path, GenerationPath::Ai { .. }) {
                        computed.ai_explanations += 1;
                    } else {
                        computed.template_explanations += 1;
                    }
                    if let Some(reason) = explained.degraded {
                        let degradation = Degradation::Generation { reason };
                        if !computed.degradations.contains(&degradation) {
                            computed.degradations.push(degradation);
                        }
                    }
                    (Some(explained.text), Some(explained.path))
                }
                None => (None, None),
            };
            computed.items.push(RecommendedItem {
                item,
                score,
                algorithm,
                explanation,
                explanation_path,
            });
        }
        Ok(computed)
    }

    async fn explain(
        &self,
        profile: &Profile,
        item: &FragranceItem,
        score: f64,
        quality: Quality,
        depth: usize,
        cancel: &CancellationToken,
    ) -> Result<Explained, EngineError> {
        let traits = profile.primary_traits.join(", ");
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let percent = (score.clamp(0.0, 1.0) * 100.0).round() as u32;
        let quality_part = match quality {
            Quality::Standard => "standard",
            Quality::Premium => "premium",
        };
        let key = CacheKey::shared(
            EXPLANATION_NAMESPACE,
            [item.id.as_str(), traits.as_str(), &percent.to_string(), quality_part],
        )
        .with_items([item.id.as_str()]);

        if let Some(hit) = self.cache.get(key.as_str()).await {
            if let CachedValue::Explanation { text, path } = hit.value {
                return Ok(Explained {
                    text,
                    path,
                    cost_usd: Decimal::ZERO,
                    degraded: None,
                });
            }
        }
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let request = GenerationRequest::new(
            EXPLANATION_KIND,
            format!(
                "In one sentence, explain why {} by {} suits someone who is {traits}.",
                item.name, item.brand
            ),
        )
        .with_variable("traits", traits.as_str())
        .with_variable("score", percent.to_string())
        .with_variable("name", item.name.as_str())
        .with_expected_tokens(self.config.recommendation.explanation_tokens)
        .with_quality(quality);

        let outcome = self.generate(&request, depth, cancel).await?;
        if outcome.degraded.is_none() {
            let options = CacheWriteOptions::for_key(&key)
                .with_tag(CATALOG_TAG)
                .with_ttl(self.config.recommendation.cache_ttl());
            let value = CachedValue::Explanation {
                text: outcome.text.clone(),
                path: outcome.path.clone(),
            };
            if let Err(err) = self.cache.set(key.as_str(), value, options).await {
                tracing::warn!(key = key.as_str(), error = %err, "explanation not cached");
            }
        }
        Ok(Explained {
            text: outcome.text,
            path: outcome.path,
            cost_usd: outcome.cost_usd,
            degraded: outcome.degraded,
        })
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        depth: usize,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, EngineError> {
        if request.quality == Quality::Standard {
            return Ok(self.pipeline.generate(request).await);
        }
        if self.throttled.load(Ordering::SeqCst) {
            return Ok(self.pipeline.template_only(request, DegradeReason::Backpressure));
        }
        if depth > self.config.recommendation.max_queue_depth {
            tracing::debug!(depth, "queue depth over limit, template only");
            return Ok(self.pipeline.template_only(request, DegradeReason::Backpressure));
        }
        let Ok(_permit) = self.generation_permits.try_acquire() else {
            tracing::debug!("generation permits exhausted, template only");
            return Ok(self.pipeline.template_only(request, DegradeReason::Backpressure));
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(EngineError::Cancelled),
            outcome = self.pipeline.generate(request) => Ok(outcome),
        }
    }

    async fn catalog(&self) -> Result<Vec<FragranceItem>, EngineError> {
        let limit = self.config.recommendation.catalog_limit;
        let key = catalog_key(limit);
        if let Some(hit) = self.cache.get(key.as_str()).await {
            if let CachedValue::Catalog(items) = hit.value {
                return Ok(items);
            }
        }
        let items = self.fetch_catalog(limit).await?;
        let options =
            CacheWriteOptions::for_key(&key).with_ttl(self.config.recommendation.cache_ttl());
        if let Err(err) = self
            .cache
            .set(key.as_str(), CachedValue::Catalog(items.clone()), options)
            .await
        {
            tracing::warn!(error = %err, "catalog not cached");
        }
        Ok(items)
    }

    async fn fetch_catalog(&self, limit: usize) -> Result<Vec<FragranceItem>, EngineError> {
        let timeout = self.config.recommendation.store_timeout();
        let result = match tokio::time::timeout(timeout, self.content.candidates(limit)).await {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => Err(EngineError::timeout(
                "catalog",
                self.config.recommendation.store_timeout_ms,
            )),
        };
        self.stats.record_store_call(result.is_ok());
        if let Err(err) = &result {
            tracing::warn!(error = %err, "catalog fetch failed");
        }
        result
    }

    // -----------------------------------------------------------------------
    // Cache
    // -----------------------------------------------------------------------

    /// Engine cache
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &TieredCache<CachedValue> {
        &self.cache
    }

    /// Cache metrics
    #[must_use]
    pub fn cache_metrics(&self) -> CacheMetrics {
        self.cache.metrics()
    }

    /// Drop every cached entry personalised to a user
    pub async fn record_user_activity(&self, user_id: &str) -> usize {
        let removed = self
            .cache
            .apply_trigger(InvalidationTrigger::UserActivity {
                user_id: user_id.to_string(),
            })
            .await;
        tracing::debug!(user_id, removed, "user activity invalidation");
        removed
    }

    /// Drop cached entries built from changed catalog items
    ///
    /// The catalog page and every recommendation list are rebuilt on next use;
    /// explanations are dropped only for the named items.
    pub async fn notify_content_update(&self, item_ids: Vec<String>) -> usize {
        let mut removed = self.cache.invalidate_tag(CATALOG_TAG).await;
        removed += self
            .cache
            .apply_trigger(InvalidationTrigger::ContentUpdate { item_ids })
            .await;
        tracing::debug!(removed, "content update invalidation");
        removed
    }

    /// Warm the catalog and archetype recommendations within configured budgets
    #[allow(clippy::cast_precision_loss)]
    pub async fn warm_cache(&self) -> WarmingReport {
        let recommendation = &self.config.recommendation;
        let mut jobs: HashMap<String, WarmJob> = HashMap::new();
        let mut plan = WarmingPlan::new();

        let catalog = catalog_key(recommendation.catalog_limit);
        plan.push(
            WarmItem::new(catalog.as_str(), Priority::High).with_ttl(recommendation.cache_ttl()),
        );
        jobs.insert(catalog.as_str().to_string(), WarmJob::Catalog);

        for (i, traits) in recommendation.warm_profiles.iter().enumerate() {
            if traits.is_empty() {
                continue;
            }
            let weight = 1.0 / traits.len() as f64;
            let responses = [QuizResponse::new(
                format!("warm-{i}"),
                traits.iter().cloned(),
                vec![weight; traits.len()],
            )];
            let profile = self.generate_profile(&responses, &format!("warm:{i}"));
            for &algorithm in &self.config.bandit.arms {
                let options = RecommendationOptions::new().with_algorithm(algorithm);
                let key =
                    RequestPlan::new(&self.config, &options, algorithm).cache_key(&profile, None);
                plan.push(
                    WarmItem::new(key.as_str(), Priority::Medium)
                        .with_tags([CATALOG_TAG.to_string()])
                        .with_ttl(recommendation.cache_ttl()),
                );
                jobs.insert(
                    key.as_str().to_string(),
                    WarmJob::Recommendations {
                        profile: Box::new(profile.clone()),
                        algorithm,
                    },
                );
            }
        }

        let report = warm(
            &self.cache,
            plan,
            |key: String| {
                let job = jobs.get(&key).cloned();
                async move {
                    match job {
                        Some(job) => self.load_warm(job).await,
                        None => Err(EngineError::Validation(format!("unplanned warm key {key}"))),
                    }
                }
            },
            self.config.cache.warming.limits(),
        )
        .await;
        tracing::info!(
            warmed = report.warmed,
            skipped = report.skipped,
            failed = report.failed,
            remaining = report.remaining,
            stop_reason = ?report.stop_reason,
            "cache warming finished"
        );
        report
    }

    async fn load_warm(&self, job: WarmJob) -> Result<CachedValue, EngineError> {
        match job {
            WarmJob::Catalog => {
                let items = self.fetch_catalog(self.config.recommendation.catalog_limit).await?;
                Ok(CachedValue::Catalog(items))
            }
            WarmJob::Recommendations { profile, algorithm } => {
                let options = RecommendationOptions::new().with_algorithm(algorithm);
                let plan = RequestPlan::new(&self.config, &options, algorithm);
                let deadline = Instant::now() + self.config.recommendation.request_timeout();
                let computed = self
                    .compute(&profile, &plan, 0, &self.shutdown, deadline)
                    .await?;
                if !computed.cacheable() {
                    return Err(EngineError::Validation(format!(
                        "degraded result for {}",
                        algorithm.name()
                    )));
                }
                Ok(CachedValue::Recommendations {
                    algorithm: computed.algorithm,
                    items: computed.items,
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Cost
    // -----------------------------------------------------------------------

    /// Cost governor
    #[inline]
    #[must_use]
    pub fn cost_governor(&self) -> &Arc<CostGovernor> {
        &self.governor
    }

    /// Record one AI operation made outside the engine
    pub fn record_ai_metric(&self, operation: &str, latency_ms: f64, success: bool) {
        self.governor.record_ai_metric(operation, latency_ms, success);
    }

    /// Tokens and spend over the last 24 hours
    #[must_use]
    pub fn daily_token_usage(&self) -> TokenUsage {
        self.governor.daily_token_usage()
    }

    /// Project a 30-day bill
    pub fn estimate_monthly_cost(
        &self,
        params: &MonthlyEstimateParams,
    ) -> Result<MonthlyEstimate, EngineError> {
        Ok(self.governor.estimate_monthly_cost(params)?)
    }

    /// Explanations are template-only after a throttling recovery
    #[must_use]
    pub fn is_generation_throttled(&self) -> bool {
        self.throttled.load(Ordering::SeqCst)
    }

    /// Lift a throttle set by recovery
    pub fn resume_generation(&self) {
        if self.throttled.swap(false, Ordering::SeqCst) {
            tracing::info!("AI generation resumed");
        }
    }

    // -----------------------------------------------------------------------
    // Health and reporting
    // -----------------------------------------------------------------------

    /// Run one health evaluation now
    pub async fn check_health(&self) -> HealthEvaluation {
        self.monitor.tick().await
    }

    /// Health report from the latest evaluation
    #[must_use]
    pub fn health_report(&self) -> HealthReport {
        self.monitor.health_report()
    }

    /// Fail when the latest evaluation is critical
    pub fn require_healthy(&self) -> Result<(), EngineError> {
        match self.monitor.latest() {
            Some(eval) if eval.status == HealthStatus::Critical => Err(EngineError::HealthCritical {
                score: eval.overall_score,
            }),
            _ => Ok(()),
        }
    }

    /// Register an alert handler
    pub fn on_alert(&self, handler: AlertHandler) {
        self.monitor.on_alert(handler);
    }

    /// Operator view across every component
    #[must_use]
    pub fn performance_report(&self) -> PerformanceReport {
        let now = chrono::Utc::now();
        PerformanceReport {
            generated_at: now,
            requests: self.stats.summary(),
            cache: self.cache.metrics(),
            bandit: self.bandit.report(&DecisionContext::Global),
            ai_operations: self.governor.ai_metrics(),
            token_usage: self.governor.daily_token_usage_at(now),
            total_cost_usd: self.governor.total_cost(),
            budget_utilization: self.governor.budget_utilization(),
            cost_anomaly: self.governor.detect_anomaly(now),
            health_status: self.monitor.latest().map(|eval| eval.status),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start the health monitor and, when enabled, periodic cache warming
    ///
    /// Calling again while running does nothing. Must be called inside a
    /// Tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let mut background = self.background.lock();
        if background.monitor.is_none() {
            background.monitor = Some(Arc::clone(&self.monitor).spawn());
        }
        if background.warming.is_none() && self.config.cache.warming.enabled {
            let engine = Arc::clone(self);
            background.warming = Some(tokio::spawn(async move { engine.warming_loop().await }));
        }
    }

    async fn warming_loop(&self) {
        let mut interval = tokio::time::interval(self.config.cache.warming.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            interval_secs = self.config.cache.warming.interval_secs,
            "cache warming started"
        );
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                _ = self.warm_cache() => {}
            }
        }
        tracing::info!("cache warming stopped");
    }

    /// Stop background tasks and flush pending cache writes
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let (monitor, warming) = {
            let mut background = self.background.lock();
            (background.monitor.take(), background.warming.take())
        };
        if let Some(monitor) = monitor {
            monitor.shutdown().await;
        }
        if let Some(warming) = warming {
            if let Err(err) = warming.await {
                tracing::warn!(error = %err, "cache warming task failed");
            }
        }
        self.cache.shutdown().await;
        tracing::info!("recommendation engine shut down");
    }
}

fn catalog_key(limit: usize) -> CacheKey {
    CacheKey::shared(CATALOG_NAMESPACE, [limit.to_string()]).with_tag(CATALOG_TAG)
}

#[allow(clippy::cast_precision_loss)]
fn elapsed_ms(started: Instant) -> f64 {
    let elapsed: Duration = started.elapsed();
    elapsed.as_secs_f64() * 1_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use scent_bandit::BanditConfig;
    use scent_test_utils::{profile, sample_content_store, sample_profile_store};

    fn engine(config: EngineConfig) -> RecommendationEngine {
        EngineBuilder::new(config)
            .with_content_store(Arc::new(sample_content_store()))
            .with_profile_store(Arc::new(sample_profile_store()))
            .build()
            .unwrap()
    }

    fn seeded() -> EngineConfig {
        EngineConfig::new().with_bandit(BanditConfig::default().with_seed(11))
    }

    #[test]
    fn cache_key_reflects_request_shape() {
        let config = EngineConfig::default();
        let query = profile(&["fresh"], &[1.0], "s");
        let options = RecommendationOptions::new();
        let plan = RequestPlan::new(&config, &options, Algorithm::Hybrid);
        let shared = plan.cache_key(&query, None);
        let personal = plan.cache_key(&query, Some("ava"));

        assert!(shared.as_str().starts_with("recs:s:"));
        assert!(shared.as_str().ends_with(":hybrid:10:standard"));
        assert!(personal.is_personalized());
        assert_ne!(shared.as_str(), personal.as_str());

        let excluding = RequestPlan::new(
            &config,
            &options.clone().excluding(["b", "a", "a"]),
            Algorithm::Hybrid,
        );
        assert!(excluding.cache_key(&query, None).as_str().ends_with(":x=a,b"));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.recommendation.max_concurrent_generations = 0;
        assert!(matches!(
            EngineBuilder::new(config).build(),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn unregistered_providers_are_disabled() {
        let engine = engine(seeded());
        assert!(engine
            .cost_governor()
            .providers()
            .iter()
            .all(|p| !p.enabled));
    }

    #[tokio::test]
    async fn content_based_ranking_uses_catalog() {
        let engine = engine(seeded());
        let query = engine.generate_profile(
            &scent_test_utils::quiz(&["sophisticated", "confident"], &[0.6, 0.4]),
            "s1",
        );
        let response = engine
            .get_recommendations(
                &query,
                RecommendationOptions::new()
                    .with_algorithm(Algorithm::ContentBased)
                    .with_limit(3),
            )
            .await
            .unwrap();

        assert_eq!(response.items.len(), 3);
        assert_eq!(response.items[0].item.id, "noir-01");
        assert_eq!(response.performance.candidates, 6);
        assert_eq!(response.performance.template_explanations, 3);
        assert!(response.caching.stored);
    }

    #[tokio::test]
    async fn collaborative_without_neighbours_falls_back() {
        let engine = EngineBuilder::new(seeded())
            .with_content_store(Arc::new(sample_content_store()))
            .build()
            .unwrap();
        let query = profile(&["calm"], &[1.0], "s");
        let response = engine
            .get_recommendations(
                &query,
                RecommendationOptions::new().with_algorithm(Algorithm::Collaborative),
            )
            .await
            .unwrap();

        assert_eq!(response.performance.algorithm, Algorithm::ContentBased);
        assert_eq!(response.performance.requested_algorithm, Algorithm::Collaborative);
        assert_eq!(response.performance.degradations, vec![Degradation::NoNeighbours]);
        assert!(response.caching.stored);
    }

    #[tokio::test]
    async fn empty_catalog_returns_no_items() {
        let engine = EngineBuilder::new(seeded()).build().unwrap();
        let query = profile(&["calm"], &[1.0], "s");
        let response = engine
            .get_recommendations(&query, RecommendationOptions::new())
            .await
            .unwrap();
        assert!(response.items.is_empty());
    }

    #[tokio::test]
    async fn require_healthy_passes_before_first_tick() {
        let engine = engine(seeded());
        assert!(engine.require_healthy().is_ok());
    }
}
