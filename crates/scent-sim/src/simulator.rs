//! Bandit and cache workload simulators
//!
//! Both simulators are seeded and reproducible. The bandit simulator checks
//! that Thompson sampling concentrates on the best arm; the cache simulator
//! checks that steady archetype traffic is served mostly from cache.
//!
//! ```text
//!  rng ──► archetype ──► engine.get_recommendations ──► hit / miss
//!                              │
//!                    bandit arm ──► simulated click (true rate) ──► record_outcome
//! ```

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use scent_bandit::{Algorithm, ArmStats, BanditConfig, DecisionContext, ThompsonSelector};
use scent_core::{
    EngineBuilder, EngineConfig, EngineError, PerformanceReport, RecommendationEngine,
    RecommendationOptions,
};
use scent_profile::{InMemoryProfileStore, QuizResponse};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::catalog::{demo_content_store, ARCHETYPES, SEED_USERS};

/// Hit rate steady traffic is expected to reach
pub const TARGET_HIT_RATE: f64 = 0.8;

/// True success rates used when none are given
pub const DEFAULT_RATES: [(Algorithm, f64); 3] = [
    (Algorithm::ContentBased, 0.78),
    (Algorithm::Collaborative, 0.72),
    (Algorithm::Hybrid, 0.82),
];

fn validate_rates(rates: &[(Algorithm, f64)]) -> Result<(), EngineError> {
    if rates.is_empty() {
        return Err(EngineError::Validation("at least one arm rate is required".into()));
    }
    if let Some((algorithm, rate)) = rates.iter().find(|(_, r)| !(0.0..=1.0).contains(r)) {
        return Err(EngineError::Validation(format!(
            "rate {rate} for {algorithm} outside [0, 1]"
        )));
    }
    Ok(())
}

fn rate_of(rates: &[(Algorithm, f64)], algorithm: Algorithm) -> f64 {
    rates
        .iter()
        .find(|(a, _)| *a == algorithm)
        .map_or(0.0, |(_, r)| *r)
}

// ---------------------------------------------------------------------------
// Bandit
// ---------------------------------------------------------------------------

/// Bandit simulation parameters
#[derive(Debug, Clone, Serialize)]
pub struct BanditSimConfig {
    /// Seed for both the selector and the simulated users
    pub seed: u64,
    /// Selections to play
    pub rounds: u32,
    /// True success rate of each arm
    pub rates: Vec<(Algorithm, f64)>,
}

impl Default for BanditSimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            rounds: 20_000,
            rates: DEFAULT_RATES.to_vec(),
        }
    }
}

/// Outcome of a bandit simulation
#[derive(Debug, Clone, Serialize)]
pub struct BanditSimReport {
    /// Parameters used
    pub config: BanditSimConfig,
    /// Arm with the highest true rate
    pub best_arm: Algorithm,
    /// Arm the selector ended up believing is best
    pub leader: Option<Algorithm>,
    /// Sum of `best rate - chosen rate` over all rounds
    pub cumulative_regret: f64,
    /// Mean regret per round
    pub regret_per_round: f64,
    /// Mean regret per round over the second half
    pub late_regret_per_round: f64,
    /// Mean regret per round of uniform random play
    pub uniform_regret_per_round: f64,
    /// Final per-arm statistics
    pub arms: Vec<ArmStats>,
    /// Wall-clock time in milliseconds
    pub elapsed_ms: u128,
}

impl BanditSimReport {
    /// The selector found the best arm and beat uniform play
    #[must_use]
    pub fn passed(&self) -> bool {
        self.leader == Some(self.best_arm) && self.regret_per_round < self.uniform_regret_per_round
    }

    /// Human-readable report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        report.push_str("=== Bandit Simulation ===\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!("Rounds: {}\n", self.config.rounds));
        report.push_str(&format!("Best Arm: {}\n", self.best_arm));
        report.push_str(&format!(
            "Leader: {}\n",
            self.leader.map_or_else(|| "none".to_string(), |a| a.to_string())
        ));
        report.push_str(&format!("Cumulative Regret: {:.2}\n", self.cumulative_regret));
        report.push_str(&format!(
            "Regret/Round: {:.4} (late {:.4}, uniform {:.4})\n",
            self.regret_per_round, self.late_regret_per_round, self.uniform_regret_per_round
        ));
        for arm in &self.arms {
            report.push_str(&format!(
                "  {:<14} selections {:>6}  mean {:.3}  win {:.3}\n",
                arm.algorithm.name(),
                arm.selections,
                arm.success_rate,
                arm.win_probability
            ));
        }
        report.push_str(&format!("Elapsed: {}ms\n", self.elapsed_ms));
        report
    }
}

/// Play the selector against fixed success rates
#[allow(clippy::cast_precision_loss)]
pub fn run_bandit_simulation(config: BanditSimConfig) -> Result<BanditSimReport, EngineError> {
    validate_rates(&config.rates)?;
    let started = Instant::now();
    let arms: Vec<Algorithm> = config.rates.iter().map(|(a, _)| *a).collect();
    let selector = ThompsonSelector::new(BanditConfig {
        arms,
        ..BanditConfig::default().with_seed(config.seed)
    })?;
    let (best_arm, best) = config
        .rates
        .iter()
        .copied()
        .fold((config.rates[0].0, f64::MIN), |acc, (a, r)| {
            if r > acc.1 {
                (a, r)
            } else {
                acc
            }
        });
    let uniform =
        config.rates.iter().map(|(_, r)| best - r).sum::<f64>() / config.rates.len() as f64;

    let context = DecisionContext::Global;
    let mut users = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(1));
    let half = config.rounds / 2;
    let (mut early, mut late) = (0.0, 0.0);
    for round in 0..config.rounds {
        let arm = selector.select_arm(&context);
        let rate = rate_of(&config.rates, arm);
        if round < half {
            early += best - rate;
        } else {
            late += best - rate;
        }
        selector.record_outcome(&context, arm, users.gen_bool(rate));
    }

    let report = selector.report(&context);
    let rounds = f64::from(config.rounds.max(1));
    let late_rounds = f64::from((config.rounds - half).max(1));
    tracing::info!(
        rounds = config.rounds,
        leader = ?report.leader,
        regret = early + late,
        "bandit simulation finished"
    );
    Ok(BanditSimReport {
        best_arm,
        leader: report.leader,
        cumulative_regret: early + late,
        regret_per_round: (early + late) / rounds,
        late_regret_per_round: late / late_rounds,
        uniform_regret_per_round: uniform,
        arms: report.arms,
        elapsed_ms: started.elapsed().as_millis(),
        config,
    })
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Cache simulation parameters
#[derive(Debug, Clone)]
pub struct CacheSimConfig {
    /// Seed for traffic and the engine's bandit
    pub seed: u64,
    /// Requests to send
    pub requests: u32,
    /// Distinct archetypes in the traffic, at most the built-in set
    pub archetypes: usize,
    /// Attach explanations to every response
    pub explain: bool,
    /// Engine configuration
    pub engine: EngineConfig,
}

impl Default for CacheSimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            requests: 500,
            archetypes: 5,
            explain: true,
            engine: EngineConfig::default(),
        }
    }
}

/// Outcome of a cache simulation
#[derive(Debug, Clone, Serialize)]
pub struct CacheSimReport {
    /// Seed used
    pub seed: u64,
    /// Requests sent
    pub requests: u32,
    /// Requests that failed
    pub failed: u32,
    /// Responses served from cache
    pub hits: u32,
    /// `hits / requests`
    pub request_hit_rate: f64,
    /// Engine view after the run, including cache metrics
    pub performance: PerformanceReport,
    /// Wall-clock time in milliseconds
    pub elapsed_ms: u128,
}

impl CacheSimReport {
    /// Every request was served and the request hit rate reached the target
    ///
    /// Explanation lookups also count toward the cache-level hit rate, so
    /// that figure is reported but not judged.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failed == 0 && self.request_hit_rate >= TARGET_HIT_RATE
    }

    /// Human-readable report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let cache = &self.performance.cache;
        let mut report = String::new();
        report.push_str("=== Cache Simulation ===\n");
        report.push_str(&format!("Seed: {}\n", self.seed));
        report.push_str(&format!("Requests: {} ({} failed)\n", self.requests, self.failed));
        report.push_str(&format!(
            "Request Hit Rate: {:.3} ({} hits, target {TARGET_HIT_RATE})\n",
            self.request_hit_rate, self.hits
        ));
        report.push_str(&format!("Cache Hit Rate: {:.3}\n", cache.hit_rate));
        report.push_str(&format!(
            "Cache: {} entries, {} evictions, {:.1}us avg lookup\n",
            cache.current_size, cache.evictions, cache.avg_retrieval_latency_us
        ));
        report.push_str(&format!(
            "Latency: avg {:.2}ms p95 {:.2}ms\n",
            self.performance.requests.avg_latency_ms, self.performance.requests.p95_latency_ms
        ));
        report.push_str(&format!(
            "Health: {}\n",
            self.performance
                .health_status
                .map_or_else(|| "unknown".to_string(), |s| s.to_string())
        ));
        report.push_str(&format!("Elapsed: {}ms\n", self.elapsed_ms));
        report
    }
}

/// Engine over the demo catalog with the seed users stored
async fn demo_engine(config: EngineConfig) -> Result<RecommendationEngine, EngineError> {
    let engine = EngineBuilder::new(config)
        .with_content_store(Arc::new(demo_content_store()))
        .with_profile_store(Arc::new(InMemoryProfileStore::new()))
        .build()?;
    for (user, traits, favourites) in SEED_USERS {
        engine
            .generate_and_store_profile(
                &[archetype_response(traits)],
                &format!("seed-{user}"),
                &format!("p-{user}"),
                Some(user),
                favourites.iter().map(|s| (*s).to_string()).collect(),
            )
            .await?;
    }
    Ok(engine)
}

#[allow(clippy::cast_precision_loss)]
fn archetype_response(traits: &[&str]) -> QuizResponse {
    let weight = 1.0 / traits.len().max(1) as f64;
    QuizResponse::new(
        "archetype",
        traits.iter().copied(),
        std::iter::repeat(weight).take(traits.len()),
    )
}

/// Send archetype traffic through a full engine
///
/// Each response's algorithm gets a simulated click at its [`DEFAULT_RATES`]
/// rate, so the engine's bandit learns while the cache warms up.
pub async fn run_cache_simulation(config: CacheSimConfig) -> Result<CacheSimReport, EngineError> {
    if config.archetypes == 0 || config.archetypes > ARCHETYPES.len() {
        return Err(EngineError::Validation(format!(
            "archetypes must be between 1 and {}",
            ARCHETYPES.len()
        )));
    }
    let started = Instant::now();
    let mut engine_config = config.engine.clone();
    engine_config.bandit.seed = Some(config.seed);
    let engine = demo_engine(engine_config).await?;

    let profiles: Vec<_> = ARCHETYPES[..config.archetypes]
        .iter()
        .enumerate()
        .map(|(i, traits)| {
            engine.generate_profile(&[archetype_response(traits)], &format!("visitor-{i}"))
        })
        .collect();

    let mut traffic = ChaCha8Rng::seed_from_u64(config.seed);
    let (mut hits, mut failed) = (0, 0);
    for _ in 0..config.requests {
        let profile = &profiles[traffic.gen_range(0..profiles.len())];
        let mut options = RecommendationOptions::new();
        if !config.explain {
            options = options.without_explanations();
        }
        match engine.get_recommendations(profile, options).await {
            Ok(response) => {
                if response.caching.cache_hit {
                    hits += 1;
                }
                let algorithm = response.performance.requested_algorithm;
                let clicked = traffic.gen_bool(rate_of(&DEFAULT_RATES, algorithm));
                engine.record_outcome(&DecisionContext::Global, algorithm, clicked);
            }
            Err(err) => {
                failed += 1;
                tracing::warn!(error = %err, "simulated request failed");
            }
        }
    }

    engine.check_health().await;
    let performance = engine.performance_report();
    engine.shutdown().await;
    tracing::info!(
        requests = config.requests,
        hits,
        hit_rate = performance.cache.hit_rate,
        "cache simulation finished"
    );
    Ok(CacheSimReport {
        seed: config.seed,
        requests: config.requests,
        failed,
        hits,
        request_hit_rate: f64::from(hits) / f64::from(config.requests.max(1)),
        performance,
        elapsed_ms: started.elapsed().as_millis(),
    })
}

// ---------------------------------------------------------------------------
// Combined report
// ---------------------------------------------------------------------------

/// Both simulations with a verdict
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Engine version
    pub version: &'static str,
    /// Bandit run
    pub bandit: BanditSimReport,
    /// Cache run
    pub cache: CacheSimReport,
    /// Both runs passed
    pub passed: bool,
}

impl SimulationReport {
    /// Human-readable report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        report.push_str(&format!("Scent Engine Report (v{})\n", self.version));
        report.push_str("==========================\n\n");
        report.push_str(&self.bandit.generate_text());
        report.push('\n');
        report.push_str(&self.cache.generate_text());
        report.push('\n');
        report.push_str(&format!(
            "Status: {}\n",
            if self.passed { "PASSED" } else { "FAILED" }
        ));
        report
    }
}

/// Run both simulations with the given configurations
pub async fn run_report(
    bandit: BanditSimConfig,
    cache: CacheSimConfig,
) -> Result<SimulationReport, EngineError> {
    let bandit = run_bandit_simulation(bandit)?;
    let cache = run_cache_simulation(cache).await?;
    Ok(SimulationReport {
        version: scent_core::VERSION,
        passed: bandit.passed() && cache.passed(),
        bandit,
        cache,
    })
}
