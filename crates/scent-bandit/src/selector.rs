//! Thompson Sampling selector
//!
//! Each decision context owns an independent set of arms. Posteriors live in
//! a [`DashMap`] keyed by `(context, arm)`, so an update only locks the shard
//! holding that arm and unrelated arms never contend.

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::arm::{Algorithm, ArmStats, BanditArm, BetaPosterior};
use crate::error::BanditError;

/// Scope a bandit decision is made in
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionContext {
    /// Shared arms for all traffic
    #[default]
    Global,
    /// Arms for one user segment
    Segment(String),
}

impl DecisionContext {
    /// Context for a named segment
    #[must_use]
    pub fn segment(name: impl Into<String>) -> Self {
        Self::Segment(name.into())
    }
}

impl fmt::Display for DecisionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Segment(name) => write!(f, "segment:{name}"),
        }
    }
}

/// Observed user reaction to a served recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Purchase, sample order or save
    Converted,
    /// Explicit thumbs-up
    PositiveFeedback,
    /// Explicit thumbs-down
    NegativeFeedback,
    /// Shown but not engaged with
    Ignored,
}

impl Outcome {
    /// Whether the outcome counts as a success for the posterior
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Converted | Outcome::PositiveFeedback)
    }
}

/// Learning phase of one context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanditPhase {
    /// Too few observations to trust any posterior
    ColdStart,
    /// Exploring, no clear winner yet
    Learning,
    /// Leader wins with high probability
    Converged,
}

/// Selector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BanditConfig {
    /// Arms competing in every context
    pub arms: Vec<Algorithm>,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
    /// Observations required before leaving cold start
    pub min_observations: u64,
    /// Leader win probability that marks convergence
    pub convergence_probability: f64,
    /// Joint posterior draws used to estimate win probabilities
    pub win_probability_draws: usize,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            arms: Algorithm::ALL.to_vec(),
            seed: None,
            min_observations: 30,
            convergence_probability: 0.95,
            win_probability_draws: 500,
        }
    }
}

impl BanditConfig {
    /// Use a fixed seed
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Restrict the competing arms
    #[must_use]
    pub fn with_arms(mut self, arms: impl IntoIterator<Item = Algorithm>) -> Self {
        self.arms = arms.into_iter().collect();
        self
    }

    /// Reject unusable settings
    pub fn validate(&self) -> Result<(), BanditError> {
        if self.arms.is_empty() {
            return Err(BanditError::InvalidConfig("at least one arm is required".into()));
        }
        let mut unique = self.arms.clone();
        unique.sort();
        unique.dedup();
        if unique.len() != self.arms.len() {
            return Err(BanditError::InvalidConfig("duplicate arms".into()));
        }
        if !(0.0..=1.0).contains(&self.convergence_probability) {
            return Err(BanditError::InvalidConfig(format!(
                "convergence_probability {} outside [0, 1]",
                self.convergence_probability
            )));
        }
        if self.win_probability_draws == 0 {
            return Err(BanditError::InvalidConfig(
                "win_probability_draws must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Instrumentation for one context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditReport {
    /// Context reported on
    pub context: DecisionContext,
    /// Learning phase
    pub phase: BanditPhase,
    /// Selections across arms
    pub total_selections: u64,
    /// Recorded outcomes across arms
    pub total_observations: u64,
    /// Arm with the highest win probability
    pub leader: Option<Algorithm>,
    /// Per-arm statistics in configured arm order
    pub arms: Vec<ArmStats>,
}

impl BanditReport {
    /// Statistics for one arm
    #[must_use]
    pub fn arm(&self, algorithm: Algorithm) -> Option<&ArmStats> {
        self.arms.iter().find(|a| a.algorithm == algorithm)
    }
}

/// Arms of one context in an exported snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextState {
    /// Context
    pub context: DecisionContext,
    /// Arm records
    pub arms: Vec<BanditArm>,
}

/// Serializable snapshot of every posterior
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BanditState {
    /// Contexts with their arms
    pub contexts: Vec<ContextState>,
}

#[derive(Debug, Clone, Copy, Default)]
struct ArmState {
    posterior: BetaPosterior,
    selections: u64,
    successes: u64,
    failures: u64,
}

impl ArmState {
    fn to_record(self, algorithm: Algorithm) -> BanditArm {
        BanditArm {
            algorithm_name: algorithm,
            alpha: self.posterior.alpha,
            beta: self.posterior.beta,
            success_rate: self.posterior.mean(),
            total_selections: self.selections,
            successes: self.successes,
            failures: self.failures,
        }
    }
}

type ArmKey = (DecisionContext, Algorithm);

/// Thompson Sampling over recommendation algorithms
pub struct ThompsonSelector {
    config: BanditConfig,
    arms: DashMap<ArmKey, ArmState>,
    rng: Mutex<ChaCha8Rng>,
    corruption_resets: AtomicU64,
}

impl fmt::Debug for ThompsonSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThompsonSelector")
            .field("config", &self.config)
            .field("arms", &self.arms.len())
            .finish_non_exhaustive()
    }
}

impl Default for ThompsonSelector {
    fn default() -> Self {
        Self::build(BanditConfig::default())
    }
}

impl ThompsonSelector {
    /// Create a selector, validating the configuration
    pub fn new(config: BanditConfig) -> Result<Self, BanditError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: BanditConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            config,
            arms: DashMap::new(),
            rng: Mutex::new(rng),
            corruption_resets: AtomicU64::new(0),
        }
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BanditConfig {
        &self.config
    }

    /// Pick an arm by sampling every posterior and taking the maximum
    ///
    /// The chosen arm's selection count is incremented.
    pub fn select_arm(&self, context: &DecisionContext) -> Algorithm {
        let posteriors = self.posteriors(context);

        let chosen = {
            let mut rng = self.rng.lock();
            let mut best = (self.config.arms[0], f64::NEG_INFINITY);
            for (algorithm, posterior) in &posteriors {
                let sample = draw(&mut rng, posterior);
                if sample > best.1 {
                    best = (*algorithm, sample);
                }
            }
            best.0
        };

        if let Some(mut state) = self.arms.get_mut(&(context.clone(), chosen)) {
            state.selections += 1;
        }
        tracing::trace!(context = %context, arm = %chosen, "arm selected");
        chosen
    }

    /// Update an arm's posterior with a binary reward
    pub fn record_outcome(&self, context: &DecisionContext, arm: Algorithm, success: bool) {
        if !self.config.arms.contains(&arm) {
            tracing::warn!(context = %context, arm = %arm, "outcome for unconfigured arm ignored");
            return;
        }
        let mut state = self.arms.entry((context.clone(), arm)).or_default();
        if !state.posterior.is_valid() {
            self.repair(context, arm, &mut state);
        }
        if success {
            state.posterior.alpha += 1.0;
            state.successes += 1;
        } else {
            state.posterior.beta += 1.0;
            state.failures += 1;
        }
        tracing::debug!(
            context = %context,
            arm = %arm,
            success,
            alpha = state.posterior.alpha,
            beta = state.posterior.beta,
            "bandit outcome recorded"
        );
    }

    /// Record a user reaction; conversions and positive feedback are successes
    pub fn record_feedback(&self, context: &DecisionContext, arm: Algorithm, outcome: Outcome) {
        self.record_outcome(context, arm, outcome.is_success());
    }

    /// Record an outcome for an arm given by wire name
    pub fn record_named(
        &self,
        context: &DecisionContext,
        arm: &str,
        success: bool,
    ) -> Result<(), BanditError> {
        let algorithm: Algorithm = arm.parse()?;
        if !self.config.arms.contains(&algorithm) {
            return Err(BanditError::UnknownArm(arm.to_string()));
        }
        self.record_outcome(context, algorithm, success);
        Ok(())
    }

    /// Snapshot of one arm
    #[must_use]
    pub fn arm(&self, context: &DecisionContext, algorithm: Algorithm) -> BanditArm {
        self.arms
            .get(&(context.clone(), algorithm))
            .map(|s| *s)
            .unwrap_or_default()
            .to_record(algorithm)
    }

    /// Phase, totals and per-arm statistics for a context
    #[must_use]
    pub fn report(&self, context: &DecisionContext) -> BanditReport {
        let states: Vec<(Algorithm, ArmState)> = self
            .config
            .arms
            .iter()
            .map(|a| {
                let state = self
                    .arms
                    .get(&(context.clone(), *a))
                    .map(|s| *s)
                    .unwrap_or_default();
                (*a, state)
            })
            .collect();

        let posteriors: Vec<BetaPosterior> = states
            .iter()
            .map(|(_, s)| {
                if s.posterior.is_valid() {
                    s.posterior
                } else {
                    BetaPosterior::uniform()
                }
            })
            .collect();
        let wins = self.win_probabilities(&posteriors);

        let total_selections = states.iter().map(|(_, s)| s.selections).sum();
        let total_observations: u64 = states.iter().map(|(_, s)| s.successes + s.failures).sum();

        let leader = wins
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| states[i].0);
        let leader_win = wins.iter().copied().fold(0.0_f64, f64::max);

        let phase = if total_observations < self.config.min_observations {
            BanditPhase::ColdStart
        } else if leader_win >= self.config.convergence_probability {
            BanditPhase::Converged
        } else {
            BanditPhase::Learning
        };

        let arms = states
            .iter()
            .zip(posteriors.iter().zip(wins.iter()))
            .map(|((algorithm, state), (posterior, win))| ArmStats {
                algorithm: *algorithm,
                selections: state.selections,
                successes: state.successes,
                failures: state.failures,
                success_rate: posterior.mean(),
                confidence: posterior.confidence(),
                win_probability: *win,
            })
            .collect();

        BanditReport {
            context: context.clone(),
            phase,
            total_selections,
            total_observations,
            leader,
            arms,
        }
    }

    /// Contexts with at least one arm touched
    #[must_use]
    pub fn contexts(&self) -> Vec<DecisionContext> {
        let mut contexts: Vec<_> = self.arms.iter().map(|e| e.key().0.clone()).collect();
        contexts.sort();
        contexts.dedup();
        contexts
    }

    /// Selections across all contexts
    #[must_use]
    pub fn total_selections(&self) -> u64 {
        self.arms.iter().map(|e| e.selections).sum()
    }

    /// Arms reset because of invalid posterior parameters
    #[must_use]
    pub fn corruption_resets(&self) -> u64 {
        self.corruption_resets.load(Ordering::Relaxed)
    }

    /// Snapshot every posterior
    #[must_use]
    pub fn export_state(&self) -> BanditState {
        let mut contexts: Vec<ContextState> = Vec::new();
        for context in self.contexts() {
            let arms = self
                .config
                .arms
                .iter()
                .filter_map(|a| {
                    self.arms
                        .get(&(context.clone(), *a))
                        .map(|s| s.to_record(*a))
                })
                .collect();
            contexts.push(ContextState { context, arms });
        }
        BanditState { contexts }
    }

    /// Restore posteriors, resetting any invalid arm to Beta(1, 1)
    ///
    /// Returns the number of arms that had to be repaired. Arms outside the
    /// configured set are skipped.
    pub fn import_state(&self, state: BanditState) -> usize {
        let mut repaired = 0;
        for ctx in state.contexts {
            for record in ctx.arms {
                if !self.config.arms.contains(&record.algorithm_name) {
                    tracing::warn!(
                        context = %ctx.context,
                        arm = %record.algorithm_name,
                        "imported arm not configured, skipped"
                    );
                    continue;
                }
                let mut arm = ArmState {
                    posterior: BetaPosterior::new(record.alpha, record.beta),
                    selections: record.total_selections,
                    successes: record.successes,
                    failures: record.failures,
                };
                if !arm.posterior.is_valid() {
                    self.repair(&ctx.context, record.algorithm_name, &mut arm);
                    repaired += 1;
                }
                self.arms.insert((ctx.context.clone(), record.algorithm_name), arm);
            }
        }
        tracing::info!(repaired, "bandit state imported");
        repaired
    }

    /// Return one arm to its cold-start prior
    pub fn reset_arm(&self, context: &DecisionContext, algorithm: Algorithm) {
        self.arms.insert((context.clone(), algorithm), ArmState::default());
        tracing::info!(context = %context, arm = %algorithm, "bandit arm reset");
    }

    /// Return every arm in a context to its cold-start prior
    pub fn reset_context(&self, context: &DecisionContext) {
        for algorithm in &self.config.arms {
            self.arms.insert((context.clone(), *algorithm), ArmState::default());
        }
        tracing::info!(context = %context, "bandit context reset");
    }

    /// Current posteriors of a context, creating cold-start arms and
    /// repairing corrupted ones
    fn posteriors(&self, context: &DecisionContext) -> Vec<(Algorithm, BetaPosterior)> {
        self.config
            .arms
            .iter()
            .map(|algorithm| {
                let mut state = self.arms.entry((context.clone(), *algorithm)).or_default();
                if !state.posterior.is_valid() {
                    self.repair(context, *algorithm, &mut state);
                }
                (*algorithm, state.posterior)
            })
            .collect()
    }

    fn repair(&self, context: &DecisionContext, algorithm: Algorithm, state: &mut ArmState) {
        let err = BanditError::StateCorruption {
            arm: algorithm.name().to_string(),
            alpha: state.posterior.alpha,
            beta: state.posterior.beta,
        };
        tracing::warn!(context = %context, error = %err, "resetting arm to uniform prior");
        state.posterior = BetaPosterior::uniform();
        self.corruption_resets.fetch_add(1, Ordering::Relaxed);
    }

    /// Fraction of joint posterior draws each arm wins
    #[allow(clippy::cast_precision_loss)]
    fn win_probabilities(&self, posteriors: &[BetaPosterior]) -> Vec<f64> {
        if posteriors.is_empty() {
            return Vec::new();
        }
        let draws = self.config.win_probability_draws;
        let mut wins = vec![0_usize; posteriors.len()];
        let mut rng = self.rng.lock();
        for _ in 0..draws {
            let mut best = (0, f64::NEG_INFINITY);
            for (i, posterior) in posteriors.iter().enumerate() {
                let sample = draw(&mut rng, posterior);
                if sample > best.1 {
                    best = (i, sample);
                }
            }
            wins[best.0] += 1;
        }
        wins.into_iter().map(|w| w as f64 / draws as f64).collect()
    }
}

fn draw(rng: &mut ChaCha8Rng, posterior: &BetaPosterior) -> f64 {
    match Beta::new(posterior.alpha, posterior.beta) {
        Ok(dist) => dist.sample(rng),
        Err(_) => posterior.mean(),
    }
}
