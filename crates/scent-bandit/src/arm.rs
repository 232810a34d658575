//! Arms and their Beta posteriors

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BanditError;

/// Standard deviation of the uniform Beta(1, 1) prior
const UNIFORM_STD_DEV: f64 = 0.288_675_134_594_812_9;

/// Recommendation algorithm managed as a bandit arm
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Profile-to-content vector similarity
    ContentBased,
    /// Favorites of similar profiles
    Collaborative,
    /// Weighted blend of both
    Hybrid,
}

impl Algorithm {
    /// Every algorithm, in declaration order
    pub const ALL: [Algorithm; 3] = [
        Algorithm::ContentBased,
        Algorithm::Collaborative,
        Algorithm::Hybrid,
    ];

    /// Wire name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::ContentBased => "content_based",
            Algorithm::Collaborative => "collaborative",
            Algorithm::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = BanditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content_based" => Ok(Algorithm::ContentBased),
            "collaborative" => Ok(Algorithm::Collaborative),
            "hybrid" => Ok(Algorithm::Hybrid),
            other => Err(BanditError::UnknownArm(other.to_string())),
        }
    }
}

/// Beta(alpha, beta) posterior over an arm's success probability
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetaPosterior {
    /// Pseudo-successes
    pub alpha: f64,
    /// Pseudo-failures
    pub beta: f64,
}

impl BetaPosterior {
    /// Uninformative Beta(1, 1) prior
    #[inline]
    #[must_use]
    pub const fn uniform() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }

    /// Create a posterior with the given parameters
    #[inline]
    #[must_use]
    pub const fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }

    /// Parameters are finite and strictly positive
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.alpha.is_finite() && self.beta.is_finite() && self.alpha > 0.0 && self.beta > 0.0
    }

    /// Posterior mean `alpha / (alpha + beta)`
    #[inline]
    #[must_use]
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Posterior variance
    #[inline]
    #[must_use]
    pub fn variance(&self) -> f64 {
        let sum = self.alpha + self.beta;
        (self.alpha * self.beta) / (sum * sum * (sum + 1.0))
    }

    /// Certainty in `[0, 1]`: 0 at the uniform prior, approaching 1 as the
    /// posterior narrows
    #[inline]
    #[must_use]
    pub fn confidence(&self) -> f64 {
        (1.0 - self.variance().sqrt() / UNIFORM_STD_DEV).clamp(0.0, 1.0)
    }
}

impl Default for BetaPosterior {
    fn default() -> Self {
        Self::uniform()
    }
}

/// Exported arm record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditArm {
    /// Algorithm the arm stands for
    pub algorithm_name: Algorithm,
    /// Posterior alpha
    pub alpha: f64,
    /// Posterior beta
    pub beta: f64,
    /// Posterior mean
    pub success_rate: f64,
    /// Times the arm was selected
    pub total_selections: u64,
    /// Observed successes
    #[serde(default)]
    pub successes: u64,
    /// Observed failures
    #[serde(default)]
    pub failures: u64,
}

/// Per-arm instrumentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmStats {
    /// Algorithm
    pub algorithm: Algorithm,
    /// Times selected
    pub selections: u64,
    /// Observed successes
    pub successes: u64,
    /// Observed failures
    pub failures: u64,
    /// Posterior mean
    pub success_rate: f64,
    /// Posterior certainty in `[0, 1]`
    pub confidence: f64,
    /// Monte Carlo probability that this arm is the best
    pub win_probability: f64,
}
