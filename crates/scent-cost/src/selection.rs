//! Provider ranking under workload constraints

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::provider::ProviderProfile;

/// Relative weight of each scoring term
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionWeights {
    /// Weight of provider accuracy
    pub accuracy: f64,
    /// Weight of relative speed
    pub latency: f64,
    /// Weight of relative cheapness
    pub cost: f64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            accuracy: 0.5,
            latency: 0.2,
            cost: 0.3,
        }
    }
}

/// Requirements of one generation workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadProfile {
    /// Tokens the workload is expected to consume
    pub expected_tokens: u64,
    /// Lowest acceptable accuracy
    pub min_accuracy: f64,
    /// Highest acceptable average latency
    pub max_latency_ms: u64,
    /// Caller's ceiling on projected cost
    pub max_cost_usd: Option<Decimal>,
    /// Scoring weights
    #[serde(default)]
    pub weights: SelectionWeights,
}

impl Default for WorkloadProfile {
    fn default() -> Self {
        Self {
            expected_tokens: 400,
            min_accuracy: 0.0,
            max_latency_ms: 5_000,
            max_cost_usd: None,
            weights: SelectionWeights::default(),
        }
    }
}

impl WorkloadProfile {
    /// Workload expecting `tokens`
    #[must_use]
    pub fn new(expected_tokens: u64) -> Self {
        Self {
            expected_tokens,
            ..Self::default()
        }
    }

    /// Set the accuracy floor
    #[must_use]
    pub fn with_min_accuracy(mut self, min_accuracy: f64) -> Self {
        self.min_accuracy = min_accuracy;
        self
    }

    /// Set the latency ceiling
    #[must_use]
    pub fn with_max_latency_ms(mut self, max_latency_ms: u64) -> Self {
        self.max_latency_ms = max_latency_ms;
        self
    }

    /// Set the cost ceiling
    #[must_use]
    pub fn with_max_cost(mut self, max_cost_usd: Decimal) -> Self {
        self.max_cost_usd = Some(max_cost_usd);
        self
    }

    /// Set the scoring weights
    #[must_use]
    pub fn with_weights(mut self, weights: SelectionWeights) -> Self {
        self.weights = weights;
        self
    }

    fn admits(&self, provider: &ProviderProfile) -> bool {
        provider.enabled
            && provider.accuracy >= self.min_accuracy
            && provider.avg_latency_ms <= self.max_latency_ms
            && self
                .max_cost_usd
                .map_or(true, |ceiling| provider.price(self.expected_tokens) <= ceiling)
    }
}

/// A provider with its projected cost and score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredProvider {
    /// Provider name
    pub name: String,
    /// Cost of the workload at this provider's rate
    pub projected_cost: Decimal,
    /// Weighted score, higher is better
    pub score: f64,
}

/// Chosen providers for a workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSelection {
    /// Best-scoring provider
    pub primary: ScoredProvider,
    /// Runner-up, tried when the primary fails
    pub fallback: Option<ScoredProvider>,
}

impl ProviderSelection {
    /// Providers in attempt order
    pub fn attempts(&self) -> impl Iterator<Item = &ScoredProvider> {
        std::iter::once(&self.primary).chain(self.fallback.as_ref())
    }
}

/// Providers admitted by the workload, best first
///
/// Latency and cost terms are normalised by the largest value among admitted
/// providers. Ties break by name.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rank(providers: &[ProviderProfile], workload: &WorkloadProfile) -> Vec<ScoredProvider> {
    let admitted: Vec<(&ProviderProfile, Decimal)> = providers
        .iter()
        .filter(|p| workload.admits(p))
        .map(|p| (p, p.price(workload.expected_tokens)))
        .collect();

    let max_latency = admitted
        .iter()
        .map(|(p, _)| p.avg_latency_ms)
        .max()
        .unwrap_or(0) as f64;
    let max_cost = admitted
        .iter()
        .map(|(_, cost)| *cost)
        .max()
        .unwrap_or(Decimal::ZERO);

    let weights = workload.weights;
    let mut scored: Vec<ScoredProvider> = admitted
        .into_iter()
        .map(|(provider, projected_cost)| {
            let latency_term = if max_latency > 0.0 {
                1.0 - provider.avg_latency_ms as f64 / max_latency
            } else {
                1.0
            };
            let cost_term = if max_cost.is_zero() {
                1.0
            } else {
                1.0 - (projected_cost / max_cost).to_f64().unwrap_or(1.0)
            };
            ScoredProvider {
                name: provider.name.clone(),
                projected_cost,
                score: weights.accuracy * provider.accuracy
                    + weights.latency * latency_term
                    + weights.cost * cost_term,
            }
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fleet() -> Vec<ProviderProfile> {
        vec![
            ProviderProfile::new("premium", dec!(0.60), 0.96, 1_500),
            ProviderProfile::new("standard", dec!(0.18), 0.90, 800),
            ProviderProfile::new("economy", dec!(0.05), 0.60, 400),
        ]
    }

    #[test]
    fn default_weights_favor_balanced_provider() {
        let ranked = rank(&fleet(), &WorkloadProfile::new(1_000));
        let names: Vec<_> = ranked.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["standard", "economy", "premium"]);
    }

    #[test]
    fn accuracy_weight_flips_order() {
        let workload = WorkloadProfile::new(1_000).with_weights(SelectionWeights {
            accuracy: 1.0,
            latency: 0.0,
            cost: 0.0,
        });
        assert_eq!(rank(&fleet(), &workload)[0].name, "premium");
    }

    #[test]
    fn constraints_filter_providers() {
        let workload = WorkloadProfile::new(1_000_000)
            .with_min_accuracy(0.85)
            .with_max_latency_ms(1_000)
            .with_max_cost(dec!(0.50));
        let ranked = rank(&fleet(), &workload);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].name, "standard");
        assert_eq!(ranked[0].projected_cost, dec!(0.18));
    }

    #[test]
    fn disabled_providers_excluded() {
        let mut providers = fleet();
        providers[1].enabled = false;
        let ranked = rank(&providers, &WorkloadProfile::new(1_000));
        assert!(ranked.iter().all(|p| p.name != "standard"));
    }
}
