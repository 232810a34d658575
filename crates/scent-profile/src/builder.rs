//! Trait Profile Builder
//!
//! Converts quiz responses into a [`Profile`]. The builder is a pure function
//! of its input plus the session id: it holds only immutable configuration, so
//! one instance can serve any number of concurrent requests.
//!
//! # Workflow
//! 1. Sanitize responses (bad weights and blank traits are repaired or dropped)
//! 2. Accumulate weighted contributions per trait
//! 3. Split traits into primary / secondary / tertiary tiers
//! 4. Derive confidence metrics
//! 5. Embed the weighted trait set

use crate::embedding::{TierScale, TraitEmbedder};
use crate::error::ProfileError;
use crate::types::{
    ConfidenceMetrics, GenerationMethod, Profile, QuizResponse, TraitTier, DEFAULT_TRAIT,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Profile builder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// A trait is primary while its share is at least this fraction of the top share
    pub primary_ratio: f64,
    /// Maximum number of primary traits
    pub max_primary: usize,
    /// Minimum share for a non-primary trait to be listed as secondary
    pub min_secondary_share: f64,
    /// Maximum number of secondary traits
    pub max_secondary: usize,
    /// Weight of trait consistency in the overall confidence
    pub consistency_weight: f64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            primary_ratio: 0.8,
            max_primary: 3,
            min_secondary_share: 0.05,
            max_secondary: 5,
            consistency_weight: 0.6,
        }
    }
}

/// Per-trait accumulation
#[derive(Debug, Default)]
struct TraitAccumulator {
    total: f64,
    mentions: Vec<f64>,
}

/// Sanitized response: `(trait, weight)` pairs
type CleanResponse = Vec<(String, f64)>;

/// Builds profiles from quiz responses
#[derive(Debug, Clone, Default)]
pub struct ProfileBuilder {
    config: ProfileConfig,
    embedder: TraitEmbedder,
}

impl ProfileBuilder {
    /// Create builder with default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create builder with custom configuration
    #[inline]
    #[must_use]
    pub fn with_config(config: ProfileConfig) -> Self {
        Self {
            config,
            embedder: TraitEmbedder::new(TierScale::default()),
        }
    }

    /// Get configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ProfileConfig {
        &self.config
    }

    /// Generate a profile from quiz responses
    ///
    /// Never fails: empty or unusable input yields the default profile.
    #[must_use]
    pub fn generate_profile(&self, responses: &[QuizResponse], session_id: &str) -> Profile {
        let clean = sanitize(responses);
        if clean.is_empty() {
            tracing::debug!(
                session = session_id,
                error = %ProfileError::EmptyResponses,
                "falling back to default profile"
            );
            return self.default_profile(session_id);
        }

        let mut traits: HashMap<&str, TraitAccumulator> = HashMap::new();
        for response in &clean {
            for (name, weight) in response {
                let acc = traits.entry(name.as_str()).or_default();
                acc.total += weight;
                acc.mentions.push(*weight);
            }
        }

        let grand_total: f64 = traits.values().map(|a| a.total).sum();
        if grand_total <= f64::EPSILON {
            return self.default_profile(session_id);
        }

        let mut shares: Vec<(&str, f64)> = traits
            .iter()
            .map(|(name, acc)| (*name, acc.total / grand_total))
            .collect();
        shares.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let tiers = self.split_tiers(&shares);
        let mut trait_weights = BTreeMap::from([
            (TraitTier::Primary, 0.0),
            (TraitTier::Secondary, 0.0),
            (TraitTier::Tertiary, 0.0),
        ]);
        let mut primary_traits = Vec::new();
        let mut secondary_traits = Vec::new();
        for ((name, share), tier) in shares.iter().zip(&tiers) {
            *trait_weights.entry(*tier).or_insert(0.0) += share;
            match tier {
                TraitTier::Primary => primary_traits.push((*name).to_string()),
                TraitTier::Secondary => secondary_traits.push((*name).to_string()),
                TraitTier::Tertiary => {}
            }
        }
        for weight in trait_weights.values_mut() {
            *weight = weight.clamp(0.0, 1.0);
        }

        let confidence_metrics = self.confidence(&clean, &traits, &shares);
        let profile_vector = self.embedder.embed(
            shares
                .iter()
                .zip(&tiers)
                .map(|((name, share), tier)| (*name, *share, *tier)),
        );

        Profile {
            primary_traits,
            secondary_traits,
            trait_weights,
            confidence_metrics,
            profile_vector,
            generation_method: GenerationMethod::Structured,
            session_token: session_id.to_string(),
            created_at: Utc::now(),
            response_count: clean.len(),
        }
    }

    /// Well-defined profile for sessions without usable answers
    #[must_use]
    pub fn default_profile(&self, session_id: &str) -> Profile {
        Profile {
            primary_traits: vec![DEFAULT_TRAIT.to_string()],
            secondary_traits: Vec::new(),
            trait_weights: BTreeMap::from([
                (TraitTier::Primary, 0.0),
                (TraitTier::Secondary, 0.0),
                (TraitTier::Tertiary, 0.0),
            ]),
            confidence_metrics: ConfidenceMetrics::default(),
            profile_vector: self
                .embedder
                .embed([(DEFAULT_TRAIT, 1.0, TraitTier::Primary)]),
            generation_method: GenerationMethod::Structured,
            session_token: session_id.to_string(),
            created_at: Utc::now(),
            response_count: 0,
        }
    }

    /// Assign a tier to every entry of `shares` (sorted by share, descending)
    fn split_tiers(&self, shares: &[(&str, f64)]) -> Vec<TraitTier> {
        let top = shares.first().map_or(0.0, |s| s.1);
        let primary_cut = top * self.config.primary_ratio;
        let max_primary = self.config.max_primary.max(1);

        let mut tiers = Vec::with_capacity(shares.len());
        let mut primary = 0;
        let mut secondary = 0;
        for (i, (_, share)) in shares.iter().enumerate() {
            let tier = if i == 0 || (primary < max_primary && *share >= primary_cut) {
                primary += 1;
                TraitTier::Primary
            } else if secondary < self.config.max_secondary
                && *share >= self.config.min_secondary_share
            {
                secondary += 1;
                TraitTier::Secondary
            } else {
                TraitTier::Tertiary
            };
            tiers.push(tier);
        }

        // Keep at least one secondary trait whenever a non-primary trait exists
        if secondary == 0 && self.config.max_secondary > 0 {
            if let Some(first_tertiary) = tiers.iter().position(|t| *t == TraitTier::Tertiary) {
                tiers[first_tertiary] = TraitTier::Secondary;
            }
        }
        tiers
    }

    fn confidence(
        &self,
        clean: &[CleanResponse],
        traits: &HashMap<&str, TraitAccumulator>,
        shares: &[(&str, f64)],
    ) -> ConfidenceMetrics {
        #[allow(clippy::cast_precision_loss)]
        let responses = clean.len() as f64;

        let mut trait_confidences = BTreeMap::new();
        let mut consistency = 0.0;
        for (name, share) in shares {
            let Some(acc) = traits.get(name) else { continue };
            #[allow(clippy::cast_precision_loss)]
            let mentions = acc.mentions.len() as f64;
            let agreement = agreement(&acc.mentions);
            let coverage = (mentions / responses).clamp(0.0, 1.0);
            let confidence = (0.5 * agreement + 0.5 * coverage).clamp(0.0, 1.0);
            consistency += share * confidence;
            trait_confidences.insert((*name).to_string(), confidence);
        }
        let trait_consistency = consistency.clamp(0.0, 1.0);

        let clarity_sum: f64 = clean
            .iter()
            .map(|response| {
                let sum: f64 = response.iter().map(|(_, w)| w).sum();
                let max = response.iter().map(|(_, w)| *w).fold(0.0, f64::max);
                if sum > 0.0 {
                    max / sum
                } else {
                    0.0
                }
            })
            .sum();
        let response_clarity = (clarity_sum / responses).clamp(0.0, 1.0);

        let w = self.config.consistency_weight.clamp(0.0, 1.0);
        let overall_confidence =
            (w * trait_consistency + (1.0 - w) * response_clarity).clamp(0.0, 1.0);

        ConfidenceMetrics {
            trait_consistency,
            response_clarity,
            overall_confidence,
            trait_confidences,
        }
    }
}

/// `1 - coefficient of variation`, clamped to `[0, 1]`
fn agreement(weights: &[f64]) -> f64 {
    if weights.len() < 2 {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = weights.len() as f64;
    let mean = weights.iter().sum::<f64>() / n;
    if mean <= f64::EPSILON {
        return 0.0;
    }
    let variance = weights.iter().map(|w| (w - mean).powi(2)).sum::<f64>() / n;
    (1.0 - variance.sqrt() / mean).clamp(0.0, 1.0)
}

/// Normalise trait names and repair weights
fn sanitize(responses: &[QuizResponse]) -> Vec<CleanResponse> {
    responses
        .iter()
        .filter_map(|response| {
            let n = response.selected_traits.len();
            if n == 0 {
                return None;
            }
            #[allow(clippy::cast_precision_loss)]
            let even = 1.0 / n as f64;
            let mut pairs: CleanResponse = Vec::with_capacity(n);
            for (i, raw) in response.selected_traits.iter().enumerate() {
                let name = raw.trim().to_lowercase();
                if name.is_empty() {
                    continue;
                }
                let weight = response.trait_weights.get(i).copied().unwrap_or(even);
                if !weight.is_finite() || weight < 0.0 {
                    tracing::debug!(
                        question = %response.question_id,
                        error = %ProfileError::InvalidWeight { trait_name: name.clone(), weight },
                        "dropping trait weight"
                    );
                    continue;
                }
                if weight == 0.0 {
                    continue;
                }
                match pairs.iter_mut().find(|(existing, _)| *existing == name) {
                    Some((_, w)) => *w += weight,
                    None => pairs.push((name, weight)),
                }
            }
            (!pairs.is_empty()).then_some(pairs)
        })
        .collect()
}
