//! Deterministic trait embedding
//!
//! Maps a weighted trait set into the fixed [`PROFILE_DIMENSION`]-dimensional
//! space by feature hashing: each trait name is hashed with BLAKE3 and the
//! digest selects a handful of signed slots that receive the trait's weight.
//! The result is L2-normalised so every component lies in `[-1, 1]`.

use crate::types::{ProfileVector, TraitTier, PROFILE_DIMENSION};

/// Slots touched by each trait
const SLOTS_PER_TRAIT: usize = 4;

/// Tier multipliers applied before hashing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierScale {
    /// Multiplier for primary traits
    pub primary: f64,
    /// Multiplier for secondary traits
    pub secondary: f64,
    /// Multiplier for tertiary traits
    pub tertiary: f64,
}

impl TierScale {
    /// Multiplier for a tier
    #[inline]
    #[must_use]
    pub fn for_tier(&self, tier: TraitTier) -> f64 {
        match tier {
            TraitTier::Primary => self.primary,
            TraitTier::Secondary => self.secondary,
            TraitTier::Tertiary => self.tertiary,
        }
    }
}

impl Default for TierScale {
    fn default() -> Self {
        Self {
            primary: 1.0,
            secondary: 0.6,
            tertiary: 0.3,
        }
    }
}

/// Feature-hashing embedder
#[derive(Debug, Clone, Copy, Default)]
pub struct TraitEmbedder {
    scale: TierScale,
}

impl TraitEmbedder {
    /// Create embedder with custom tier scaling
    #[inline]
    #[must_use]
    pub fn new(scale: TierScale) -> Self {
        Self { scale }
    }

    /// Embed `(trait, share, tier)` triples
    #[must_use]
    pub fn embed<'a, I>(&self, weighted: I) -> ProfileVector
    where
        I: IntoIterator<Item = (&'a str, f64, TraitTier)>,
    {
        let mut acc = vec![0.0_f64; PROFILE_DIMENSION];
        for (name, share, tier) in weighted {
            if !share.is_finite() || share <= 0.0 {
                continue;
            }
            let weight = share * self.scale.for_tier(tier);
            for (index, sign) in slots(name) {
                acc[index] += sign * weight;
            }
        }
        normalise(&acc)
    }

    /// Embed an unweighted tag list, every tag treated as primary with equal share
    #[must_use]
    pub fn embed_tags<S: AsRef<str>>(&self, tags: &[S]) -> ProfileVector {
        if tags.is_empty() {
            return ProfileVector::zeros();
        }
        #[allow(clippy::cast_precision_loss)]
        let share = 1.0 / tags.len() as f64;
        let normalised: Vec<String> = tags
            .iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        self.embed(
            normalised
                .iter()
                .map(|t| (t.as_str(), share, TraitTier::Primary)),
        )
    }
}

/// Signed slots for a trait name
fn slots(name: &str) -> [(usize, f64); SLOTS_PER_TRAIT] {
    let digest = blake3::hash(name.as_bytes());
    let bytes = digest.as_bytes();
    let mut out = [(0usize, 0.0f64); SLOTS_PER_TRAIT];
    for (i, slot) in out.iter_mut().enumerate() {
        let raw = u16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]);
        let index = usize::from(raw) % PROFILE_DIMENSION;
        let sign = if bytes[16 + i] & 1 == 0 { 1.0 } else { -1.0 };
        *slot = (index, sign);
    }
    out
}

#[allow(clippy::cast_possible_truncation)]
fn normalise(acc: &[f64]) -> ProfileVector {
    let norm = acc.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm <= f64::EPSILON {
        return ProfileVector::zeros();
    }
    let values = acc
        .iter()
        .map(|v| ((v / norm).clamp(-1.0, 1.0)) as f32)
        .collect();
    ProfileVector::new(values).unwrap_or_else(|_| ProfileVector::zeros())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_same_vector() {
        let embedder = TraitEmbedder::default();
        let a = embedder.embed([("bold", 0.7, TraitTier::Primary), ("fresh", 0.3, TraitTier::Secondary)]);
        let b = embedder.embed([("bold", 0.7, TraitTier::Primary), ("fresh", 0.3, TraitTier::Secondary)]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_primary_sets_differ() {
        let embedder = TraitEmbedder::default();
        let a = embedder.embed([("romantic", 1.0, TraitTier::Primary)]);
        let b = embedder.embed([("adventurous", 1.0, TraitTier::Primary)]);
        let diff: f32 = a
            .as_slice()
            .iter()
            .zip(b.as_slice())
            .map(|(x, y)| (x - y).abs())
            .sum();
        assert!(diff > 0.5, "vectors too close: {diff}");
    }

    #[test]
    fn components_bounded_and_unit_norm() {
        let embedder = TraitEmbedder::default();
        let v = embedder.embed([
            ("sophisticated", 0.5, TraitTier::Primary),
            ("confident", 0.3, TraitTier::Secondary),
            ("playful", 0.2, TraitTier::Tertiary),
        ]);
        assert_eq!(v.len(), PROFILE_DIMENSION);
        assert!(v.as_slice().iter().all(|c| (-1.0..=1.0).contains(c)));
        assert!((v.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_input_is_zero_vector() {
        let embedder = TraitEmbedder::default();
        let v = embedder.embed(std::iter::empty());
        assert_eq!(v, ProfileVector::zeros());
        assert_eq!(embedder.embed_tags::<&str>(&[]), ProfileVector::zeros());
    }

    #[test]
    fn non_positive_weights_ignored() {
        let embedder = TraitEmbedder::default();
        let v = embedder.embed([("bold", -1.0, TraitTier::Primary), ("calm", f64::NAN, TraitTier::Primary)]);
        assert_eq!(v, ProfileVector::zeros());
    }

    #[test]
    fn tags_are_case_insensitive() {
        let embedder = TraitEmbedder::default();
        assert_eq!(embedder.embed_tags(&["Bold", " Fresh"]), embedder.embed_tags(&["bold", "fresh"]));
    }
}
