//! Core profile types
//!
//! Defines the records flowing through the recommendation core:
//! - Quiz responses (ephemeral input)
//! - Profiles and their fixed-dimension vectors
//! - Catalog items and stored profiles read from external stores

use crate::error::ProfileError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fixed dimension of every profile and content vector
pub const PROFILE_DIMENSION: usize = 256;

/// Trait used by the default profile when no usable responses exist
pub const DEFAULT_TRAIT: &str = "versatile";

/// One answered quiz question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizResponse {
    /// Question identifier
    pub question_id: String,
    /// Traits selected by the answer
    pub selected_traits: Vec<String>,
    /// Weights parallel to `selected_traits`
    pub trait_weights: Vec<f64>,
    /// When the answer was given
    pub response_timestamp: DateTime<Utc>,
}

impl QuizResponse {
    /// Create a response stamped with the current time
    #[must_use]
    pub fn new<S: Into<String>>(
        question_id: impl Into<String>,
        selected_traits: impl IntoIterator<Item = S>,
        trait_weights: impl IntoIterator<Item = f64>,
    ) -> Self {
        Self {
            question_id: question_id.into(),
            selected_traits: selected_traits.into_iter().map(Into::into).collect(),
            trait_weights: trait_weights.into_iter().collect(),
            response_timestamp: Utc::now(),
        }
    }
}

/// Weight tier of a trait within a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraitTier {
    /// Dominant traits
    Primary,
    /// Supporting traits
    Secondary,
    /// Long tail
    Tertiary,
}

/// How a profile was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMethod {
    /// Deterministic aggregation of quiz responses
    #[default]
    Structured,
    /// Refined by a generation provider
    AiAssisted,
}

/// Downstream classification of how much we know about a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    /// Few or no answers; recommendations stay broad
    Beginner,
    /// Enough answers for a confident profile
    Enthusiast,
    /// Long, consistent answer history
    Collector,
}

/// Confidence metadata attached to a profile, every value in `[0, 1]`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfidenceMetrics {
    /// Agreement across responses mentioning the same trait
    pub trait_consistency: f64,
    /// Specificity of the weights used in each response
    pub response_clarity: f64,
    /// Monotonic combination of consistency and clarity
    pub overall_confidence: f64,
    /// Per-trait confidence
    pub trait_confidences: BTreeMap<String, f64>,
}

/// Fixed-length profile vector
///
/// Construction and deserialization both reject any length other than
/// [`PROFILE_DIMENSION`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct ProfileVector(Vec<f32>);

impl ProfileVector {
    /// All-zero vector
    #[must_use]
    pub fn zeros() -> Self {
        Self(vec![0.0; PROFILE_DIMENSION])
    }

    /// Wrap a vector, checking its dimension
    ///
    /// # Errors
    /// `ProfileError::DimensionMismatch` when the length is wrong
    pub fn new(values: Vec<f32>) -> Result<Self, ProfileError> {
        if values.len() == PROFILE_DIMENSION {
            Ok(Self(values))
        } else {
            Err(ProfileError::DimensionMismatch {
                expected: PROFILE_DIMENSION,
                actual: values.len(),
            })
        }
    }

    /// Components
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Always [`PROFILE_DIMENSION`]
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Never true; present for API symmetry with slices
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Euclidean norm
    #[must_use]
    pub fn norm(&self) -> f64 {
        self.0
            .iter()
            .map(|v| f64::from(*v) * f64::from(*v))
            .sum::<f64>()
            .sqrt()
    }
}

impl TryFrom<Vec<f32>> for ProfileVector {
    type Error = ProfileError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<ProfileVector> for Vec<f32> {
    fn from(vector: ProfileVector) -> Self {
        vector.0
    }
}

/// A user's fragrance personality
///
/// Profiles are immutable values: new responses produce a new profile rather
/// than mutating an existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Dominant traits, highest share first
    pub primary_traits: Vec<String>,
    /// Supporting traits, highest share first
    pub secondary_traits: Vec<String>,
    /// Summed share per tier (sums to at most 1)
    pub trait_weights: BTreeMap<TraitTier, f64>,
    /// Confidence metadata
    pub confidence_metrics: ConfidenceMetrics,
    /// Embedding of the weighted trait set
    pub profile_vector: ProfileVector,
    /// How the profile was produced
    pub generation_method: GenerationMethod,
    /// Session the profile belongs to
    pub session_token: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Number of usable responses that fed the profile
    #[serde(default)]
    pub response_count: usize,
}

impl Profile {
    /// Experience classification used downstream
    #[must_use]
    pub fn experience_level(&self) -> ExperienceLevel {
        let confidence = self.confidence_metrics.overall_confidence;
        match self.response_count {
            0..=2 => ExperienceLevel::Beginner,
            _ if confidence < 0.5 => ExperienceLevel::Beginner,
            3..=9 => ExperienceLevel::Enthusiast,
            _ if confidence >= 0.75 => ExperienceLevel::Collector,
            _ => ExperienceLevel::Enthusiast,
        }
    }

    /// Whether this is the fallback profile produced for unusable input
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.response_count == 0
    }

    /// Short stable digest of the profile vector, used in cache keys
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for value in self.profile_vector.as_slice() {
            hasher.update(&value.to_le_bytes());
        }
        hex::encode(&hasher.finalize().as_bytes()[..8])
    }

    /// Primary trait that best summarises the profile
    #[must_use]
    pub fn lead_trait(&self) -> &str {
        self.primary_traits
            .first()
            .map_or(DEFAULT_TRAIT, String::as_str)
    }
}

/// Fragrance catalog record read from the content store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragranceItem {
    /// Catalog identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Brand identifier
    pub brand: String,
    /// Target gender label (`unisex`, `feminine`, `masculine`)
    #[serde(default)]
    pub gender: String,
    /// Main accords (`woody`, `citrus`, ...)
    #[serde(default)]
    pub accords: Vec<String>,
    /// Personality traits the fragrance is tagged with
    #[serde(default)]
    pub personality_tags: Vec<String>,
    /// Popularity in `[0, 1]`
    #[serde(default)]
    pub popularity: f32,
    /// Precomputed content vector; derived from tags when absent
    #[serde(default)]
    pub vector: Option<ProfileVector>,
}

impl FragranceItem {
    /// Create an item without a precomputed vector
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, brand: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            brand: brand.into(),
            gender: "unisex".to_string(),
            accords: Vec::new(),
            personality_tags: Vec::new(),
            popularity: 0.0,
            vector: None,
        }
    }

    /// With personality tags
    #[must_use]
    pub fn with_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.personality_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// With accords
    #[must_use]
    pub fn with_accords<S: Into<String>>(mut self, accords: impl IntoIterator<Item = S>) -> Self {
        self.accords = accords.into_iter().map(Into::into).collect();
        self
    }

    /// With popularity
    #[must_use]
    pub fn with_popularity(mut self, popularity: f32) -> Self {
        self.popularity = popularity.clamp(0.0, 1.0);
        self
    }
}

/// Profile record held by the external profile store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredProfile {
    /// Store identifier
    pub profile_id: String,
    /// Owning user, when known
    pub user_id: Option<String>,
    /// The profile itself
    pub profile: Profile,
    /// Catalog items the owner saved to their collection
    #[serde(default)]
    pub favorite_item_ids: Vec<String>,
}

/// A profile paired with its similarity to a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredProfile {
    /// Matched record
    pub stored: StoredProfile,
    /// Similarity in `[0, 1]`
    pub similarity: f64,
}
