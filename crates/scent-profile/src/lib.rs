//! Scent Profile - trait profiles and similarity
//!
//! Converts quiz answers into a fixed-dimension personality profile and
//! compares profiles (or profiles and catalog items) by vector similarity.
//!
//! # Example
//!
//! ```rust,ignore
//! use scent_profile::{ProfileBuilder, QuizResponse, calculate_similarity};
//!
//! let builder = ProfileBuilder::new();
//! let responses = vec![QuizResponse::new("q1", ["sophisticated", "confident"], [0.6, 0.4])];
//! let profile = builder.generate_profile(&responses, "session-1");
//!
//! assert_eq!(profile.primary_traits, vec!["sophisticated"]);
//! assert_eq!(calculate_similarity(&profile, &profile), 1.0);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

// Core modules
pub mod builder;
pub mod embedding;
pub mod error;
pub mod similarity;
pub mod store;
pub mod types;

// Re-exports for convenience
pub use builder::{ProfileBuilder, ProfileConfig};
pub use embedding::{TierScale, TraitEmbedder};
pub use error::{ProfileError, SimilarityError, StoreError};
pub use similarity::{
    calculate_similarity, rank_by_score, vector_similarity, SimilarityEngine, SimilarityOptions,
};
pub use store::{ContentStore, InMemoryContentStore, InMemoryProfileStore, ProfileStore};
pub use types::{
    ConfidenceMetrics, ExperienceLevel, FragranceItem, GenerationMethod, Profile, ProfileVector,
    QuizResponse, ScoredProfile, StoredProfile, TraitTier, DEFAULT_TRAIT, PROFILE_DIMENSION,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_generation_is_isolated() {
        let builder = Arc::new(ProfileBuilder::new());
        let traits = ["bold", "fresh", "romantic", "woody", "calm", "spicy", "floral", "earthy", "sweet", "green"];

        let handles: Vec<_> = traits
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let builder = Arc::clone(&builder);
                let t = (*t).to_string();
                tokio::spawn(async move {
                    let responses = vec![QuizResponse::new("q", [t, "confident".to_string()], [0.7, 0.3])];
                    builder.generate_profile(&responses, &format!("session-{i}"))
                })
            })
            .collect();

        let mut profiles = Vec::new();
        for handle in handles {
            profiles.push(handle.await.unwrap());
        }

        assert_eq!(profiles.len(), 10);
        for (i, p) in profiles.iter().enumerate() {
            assert_eq!(p.session_token, format!("session-{i}"));
            assert_eq!(p.primary_traits, vec![traits[i]]);
            assert_eq!(p.profile_vector.len(), PROFILE_DIMENSION);
        }
        let mut fingerprints: Vec<_> = profiles.iter().map(Profile::fingerprint).collect();
        fingerprints.sort();
        fingerprints.dedup();
        assert_eq!(fingerprints.len(), 10);
    }

    #[test]
    fn content_vectors_live_in_profile_space() {
        let embedder = TraitEmbedder::default();
        let builder = ProfileBuilder::new();
        let profile = builder.generate_profile(&[QuizResponse::new("q", ["woody"], [1.0])], "s");
        let item_vector = embedder.embed_tags(&["woody"]);
        let similarity = vector_similarity(profile.profile_vector.as_slice(), item_vector.as_slice());
        assert!(similarity > 0.99);
    }
}
