//! Similarity Engine
//!
//! Cosine similarity over profile vectors, rescaled from `[-1, 1]` into
//! `[0, 1]`. The measure is reflexive (`sim(a, a) == 1`), symmetric and
//! bounded. Candidate retrieval for [`SimilarityEngine::find_similar_profiles`]
//! is delegated to an external [`ProfileStore`].

use crate::error::{SimilarityError, StoreError};
use crate::store::ProfileStore;
use crate::types::{Profile, ScoredProfile};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Similarity of two vectors in `[0, 1]`
///
/// Identical vectors (including two zero vectors) score exactly `1.0`; a zero
/// vector against a non-zero one scores the neutral `0.5`.
#[must_use]
pub fn vector_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a == b {
        return 1.0;
    }
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let zero_a = norm_a <= f64::EPSILON;
    let zero_b = norm_b <= f64::EPSILON;
    if zero_a && zero_b {
        return 1.0;
    }
    if zero_a || zero_b {
        return 0.5;
    }
    let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Similarity of two profiles in `[0, 1]`
#[inline]
#[must_use]
pub fn calculate_similarity(a: &Profile, b: &Profile) -> f64 {
    vector_similarity(a.profile_vector.as_slice(), b.profile_vector.as_slice())
}

/// Options for similar-profile search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityOptions {
    /// Minimum similarity to keep a candidate
    pub similarity_threshold: f64,
    /// Maximum results
    pub limit: usize,
}

impl Default for SimilarityOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            limit: 10,
        }
    }
}

impl SimilarityOptions {
    fn validate(&self) -> Result<(), SimilarityError> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(SimilarityError::InvalidOptions(format!(
                "similarity_threshold {} outside [0, 1]",
                self.similarity_threshold
            )));
        }
        Ok(())
    }
}

/// Rank scored items descending by score, keeping those at or above `threshold`
///
/// Ties keep their input order.
pub fn rank_by_score<T>(mut scored: Vec<(T, f64)>, threshold: f64, limit: usize) -> Vec<(T, f64)> {
    scored.retain(|(_, score)| *score >= threshold);
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored.truncate(limit);
    scored
}

/// Profile similarity search backed by an external store
#[derive(Clone)]
pub struct SimilarityEngine {
    store: Arc<dyn ProfileStore>,
    fetch_timeout: Duration,
    candidate_pool: usize,
}

impl std::fmt::Debug for SimilarityEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimilarityEngine")
            .field("fetch_timeout", &self.fetch_timeout)
            .field("candidate_pool", &self.candidate_pool)
            .finish_non_exhaustive()
    }
}

impl SimilarityEngine {
    /// Create engine over a store
    #[must_use]
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self {
            store,
            fetch_timeout: Duration::from_millis(150),
            candidate_pool: 200,
        }
    }

    /// With candidate fetch timeout
    #[inline]
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// With the number of candidates requested from the store
    #[inline]
    #[must_use]
    pub fn with_candidate_pool(mut self, pool: usize) -> Self {
        self.candidate_pool = pool.max(1);
        self
    }

    /// Underlying store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ProfileStore> {
        &self.store
    }

    /// Find stored profiles similar to `query`
    ///
    /// An empty candidate set is not an error.
    ///
    /// # Errors
    /// - `SimilarityError::InvalidOptions` for a threshold outside `[0, 1]`
    /// - `SimilarityError::Store` when the store fails or times out
    pub async fn find_similar_profiles(
        &self,
        query: &Profile,
        options: SimilarityOptions,
    ) -> Result<Vec<ScoredProfile>, SimilarityError> {
        options.validate()?;
        if options.limit == 0 {
            return Ok(Vec::new());
        }

        let pool = self.candidate_pool.max(options.limit);
        let candidates =
            match tokio::time::timeout(self.fetch_timeout, self.store.candidate_profiles(query, pool))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    let ms = u64::try_from(self.fetch_timeout.as_millis()).unwrap_or(u64::MAX);
                    return Err(StoreError::Timeout(ms).into());
                }
            };
        tracing::debug!(candidates = candidates.len(), "scoring similar profiles");

        let scored = candidates
            .into_iter()
            .filter(|c| c.profile.session_token != query.session_token || c.profile != *query)
            .map(|c| {
                let score = calculate_similarity(query, &c.profile);
                (c, score)
            })
            .collect();

        Ok(rank_by_score(scored, options.similarity_threshold, options.limit)
            .into_iter()
            .map(|(stored, similarity)| ScoredProfile { stored, similarity })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProfileBuilder;
    use crate::store::{InMemoryProfileStore, MockProfileStore};
    use crate::types::{QuizResponse, StoredProfile};
    use proptest::prelude::*;

    fn profile(traits: &[&str], weights: &[f64], session: &str) -> Profile {
        ProfileBuilder::new().generate_profile(
            &[QuizResponse::new("q", traits.iter().copied(), weights.iter().copied())],
            session,
        )
    }

    fn stored(id: &str, p: Profile) -> StoredProfile {
        StoredProfile {
            profile_id: id.to_string(),
            user_id: None,
            profile: p,
            favorite_item_ids: Vec::new(),
        }
    }

    #[test]
    fn reflexive_and_symmetric() {
        let a = profile(&["bold", "woody"], &[0.7, 0.3], "a");
        let b = profile(&["fresh", "citrus"], &[0.6, 0.4], "b");

        assert_eq!(calculate_similarity(&a, &a), 1.0);
        assert_eq!(calculate_similarity(&a, &b), calculate_similarity(&b, &a));
        let s = calculate_similarity(&a, &b);
        assert!((0.0..=1.0).contains(&s));
    }

    #[test]
    fn shared_traits_score_higher() {
        let a = profile(&["romantic", "warm"], &[0.6, 0.4], "a");
        let close = profile(&["romantic", "warm"], &[0.5, 0.5], "b");
        let far = profile(&["sporty", "aquatic"], &[0.6, 0.4], "c");
        assert!(calculate_similarity(&a, &close) > calculate_similarity(&a, &far));
    }

    #[test]
    fn zero_vectors() {
        let zero = vec![0.0_f32; 4];
        let one = vec![1.0_f32, 0.0, 0.0, 0.0];
        assert_eq!(vector_similarity(&zero, &zero), 1.0);
        assert_eq!(vector_similarity(&zero, &one), 0.5);
        assert_eq!(vector_similarity(&one, &zero), 0.5);
    }

    #[test]
    fn opposite_vectors_score_zero() {
        let a = vec![1.0_f32, 0.0];
        let b = vec![-1.0_f32, 0.0];
        assert!(vector_similarity(&a, &b).abs() < 1e-12);
    }

    #[test]
    fn rank_by_score_filters_and_orders() {
        let ranked = rank_by_score(vec![("a", 0.2), ("b", 0.9), ("c", 0.7), ("d", 0.95)], 0.5, 2);
        assert_eq!(ranked, vec![("d", 0.95), ("b", 0.9)]);
    }

    #[test]
    fn batch_of_twenty_is_fast() {
        let query = profile(&["bold"], &[1.0], "q");
        let candidates: Vec<Profile> = (0..20)
            .map(|i| profile(&[&format!("trait{i}"), "bold"], &[0.5, 0.5], "c"))
            .collect();
        let start = std::time::Instant::now();
        for _ in 0..100 {
            for c in &candidates {
                std::hint::black_box(calculate_similarity(&query, c));
            }
        }
        let per_batch = start.elapsed() / 100;
        assert!(per_batch < Duration::from_millis(5), "batch took {per_batch:?}");
    }

    #[tokio::test]
    async fn find_similar_profiles_ranks_and_limits() {
        let store = Arc::new(InMemoryProfileStore::new());
        store.insert(stored("close", profile(&["bold", "woody"], &[0.6, 0.4], "1")));
        store.insert(stored("closer", profile(&["bold", "woody"], &[0.7, 0.3], "2")));
        store.insert(stored("far", profile(&["aquatic"], &[1.0], "3")));

        let engine = SimilarityEngine::new(store);
        let query = profile(&["bold", "woody"], &[0.7, 0.3], "query");
        let results = engine
            .find_similar_profiles(
                &query,
                SimilarityOptions {
                    similarity_threshold: 0.7,
                    limit: 2,
                },
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].stored.profile_id, "closer");
        assert!(results[0].similarity >= results[1].similarity);
        assert!(results.iter().all(|r| r.stored.profile_id != "far"));
    }

    #[tokio::test]
    async fn empty_store_returns_empty() {
        let engine = SimilarityEngine::new(Arc::new(InMemoryProfileStore::new()));
        let query = profile(&["bold"], &[1.0], "q");
        let results = engine
            .find_similar_profiles(&query, SimilarityOptions::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn invalid_threshold_rejected() {
        let engine = SimilarityEngine::new(Arc::new(InMemoryProfileStore::new()));
        let query = profile(&["bold"], &[1.0], "q");
        let result = engine
            .find_similar_profiles(
                &query,
                SimilarityOptions {
                    similarity_threshold: 1.5,
                    limit: 3,
                },
            )
            .await;
        assert!(matches!(result, Err(SimilarityError::InvalidOptions(_))));
    }

    #[tokio::test]
    async fn store_failure_is_reported() {
        let mut mock = MockProfileStore::new();
        mock.expect_candidate_profiles()
            .returning(|_, _| Err(StoreError::Unavailable("connection refused".into())));

        let engine = SimilarityEngine::new(Arc::new(mock));
        let query = profile(&["bold"], &[1.0], "q");
        let result = engine
            .find_similar_profiles(&query, SimilarityOptions::default())
            .await;
        assert!(matches!(result, Err(SimilarityError::Store(StoreError::Unavailable(_)))));
    }

    proptest! {
        #[test]
        fn similarity_properties(
            a in prop::collection::vec(-1.0f32..1.0, 256),
            b in prop::collection::vec(-1.0f32..1.0, 256),
        ) {
            let ab = vector_similarity(&a, &b);
            let ba = vector_similarity(&b, &a);
            prop_assert!((0.0..=1.0).contains(&ab));
            prop_assert_eq!(ab, ba);
            prop_assert_eq!(vector_similarity(&a, &a), 1.0);
        }
    }
}
