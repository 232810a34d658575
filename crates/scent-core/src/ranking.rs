//! Candidate scoring for each recommendation algorithm
//!
//! All functions are pure; the engine fetches catalog items and neighbours
//! and hands them in.
//!
//! - content-based: profile vector against the item's tag embedding,
//!   nudged by popularity
//! - collaborative: favourites of similar profiles, weighted by similarity
//! - hybrid: weighted blend of the two

use scent_profile::{
    rank_by_score, vector_similarity, FragranceItem, Profile, ScoredProfile, TraitEmbedder,
};
use std::collections::{BTreeMap, HashSet};

/// Share of the content score taken by catalog popularity
pub const POPULARITY_WEIGHT: f64 = 0.1;

/// Item id to score in `[0, 1]`
pub type Scores = BTreeMap<String, f64>;

/// Content-based scores for every item
#[must_use]
pub fn content_scores(profile: &Profile, items: &[FragranceItem], embedder: &TraitEmbedder) -> Scores {
    items
        .iter()
        .map(|item| {
            let similarity = match &item.vector {
                Some(vector) => vector_similarity(profile.profile_vector.as_slice(), vector.as_slice()),
                None => {
                    let vector = embedder.embed_tags(&item.personality_tags);
                    vector_similarity(profile.profile_vector.as_slice(), vector.as_slice())
                }
            };
            let popularity = f64::from(item.popularity).clamp(0.0, 1.0);
            let score = (1.0 - POPULARITY_WEIGHT) * similarity + POPULARITY_WEIGHT * popularity;
            (item.id.clone(), score.clamp(0.0, 1.0))
        })
        .collect()
}

/// Collaborative scores from neighbours' favourites
///
/// An item's score is the similarity mass of the neighbours that saved it
/// over the total similarity mass. Items nobody saved are absent.
#[must_use]
pub fn collaborative_scores(neighbours: &[ScoredProfile]) -> Scores {
    let total: f64 = neighbours.iter().map(|n| n.similarity).sum();
    if total <= 0.0 {
        return Scores::new();
    }
    let mut scores = Scores::new();
    for neighbour in neighbours {
        let unique: HashSet<&String> = neighbour.stored.favorite_item_ids.iter().collect();
        for item_id in unique {
            *scores.entry(item_id.clone()).or_insert(0.0) += neighbour.similarity;
        }
    }
    for score in scores.values_mut() {
        *score = (*score / total).clamp(0.0, 1.0);
    }
    scores
}

/// Blend content and collaborative scores
#[must_use]
pub fn hybrid_scores(content: &Scores, collaborative: &Scores, content_weight: f64) -> Scores {
    let weight = content_weight.clamp(0.0, 1.0);
    let mut blended = Scores::new();
    for id in content.keys().chain(collaborative.keys()) {
        if blended.contains_key(id) {
            continue;
        }
        let c = content.get(id).copied().unwrap_or(0.0);
        let f = collaborative.get(id).copied().unwrap_or(0.0);
        blended.insert(id.clone(), weight * c + (1.0 - weight) * f);
    }
    blended
}

/// Top `limit` catalog items by score, skipping excluded and unscored items
///
/// Ties keep catalog order.
#[must_use]
pub fn rank_items(
    items: &[FragranceItem],
    scores: &Scores,
    excluded: &[String],
    limit: usize,
) -> Vec<(FragranceItem, f64)> {
    let scored = items
        .iter()
        .filter(|item| !excluded.contains(&item.id))
        .filter_map(|item| scores.get(&item.id).map(|score| (item.clone(), *score)))
        .collect();
    rank_by_score(scored, 0.0, limit)
}
