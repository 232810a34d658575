//! External store contracts
//!
//! The persisted profile/content store is an external collaborator; the core
//! only depends on these traits. In-memory implementations back local runs and
//! tests.

use crate::error::StoreError;
use crate::types::{FragranceItem, Profile, StoredProfile};
use async_trait::async_trait;
use dashmap::DashMap;

/// Read/write access to stored profiles
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Candidate profiles for a similarity query (at most `limit`)
    async fn candidate_profiles(
        &self,
        query: &Profile,
        limit: usize,
    ) -> Result<Vec<StoredProfile>, StoreError>;

    /// Load one stored profile
    async fn load_profile(&self, profile_id: &str) -> Result<StoredProfile, StoreError>;

    /// Insert or replace a stored profile
    async fn save_profile(&self, profile: StoredProfile) -> Result<(), StoreError>;
}

/// Read access to the fragrance catalog
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Candidate items for ranking (at most `limit`)
    async fn candidates(&self, limit: usize) -> Result<Vec<FragranceItem>, StoreError>;

    /// Load one item
    async fn item(&self, item_id: &str) -> Result<FragranceItem, StoreError>;
}

/// Profile store held in process memory
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    profiles: DashMap<String, StoredProfile>,
}

impl InMemoryProfileStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert synchronously (fixtures and warm-up)
    pub fn insert(&self, profile: StoredProfile) {
        self.profiles.insert(profile.profile_id.clone(), profile);
    }

    /// Number of stored profiles
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Whether the store is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn candidate_profiles(
        &self,
        _query: &Profile,
        limit: usize,
    ) -> Result<Vec<StoredProfile>, StoreError> {
        let mut all: Vec<StoredProfile> =
            self.profiles.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.profile_id.cmp(&b.profile_id));
        all.truncate(limit);
        Ok(all)
    }

    async fn load_profile(&self, profile_id: &str) -> Result<StoredProfile, StoreError> {
        self.profiles
            .get(profile_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::NotFound(profile_id.to_string()))
    }

    async fn save_profile(&self, profile: StoredProfile) -> Result<(), StoreError> {
        self.insert(profile);
        Ok(())
    }
}

/// Catalog held in process memory
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    items: DashMap<String, FragranceItem>,
}

impl InMemoryContentStore {
    /// Create empty catalog
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create catalog from items
    #[must_use]
    pub fn with_items(items: impl IntoIterator<Item = FragranceItem>) -> Self {
        let store = Self::new();
        for item in items {
            store.insert(item);
        }
        store
    }

    /// Insert or replace an item
    pub fn insert(&self, item: FragranceItem) {
        self.items.insert(item.id.clone(), item);
    }

    /// Number of items
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the catalog is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn candidates(&self, limit: usize) -> Result<Vec<FragranceItem>, StoreError> {
        let mut all: Vec<FragranceItem> = self.items.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| {
            b.popularity
                .total_cmp(&a.popularity)
                .then_with(|| a.id.cmp(&b.id))
        });
        all.truncate(limit);
        Ok(all)
    }

    async fn item(&self, item_id: &str) -> Result<FragranceItem, StoreError> {
        self.items
            .get(item_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::NotFound(item_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProfileBuilder;

    #[tokio::test]
    async fn profile_store_roundtrip() {
        let store = InMemoryProfileStore::new();
        let profile = ProfileBuilder::new().default_profile("s");
        store
            .save_profile(StoredProfile {
                profile_id: "p1".into(),
                user_id: Some("u1".into()),
                profile: profile.clone(),
                favorite_item_ids: vec!["f1".into()],
            })
            .await
            .unwrap();

        let loaded = store.load_profile("p1").await.unwrap();
        assert_eq!(loaded.profile, profile);
        assert!(matches!(
            store.load_profile("missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn content_candidates_sorted_by_popularity() {
        let store = InMemoryContentStore::with_items([
            FragranceItem::new("a", "A", "x").with_popularity(0.2),
            FragranceItem::new("b", "B", "x").with_popularity(0.9),
            FragranceItem::new("c", "C", "x").with_popularity(0.5),
        ]);
        let top = store.candidates(2).await.unwrap();
        let ids: Vec<_> = top.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }
}
