//! Testing utilities for the scent workspace
//!
//! Shared fixtures and scripted collaborators.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use scent_cache::{
    CacheError, DistributedBackend, InMemoryDistributedBackend, InMemoryPersistedStore,
    PersistedStore, Tier,
};
use scent_cost::{AiProvider, GenerationRequest, ProviderError, ProviderResponse};
use scent_health::{
    HealthSource, IssueType, RecoveryAction, RecoveryError, RecoveryExecutor, TelemetrySink,
    TelemetrySnapshot,
};
use scent_profile::{
    ContentStore, FragranceItem, InMemoryContentStore, InMemoryProfileStore, Profile,
    ProfileBuilder, ProfileStore, QuizResponse, StoreError, StoredProfile,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Profiles and catalog
// ---------------------------------------------------------------------------

pub fn quiz(traits: &[&str], weights: &[f64]) -> Vec<QuizResponse> {
    vec![QuizResponse::new(
        "q1",
        traits.iter().copied(),
        weights.iter().copied(),
    )]
}

pub fn profile(traits: &[&str], weights: &[f64], session: &str) -> Profile {
    ProfileBuilder::new().generate_profile(&quiz(traits, weights), session)
}

pub fn stored_profile(
    profile_id: &str,
    user_id: &str,
    traits: &[&str],
    favorites: &[&str],
) -> StoredProfile {
    let weights = vec![1.0 / traits.len().max(1) as f64; traits.len()];
    StoredProfile {
        profile_id: profile_id.to_string(),
        user_id: Some(user_id.to_string()),
        profile: profile(traits, &weights, profile_id),
        favorite_item_ids: favorites.iter().map(|s| (*s).to_string()).collect(),
    }
}

pub fn sample_catalog() -> Vec<FragranceItem> {
    vec![
        FragranceItem::new("noir-01", "Velvet Noir", "Maison Ombre")
            .with_tags(["sophisticated", "confident", "mysterious"])
            .with_accords(["oud", "amber", "leather"])
            .with_popularity(0.92),
        FragranceItem::new("citrus-02", "Morning Grove", "Atelier Sol")
            .with_tags(["fresh", "energetic", "playful"])
            .with_accords(["bergamot", "neroli"])
            .with_popularity(0.81),
        FragranceItem::new("rose-03", "Rose Letter", "Maison Ombre")
            .with_tags(["romantic", "sophisticated", "elegant"])
            .with_accords(["rose", "iris", "musk"])
            .with_popularity(0.77),
        FragranceItem::new("cedar-04", "Cedar Path", "North & Pine")
            .with_tags(["calm", "natural", "grounded"])
            .with_accords(["cedar", "vetiver"])
            .with_popularity(0.64),
        FragranceItem::new("spice-05", "Ember Market", "Atelier Sol")
            .with_tags(["confident", "bold", "warm"])
            .with_accords(["cardamom", "tobacco", "vanilla"])
            .with_popularity(0.71),
        FragranceItem::new("aqua-06", "Salt Air", "North & Pine")
            .with_tags(["fresh", "calm", "casual"])
            .with_accords(["sea salt", "driftwood"])
            .with_popularity(0.58),
    ]
}

pub fn sample_content_store() -> InMemoryContentStore {
    InMemoryContentStore::with_items(sample_catalog())
}

/// Store with two neighbours of a sophisticated/confident profile and one outlier
pub fn sample_profile_store() -> InMemoryProfileStore {
    let store = InMemoryProfileStore::new();
    store.insert(stored_profile(
        "p-ava",
        "ava",
        &["sophisticated", "confident"],
        &["noir-01", "rose-03"],
    ));
    store.insert(stored_profile(
        "p-ben",
        "ben",
        &["sophisticated", "elegant"],
        &["rose-03", "spice-05"],
    ));
    store.insert(stored_profile(
        "p-cal",
        "cal",
        &["fresh", "playful"],
        &["citrus-02", "aqua-06"],
    ));
    store
}

/// Profile and content store that is always unavailable
#[derive(Debug, Default)]
pub struct DownStore;

#[async_trait]
impl ProfileStore for DownStore {
    async fn candidate_profiles(
        &self,
        _query: &Profile,
        _limit: usize,
    ) -> Result<Vec<StoredProfile>, StoreError> {
        Err(StoreError::Unavailable("profile store down".into()))
    }

    async fn load_profile(&self, _profile_id: &str) -> Result<StoredProfile, StoreError> {
        Err(StoreError::Unavailable("profile store down".into()))
    }

    async fn save_profile(&self, _profile: StoredProfile) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("profile store down".into()))
    }
}

#[async_trait]
impl ContentStore for DownStore {
    async fn candidates(&self, _limit: usize) -> Result<Vec<FragranceItem>, StoreError> {
        Err(StoreError::Unavailable("catalog down".into()))
    }

    async fn item(&self, _item_id: &str) -> Result<FragranceItem, StoreError> {
        Err(StoreError::Unavailable("catalog down".into()))
    }
}

// ---------------------------------------------------------------------------
// AI providers
// ---------------------------------------------------------------------------

/// Provider replaying queued results, then answering with a fixed reply
#[derive(Debug)]
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    delay: Duration,
    tokens: u64,
    calls: AtomicU64,
}

impl ScriptedProvider {
    pub fn new(name: &str, tokens: u64) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            tokens,
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn then(self, result: Result<ProviderResponse, ProviderError>) -> Self {
        self.script.lock().push_back(result);
        self
    }

    pub fn then_fail(self) -> Self {
        let err = ProviderError::Unavailable {
            provider: self.name.clone(),
            reason: "scripted failure".into(),
        };
        self.then(Err(err))
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(ProviderResponse {
                text: format!("[{}] {}", self.name, request.prompt),
                tokens_used: self.tokens,
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Cache tiers
// ---------------------------------------------------------------------------

/// Remote tier that can be switched into failure
#[derive(Debug)]
pub struct FlakyTier {
    tier: Tier,
    distributed: InMemoryDistributedBackend,
    persisted: InMemoryPersistedStore,
    failing: AtomicBool,
}

impl FlakyTier {
    pub fn distributed() -> Self {
        Self::new(Tier::Distributed)
    }

    pub fn persisted() -> Self {
        Self::new(Tier::Persisted)
    }

    fn new(tier: Tier) -> Self {
        Self {
            tier,
            distributed: InMemoryDistributedBackend::new(),
            persisted: InMemoryPersistedStore::new(),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::unavailable(self.tier, "scripted outage"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DistributedBackend for FlakyTier {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check()?;
        DistributedBackend::get(&self.distributed, key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.check()?;
        DistributedBackend::set(&self.distributed, key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        DistributedBackend::delete(&self.distributed, key).await
    }
}

#[async_trait]
impl PersistedStore for FlakyTier {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check()?;
        PersistedStore::get(&self.persisted, key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.check()?;
        PersistedStore::set(&self.persisted, key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        PersistedStore::delete(&self.persisted, key).await
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// Health source reporting whatever the test sets
#[derive(Debug)]
pub struct StaticSource {
    component: String,
    metrics: Mutex<BTreeMap<String, f64>>,
}

impl StaticSource {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            metrics: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn set(&self, metric: &str, value: f64) {
        self.metrics.lock().insert(metric.to_string(), value);
    }
}

impl HealthSource for StaticSource {
    fn component(&self) -> &str {
        &self.component
    }

    fn collect(&self) -> BTreeMap<String, f64> {
        self.metrics.lock().clone()
    }
}

/// Sink keeping every exported snapshot
#[derive(Debug, Default)]
pub struct RecordingSink {
    snapshots: Mutex<Vec<TelemetrySnapshot>>,
}

impl RecordingSink {
    pub fn snapshots(&self) -> Vec<TelemetrySnapshot> {
        self.snapshots.lock().clone()
    }
}

impl TelemetrySink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn export(&self, snapshot: &TelemetrySnapshot) {
        self.snapshots.lock().push(snapshot.clone());
    }
}

/// Executor succeeding only for the listed actions, recording every call
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    succeeds: Vec<RecoveryAction>,
    calls: Mutex<Vec<(RecoveryAction, IssueType)>>,
}

impl ScriptedExecutor {
    pub fn succeeding(actions: &[RecoveryAction]) -> Self {
        Self {
            succeeds: actions.to_vec(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(RecoveryAction, IssueType)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RecoveryExecutor for ScriptedExecutor {
    async fn execute(&self, action: RecoveryAction, issue: IssueType) -> Result<(), RecoveryError> {
        self.calls.lock().push((action, issue));
        if self.succeeds.contains(&action) {
            Ok(())
        } else {
            Err(RecoveryError::Failed {
                action,
                reason: "scripted failure".into(),
            })
        }
    }
}
