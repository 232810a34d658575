//! Remote tier contracts and in-memory implementations

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::error::CacheError;

/// Shared network cache (the distributed tier)
///
/// Values are opaque JSON bytes; the backend only honours the TTL.
#[async_trait]
pub trait DistributedBackend: Send + Sync {
    /// Fetch bytes for a key
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store bytes with a lifetime
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Remove a key
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Drop expired entries, returning how many were removed
    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(0)
    }
}

/// Durable store (the persisted tier), same shape as the distributed tier
#[async_trait]
pub trait PersistedStore: Send + Sync {
    /// Fetch bytes for a key
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store bytes with a lifetime
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Remove a key
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Drop expired entries, returning how many were removed
    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(0)
    }
}

#[derive(Debug, Clone)]
struct StoredBytes {
    bytes: Vec<u8>,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct ExpiringMap {
    entries: DashMap<String, StoredBytes>,
}

impl ExpiringMap {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .map(|e| (e.expires_at > now, e.bytes.clone()));
        match hit {
            Some((true, bytes)) => Some(bytes),
            Some((false, _)) => {
                self.entries.remove_if(key, |_, e| e.expires_at <= now);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, bytes: Vec<u8>, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            StoredBytes {
                bytes,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    fn purge(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

/// Process-local stand-in for a shared cache server
#[derive(Debug, Default)]
pub struct InMemoryDistributedBackend {
    map: ExpiringMap,
}

impl InMemoryDistributedBackend {
    /// Create an empty backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored keys, expired ones included until purged
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.entries.len()
    }

    /// No keys stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.entries.is_empty()
    }
}

#[async_trait]
impl DistributedBackend for InMemoryDistributedBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.map.get(key))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.map.set(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.map.delete(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(self.map.purge())
    }
}

/// Process-local stand-in for a durable table
#[derive(Debug, Default)]
pub struct InMemoryPersistedStore {
    map: ExpiringMap,
}

impl InMemoryPersistedStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored keys, expired ones included until purged
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.entries.len()
    }

    /// No keys stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.entries.is_empty()
    }
}

#[async_trait]
impl PersistedStore for InMemoryPersistedStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.map.get(key))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.map.set(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.map.delete(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(self.map.purge())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn distributed_roundtrip_and_delete() {
        let backend = InMemoryDistributedBackend::new();
        backend.set("k", b"v".to_vec(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v".to_vec()));
        backend.delete("k").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn persisted_entries_expire() {
        let store = InMemoryPersistedStore::new();
        store.set("a", b"1".to_vec(), Duration::from_millis(20)).await.unwrap();
        store.set("b", b"2".to_vec(), Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.purge_expired().await.unwrap(), 0);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("b").await.unwrap(), Some(b"2".to_vec()));
    }
}
