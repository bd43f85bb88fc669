use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Identifies a cached response by resource kind and a digest of its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    resource: String,
    digest: String,
}

impl CacheKey {
    /// Builds a key from `params` serialized to canonical JSON.
    ///
    /// Object keys are emitted in sorted order, so two parameter sets with the same
    /// content map to the same key regardless of insertion order.
    pub fn new<P: Serialize + ?Sized>(resource: &str, params: &P) -> Self {
        let canonical = serde_json::to_value(params)
            .map(|value| value.to_string())
            .unwrap_or_default();
        let digest = Sha256::digest(canonical.as_bytes());
        Self {
            resource: resource.to_string(),
            digest: format!("{digest:x}"),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Hex SHA-256 of the canonical parameters.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// Storage for raw response bodies. Implementations swallow their own I/O
/// failures; a cache miss only costs a request.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Option<String>;
    async fn put(&self, key: CacheKey, body: String);
    /// Drops every entry and returns how many were removed.
    async fn clear(&self) -> usize;
    /// Live (unexpired) entries.
    async fn len(&self) -> usize;
}

struct Entry {
    body: String,
    expires_at: Instant,
}

pub struct MemoryCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, Entry>>,
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Option<String> {
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.body.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn put(&self, key: CacheKey, body: String) {
        if self.ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        let mut entries = self.entries();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key,
            Entry {
                body,
                expires_at: now + self.ttl,
            },
        );
    }

    async fn clear(&self) -> usize {
        let mut entries = self.entries();
        let removed = entries.len();
        entries.clear();
        removed
    }

    async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries()
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn key_ignores_parameter_order() {
        let mut first = HashMap::new();
        first.insert("top", "100");
        first.insert("skip", "0");
        let mut second = BTreeMap::new();
        second.insert("skip", "0");
        second.insert("top", "100");
        assert_eq!(
            CacheKey::new("projects", &first),
            CacheKey::new("projects", &second)
        );
    }

    #[test]
    fn key_separates_resources_and_params() {
        let params = ["a"];
        assert_ne!(
            CacheKey::new("projects", &params),
            CacheKey::new("teams", &params)
        );
        assert_ne!(
            CacheKey::new("teams", &["a"]),
            CacheKey::new("teams", &["b"])
        );
    }

    #[tokio::test]
    async fn stores_and_clears_entries() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        let key = CacheKey::new("projects", "org");
        cache.put(key.clone(), "[]".into()).await;
        assert_eq!(cache.get(&key).await.as_deref(), Some("[]"));
        assert_eq!(cache.len().await, 1);

        assert_eq!(cache.clear().await, 1);
        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn zero_ttl_disables_caching() {
        let cache = MemoryCache::new(Duration::ZERO);
        let key = CacheKey::new("projects", "org");
        cache.put(key.clone(), "[]".into()).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_dropped() {
        let cache = MemoryCache::new(Duration::from_millis(5));
        let key = CacheKey::new("teams", "org");
        cache.put(key.clone(), "[]".into()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn put_purges_expired_entries() {
        let cache = MemoryCache::new(Duration::from_millis(5));
        for org in ["a", "b", "c"] {
            cache.put(CacheKey::new("teams", org), "[]".into()).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        cache.put(CacheKey::new("teams", "d"), "[]".into()).await;
        assert_eq!(cache.entries().len(), 1);
        assert!(cache.entries().contains_key(&CacheKey::new("teams", "d")));
    }
}
