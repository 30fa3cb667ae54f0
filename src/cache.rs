use chrono::Utc;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::middleware::metrics::EngineMetrics;
use crate::store::MetricsStore;

/// Default lifetime of a cached dashboard view.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60;

/// Entry stored in the local DashMap with an expiry timestamp.
#[derive(Clone)]
pub(crate) struct CacheEntry {
    value: String,
    pub(crate) expires_at: Instant,
}

/// What goes into the shared tier: the payload plus its absolute expiry, so
/// a node that picks it up later never serves it past the original TTL.
#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    expires_at_ms: i64,
    value: T,
}

/// Two-tier read cache: in-memory DashMap (tier 1) backed by the shared
/// store (tier 2). The aggregates themselves are the source of truth and
/// are only consulted by the loader on a miss.
///
/// Nothing invalidates entries on write; staleness is bounded by the TTL.
#[derive(Clone)]
pub struct TieredCache {
    pub(crate) local: Arc<DashMap<String, CacheEntry>>,
    store: Arc<dyn MetricsStore>,
    metrics: Arc<EngineMetrics>,
}

impl TieredCache {
    pub fn new(store: Arc<dyn MetricsStore>, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            local: Arc::new(DashMap::new()),
            store,
            metrics,
        }
    }

    /// Look a key up in both tiers. Store errors count as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        // tier 1: in-memory (with TTL check)
        if let Some(entry) = self.local.get(key) {
            if Instant::now() < entry.expires_at {
                return serde_json::from_str(&entry.value).ok();
            }
            // expired: drop the ref before removing
            drop(entry);
            self.local.remove(key);
        }

        // tier 2: shared store
        let raw = match self.store.get(key).await {
            Ok(Some(v)) => v,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(op = "cache_get", key = key, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };
        let envelope: Envelope<serde_json::Value> = serde_json::from_str(&raw).ok()?;
        let remaining_ms = envelope.expires_at_ms - Utc::now().timestamp_millis();
        if remaining_ms <= 0 {
            return None;
        }
        let value = serde_json::to_string(&envelope.value).ok()?;
        self.local.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + Duration::from_millis(remaining_ms as u64),
            },
        );
        serde_json::from_value(envelope.value).ok()
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> anyhow::Result<()> {
        let json = serde_json::to_string(value)?;
        self.local.insert(
            key.to_string(),
            CacheEntry {
                value: json,
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );

        let envelope = Envelope {
            expires_at_ms: Utc::now().timestamp_millis() + (ttl_secs as i64) * 1000,
            value,
        };
        let raw = serde_json::to_string(&envelope)?;
        self.store.set_ex(key, &raw, ttl_secs).await?;
        Ok(())
    }

    /// Cache-aside read: return the cached value if present, otherwise run
    /// `loader`, cache its `Ok` result for `ttl_secs` and return it.
    ///
    /// Loader errors are returned as-is and never cached. A failing cache
    /// never fails the read; it only costs a loader call.
    pub async fn cache_aside<T, E, F, Fut>(&self, key: &str, ttl_secs: u64, loader: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get::<T>(key).await {
            self.metrics.cache_lookup(true);
            return Ok(hit);
        }
        self.metrics.cache_lookup(false);

        let value = loader().await?;
        if let Err(e) = self.set(key, &value, ttl_secs).await {
            tracing::warn!(op = "cache_set", key = key, error = %e, "failed to populate cache");
        }
        Ok(value)
    }

    /// Remove all locally-expired entries.  Call this periodically from a
    /// background task (e.g. every 60 s) to bound memory usage.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.local.len();
        self.local.retain(|_, entry| entry.expires_at > now);
        before - self.local.len()
    }

    /// Current number of entries in the local cache (for metrics / debugging).
    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, RankOrder, StoreError, StoreOp};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache() -> (TieredCache, MemoryStore) {
        let store = MemoryStore::new();
        (
            TieredCache::new(Arc::new(store.clone()), Arc::new(EngineMetrics::new())),
            store,
        )
    }

    /// Cache store that is down for everything.
    struct DownStore;

    #[async_trait]
    impl MetricsStore for DownStore {
        async fn execute(&self, _ops: Vec<StoreOp>) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn get_counter(&self, _key: &str) -> Result<Option<i64>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn hash_get_all(&self, _key: &str) -> Result<HashMap<String, String>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn zrange_by_rank(
            &self,
            _key: &str,
            _limit: usize,
            _order: RankOrder,
        ) -> Result<Vec<(String, f64)>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn zrange_by_score(
            &self,
            _key: &str,
            _min: f64,
            _max: f64,
        ) -> Result<Vec<(String, f64)>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Timeout { op: "get" })
        }
        async fn set_ex(&self, _key: &str, _value: &str, _ttl: u64) -> Result<(), StoreError> {
            Err(StoreError::Timeout { op: "set_ex" })
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_cold_call_returns_loader_value() {
        let (cache, _) = cache();
        let v: Result<u32, StoreError> = cache.cache_aside("k", 60, || async { Ok(7) }).await;
        assert_eq!(v.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_warm_call_ignores_new_loader_output() {
        let (cache, _) = cache();
        let _: Result<String, StoreError> =
            cache.cache_aside("k", 60, || async { Ok("first".to_string()) }).await;
        let second: Result<String, StoreError> =
            cache.cache_aside("k", 60, || async { Ok("second".to_string()) }).await;
        assert_eq!(second.unwrap(), "first");
    }

    #[tokio::test]
    async fn test_shared_tier_serves_other_instances() {
        let (a, store) = cache();
        a.set("k", &vec![1, 2, 3], 60).await.unwrap();
        let b = TieredCache::new(Arc::new(store), Arc::new(EngineMetrics::new()));
        assert_eq!(b.get::<Vec<u32>>("k").await, Some(vec![1, 2, 3]));
        assert_eq!(b.local_len(), 1);
    }

    #[tokio::test]
    async fn test_loader_errors_are_not_cached() {
        let (cache, _) = cache();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let first: Result<u32, StoreError> = cache
            .cache_aside("k", 60, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Unavailable("x".into()))
            })
            .await;
        assert!(first.is_err());
        let second: Result<u32, StoreError> = cache
            .cache_aside("k", 60, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(3)
            })
            .await;
        assert_eq!(second.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unavailable_cache_degrades_to_loader() {
        let cache = TieredCache::new(Arc::new(DownStore), Arc::new(EngineMetrics::new()));
        let v: Result<u32, StoreError> = cache.cache_aside("k", 60, || async { Ok(11) }).await;
        assert_eq!(v.unwrap(), 11);
    }

    #[tokio::test]
    async fn test_zero_ttl_entries_expire() {
        let (cache, _) = cache();
        cache.set("k", &1u32, 0).await.unwrap();
        assert_eq!(cache.get::<u32>("k").await, None);
        assert_eq!(cache.evict_expired(), 0);
    }
}
