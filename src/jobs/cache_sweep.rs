//! Background job: bound the memory held by expired entries.
//!
//! Expiry is lazy everywhere, so entries nobody reads again would otherwise
//! linger. Every minute this drops expired entries from the cache's local
//! tier and, when the aggregates live in-process, from the memory store.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::AppState;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn the background sweep task. Call this once at startup.
pub fn spawn(state: Arc<AppState>) -> JoinHandle<()> {
    spawn_with_interval(state, SWEEP_INTERVAL)
}

pub fn spawn_with_interval(state: Arc<AppState>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            sweep(&state);
        }
    })
}

/// One pass. Returns `(cache_entries, store_keys)` removed.
pub fn sweep(state: &AppState) -> (usize, usize) {
    let cache_evicted = state.cache.evict_expired();
    let store_purged = state
        .local_store
        .as_ref()
        .map_or(0, |store| store.purge_expired());

    if cache_evicted > 0 || store_purged > 0 {
        tracing::debug!(
            cache_evicted,
            store_purged,
            cache_len = state.cache.local_len(),
            "expired entries swept"
        );
    }
    (cache_evicted, store_purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::{MetricsStore, StoreOp};

    #[tokio::test]
    async fn test_sweep_drops_expired_entries() {
        let state = AppState::in_memory(Config::default());
        state.cache.set("fresh", &1u32, 60).await.unwrap();
        state.cache.set("stale", &2u32, 0).await.unwrap();
        state
            .store
            .execute(vec![
                StoreOp::Incr { key: "gone".into() },
                StoreOp::Expire { key: "gone".into(), ttl_secs: 0 },
            ])
            .await
            .unwrap();

        let (cache_evicted, store_purged) = sweep(&state);
        assert_eq!(cache_evicted, 1);
        // "stale" also reached the store tier with a zero TTL
        assert!(store_purged >= 1);
        assert_eq!(state.cache.local_len(), 1);
    }
}
