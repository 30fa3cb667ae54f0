//! Real-time metrics aggregation for a multi-provider LLM gateway.
//!
//! Telemetry is folded into hourly, self-expiring aggregates in a shared
//! key-value store and served back as snapshots, provider summaries, a health
//! leaderboard and short trend series.

use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use axum::Router;

pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod errors;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod store;

use cache::TieredCache;
use config::{Config, StoreBackend};
use engine::dispatch::MetricsDispatcher;
use engine::leaderboard::Leaderboard;
use engine::recorder::Recorder;
use engine::retriever::Retriever;
use engine::trends::TrendSeries;
use middleware::metrics::EngineMetrics;
use store::{MemoryStore, MetricsStore, RedisStore};

/// Shared application state passed to handlers and background jobs.
///
/// Everything here is a stateless client over the store except `cache`,
/// whose local tier is bounded by its TTL.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn MetricsStore>,
    /// Present when the aggregates live in this process and need purging.
    pub local_store: Option<MemoryStore>,
    pub cache: TieredCache,
    pub retriever: Retriever,
    pub leaderboard: Leaderboard,
    pub trends: TrendSeries,
    pub dispatcher: MetricsDispatcher,
    pub metrics: Arc<EngineMetrics>,
}

impl AppState {
    /// Wire the engine over an already-connected store. Spawns the write
    /// dispatcher, so it must run inside a Tokio runtime.
    pub fn new(config: Config, store: Arc<dyn MetricsStore>) -> Self {
        let metrics = Arc::new(EngineMetrics::new());
        let recorder = Recorder::new(store.clone(), metrics.clone(), config.provider_top_n);
        let (dispatcher, _consumer) = MetricsDispatcher::spawn(
            recorder,
            metrics.clone(),
            config.queue_capacity,
            config.workers,
        );
        let retriever = Retriever::new(store.clone(), config.provider_top_n);

        Self {
            cache: TieredCache::new(store.clone(), metrics.clone()),
            leaderboard: Leaderboard::new(store.clone(), retriever.clone()),
            trends: TrendSeries::new(store.clone()),
            retriever,
            dispatcher,
            metrics,
            local_store: None,
            store,
            config,
        }
    }

    /// Process-local store; single-node deployments and tests.
    pub fn in_memory(config: Config) -> Self {
        let store = MemoryStore::new();
        let mut state = Self::new(config, Arc::new(store.clone()));
        state.local_store = Some(store);
        state
    }

    /// Build the state for the configured backend.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        match config.store {
            StoreBackend::Memory => {
                tracing::warn!("METRICS_STORE=memory: aggregates are local to this process");
                Ok(Self::in_memory(config))
            }
            StoreBackend::Redis => {
                tracing::info!("Connecting to Redis...");
                let store = RedisStore::connect(
                    &config.redis_url,
                    config.read_timeout(),
                    config.write_timeout(),
                )
                .await
                .with_context(|| format!("connecting to {}", config.redis_url))?;
                Ok(Self::new(config, Arc::new(store)))
            }
        }
    }
}

/// Full HTTP surface: health probes, the metrics API and the cross-cutting
/// layers (tracing, CORS, request ids, security headers).
pub fn build_router(state: Arc<AppState>) -> Router {
    let origin = state.config.dashboard_origin.clone();
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(api::handlers::readiness_check))
        .merge(api::api_router())
        .with_state(state)
        .layer(api::cors_layer(origin))
        .layer(axum::middleware::from_fn(
            middleware::request_id::request_id_middleware,
        ))
        .layer(axum::middleware::from_fn(
            middleware::request_id::security_headers_middleware,
        ))
}
