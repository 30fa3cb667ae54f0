//! Prometheus self-instrumentation for the metrics engine.
//!
//! The engine's own health (queue drops, store failures, cache hit ratio) is
//! exported on `GET /metrics` so operators can see when dashboard data is
//! being lost. Each `EngineMetrics` owns its registry, so several instances
//! (tests, CLI) never collide in the global default registry.

use prometheus::{
    histogram_opts, opts, Encoder, Histogram, IntCounter, IntCounterVec, Registry, TextEncoder,
};

pub struct EngineMetrics {
    registry: Registry,
    events_enqueued: IntCounter,
    events_dropped: IntCounterVec,
    store_errors: IntCounterVec,
    cache_lookups: IntCounterVec,
    store_batch_seconds: Histogram,
}

impl EngineMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_enqueued = IntCounter::with_opts(opts!(
            "metrics_events_enqueued_total",
            "Telemetry events accepted onto the write queue"
        ))
        .expect("valid metric opts");

        let events_dropped = IntCounterVec::new(
            opts!(
                "metrics_events_dropped_total",
                "Telemetry events discarded before reaching the store"
            ),
            &["reason"],
        )
        .expect("valid metric opts");

        let store_errors = IntCounterVec::new(
            opts!("metrics_store_errors_total", "Store failures by operation"),
            &["op"],
        )
        .expect("valid metric opts");

        let cache_lookups = IntCounterVec::new(
            opts!("metrics_cache_lookups_total", "Cache-aside lookups by result"),
            &["result"],
        )
        .expect("valid metric opts");

        let store_batch_seconds = Histogram::with_opts(histogram_opts!(
            "metrics_store_batch_seconds",
            "Latency of one pipelined write batch",
            vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5, 2.0]
        ))
        .expect("valid metric opts");

        // Fresh registry: registration can only fail on duplicate names.
        registry
            .register(Box::new(events_enqueued.clone()))
            .expect("failed to register metrics_events_enqueued_total");
        registry
            .register(Box::new(events_dropped.clone()))
            .expect("failed to register metrics_events_dropped_total");
        registry
            .register(Box::new(store_errors.clone()))
            .expect("failed to register metrics_store_errors_total");
        registry
            .register(Box::new(cache_lookups.clone()))
            .expect("failed to register metrics_cache_lookups_total");
        registry
            .register(Box::new(store_batch_seconds.clone()))
            .expect("failed to register metrics_store_batch_seconds");

        Self {
            registry,
            events_enqueued,
            events_dropped,
            store_errors,
            cache_lookups,
            store_batch_seconds,
        }
    }

    pub fn event_enqueued(&self) {
        self.events_enqueued.inc();
    }

    /// `reason` is `queue_full` or `closed`.
    pub fn event_dropped(&self, reason: &str) {
        self.events_dropped.with_label_values(&[reason]).inc();
    }

    pub fn store_error(&self, op: &str) {
        self.store_errors.with_label_values(&[op]).inc();
    }

    pub fn cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups.with_label_values(&[result]).inc();
    }

    pub fn observe_batch(&self, secs: f64) {
        self.store_batch_seconds.observe(secs);
    }

    pub fn dropped(&self, reason: &str) -> u64 {
        self.events_dropped.with_label_values(&[reason]).get()
    }

    pub fn enqueued(&self) -> u64 {
        self.events_enqueued.get()
    }

    pub fn store_errors(&self, op: &str) -> u64 {
        self.store_errors.with_label_values(&[op]).get()
    }

    /// Encode every metric in this registry as Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────
