//! Store key layout. Every key is namespaced under `metrics:`.

use crate::models::analytics::{EntityType, TrendMetric};

/// TTL of every per-bucket aggregate key.
pub const HOURLY_TTL_SECS: u64 = 3_600;

/// TTL of a whole time-series key, refreshed on every write.
pub const SERIES_TTL_SECS: u64 = 21_600;

pub fn requests(entity: EntityType, id: &str, bucket: &str) -> String {
    format!("metrics:{}:{}:{}:requests", entity, id, bucket)
}

pub fn latency(entity: EntityType, id: &str, bucket: &str) -> String {
    format!("metrics:{}:{}:{}:latency", entity, id, bucket)
}

pub fn status(entity: EntityType, id: &str, bucket: &str) -> String {
    format!("metrics:{}:{}:{}:status", entity, id, bucket)
}

/// Sorted set model → health score (0-100) for one bucket.
pub fn health(bucket: &str) -> String {
    format!("metrics:health:{}", bucket)
}

/// Bounded sorted set model → request count for one provider and bucket.
pub fn provider_models(provider: &str, bucket: &str) -> String {
    format!("metrics:provider:{}:{}:models", provider, bucket)
}

/// Sorted set timestamp(ms) → value for one model and metric.
pub fn series(model: &str, metric: TrendMetric) -> String {
    format!("metrics:ts:{}:{}", model, metric)
}

/// Cache-aside entries, kept apart from the aggregates they summarize.
pub fn cache(parts: &[&str]) -> String {
    format!("metrics:cache:{}", parts.join(":"))
}

/// Latency hash fields.
pub mod latency_field {
    pub const TTFT_SUM: &str = "ttft_sum";
    pub const TTFT_COUNT: &str = "ttft_count";
    pub const TOTAL_SUM: &str = "total_sum";
    pub const TOTAL_COUNT: &str = "total_count";
    pub const NETWORK_SUM: &str = "network_sum";
    pub const NETWORK_COUNT: &str = "network_count";
    pub const BACKEND_SUM: &str = "backend_sum";
    pub const BACKEND_COUNT: &str = "backend_count";
}

/// Status hash field counting successful requests. Error fields come from
/// `ErrorType::status_field`.
pub const STATUS_SUCCESS: &str = "success";
