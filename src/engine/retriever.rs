//! Read side: derived snapshots computed from raw counters and hashes.
//!
//! Averages are always `sum / count` evaluated here, at read time. A zero
//! count yields `None`, which the DTOs omit from JSON.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;

use super::bucket::current_bucket;
use super::keys::{self, latency_field, STATUS_SUCCESS};
use crate::models::analytics::{
    EntityType, ErrorBreakdown, MetricsSnapshot, ProviderModelStat, ProviderSummary,
};
use crate::models::sample::ErrorType;
use crate::store::{MetricsStore, RankOrder, StoreError};

/// How many models a provider summary lists in `top_models`.
pub const SUMMARY_TOP_MODELS: usize = 5;

/// `100 * success / (success + errors)`, `None` when nothing was recorded.
pub(crate) fn success_rate(success: u64, errors: u64) -> Option<f64> {
    let total = success + errors;
    (total > 0).then(|| 100.0 * success as f64 / total as f64)
}

pub(crate) fn average(sum: f64, count: u64) -> Option<f64> {
    (count > 0).then(|| sum / count as f64)
}

fn field_u64(hash: &HashMap<String, String>, field: &str) -> u64 {
    hash.get(field)
        .and_then(|v| v.parse::<i64>().ok())
        .map_or(0, |n| n.max(0) as u64)
}

fn field_f64(hash: &HashMap<String, String>, field: &str) -> f64 {
    hash.get(field)
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Split a status hash into the success count and per-class error counts.
pub(crate) fn parse_status(hash: &HashMap<String, String>) -> (u64, ErrorBreakdown) {
    let mut breakdown = ErrorBreakdown::default();
    for t in ErrorType::ALL {
        breakdown.set(t, field_u64(hash, t.status_field()));
    }
    (field_u64(hash, STATUS_SUCCESS), breakdown)
}

fn latency_average(hash: &HashMap<String, String>, sum: &str, count: &str) -> Option<f64> {
    average(field_f64(hash, sum), field_u64(hash, count))
}

/// Assemble a snapshot from the three raw aggregates of one bucket.
pub(crate) fn build_snapshot(
    id: &str,
    bucket: &str,
    requests: i64,
    latency: &HashMap<String, String>,
    status: &HashMap<String, String>,
) -> MetricsSnapshot {
    let (success_count, error_breakdown) = parse_status(status);
    let error_count = error_breakdown.total();
    MetricsSnapshot {
        id: id.to_string(),
        time_bucket: bucket.to_string(),
        requests: requests.max(0) as u64,
        success_count,
        error_count,
        success_rate: success_rate(success_count, error_count),
        avg_ttft_ms: latency_average(latency, latency_field::TTFT_SUM, latency_field::TTFT_COUNT),
        avg_total_time_ms: latency_average(
            latency,
            latency_field::TOTAL_SUM,
            latency_field::TOTAL_COUNT,
        ),
        avg_network_time_ms: latency_average(
            latency,
            latency_field::NETWORK_SUM,
            latency_field::NETWORK_COUNT,
        ),
        avg_backend_time_ms: latency_average(
            latency,
            latency_field::BACKEND_SUM,
            latency_field::BACKEND_COUNT,
        ),
        error_breakdown,
    }
}

/// Stateless read client; construct once and share.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn MetricsStore>,
    provider_top_n: usize,
}

impl Retriever {
    pub fn new(store: Arc<dyn MetricsStore>, provider_top_n: usize) -> Self {
        Self {
            store,
            provider_top_n: provider_top_n.max(1),
        }
    }

    /// Snapshot of one model. `Ok(None)` means nothing was ever recorded for
    /// that model in that bucket.
    pub async fn get_model_metrics(
        &self,
        model: &str,
        bucket: Option<&str>,
    ) -> Result<Option<MetricsSnapshot>, StoreError> {
        self.get_entity_metrics(EntityType::Model, model, bucket).await
    }

    /// Same as `get_model_metrics` for any entity with its own aggregates.
    /// Providers only carry counters and status; their latency hash is
    /// simply absent.
    pub async fn get_entity_metrics(
        &self,
        entity: EntityType,
        id: &str,
        bucket: Option<&str>,
    ) -> Result<Option<MetricsSnapshot>, StoreError> {
        let bucket = bucket.map_or_else(current_bucket, str::to_string);
        let requests_key = keys::requests(entity, id, &bucket);
        let latency_key = keys::latency(entity, id, &bucket);
        let status_key = keys::status(entity, id, &bucket);

        let (requests, latency, status) = futures::join!(
            self.store.get_counter(&requests_key),
            self.store.hash_get_all(&latency_key),
            self.store.hash_get_all(&status_key),
        );

        let Some(requests) = requests? else {
            return Ok(None);
        };
        Ok(Some(build_snapshot(id, &bucket, requests, &latency?, &status?)))
    }

    /// Roll-up over the provider's bounded model index, fanned out in
    /// parallel. `Ok(None)` when the provider has no data in the bucket.
    pub async fn get_provider_summary(
        &self,
        provider: &str,
        bucket: Option<&str>,
    ) -> Result<Option<ProviderSummary>, StoreError> {
        let bucket = bucket.map_or_else(current_bucket, str::to_string);
        let index_key = keys::provider_models(provider, &bucket);
        let requests_key = keys::requests(EntityType::Provider, provider, &bucket);
        let status_key = keys::status(EntityType::Provider, provider, &bucket);

        let (index, provider_requests, provider_status) = futures::join!(
            self.store
                .zrange_by_rank(&index_key, self.provider_top_n, RankOrder::Desc),
            self.store.get_counter(&requests_key),
            self.store.hash_get_all(&status_key),
        );
        let index = index?;
        let provider_requests = provider_requests?;
        let provider_status = provider_status?;

        if index.is_empty() && provider_requests.is_none() {
            return Ok(None);
        }

        let snapshots = try_join_all(
            index
                .iter()
                .map(|(model, _)| self.get_model_metrics(model, Some(&bucket))),
        )
        .await?;
        let models: Vec<MetricsSnapshot> = snapshots.into_iter().flatten().collect();

        Ok(Some(summarize(
            provider,
            &bucket,
            provider_requests,
            &provider_status,
            models,
        )))
    }
}

/// Combine per-model snapshots into a provider summary.
pub(crate) fn summarize(
    provider: &str,
    bucket: &str,
    provider_requests: Option<i64>,
    provider_status: &HashMap<String, String>,
    mut models: Vec<MetricsSnapshot>,
) -> ProviderSummary {
    let model_requests: u64 = models.iter().map(|m| m.requests).sum();
    let requests = provider_requests.map_or(model_requests, |n| n.max(0) as u64);

    let (mut success_count, breakdown) = parse_status(provider_status);
    let mut error_count = breakdown.total();
    if provider_status.is_empty() {
        success_count = models.iter().map(|m| m.success_count).sum();
        error_count = models.iter().map(|m| m.error_count).sum();
    }

    let rates: Vec<f64> = models.iter().filter_map(|m| m.success_rate).collect();
    let avg_success_rate = average(rates.iter().sum(), rates.len() as u64);

    let (ttft_weighted, ttft_weight) = models
        .iter()
        .filter_map(|m| m.avg_ttft_ms.map(|t| (t * m.requests as f64, m.requests)))
        .fold((0.0, 0u64), |(s, w), (t, r)| (s + t, w + r));
    let avg_ttft_ms = average(ttft_weighted, ttft_weight);

    models.sort_by(|a, b| b.requests.cmp(&a.requests).then_with(|| a.id.cmp(&b.id)));
    let total_models = models.len();
    let top_models = models
        .into_iter()
        .take(SUMMARY_TOP_MODELS)
        .map(|m| ProviderModelStat {
            model_id: m.id,
            requests: m.requests,
            success_rate: m.success_rate,
            avg_ttft_ms: m.avg_ttft_ms,
        })
        .collect();

    ProviderSummary {
        provider: provider.to_string(),
        time_bucket: bucket.to_string(),
        requests,
        total_models,
        success_count,
        error_count,
        avg_success_rate,
        avg_ttft_ms,
        top_models,
    }
}
