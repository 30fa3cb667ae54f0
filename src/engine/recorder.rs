//! Ingestion: telemetry events → pipelined batches of atomic store mutations.
//!
//! Every public method swallows store failures. A failed write is logged
//! with its operation name, counted, and lost; callers never see an error.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use super::bucket::bucket_for;
use super::keys::{self, latency_field, HOURLY_TTL_SECS, SERIES_TTL_SECS, STATUS_SUCCESS};
use super::retriever::parse_status;
use crate::middleware::metrics::EngineMetrics;
use crate::models::analytics::{EntityType, TrendMetric};
use crate::models::sample::{ErrorType, MetricSample};
use crate::store::{MetricsStore, StoreOp};

/// Optional timing components of one request, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyTimings {
    pub ttft_ms: Option<f64>,
    pub total_time_ms: Option<f64>,
    pub network_time_ms: Option<f64>,
    pub backend_time_ms: Option<f64>,
}

impl LatencyTimings {
    pub fn is_empty(&self) -> bool {
        self.ttft_ms.is_none()
            && self.total_time_ms.is_none()
            && self.network_time_ms.is_none()
            && self.backend_time_ms.is_none()
    }
}

impl From<&MetricSample> for LatencyTimings {
    fn from(s: &MetricSample) -> Self {
        Self {
            ttft_ms: s.ttft_ms,
            total_time_ms: s.total_time_ms,
            network_time_ms: s.network_time_ms,
            backend_time_ms: s.backend_time_ms,
        }
    }
}

/// Upper bound on ranking writes per refresh.
const REFRESH_ATTEMPTS: usize = 3;

/// A model's bucket counters as read back for ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ModelCounts {
    requests: u64,
    success: u64,
    errors: u64,
}

impl ModelCounts {
    /// Request count used for the provider index. A bare status write has
    /// no matching request start, so finished requests set the floor.
    fn ranked_requests(&self) -> u64 {
        self.requests.max(self.success + self.errors)
    }
}

/// Accumulates mutations and appends exactly one TTL refresh per touched key.
#[derive(Default)]
struct Batch {
    ops: Vec<StoreOp>,
    touched: Vec<(String, u64)>,
}

impl Batch {
    fn touch(&mut self, key: &str, ttl_secs: u64) {
        if !self.touched.iter().any(|(k, _)| k == key) {
            self.touched.push((key.to_string(), ttl_secs));
        }
    }

    fn incr(&mut self, key: String) {
        self.touch(&key, HOURLY_TTL_SECS);
        self.ops.push(StoreOp::Incr { key });
    }

    fn hincr(&mut self, key: &str, field: &'static str, delta: i64) {
        self.touch(key, HOURLY_TTL_SECS);
        self.ops.push(StoreOp::HIncrBy { key: key.to_string(), field, delta });
    }

    fn hincr_float(&mut self, key: &str, field: &'static str, delta: f64) {
        self.touch(key, HOURLY_TTL_SECS);
        self.ops.push(StoreOp::HIncrByFloat { key: key.to_string(), field, delta });
    }

    fn push(&mut self, op: StoreOp, ttl_secs: u64) {
        self.touch(op.key(), ttl_secs);
        self.ops.push(op);
    }

    fn finish(self) -> Vec<StoreOp> {
        let mut ops = self.ops;
        ops.extend(
            self.touched
                .into_iter()
                .map(|(key, ttl_secs)| StoreOp::Expire { key, ttl_secs }),
        );
        ops
    }
}

/// Stateless ingestion client; construct once and share.
#[derive(Clone)]
pub struct Recorder {
    store: Arc<dyn MetricsStore>,
    metrics: Arc<EngineMetrics>,
    provider_top_n: usize,
}

impl Recorder {
    pub fn new(store: Arc<dyn MetricsStore>, metrics: Arc<EngineMetrics>, provider_top_n: usize) -> Self {
        Self {
            store,
            metrics,
            provider_top_n: provider_top_n.max(1),
        }
    }

    pub async fn record_request_start(&self, model: &str, gateway: Option<&str>, provider: Option<&str>) {
        self.record_request_start_at(model, gateway, provider, Utc::now()).await
    }

    pub async fn record_request_start_at(
        &self,
        model: &str,
        gateway: Option<&str>,
        provider: Option<&str>,
        at: DateTime<Utc>,
    ) {
        let mut batch = Batch::default();
        add_request_start(&mut batch, &bucket_for(at), model, gateway, provider);
        self.submit("record_request_start", batch.finish()).await;
    }

    pub async fn record_latency(&self, model: &str, timings: LatencyTimings, gateway: Option<&str>) {
        self.record_latency_at(model, timings, gateway, Utc::now()).await
    }

    pub async fn record_latency_at(
        &self,
        model: &str,
        timings: LatencyTimings,
        gateway: Option<&str>,
        at: DateTime<Utc>,
    ) {
        if timings.is_empty() {
            return;
        }
        let mut batch = Batch::default();
        add_latency(&mut batch, &bucket_for(at), model, &timings, gateway, at);
        self.submit("record_latency", batch.finish()).await;
    }

    pub async fn record_status(
        &self,
        model: &str,
        success: bool,
        error_type: Option<ErrorType>,
        gateway: Option<&str>,
        provider: Option<&str>,
    ) {
        self.record_status_at(model, success, error_type, gateway, provider, Utc::now())
            .await
    }

    pub async fn record_status_at(
        &self,
        model: &str,
        success: bool,
        error_type: Option<ErrorType>,
        gateway: Option<&str>,
        provider: Option<&str>,
        at: DateTime<Utc>,
    ) {
        let bucket = bucket_for(at);
        let failure = (!success).then(|| error_type.unwrap_or(ErrorType::Other));
        let mut batch = Batch::default();
        add_status(&mut batch, &bucket, model, failure, gateway, provider);
        if self.submit("record_status", batch.finish()).await {
            self.refresh_rankings(model, &bucket, provider).await;
        }
    }

    /// Start + latency + status of a finished request, as one round trip,
    /// followed by the leaderboard refresh.
    pub async fn record_request_complete(&self, sample: &MetricSample) {
        let bucket = bucket_for(sample.recorded_at);
        let gateway = sample.gateway.as_deref();
        let provider = sample.provider.as_deref();

        let mut batch = Batch::default();
        add_request_start(&mut batch, &bucket, &sample.model, gateway, provider);
        let timings = LatencyTimings::from(sample);
        if !timings.is_empty() {
            add_latency(&mut batch, &bucket, &sample.model, &timings, gateway, sample.recorded_at);
        }
        add_status(&mut batch, &bucket, &sample.model, sample.failure(), gateway, provider);

        if self.submit("record_request_complete", batch.finish()).await {
            self.refresh_rankings(&sample.model, &bucket, provider).await;
        }
    }

    /// Append one `(timestamp, value)` point to a model's series and push the
    /// whole series' expiry out to six hours.
    pub async fn record_time_series_point(
        &self,
        model: &str,
        metric: TrendMetric,
        value: f64,
        at: DateTime<Utc>,
    ) {
        let mut batch = Batch::default();
        batch.push(series_point(model, metric, value, at), SERIES_TTL_SECS);
        self.submit("record_time_series_point", batch.finish()).await;
    }

    /// Read the model's bucket counters, the source both rankings are
    /// derived from. `None` when the read failed.
    async fn read_counts(&self, model: &str, bucket: &str) -> Option<ModelCounts> {
        let requests_key = keys::requests(EntityType::Model, model, bucket);
        let status_key = keys::status(EntityType::Model, model, bucket);
        let (requests, hash) = futures::join!(
            self.store.get_counter(&requests_key),
            self.store.hash_get_all(&status_key),
        );
        match (requests, hash) {
            (Ok(requests), Ok(hash)) => {
                let (success, errors) = parse_status(&hash);
                Some(ModelCounts {
                    requests: requests.map_or(0, |n| n.max(0) as u64),
                    success,
                    errors: errors.total(),
                })
            }
            (Err(e), _) | (_, Err(e)) => {
                self.metrics.store_error("refresh_rankings");
                tracing::warn!(op = "refresh_rankings", model, bucket, error = %e, "metrics write dropped");
                None
            }
        }
    }

    /// Overwrite the model's health score and, when it has a provider, its
    /// score in the provider's bounded model index.
    ///
    /// Both are fixed-score writes computed from counters read just before.
    /// A concurrent refresh can land an older score after a newer one, so
    /// the counters are read back after each write and the scores rewritten
    /// until they stop moving (at most `REFRESH_ATTEMPTS` writes).
    async fn refresh_rankings(&self, model: &str, bucket: &str, provider: Option<&str>) {
        let mut written: Option<ModelCounts> = None;
        for _ in 0..REFRESH_ATTEMPTS {
            let Some(counts) = self.read_counts(model, bucket).await else {
                return;
            };
            if written == Some(counts) {
                return;
            }
            let mut batch = Batch::default();
            if let Some(score) = super::retriever::success_rate(counts.success, counts.errors) {
                batch.push(
                    StoreOp::ZAdd { key: keys::health(bucket), member: model.to_string(), score },
                    HOURLY_TTL_SECS,
                );
            }
            if let Some(p) = provider {
                let index = keys::provider_models(p, bucket);
                batch.push(
                    StoreOp::ZAdd {
                        key: index.clone(),
                        member: model.to_string(),
                        score: counts.ranked_requests() as f64,
                    },
                    HOURLY_TTL_SECS,
                );
                // keep only the top-N models by request count
                batch.push(
                    StoreOp::ZRemRangeByRank {
                        key: index,
                        start: 0,
                        stop: -(self.provider_top_n as isize) - 1,
                    },
                    HOURLY_TTL_SECS,
                );
            }
            if !self.submit("refresh_rankings", batch.finish()).await {
                return;
            }
            written = Some(counts);
        }
    }

    /// Run one batch. Returns whether it reached the store; failures are
    /// logged and counted here and go no further.
    async fn submit(&self, op: &'static str, ops: Vec<StoreOp>) -> bool {
        let started = Instant::now();
        let commands = ops.len();
        match self.store.execute(ops).await {
            Ok(()) => {
                self.metrics.observe_batch(started.elapsed().as_secs_f64());
                tracing::trace!(op, commands, "metrics batch written");
                true
            }
            Err(e) => {
                self.metrics.store_error(op);
                tracing::warn!(op, commands, error = %e, "metrics write dropped");
                false
            }
        }
    }
}

fn add_status(
    batch: &mut Batch,
    bucket: &str,
    model: &str,
    failure: Option<ErrorType>,
    gateway: Option<&str>,
    provider: Option<&str>,
) {
    let field = failure.map_or(STATUS_SUCCESS, |t| t.status_field());
    batch.hincr(&keys::status(EntityType::Model, model, bucket), field, 1);
    if let Some(g) = gateway {
        batch.hincr(&keys::status(EntityType::Gateway, g, bucket), field, 1);
    }
    if let Some(p) = provider {
        batch.hincr(&keys::status(EntityType::Provider, p, bucket), field, 1);
    }
}

fn add_request_start(
    batch: &mut Batch,
    bucket: &str,
    model: &str,
    gateway: Option<&str>,
    provider: Option<&str>,
) {
    batch.incr(keys::requests(EntityType::Model, model, bucket));
    if let Some(g) = gateway {
        batch.incr(keys::requests(EntityType::Gateway, g, bucket));
    }
    if let Some(p) = provider {
        batch.incr(keys::requests(EntityType::Provider, p, bucket));
    }
}

fn add_latency(
    batch: &mut Batch,
    bucket: &str,
    model: &str,
    t: &LatencyTimings,
    gateway: Option<&str>,
    at: DateTime<Utc>,
) {
    let mut targets = vec![keys::latency(EntityType::Model, model, bucket)];
    if let Some(g) = gateway {
        targets.push(keys::latency(EntityType::Gateway, g, bucket));
    }
    let pairs = [
        (t.ttft_ms, latency_field::TTFT_SUM, latency_field::TTFT_COUNT),
        (t.total_time_ms, latency_field::TOTAL_SUM, latency_field::TOTAL_COUNT),
        (t.network_time_ms, latency_field::NETWORK_SUM, latency_field::NETWORK_COUNT),
        (t.backend_time_ms, latency_field::BACKEND_SUM, latency_field::BACKEND_COUNT),
    ];
    for key in &targets {
        for (value, sum_field, count_field) in pairs {
            if let Some(v) = value {
                batch.hincr_float(key, sum_field, v);
                batch.hincr(key, count_field, 1);
            }
        }
    }
    if let Some(ttft) = t.ttft_ms {
        batch.push(series_point(model, TrendMetric::Ttft, ttft, at), SERIES_TTL_SECS);
    }
}

/// Sorted-set member for a series point. Carries the value plus a random
/// suffix so identical (timestamp, value) pairs stay distinct members.
fn series_point(model: &str, metric: TrendMetric, value: f64, at: DateTime<Utc>) -> StoreOp {
    let ts_ms = at.timestamp_millis();
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    StoreOp::ZAdd {
        key: keys::series(model, metric),
        member: format!("{}:{}:{}", ts_ms, value, &nonce[..8]),
        score: ts_ms as f64,
    }
}

/// Value encoded in a series member by `series_point`.
pub(crate) fn series_value(member: &str) -> Option<f64> {
    member.split(':').nth(1)?.parse().ok()
}
