//! Short-horizon trend series, one point per hour, oldest first.
//!
//! `ttft` is downsampled from the raw time-series sorted set. `requests` and
//! `success_rate` come straight from the hourly aggregates, which are exact.
//! The result always has exactly `hours` points; hours without data are
//! filled with `0` (requests) or `null` (averages and rates).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::future::join_all;

use super::bucket::{bucket_for, hour_start, last_n_buckets};
use super::keys;
use super::recorder::series_value;
use super::retriever::{average, parse_status, success_rate};
use crate::models::analytics::{EntityType, TrendMetric, TrendPoint};
use crate::store::MetricsStore;

pub const MIN_HOURS: u32 = 1;
pub const MAX_HOURS: u32 = 24;

#[derive(Clone)]
pub struct TrendSeries {
    store: Arc<dyn MetricsStore>,
}

impl TrendSeries {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self { store }
    }

    pub async fn get_trend(&self, model: &str, metric: TrendMetric, hours: u32) -> Vec<TrendPoint> {
        self.get_trend_at(model, metric, hours, Utc::now()).await
    }

    /// Trend ending with the bucket containing `now`. Never fails: a store
    /// error leaves the affected hours empty and is logged.
    pub async fn get_trend_at(
        &self,
        model: &str,
        metric: TrendMetric,
        hours: u32,
        now: DateTime<Utc>,
    ) -> Vec<TrendPoint> {
        let hours = hours.clamp(MIN_HOURS, MAX_HOURS);
        let buckets = last_n_buckets(hours as usize, now);
        let values = match metric {
            TrendMetric::Ttft => self.ttft_by_hour(model, &buckets, hours, now).await,
            TrendMetric::Requests => self.requests_by_hour(model, &buckets).await,
            TrendMetric::SuccessRate => self.success_rate_by_hour(model, &buckets).await,
        };
        buckets
            .into_iter()
            .zip(values)
            .map(|(time_bucket, value)| TrendPoint { time_bucket, value })
            .collect()
    }

    async fn ttft_by_hour(
        &self,
        model: &str,
        buckets: &[String],
        hours: u32,
        now: DateTime<Utc>,
    ) -> Vec<Option<f64>> {
        let key = keys::series(model, TrendMetric::Ttft);
        let start = hour_start(now) - Duration::hours(i64::from(hours) - 1);
        let points = match self
            .store
            .zrange_by_score(&key, start.timestamp_millis() as f64, now.timestamp_millis() as f64)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(op = "get_trend", key = %key, error = %e, "series read failed");
                Vec::new()
            }
        };
        downsample_hourly(&points, buckets)
    }

    async fn requests_by_hour(&self, model: &str, buckets: &[String]) -> Vec<Option<f64>> {
        let reads = join_all(buckets.iter().map(|b| {
            let key = keys::requests(EntityType::Model, model, b);
            async move { (self.store.get_counter(&key).await, key) }
        }))
        .await;
        reads
            .into_iter()
            .map(|(res, key)| match res {
                Ok(n) => Some(n.unwrap_or(0).max(0) as f64),
                Err(e) => {
                    tracing::warn!(op = "get_trend", key = %key, error = %e, "counter read failed");
                    Some(0.0)
                }
            })
            .collect()
    }

    async fn success_rate_by_hour(&self, model: &str, buckets: &[String]) -> Vec<Option<f64>> {
        let reads = join_all(buckets.iter().map(|b| {
            let key = keys::status(EntityType::Model, model, b);
            async move { (self.store.hash_get_all(&key).await, key) }
        }))
        .await;
        reads
            .into_iter()
            .map(|(res, key)| match res {
                Ok(hash) => {
                    let (success, errors) = parse_status(&hash);
                    success_rate(success, errors.total())
                }
                Err(e) => {
                    tracing::warn!(op = "get_trend", key = %key, error = %e, "status read failed");
                    None
                }
            })
            .collect()
    }
}

/// Mean value per hourly bucket; buckets without samples get `None`.
fn downsample_hourly(points: &[(String, f64)], buckets: &[String]) -> Vec<Option<f64>> {
    let mut acc: HashMap<String, (f64, u64)> = HashMap::new();
    for (member, ts_ms) in points {
        let Some(value) = series_value(member) else {
            continue;
        };
        let Some(ts) = Utc.timestamp_millis_opt(*ts_ms as i64).single() else {
            continue;
        };
        let slot = acc.entry(bucket_for(ts)).or_insert((0.0, 0));
        slot.0 += value;
        slot.1 += 1;
    }
    buckets
        .iter()
        .map(|b| acc.get(b).and_then(|&(sum, n)| average(sum, n)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::recorder::{LatencyTimings, Recorder};
    use crate::middleware::metrics::EngineMetrics;
    use crate::models::sample::{ErrorType, MetricSample};
    use crate::store::MemoryStore;

    fn setup() -> (Recorder, TrendSeries) {
        let store: Arc<dyn MetricsStore> = Arc::new(MemoryStore::new());
        (
            Recorder::new(store.clone(), Arc::new(EngineMetrics::new()), 10),
            TrendSeries::new(store),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn test_empty_model_yields_exact_hours() {
        let (_, trends) = setup();
        for metric in [TrendMetric::Ttft, TrendMetric::Requests, TrendMetric::SuccessRate] {
            let pts = trends.get_trend_at("nobody", metric, 6, now()).await;
            assert_eq!(pts.len(), 6);
            assert_eq!(pts[0].time_bucket, "2025-01-01-07");
            assert_eq!(pts[5].time_bucket, "2025-01-01-12");
            for p in &pts {
                match metric {
                    TrendMetric::Requests => assert_eq!(p.value, Some(0.0)),
                    _ => assert_eq!(p.value, None),
                }
            }
        }
    }

    #[tokio::test]
    async fn test_hours_are_clamped() {
        let (_, trends) = setup();
        assert_eq!(trends.get_trend_at("m", TrendMetric::Requests, 0, now()).await.len(), 1);
        assert_eq!(trends.get_trend_at("m", TrendMetric::Requests, 99, now()).await.len(), 24);
    }

    #[tokio::test]
    async fn test_ttft_downsampled_per_hour() {
        let (rec, trends) = setup();
        let h11 = Utc.with_ymd_and_hms(2025, 1, 1, 11, 10, 0).unwrap();
        let h12 = Utc.with_ymd_and_hms(2025, 1, 1, 12, 5, 0).unwrap();
        for (v, at) in [(100.0, h11), (300.0, h11), (50.0, h12)] {
            rec.record_latency_at(
                "m",
                LatencyTimings { ttft_ms: Some(v), ..Default::default() },
                None,
                at,
            )
            .await;
        }
        let pts = trends.get_trend_at("m", TrendMetric::Ttft, 3, now()).await;
        let values: Vec<Option<f64>> = pts.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![None, Some(200.0), Some(50.0)]);
    }

    #[tokio::test]
    async fn test_explicit_series_points_feed_ttft_trend() {
        let (rec, trends) = setup();
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 12, 1, 0).unwrap();
        rec.record_time_series_point("m", TrendMetric::Ttft, 40.0, at).await;
        rec.record_time_series_point("m", TrendMetric::Ttft, 60.0, at).await;
        let pts = trends.get_trend_at("m", TrendMetric::Ttft, 1, now()).await;
        assert_eq!(pts[0].value, Some(50.0));
    }

    #[tokio::test]
    async fn test_requests_and_success_rate_from_aggregates() {
        let (rec, trends) = setup();
        let mut ok = MetricSample::new("m");
        ok.recorded_at = Utc.with_ymd_and_hms(2025, 1, 1, 11, 0, 0).unwrap();
        let mut bad = ok.clone();
        bad.success = false;
        bad.error_type = Some(ErrorType::Timeout);
        rec.record_request_complete(&ok).await;
        rec.record_request_complete(&bad).await;

        let reqs = trends.get_trend_at("m", TrendMetric::Requests, 2, now()).await;
        assert_eq!(reqs[0].value, Some(2.0));
        assert_eq!(reqs[1].value, Some(0.0));

        let rates = trends.get_trend_at("m", TrendMetric::SuccessRate, 2, now()).await;
        assert_eq!(rates[0].value, Some(50.0));
        assert_eq!(rates[1].value, None);
    }
}
