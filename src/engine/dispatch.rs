//! Fire-and-forget dispatch of telemetry writes.
//!
//! `submit` never waits: events go onto a bounded queue, and when the queue
//! is full (a slow or dead store under sustained load) the event is dropped
//! and counted. Losing metrics under overload is accepted; growing memory
//! without bound or slowing the request path is not.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use super::recorder::{LatencyTimings, Recorder};
use crate::middleware::metrics::EngineMetrics;
use crate::models::sample::{ErrorType, MetricSample};

/// One unit of work for the background writers.
#[derive(Debug, Clone)]
pub enum MetricEvent {
    RequestStart {
        model: String,
        gateway: Option<String>,
        provider: Option<String>,
        at: DateTime<Utc>,
    },
    Latency {
        model: String,
        timings: LatencyTimings,
        gateway: Option<String>,
        at: DateTime<Utc>,
    },
    Status {
        model: String,
        success: bool,
        error_type: Option<ErrorType>,
        gateway: Option<String>,
        provider: Option<String>,
        at: DateTime<Utc>,
    },
    Complete(MetricSample),
}

impl MetricEvent {
    pub fn model(&self) -> &str {
        match self {
            MetricEvent::RequestStart { model, .. }
            | MetricEvent::Latency { model, .. }
            | MetricEvent::Status { model, .. } => model,
            MetricEvent::Complete(s) => &s.model,
        }
    }

    async fn apply(self, recorder: &Recorder) {
        match self {
            MetricEvent::RequestStart { model, gateway, provider, at } => {
                recorder
                    .record_request_start_at(&model, gateway.as_deref(), provider.as_deref(), at)
                    .await
            }
            MetricEvent::Latency { model, timings, gateway, at } => {
                recorder
                    .record_latency_at(&model, timings, gateway.as_deref(), at)
                    .await
            }
            MetricEvent::Status { model, success, error_type, gateway, provider, at } => {
                recorder
                    .record_status_at(
                        &model,
                        success,
                        error_type,
                        gateway.as_deref(),
                        provider.as_deref(),
                        at,
                    )
                    .await
            }
            MetricEvent::Complete(sample) => recorder.record_request_complete(&sample).await,
        }
    }
}

/// Handle used on the request path. Cheap to clone.
#[derive(Clone)]
pub struct MetricsDispatcher {
    tx: mpsc::Sender<MetricEvent>,
    metrics: Arc<EngineMetrics>,
}

impl MetricsDispatcher {
    /// Start the consumer. At most `workers` events are written concurrently
    /// and at most `capacity` wait in the queue.
    pub fn spawn(
        recorder: Recorder,
        metrics: Arc<EngineMetrics>,
        capacity: usize,
        workers: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<MetricEvent>(capacity.max(1));
        let permits = Arc::new(Semaphore::new(workers.max(1)));

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let recorder = recorder.clone();
                tokio::spawn(async move {
                    event.apply(&recorder).await;
                    drop(permit);
                });
            }
            tracing::debug!("metrics dispatcher stopped");
        });

        (Self { tx, metrics }, handle)
    }

    /// Enqueue without waiting. Returns whether the event was accepted.
    pub fn submit(&self, event: MetricEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.metrics.event_enqueued();
                true
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.metrics.event_dropped("queue_full");
                tracing::debug!(model = %event.model(), "metrics queue full, event dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.metrics.event_dropped("closed");
                tracing::debug!(model = %event.model(), "metrics dispatcher closed, event dropped");
                false
            }
        }
    }

    pub fn record_request_start(&self, model: &str, gateway: Option<&str>, provider: Option<&str>) {
        self.submit(MetricEvent::RequestStart {
            model: model.to_string(),
            gateway: gateway.map(str::to_string),
            provider: provider.map(str::to_string),
            at: Utc::now(),
        });
    }

    pub fn record_latency(&self, model: &str, timings: LatencyTimings, gateway: Option<&str>) {
        self.submit(MetricEvent::Latency {
            model: model.to_string(),
            timings,
            gateway: gateway.map(str::to_string),
            at: Utc::now(),
        });
    }

    pub fn record_status(
        &self,
        model: &str,
        success: bool,
        error_type: Option<ErrorType>,
        gateway: Option<&str>,
        provider: Option<&str>,
    ) {
        self.submit(MetricEvent::Status {
            model: model.to_string(),
            success,
            error_type,
            gateway: gateway.map(str::to_string),
            provider: provider.map(str::to_string),
            at: Utc::now(),
        });
    }

    pub fn record_request_complete(&self, sample: MetricSample) {
        self.submit(MetricEvent::Complete(sample));
    }

    /// Free slots left in the queue.
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::keys;
    use crate::models::analytics::EntityType;
    use crate::store::{MemoryStore, MetricsStore, StoreError, StoreOp};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Store whose writes never finish, to pin the consumer.
    struct StuckStore;

    #[async_trait]
    impl MetricsStore for StuckStore {
        async fn execute(&self, _ops: Vec<StoreOp>) -> Result<(), StoreError> {
            std::future::pending::<()>().await;
            Ok(())
        }
        async fn get_counter(&self, _key: &str) -> Result<Option<i64>, StoreError> {
            Ok(None)
        }
        async fn hash_get_all(&self, _key: &str) -> Result<HashMap<String, String>, StoreError> {
            Ok(HashMap::new())
        }
        async fn zrange_by_rank(
            &self,
            _key: &str,
            _limit: usize,
            _order: crate::store::RankOrder,
        ) -> Result<Vec<(String, f64)>, StoreError> {
            Ok(Vec::new())
        }
        async fn zrange_by_score(
            &self,
            _key: &str,
            _min: f64,
            _max: f64,
        ) -> Result<Vec<(String, f64)>, StoreError> {
            Ok(Vec::new())
        }
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }
        async fn set_ex(&self, _key: &str, _value: &str, _ttl: u64) -> Result<(), StoreError> {
            Ok(())
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_events_reach_the_store() {
        let store = MemoryStore::new();
        let metrics = Arc::new(EngineMetrics::new());
        let recorder = Recorder::new(Arc::new(store.clone()), metrics.clone(), 10);
        let (dispatcher, _handle) = MetricsDispatcher::spawn(recorder, metrics.clone(), 64, 4);

        for _ in 0..5 {
            dispatcher.record_request_start("m", None, None);
        }
        let key = keys::requests(EntityType::Model, "m", &crate::engine::bucket::current_bucket());
        let mut seen = None;
        for _ in 0..100 {
            seen = store.get_counter(&key).await.unwrap();
            if seen == Some(5) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(seen, Some(5));
        assert_eq!(metrics.enqueued(), 5);
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let metrics = Arc::new(EngineMetrics::new());
        let recorder = Recorder::new(Arc::new(StuckStore), metrics.clone(), 10);
        let (dispatcher, _handle) = MetricsDispatcher::spawn(recorder, metrics.clone(), 2, 1);

        let mut accepted: u64 = 0;
        for _ in 0..50 {
            if dispatcher.submit(MetricEvent::Complete(MetricSample::new("m"))) {
                accepted += 1;
            }
            tokio::task::yield_now().await;
        }
        // one in flight, one parked on the semaphore, two queued
        assert!(accepted <= 4, "accepted {accepted}");
        assert_eq!(metrics.dropped("queue_full"), 50 - accepted);
    }
}
