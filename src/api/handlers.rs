use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::engine::bucket::{current_bucket, parse_bucket};
use crate::engine::keys;
use crate::engine::leaderboard::MAX_LIMIT;
use crate::engine::trends::{MAX_HOURS, MIN_HOURS};
use crate::errors::AppError;
use crate::models::analytics::{
    EntityType, LeaderboardEntry, MetricsSnapshot, ProviderSummary, SortOrder, TrendMetric,
    TrendPoint,
};
use crate::models::sample::MetricSample;
use crate::AppState;

pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
pub const DEFAULT_TREND_HOURS: u32 = 6;

// ── Query parameters ─────────────────────────────────────────
//
// Everything arrives as an optional string and is validated by hand so a bad
// value yields our JSON 400 instead of the extractor's plain-text rejection.

#[derive(Debug, Deserialize)]
pub struct RealtimeParams {
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
    pub id: Option<String>,
    pub time_bucket: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardParams {
    pub order: Option<String>,
    pub limit: Option<String>,
    pub time_bucket: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderParams {
    pub provider: Option<String>,
    pub time_bucket: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrendParams {
    pub model: Option<String>,
    pub metric: Option<String>,
    pub hours: Option<String>,
}

// ── Responses ────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct RealtimeResponse<T> {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub id: String,
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct LeaderboardResponse {
    pub time_bucket: String,
    pub order: SortOrder,
    pub limit: usize,
    pub models: Vec<LeaderboardEntry>,
}

#[derive(Debug, Serialize)]
pub struct TrendResponse {
    pub model: String,
    pub metric: TrendMetric,
    pub hours: u32,
    pub data_points: Vec<TrendPoint>,
}

fn required(value: Option<String>, name: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation(format!("missing required parameter: {}", name)))
}

/// Explicit bucket or the current one. An explicit bucket must be a real
/// `YYYY-MM-DD-HH` hour.
fn resolve_bucket(value: Option<String>) -> Result<String, AppError> {
    match value.filter(|v| !v.is_empty()) {
        None => Ok(current_bucket()),
        Some(b) if parse_bucket(&b).is_some() => Ok(b),
        Some(b) => Err(AppError::Validation(format!(
            "invalid time_bucket '{}': expected YYYY-MM-DD-HH (UTC)",
            b
        ))),
    }
}

fn ranged<T>(value: Option<String>, name: &str, min: T, max: T, default: T) -> Result<T, AppError>
where
    T: FromStr + PartialOrd + Copy + std::fmt::Display,
{
    let Some(raw) = value.filter(|v| !v.is_empty()) else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(n) if n >= min && n <= max => Ok(n),
        _ => Err(AppError::Validation(format!(
            "invalid {} '{}': expected an integer in {}..={}",
            name, raw, min, max
        ))),
    }
}

fn parse_param<T: FromStr<Err = String>>(value: Option<String>, default: T) -> Result<T, AppError> {
    match value.filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(v) => v.parse().map_err(AppError::Validation),
    }
}

/// POST /metrics/chat: accept one finished request's telemetry.
///
/// Returns as soon as the sample is validated and handed to the dispatcher;
/// the store outcome never affects the response.
pub async fn ingest_chat(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("request body is not valid JSON: {}", e)))?;
    let sample = MetricSample::from_json(&payload, Utc::now()).map_err(AppError::Validation)?;

    tracing::debug!(
        model = %sample.model,
        provider = sample.provider.as_deref().unwrap_or("-"),
        success = sample.success,
        "telemetry accepted"
    );
    state.dispatcher.record_request_complete(sample);

    Ok(Json(json!({ "success": true })))
}

/// GET /metrics/realtime?type=model|provider|gateway&id=<id>&time_bucket=
pub async fn get_realtime(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RealtimeParams>,
) -> Result<Response, AppError> {
    let entity_type = parse_param(params.entity_type, EntityType::Model)?;
    let id = required(params.id, "id")?;
    let bucket = resolve_bucket(params.time_bucket)?;

    match entity_type {
        EntityType::Provider => {
            let data = provider_summary(&state, &id, &bucket).await?;
            Ok(Json(RealtimeResponse { entity_type, id, data }).into_response())
        }
        EntityType::Model | EntityType::Gateway => {
            let data = entity_snapshot(&state, entity_type, &id, &bucket).await?;
            Ok(Json(RealtimeResponse { entity_type, id, data }).into_response())
        }
    }
}

/// GET /metrics/provider/summary?provider=<name>&time_bucket=
pub async fn get_provider_summary(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProviderParams>,
) -> Result<Json<RealtimeResponse<ProviderSummary>>, AppError> {
    let provider = required(params.provider, "provider")?;
    let bucket = resolve_bucket(params.time_bucket)?;
    let data = provider_summary(&state, &provider, &bucket).await?;
    Ok(Json(RealtimeResponse {
        entity_type: EntityType::Provider,
        id: provider,
        data,
    }))
}

async fn entity_snapshot(
    state: &AppState,
    entity_type: EntityType,
    id: &str,
    bucket: &str,
) -> Result<MetricsSnapshot, AppError> {
    let key = keys::cache(&["realtime", entity_type.as_str(), id, bucket]);
    let retriever = &state.retriever;
    state
        .cache
        .cache_aside(&key, state.config.cache_ttl_secs, move || async move {
            retriever
                .get_entity_metrics(entity_type, id, Some(bucket))
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("{} '{}' in bucket {}", entity_type, id, bucket))
                })
        })
        .await
}

async fn provider_summary(
    state: &AppState,
    provider: &str,
    bucket: &str,
) -> Result<ProviderSummary, AppError> {
    let key = keys::cache(&["provider", provider, bucket]);
    let retriever = &state.retriever;
    state
        .cache
        .cache_aside(&key, state.config.cache_ttl_secs, move || async move {
            retriever
                .get_provider_summary(provider, Some(bucket))
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("provider '{}' in bucket {}", provider, bucket))
                })
        })
        .await
}

/// GET /metrics/health/leaderboard?order=asc|desc&limit=1..100&time_bucket=
///
/// Always 200: a store failure is logged and yields an empty list.
pub async fn get_health_leaderboard(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Json<LeaderboardResponse>, AppError> {
    let order = parse_param(params.order, SortOrder::Desc)?;
    let limit = ranged(params.limit, "limit", 1, MAX_LIMIT, DEFAULT_LEADERBOARD_LIMIT)?;
    let bucket = resolve_bucket(params.time_bucket)?;

    let limit_str = limit.to_string();
    let key = keys::cache(&["leaderboard", order.as_str(), &limit_str, &bucket]);
    let leaderboard = &state.leaderboard;
    let bucket_ref = bucket.as_str();
    let models = state
        .cache
        .cache_aside(&key, state.config.cache_ttl_secs, move || async move {
            leaderboard
                .get_health_leaderboard(limit, order, Some(bucket_ref))
                .await
        })
        .await
        .unwrap_or_else(|e| {
            state.metrics.store_error("get_health_leaderboard");
            tracing::warn!(op = "get_health_leaderboard", bucket = %bucket, error = %e, "leaderboard read failed");
            Vec::new()
        });

    Ok(Json(LeaderboardResponse {
        time_bucket: bucket,
        order,
        limit,
        models,
    }))
}

/// GET /metrics/trends?model=<id>&metric=ttft|requests|success_rate&hours=1..24
pub async fn get_trends(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TrendParams>,
) -> Result<Json<TrendResponse>, AppError> {
    let model = required(params.model, "model")?;
    let metric = parse_param(params.metric, TrendMetric::Ttft)?;
    let hours = ranged(params.hours, "hours", MIN_HOURS, MAX_HOURS, DEFAULT_TREND_HOURS)?;

    // the window slides with the clock, so the current hour is part of the key
    let hours_str = hours.to_string();
    let now_bucket = current_bucket();
    let key = keys::cache(&["trends", &model, metric.as_str(), &hours_str, &now_bucket]);
    let trends = &state.trends;
    let model_ref = model.as_str();
    let loaded: Result<Vec<TrendPoint>, Infallible> = state
        .cache
        .cache_aside(&key, state.config.cache_ttl_secs, move || async move {
            Ok(trends.get_trend(model_ref, metric, hours).await)
        })
        .await;
    let data_points = match loaded {
        Ok(points) => points,
        Err(never) => match never {},
    };

    Ok(Json(TrendResponse {
        model,
        metric,
        hours,
        data_points,
    }))
}

/// GET /metrics: Prometheus text exposition of the engine's own counters.
pub async fn prometheus_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}

/// GET /readyz: 200 only while the store answers.
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!(op = "ping", error = %e, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable")
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
