use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::sample::ErrorType;
use crate::store::RankOrder;

/// Kinds of entity that carry their own request counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Model,
    Gateway,
    Provider,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Model => "model",
            EntityType::Gateway => "gateway",
            EntityType::Provider => "provider",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "model" => Ok(EntityType::Model),
            "gateway" => Ok(EntityType::Gateway),
            "provider" => Ok(EntityType::Provider),
            other => Err(format!(
                "invalid type '{}': expected model, provider or gateway",
                other
            )),
        }
    }
}

/// Per-error-class counts for one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBreakdown {
    pub timeout: u64,
    pub rate_limit: u64,
    pub network: u64,
    pub other: u64,
}

impl ErrorBreakdown {
    pub fn total(&self) -> u64 {
        self.timeout + self.rate_limit + self.network + self.other
    }

    pub fn set(&mut self, t: ErrorType, n: u64) {
        match t {
            ErrorType::Timeout => self.timeout = n,
            ErrorType::RateLimit => self.rate_limit = n,
            ErrorType::Network => self.network = n,
            ErrorType::Other => self.other = n,
        }
    }
}

/// Derived view of one entity (model or gateway) in one hourly bucket.
///
/// Averages and the success rate are omitted, never zero or NaN, when their
/// backing count is zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub id: String,
    pub time_bucket: String,
    pub requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_ttft_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_total_time_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_network_time_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_backend_time_ms: Option<f64>,
    pub error_breakdown: ErrorBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderModelStat {
    pub model_id: String,
    pub requests: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_ttft_ms: Option<f64>,
}

/// Roll-up of the models served by one provider in one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub provider: String,
    pub time_bucket: String,
    pub requests: u64,
    pub total_models: usize,
    pub success_count: u64,
    pub error_count: u64,
    /// Mean of the per-model success rates that are defined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_success_rate: Option<f64>,
    /// Request-weighted mean of the per-model TTFT averages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_ttft_ms: Option<f64>,
    pub top_models: Vec<ProviderModelStat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub model_id: String,
    pub health_score: f64,
    pub requests: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_ttft_ms: Option<f64>,
}

/// Ranking direction for the health leaderboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

impl From<SortOrder> for RankOrder {
    fn from(o: SortOrder) -> Self {
        match o {
            SortOrder::Asc => RankOrder::Asc,
            SortOrder::Desc => RankOrder::Desc,
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("invalid order '{}': expected asc or desc", other)),
        }
    }
}

/// Metrics a trend series can be requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendMetric {
    Ttft,
    Requests,
    SuccessRate,
}

impl TrendMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendMetric::Ttft => "ttft",
            TrendMetric::Requests => "requests",
            TrendMetric::SuccessRate => "success_rate",
        }
    }
}

impl fmt::Display for TrendMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrendMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ttft" => Ok(TrendMetric::Ttft),
            "requests" => Ok(TrendMetric::Requests),
            "success_rate" => Ok(TrendMetric::SuccessRate),
            other => Err(format!(
                "invalid metric '{}': expected ttft, requests or success_rate",
                other
            )),
        }
    }
}

/// One hourly point of a trend series. `value` is `null` for hours with no
/// data where zero would be misleading (averages, rates).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub time_bucket: String,
    pub value: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_omits_undefined_fields() {
        let snap = MetricsSnapshot {
            id: "m".into(),
            time_bucket: "2025-01-01-10".into(),
            requests: 1,
            success_count: 0,
            error_count: 0,
            success_rate: None,
            avg_ttft_ms: None,
            avg_total_time_ms: Some(12.0),
            avg_network_time_ms: None,
            avg_backend_time_ms: None,
            error_breakdown: ErrorBreakdown::default(),
        };
        let v = serde_json::to_value(&snap).unwrap();
        assert!(v.get("success_rate").is_none());
        assert!(v.get("avg_ttft_ms").is_none());
        assert_eq!(v["avg_total_time_ms"], 12.0);
        assert_eq!(v["error_breakdown"]["rate_limit"], 0);
    }

    #[test]
    fn test_error_breakdown_total() {
        let mut b = ErrorBreakdown::default();
        b.set(ErrorType::Timeout, 2);
        b.set(ErrorType::Other, 3);
        assert_eq!(b.total(), 5);
        assert_eq!(b.timeout, 2);
    }

    #[test]
    fn test_parse_query_enums() {
        assert_eq!("provider".parse::<EntityType>().unwrap(), EntityType::Provider);
        assert!("tenant".parse::<EntityType>().is_err());
        assert_eq!("asc".parse::<SortOrder>().unwrap(), SortOrder::Asc);
        assert_eq!(SortOrder::default(), SortOrder::Desc);
        assert_eq!("success_rate".parse::<TrendMetric>().unwrap(), TrendMetric::SuccessRate);
        assert!("p99".parse::<TrendMetric>().is_err());
    }
}
