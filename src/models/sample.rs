//! Ingestion payload → strictly-typed `MetricSample`.
//!
//! The HTTP body is loosely typed JSON. It is converted here, once, at the
//! boundary; nothing downstream ever sees an unvalidated field.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of error classes a failed request can be attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Timeout,
    RateLimit,
    Network,
    Other,
}

impl ErrorType {
    pub const ALL: [ErrorType; 4] = [
        ErrorType::Timeout,
        ErrorType::RateLimit,
        ErrorType::Network,
        ErrorType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Timeout => "timeout",
            ErrorType::RateLimit => "rate_limit",
            ErrorType::Network => "network",
            ErrorType::Other => "other",
        }
    }

    /// Field name in the status hash.
    pub fn status_field(&self) -> &'static str {
        match self {
            ErrorType::Timeout => "error_timeout",
            ErrorType::RateLimit => "error_rate_limit",
            ErrorType::Network => "error_network",
            ErrorType::Other => "error_other",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(ErrorType::Timeout),
            "rate_limit" => Ok(ErrorType::RateLimit),
            "network" => Ok(ErrorType::Network),
            "other" => Ok(ErrorType::Other),
            other => Err(format!(
                "invalid error_type '{}': expected one of timeout, rate_limit, network, other",
                other
            )),
        }
    }
}

/// One finished request, validated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    pub model: String,
    pub gateway: Option<String>,
    pub provider: Option<String>,
    pub session_id: Option<String>,
    pub ttft_ms: Option<f64>,
    pub total_time_ms: Option<f64>,
    pub network_time_ms: Option<f64>,
    pub backend_time_ms: Option<f64>,
    pub success: bool,
    pub error_type: Option<ErrorType>,
    pub recorded_at: DateTime<Utc>,
}

impl MetricSample {
    /// A bare successful sample for `model`, stamped now.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            gateway: None,
            provider: None,
            session_id: None,
            ttft_ms: None,
            total_time_ms: None,
            network_time_ms: None,
            backend_time_ms: None,
            success: true,
            error_type: None,
            recorded_at: Utc::now(),
        }
    }

    /// Validate an untyped `POST /metrics/chat` body.
    ///
    /// Errors are human-readable and returned verbatim as the 400 message.
    pub fn from_json(body: &Value, now: DateTime<Utc>) -> Result<Self, String> {
        let obj = body
            .as_object()
            .ok_or_else(|| "request body must be a JSON object".to_string())?;

        let model = match obj.get("model") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::String(_)) | None | Some(Value::Null) => {
                return Err("missing required field: model".into())
            }
            Some(_) => return Err("field 'model' must be a string".into()),
        };

        let success = match obj.get("success") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err("field 'success' must be a boolean".into()),
        };

        let error_type = opt_string(obj, "error_type")?
            .map(|s| s.parse::<ErrorType>())
            .transpose()?;

        Ok(Self {
            model,
            gateway: opt_string(obj, "gateway")?,
            provider: opt_string(obj, "provider")?,
            session_id: opt_string(obj, "session_id")?,
            ttft_ms: opt_millis(obj, "ttft_ms")?,
            total_time_ms: opt_millis(obj, "total_time_ms")?,
            network_time_ms: opt_millis(obj, "network_time_ms")?,
            backend_time_ms: opt_millis(obj, "backend_time_ms")?,
            success,
            error_type,
            recorded_at: now,
        })
    }

    /// The error bucket this sample counts toward, `None` on success.
    /// A failure without an explicit type is attributed to `other`.
    pub fn failure(&self) -> Option<ErrorType> {
        if self.success {
            None
        } else {
            Some(self.error_type.unwrap_or(ErrorType::Other))
        }
    }
}

fn opt_string(obj: &serde_json::Map<String, Value>, field: &str) -> Result<Option<String>, String> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(format!("field '{}' must be a string", field)),
    }
}

fn opt_millis(obj: &serde_json::Map<String, Value>, field: &str) -> Result<Option<f64>, String> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(v) if v.is_finite() && v >= 0.0 => Ok(Some(v)),
            _ => Err(format!("field '{}' must be a non-negative number", field)),
        },
        Some(_) => Err(format!("field '{}' must be a number", field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_payload_defaults_to_success() {
        let s = MetricSample::from_json(&json!({"model": "gpt-4o"}), Utc::now()).unwrap();
        assert_eq!(s.model, "gpt-4o");
        assert!(s.success);
        assert_eq!(s.failure(), None);
        assert_eq!(s.ttft_ms, None);
    }

    #[test]
    fn test_full_payload() {
        let s = MetricSample::from_json(
            &json!({
                "model": "claude-3",
                "gateway": "openrouter",
                "provider": "anthropic",
                "session_id": "abc",
                "ttft_ms": 120,
                "total_time_ms": 950.5,
                "network_time_ms": 30,
                "backend_time_ms": 900,
                "success": false,
                "error_type": "rate_limit"
            }),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(s.gateway.as_deref(), Some("openrouter"));
        assert_eq!(s.provider.as_deref(), Some("anthropic"));
        assert_eq!(s.ttft_ms, Some(120.0));
        assert_eq!(s.total_time_ms, Some(950.5));
        assert_eq!(s.failure(), Some(ErrorType::RateLimit));
    }

    #[test]
    fn test_missing_model_rejected() {
        let err = MetricSample::from_json(&json!({"ttft_ms": 10}), Utc::now()).unwrap_err();
        assert!(err.contains("model"));
        assert!(MetricSample::from_json(&json!({"model": "  "}), Utc::now()).is_err());
        assert!(MetricSample::from_json(&json!({"model": null}), Utc::now()).is_err());
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(MetricSample::from_json(&json!([1, 2]), Utc::now()).is_err());
    }

    #[test]
    fn test_unknown_error_type_rejected() {
        let err = MetricSample::from_json(
            &json!({"model": "m", "success": false, "error_type": "cosmic_ray"}),
            Utc::now(),
        )
        .unwrap_err();
        assert!(err.contains("error_type"));
    }

    #[test]
    fn test_failure_without_type_counts_as_other() {
        let s = MetricSample::from_json(&json!({"model": "m", "success": false}), Utc::now()).unwrap();
        assert_eq!(s.failure(), Some(ErrorType::Other));
    }

    #[test]
    fn test_bad_timing_rejected() {
        assert!(MetricSample::from_json(&json!({"model": "m", "ttft_ms": -1}), Utc::now()).is_err());
        assert!(MetricSample::from_json(&json!({"model": "m", "ttft_ms": "fast"}), Utc::now()).is_err());
    }

    #[test]
    fn test_error_type_round_trip_names() {
        for t in ErrorType::ALL {
            assert_eq!(t.as_str().parse::<ErrorType>().unwrap(), t);
            assert!(t.status_field().ends_with(t.as_str()));
        }
    }
}
