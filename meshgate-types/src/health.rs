use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Observed health of a tool's upstream. Cached with a per-tool TTL; may be
/// stale but never missing after the first observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub last_checked: DateTime<Utc>,
    pub response_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, Value>,
}

impl HealthStatus {
    pub fn healthy(response_time_ms: u64) -> Self {
        Self {
            is_healthy: true,
            last_checked: Utc::now(),
            response_time_ms,
            error: None,
            version: None,
            details: HashMap::new(),
        }
    }

    pub fn unhealthy(response_time_ms: u64, error: impl Into<String>) -> Self {
        Self {
            is_healthy: false,
            last_checked: Utc::now(),
            response_time_ms,
            error: Some(error.into()),
            version: None,
            details: HashMap::new(),
        }
    }
}
