use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStatus {
    Pending,
    InProgress,
    Success,
    Partial,
    ManualNeeded,
    Confirmed,
    Failed,
}

impl DiscoveryStatus {
    /// Terminal statuses written exactly once by the discovery worker.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DiscoveryStatus::Success
                | DiscoveryStatus::Partial
                | DiscoveryStatus::ManualNeeded
                | DiscoveryStatus::Confirmed
                | DiscoveryStatus::Failed
        )
    }

    /// Statuses from which `confirm` may create a tool.
    pub fn can_confirm(&self) -> bool {
        matches!(self, DiscoveryStatus::Success | DiscoveryStatus::Partial)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpecFormat {
    OpenApi3,
    Swagger2,
    CustomJson,
    Raml,
    Unknown,
}

/// A candidate specification located during discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredSpec {
    pub url: String,
    pub format: SpecFormat,
    pub operation_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySession {
    pub id: Uuid,
    pub tenant_id: String,
    pub base_url: String,
    pub status: DiscoveryStatus,
    #[serde(default)]
    pub discovered_urls: Vec<DiscoveredSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DiscoverySession {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverRequest {
    pub base_url: String,
    #[serde(default)]
    pub openapi_url: Option<String>,
    /// Extra probe paths appended after the built-in list.
    #[serde(default)]
    pub hint_paths: Vec<String>,
    /// Tool creation parameters used at confirm time.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub auth_type: Option<crate::AuthKind>,
    #[serde(default)]
    pub credential: Option<crate::ToolCredential>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmDiscoveryRequest {
    pub name: String,
    /// Pick one of the discovered spec URLs; defaults to the first.
    #[serde(default)]
    pub selected_url: Option<String>,
    #[serde(default)]
    pub auth_type: Option<crate::AuthKind>,
    #[serde(default)]
    pub credential: Option<crate::ToolCredential>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!DiscoveryStatus::Pending.is_terminal());
        assert!(!DiscoveryStatus::InProgress.is_terminal());
        assert!(DiscoveryStatus::Success.is_terminal());
        assert!(DiscoveryStatus::Failed.is_terminal());
        assert!(DiscoveryStatus::ManualNeeded.is_terminal());
    }

    #[test]
    fn only_successful_sessions_confirm() {
        assert!(DiscoveryStatus::Success.can_confirm());
        assert!(DiscoveryStatus::Partial.can_confirm());
        assert!(!DiscoveryStatus::Failed.can_confirm());
        assert!(!DiscoveryStatus::Confirmed.can_confirm());
    }
}
