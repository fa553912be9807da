use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use url::Url;
use uuid::Uuid;

use crate::GatewayError;

static TOOL_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{3,50}$").expect("tool name regex"));

/// Validate a tenant-supplied tool name against the registration grammar.
pub fn validate_tool_name(name: &str) -> Result<(), GatewayError> {
    if TOOL_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(GatewayError::InvalidParams(format!(
            "tool name {:?} must match [A-Za-z0-9_-]{{3,50}}",
            crate::sanitize_log_value(name)
        )))
    }
}

/// Validate that a base URL is absolute and well-formed.
pub fn validate_base_url(base_url: &str) -> Result<(), GatewayError> {
    let parsed = Url::parse(base_url)
        .map_err(|e| GatewayError::InvalidParams(format!("base_url is not a valid URL: {e}")))?;
    if parsed.cannot_be_a_base() {
        return Err(GatewayError::InvalidParams(
            "base_url must be an absolute http(s) URL".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Active,
    Inactive,
    Disabled,
    Deleted,
}

impl Default for ToolStatus {
    fn default() -> Self {
        ToolStatus::Active
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    None,
    ApiKey,
    Bearer,
    Basic,
    OAuth2,
    Custom,
}

impl Default for AuthKind {
    fn default() -> Self {
        AuthKind::None
    }
}

/// Decrypted credential material as seen in-process. Debug output is
/// redacted; the control surface never serialises this back to callers.
#[derive(Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ToolCredential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Target header for `api_key` auth, when the provider default is wrong.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_name: Option<String>,
}

impl std::fmt::Debug for ToolCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCredential")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("header_name", &self.header_name)
            .finish()
    }
}

impl ToolCredential {
    pub fn is_empty(&self) -> bool {
        self.token.is_none() && self.username.is_none() && self.password.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_true")]
    pub retry_on_timeout: bool,
    #[serde(default = "default_true")]
    pub retry_on_rate_limit: bool,
    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: Vec<u16>,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    5_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_true() -> bool {
    true
}
fn default_retryable_status_codes() -> Vec<u16> {
    vec![502, 503, 504]
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            retry_on_timeout: true,
            retry_on_rate_limit: true,
            retryable_status_codes: default_retryable_status_codes(),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff, capped at `max_delay_ms`.
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let raw = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_delay_ms as f64);
        std::time::Duration::from_millis(capped as u64)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckMode {
    OnDemand,
    Periodic,
}

impl Default for HealthCheckMode {
    fn default() -> Self {
        HealthCheckMode::OnDemand
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthConfig {
    #[serde(default)]
    pub mode: HealthCheckMode,
    /// Cache TTL and periodic sweep interval, seconds.
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
    /// Path appended to `base_url`; defaults to `/health`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_check_timeout_secs")]
    pub check_timeout_secs: u64,
}

fn default_health_interval_secs() -> u64 {
    300
}
fn default_check_timeout_secs() -> u64 {
    5
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            mode: HealthCheckMode::default(),
            interval_secs: default_health_interval_secs(),
            endpoint: None,
            check_timeout_secs: default_check_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PassthroughMode {
    /// Use the user token when present, fall back to the service credential.
    Optional,
    /// Fail when no user token is supplied.
    Required,
    /// Additionally require the token's provider to match the tool's.
    RequiredWithProviderMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PassthroughConfig {
    pub mode: PassthroughMode,
}

/// A tenant's tool registration, decrypted in-process view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openapi_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
    #[serde(default)]
    pub auth_type: AuthKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<ToolCredential>,
    /// Built-in provider family (e.g. `github`); generic when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, Value>,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default)]
    pub health_config: HealthConfig,
    #[serde(default)]
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passthrough: Option<PassthroughConfig>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row shape as held by the store: credential is an opaque ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfigRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub base_url: String,
    pub openapi_url: Option<String>,
    pub documentation_url: Option<String>,
    pub auth_type: AuthKind,
    pub encrypted_credential: Option<String>,
    pub provider: Option<String>,
    pub config: HashMap<String, Value>,
    pub retry_policy: RetryPolicy,
    pub health_config: HealthConfig,
    pub status: ToolStatus,
    pub passthrough: Option<PassthroughConfig>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateToolRequest {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub openapi_url: Option<String>,
    #[serde(default)]
    pub documentation_url: Option<String>,
    #[serde(default)]
    pub auth_type: AuthKind,
    #[serde(default)]
    pub credential: Option<ToolCredential>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub config: HashMap<String, Value>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub health_config: Option<HealthConfig>,
    #[serde(default)]
    pub passthrough: Option<PassthroughConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateToolRequest {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub openapi_url: Option<String>,
    #[serde(default)]
    pub documentation_url: Option<String>,
    #[serde(default)]
    pub auth_type: Option<AuthKind>,
    #[serde(default)]
    pub credential: Option<ToolCredential>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub config: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub health_config: Option<HealthConfig>,
    #[serde(default)]
    pub status: Option<ToolStatus>,
    #[serde(default)]
    pub passthrough: Option<PassthroughConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateCredentialsRequest {
    pub credential: ToolCredential,
}

/// Per-request user token override, honoured per the tool's passthrough mode.
#[derive(Clone, Default)]
pub struct PassthroughToken {
    pub token: Option<String>,
    pub provider: Option<String>,
}

impl std::fmt::Debug for PassthroughToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassthroughToken")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("provider", &self.provider)
            .finish()
    }
}
