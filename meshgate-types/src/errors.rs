use serde::{Deserialize, Serialize};

use crate::rpc;

/// Error raised by an upstream provider call. Carries enough context for the
/// retry loop and for sanitised user-facing messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderError {
    pub provider: String,
    /// Symbolic code, e.g. `HTTP_503`.
    pub code: String,
    pub status_code: u16,
    pub is_retryable: bool,
    /// Truncated response body, newline-stripped.
    pub message: String,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} returned {} ({}): {}",
            self.provider, self.code, self.status_code, self.message
        )
    }
}

impl std::error::Error for ProviderError {}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Authentication failed: {0}")]
    AuthFailed(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Credential required but not configured: {0}")]
    AuthMissing(String),
    #[error("Tool not found: {0}")]
    ToolNotFound(String),
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Operation not found: {0}")]
    OperationNotFound(String),
    #[error("Discovery failed: {0}")]
    DiscoveryFailed(String),
    #[error("Circuit open for tool {0}")]
    CircuitOpen(String),
    #[error("{0}")]
    Upstream(ProviderError),
    #[error("Passthrough token required: {0}")]
    PassthroughRequired(String),
    #[error("provider mismatch: tool expects {expected}, token is for {got}")]
    PassthroughProviderMismatch { expected: String, got: String },
    /// Detail is logged, never echoed to callers.
    #[error("Encryption error")]
    Encryption,
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl GatewayError {
    /// JSON-RPC error code for the agent-facing surface.
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            GatewayError::Parse(_) => rpc::PARSE_ERROR,
            GatewayError::InvalidMessage(_) => rpc::INVALID_REQUEST,
            GatewayError::MethodNotFound(_) => rpc::METHOD_NOT_FOUND,
            GatewayError::InvalidParams(_) => rpc::INVALID_PARAMS,
            _ => rpc::INTERNAL_ERROR,
        }
    }

    /// HTTP status for the control-plane surface.
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::Parse(_)
            | GatewayError::InvalidMessage(_)
            | GatewayError::InvalidParams(_) => 400,
            GatewayError::AuthFailed(_)
            | GatewayError::AuthMissing(_)
            | GatewayError::PassthroughRequired(_) => 401,
            GatewayError::PermissionDenied(_)
            | GatewayError::PassthroughProviderMismatch { .. } => 403,
            GatewayError::MethodNotFound(_)
            | GatewayError::ToolNotFound(_)
            | GatewayError::SessionNotFound(_)
            | GatewayError::OperationNotFound(_) => 404,
            GatewayError::CircuitOpen(_) => 503,
            GatewayError::Upstream(_) => 502,
            _ => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Upstream(e) if e.is_retryable)
    }
}

/// Strip newlines and truncate to 100 bytes. Applied to every user-controlled
/// string before it reaches a structured log field.
pub fn sanitize_log_value(value: &str) -> String {
    let flat: String = value
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if flat.len() <= 100 {
        return flat;
    }
    let mut end = 100;
    while end > 0 && !flat.is_char_boundary(end) {
        end -= 1;
    }
    flat[..end].to_string()
}
