use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::GatewayError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
    Cancelled,
}

/// Best-effort observability record for a single tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub tool_config_id: Uuid,
    pub tenant_id: String,
    pub action: String,
    pub parameters: Value,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default)]
    pub retry_count: u32,
    pub executed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Normalised `tools/call` request. The wire shape accepts several
/// synonymous field names; they merge here and nowhere else.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: Value,
}

impl ToolCallRequest {
    /// Accepted aliases: `name` | `tool` | `tool_id` for the tool, and
    /// `arguments` | `args` | `params` for the payload.
    pub fn parse(params: &Value) -> Result<Self, GatewayError> {
        let obj = params
            .as_object()
            .ok_or_else(|| GatewayError::InvalidParams("params must be an object".to_string()))?;

        let name = ["name", "tool", "tool_id"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_str))
            .ok_or_else(|| {
                GatewayError::InvalidParams("missing tool name (name/tool/tool_id)".to_string())
            })?
            .to_string();

        let arguments = ["arguments", "args", "params"]
            .iter()
            .find_map(|key| obj.get(*key))
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

        if !arguments.is_object() && !arguments.is_null() {
            return Err(GatewayError::InvalidParams(
                "arguments must be an object".to_string(),
            ));
        }

        Ok(Self { name, arguments })
    }

    /// Split a dynamic tool call target into `(tool, action)`. The action is
    /// everything after the last `.`; absent a dot the action defaults to
    /// `execute`.
    pub fn split_target(&self) -> (String, String) {
        match self.name.rsplit_once('.') {
            Some((tool, action)) if !action.is_empty() => (tool.to_string(), action.to_string()),
            _ => (self.name.clone(), "execute".to_string()),
        }
    }
}
