//! Built-in protocol tools behind the reserved `agent.` / `workflow.` /
//! `task.` / `context.` prefixes. Long-running work is modelled as tasks
//! the agent polls; completed tasks move to an archive that serves as the
//! second workflow-status backend.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use uuid::Uuid;

use meshgate_types::{ExecutionStatus, GatewayError, McpToolView};

pub const RESERVED_PREFIXES: &[&str] = &["agent.", "workflow.", "task.", "context."];

pub fn is_builtin(tool_name: &str) -> bool {
    RESERVED_PREFIXES
        .iter()
        .any(|prefix| tool_name.starts_with(prefix))
}

#[derive(Debug, Clone)]
pub struct TaskEntry {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub status: ExecutionStatus,
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl TaskEntry {
    fn to_json(&self) -> Value {
        json!({
            "task_id": self.id,
            "name": self.name,
            "status": self.status,
            "result": self.result,
            "created_at": self.created_at.to_rfc3339(),
        })
    }
}

pub struct ProtocolTools {
    /// Running tasks; the first workflow-status backend.
    active: DashMap<String, TaskEntry>,
    /// Completed tasks; consulted only when the active store has no record.
    archive: DashMap<String, TaskEntry>,
    contexts: DashMap<String, Value>,
    max_concurrent_tasks: usize,
}

impl ProtocolTools {
    pub fn new(max_concurrent_tasks: usize) -> Self {
        Self {
            active: DashMap::new(),
            archive: DashMap::new(),
            contexts: DashMap::new(),
            max_concurrent_tasks: max_concurrent_tasks.max(1),
        }
    }

    fn context_key(tenant_id: &str, key: &str) -> String {
        format!("{tenant_id}:{key}")
    }

    /// Dispatch a reserved-prefix call.
    pub fn call(
        &self,
        tenant_id: &str,
        agent_ids: Vec<String>,
        tool_name: &str,
        args: &Value,
    ) -> Result<Value, GatewayError> {
        match tool_name {
            "agent.list" => Ok(json!({ "agents": agent_ids })),
            "workflow.execute" => self.workflow_execute(tenant_id, args),
            "workflow.status" => self.workflow_status(tenant_id, args),
            "task.status" => self.task_status(tenant_id, args),
            "task.cancel" => self.task_cancel(tenant_id, args),
            "context.get" => self.context_get(tenant_id, args),
            "context.update" => self.context_update(tenant_id, args),
            other => Err(GatewayError::ToolNotFound(other.to_string())),
        }
    }

    fn workflow_execute(&self, tenant_id: &str, args: &Value) -> Result<Value, GatewayError> {
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidParams("workflow name is required".to_string()))?;
        let running = self
            .active
            .iter()
            .filter(|t| t.tenant_id == tenant_id && t.status == ExecutionStatus::Running)
            .count();
        if running >= self.max_concurrent_tasks {
            return Err(GatewayError::InvalidParams(format!(
                "concurrent task limit ({}) reached",
                self.max_concurrent_tasks
            )));
        }

        let entry = TaskEntry {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            status: ExecutionStatus::Running,
            result: None,
            created_at: Utc::now(),
        };
        let id = entry.id.clone();
        self.active.insert(id.clone(), entry);

        // The gateway carries no workflow engine; the task acknowledges the
        // input and completes, leaving the poll surface intact.
        self.finish_task(
            &id,
            ExecutionStatus::Success,
            Some(json!({
                "workflow": name,
                "input": args.get("input").cloned().unwrap_or(Value::Null),
            })),
        );
        Ok(json!({ "task_id": id, "status": "running" }))
    }

    fn finish_task(&self, task_id: &str, status: ExecutionStatus, result: Option<Value>) {
        if let Some((_, mut entry)) = self.active.remove(task_id) {
            entry.status = status;
            entry.result = result;
            self.archive.insert(task_id.to_string(), entry);
        }
    }

    /// Consults the active store first, the archive second; the first
    /// backend with a record wins.
    fn workflow_status(&self, tenant_id: &str, args: &Value) -> Result<Value, GatewayError> {
        let id = args
            .get("workflow_id")
            .or_else(|| args.get("task_id"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GatewayError::InvalidParams("workflow_id is required".to_string())
            })?;
        for backend in [&self.active, &self.archive] {
            if let Some(entry) = backend.get(id) {
                if entry.tenant_id == tenant_id {
                    return Ok(entry.to_json());
                }
            }
        }
        Err(GatewayError::ToolNotFound(format!("workflow {id}")))
    }

    fn task_status(&self, tenant_id: &str, args: &Value) -> Result<Value, GatewayError> {
        self.workflow_status(tenant_id, args)
    }

    fn task_cancel(&self, tenant_id: &str, args: &Value) -> Result<Value, GatewayError> {
        let id = args
            .get("task_id")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidParams("task_id is required".to_string()))?;
        let owned = self
            .active
            .get(id)
            .map(|entry| entry.tenant_id == tenant_id)
            .unwrap_or(false);
        if !owned {
            return Err(GatewayError::ToolNotFound(format!("task {id}")));
        }
        self.finish_task(id, ExecutionStatus::Cancelled, None);
        Ok(json!({ "task_id": id, "status": "cancelled" }))
    }

    fn context_get(&self, tenant_id: &str, args: &Value) -> Result<Value, GatewayError> {
        let key = args
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidParams("key is required".to_string()))?;
        let value = self
            .contexts
            .get(&Self::context_key(tenant_id, key))
            .map(|v| v.clone())
            .unwrap_or(Value::Null);
        Ok(json!({ "key": key, "value": value }))
    }

    fn context_update(&self, tenant_id: &str, args: &Value) -> Result<Value, GatewayError> {
        let key = args
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidParams("key is required".to_string()))?;
        let value = args.get("value").cloned().unwrap_or(Value::Null);
        self.contexts
            .insert(Self::context_key(tenant_id, key), value.clone());
        Ok(json!({ "key": key, "value": value }))
    }

    /// MCP views of the built-in tools, unioned with dynamic tools in
    /// `tools/list`.
    pub fn tool_views(&self) -> Vec<McpToolView> {
        let entries: [(&str, &str, Value); 7] = [
            (
                "agent.list",
                "List agents with live sessions for this tenant",
                json!({"type": "object", "properties": {}}),
            ),
            (
                "workflow.execute",
                "Start a workflow; returns a task id to poll",
                json!({
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "input": {"type": "object", "additionalProperties": true}
                    },
                    "required": ["name"]
                }),
            ),
            (
                "workflow.status",
                "Status of a previously started workflow",
                json!({
                    "type": "object",
                    "properties": {"workflow_id": {"type": "string"}},
                    "required": ["workflow_id"]
                }),
            ),
            (
                "task.status",
                "Poll a long-running task",
                json!({
                    "type": "object",
                    "properties": {"task_id": {"type": "string"}},
                    "required": ["task_id"]
                }),
            ),
            (
                "task.cancel",
                "Cancel a running task",
                json!({
                    "type": "object",
                    "properties": {"task_id": {"type": "string"}},
                    "required": ["task_id"]
                }),
            ),
            (
                "context.get",
                "Read a shared context value",
                json!({
                    "type": "object",
                    "properties": {"key": {"type": "string"}},
                    "required": ["key"]
                }),
            ),
            (
                "context.update",
                "Write a shared context value",
                json!({
                    "type": "object",
                    "properties": {
                        "key": {"type": "string"},
                        "value": {}
                    },
                    "required": ["key"]
                }),
            ),
        ];
        entries
            .into_iter()
            .map(|(name, description, input_schema)| McpToolView {
                name: name.to_string(),
                description: description.to_string(),
                input_schema,
                operations: vec![],
                hints: Default::default(),
                examples: vec![],
                capabilities: vec![],
            })
            .collect()
    }
}
