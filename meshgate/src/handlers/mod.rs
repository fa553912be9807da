//! MCP protocol handlers and the method table wiring them into the
//! dispatcher.

pub mod protocol_tools;
pub mod resources;

pub use protocol_tools::ProtocolTools;
pub use resources::{ResourceProvider, StaticResourceProvider};

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use meshgate_types::{
    CallToolResult, GatewayError, InitializeParams, InitializeResult, McpSession,
    ServerCapabilities, ServerInfo, ToolCallRequest, MCP_PROTOCOL_VERSION,
};

use crate::dispatch::{
    Connection, Dispatcher, HandlerFuture, HandlerOutput, MethodAccess, PostAction,
};
use crate::server::GatewayServer;

/// Build the method table. The access classes are part of the gateway
/// contract.
pub fn build_dispatcher(auth_required: bool) -> Dispatcher {
    let mut dispatcher = Dispatcher::new(auth_required);
    dispatcher.register("initialize", MethodAccess::ReadOnly, false, initialize);
    dispatcher.register("tools/list", MethodAccess::ReadOnly, true, tools_list);
    dispatcher.register("tools/call", MethodAccess::Write, true, tools_call);
    dispatcher.register("resources/list", MethodAccess::ReadOnly, true, resources_list);
    dispatcher.register("resources/read", MethodAccess::ReadOnly, true, resources_read);
    dispatcher.register("prompts/list", MethodAccess::ReadOnly, true, prompts_list);
    dispatcher.register("prompts/get", MethodAccess::ReadOnly, true, prompts_get);
    dispatcher.register(
        "protocol.set_binary",
        MethodAccess::Write,
        true,
        set_binary,
    );
    dispatcher.register(
        "session.metrics",
        MethodAccess::AdminOnly,
        true,
        session_metrics,
    );
    dispatcher
}

fn tenant_of(server: &GatewayServer, conn: &Connection) -> String {
    server
        .sessions
        .get(&conn.id)
        .map(|s| s.tenant_id.clone())
        .or_else(|| conn.tenant_id().map(String::from))
        .unwrap_or_else(|| "anonymous".to_string())
}

fn initialize(
    server: Arc<GatewayServer>,
    conn: Arc<Connection>,
    params: Value,
) -> HandlerFuture {
    Box::pin(async move {
        let params: InitializeParams = if params.is_null() {
            InitializeParams {
                protocol_version: None,
                client_info: None,
                agent_id: None,
            }
        } else {
            serde_json::from_value(params)
                .map_err(|e| GatewayError::InvalidParams(format!("initialize params: {e}")))?
        };

        let tenant_id = conn
            .tenant_id()
            .map(String::from)
            .unwrap_or_else(|| "anonymous".to_string());

        // Optional agent-id rebind.
        if let Some(agent_id) = &params.agent_id {
            conn.update_state(|s| s.agent_id = agent_id.clone());
        } else if let Some(client) = &params.client_info {
            conn.update_state(|s| {
                if s.agent_id.is_empty() {
                    s.agent_id = client.name.clone();
                }
            });
        }

        // Subsequent initialize calls replace session state.
        let session = McpSession {
            connection_id: conn.id.clone(),
            tenant_id,
            agent_id: conn.state().agent_id,
            created_at: Utc::now(),
        };
        conn.update_state(|s| s.active_session = Some(session.connection_id.clone()));
        server.sessions.insert(conn.id.clone(), session);

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::default(),
            server_info: ServerInfo {
                name: "meshgate".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            limits: server.limits.clone(),
        };
        Ok(HandlerOutput::result(serde_json::to_value(result)?))
    })
}

fn tools_list(server: Arc<GatewayServer>, conn: Arc<Connection>, _params: Value) -> HandlerFuture {
    Box::pin(async move {
        let tenant_id = tenant_of(&server, &conn);
        let mut tools = server.protocol_tools.tool_views();
        tools.extend(server.tool_views(&tenant_id).await);
        Ok(HandlerOutput::result(json!({ "tools": tools })))
    })
}

fn tools_call(server: Arc<GatewayServer>, conn: Arc<Connection>, params: Value) -> HandlerFuture {
    Box::pin(async move {
        let request = ToolCallRequest::parse(&params)?;
        let tenant_id = tenant_of(&server, &conn);

        let result = if protocol_tools::is_builtin(&request.name) {
            let agent_ids: Vec<String> = server
                .sessions
                .iter()
                .filter(|s| s.tenant_id == tenant_id)
                .map(|s| s.agent_id.clone())
                .collect();
            server
                .protocol_tools
                .call(&tenant_id, agent_ids, &request.name, &request.arguments)?
        } else {
            let (tool_name, action) = request.split_target();
            server
                .execute_by_name(
                    &tenant_id,
                    &tool_name,
                    &action,
                    request.arguments,
                    &conn.passthrough,
                )
                .await?
        };

        let call_result = CallToolResult::from_value(&result);
        // Rough token accounting for the connection's tool budget.
        if let Some(meshgate_types::ToolContent::Text { text }) = call_result.content.first() {
            conn.add_tool_tokens((text.len() / 4) as u64);
        }
        Ok(HandlerOutput::result(serde_json::to_value(call_result)?))
    })
}

fn resources_list(
    server: Arc<GatewayServer>,
    conn: Arc<Connection>,
    _params: Value,
) -> HandlerFuture {
    Box::pin(async move {
        let tenant_id = tenant_of(&server, &conn);
        let resources = server.resources.list_resources(&tenant_id).await?;
        Ok(HandlerOutput::result(json!({ "resources": resources })))
    })
}

fn resources_read(
    server: Arc<GatewayServer>,
    conn: Arc<Connection>,
    params: Value,
) -> HandlerFuture {
    Box::pin(async move {
        let tenant_id = tenant_of(&server, &conn);
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidParams("uri is required".to_string()))?;
        let contents = server.resources.read_resource(&tenant_id, uri).await?;
        Ok(HandlerOutput::result(json!({ "contents": [contents] })))
    })
}

fn prompts_list(
    server: Arc<GatewayServer>,
    conn: Arc<Connection>,
    _params: Value,
) -> HandlerFuture {
    Box::pin(async move {
        let tenant_id = tenant_of(&server, &conn);
        let prompts = server.resources.list_prompts(&tenant_id).await?;
        Ok(HandlerOutput::result(json!({ "prompts": prompts })))
    })
}

fn prompts_get(server: Arc<GatewayServer>, conn: Arc<Connection>, params: Value) -> HandlerFuture {
    Box::pin(async move {
        let tenant_id = tenant_of(&server, &conn);
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidParams("name is required".to_string()))?;
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
        let messages = server
            .resources
            .get_prompt(&tenant_id, name, &arguments)
            .await?;
        Ok(HandlerOutput::result(json!({ "messages": messages })))
    })
}

/// Negotiate the binary framing mode. The switch is a post-action so the
/// acknowledgement itself still goes out as text.
fn set_binary(_server: Arc<GatewayServer>, conn: Arc<Connection>, params: Value) -> HandlerFuture {
    Box::pin(async move {
        let enabled = params
            .get("enabled")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let mode = if enabled { "binary" } else { "text" };
        let connection = conn.clone();
        Ok(HandlerOutput::with_post_action(
            json!({ "mode": mode }),
            PostAction::sync(move || connection.set_binary_mode(enabled)),
        ))
    })
}

fn session_metrics(
    server: Arc<GatewayServer>,
    _conn: Arc<Connection>,
    _params: Value,
) -> HandlerFuture {
    Box::pin(async move {
        let snapshot = server.dispatcher.telemetry().snapshot();
        Ok(HandlerOutput::result(json!({ "methods": snapshot })))
    })
}
