//! The server arena: owns the shared registries (sessions, breakers,
//! caches) and the engine components, and exposes the orchestration entry
//! points used by both the MCP handlers and the control-plane routes.
//! Nothing here holds a back-pointer; handlers receive the arena per call
//! and look state up by id.

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use meshgate_types::{
    sanitize_log_value, ExecutionRecord, ExecutionStatus, GatewayError, McpSession, McpToolView,
    PassthroughToken, SessionLimits, ToolConfig, ToolStatus,
};

use crate::cache::{SchemaCache, ToolListCache};
use crate::config::GatewayConfig;
use crate::crypto::CredentialCipher;
use crate::discovery::{enhance, DiscoveryEngine, DiscoveryService};
use crate::dispatch::{Connection, Dispatcher};
use crate::handlers::{self, ProtocolTools, ResourceProvider, StaticResourceProvider};
use crate::health::{HealthCheckManager, HealthCheckScheduler, LogHealthSink};
use crate::pipeline::breaker::CircuitBreakerRegistry;
use crate::pipeline::provider::{OperationCatalog, ProviderRegistry};
use crate::pipeline::ExecutionPipeline;
use crate::registry::{RegistryCaches, ToolRegistry};
use crate::stores::InitializedStores;

pub struct GatewayServer {
    pub config: GatewayConfig,
    pub registry: Arc<ToolRegistry>,
    pub discovery: Arc<DiscoveryService>,
    pub pipeline: Arc<ExecutionPipeline>,
    pub health: Arc<HealthCheckManager>,
    pub health_scheduler: Arc<HealthCheckScheduler>,
    pub dispatcher: Arc<Dispatcher>,
    pub protocol_tools: Arc<ProtocolTools>,
    pub resources: Arc<dyn ResourceProvider>,
    pub limits: SessionLimits,
    /// MCPSession per connection id; owned by the dispatcher side.
    pub sessions: DashMap<String, McpSession>,
    pub connections: DashMap<String, Arc<Connection>>,
    pub tool_list_cache: Arc<ToolListCache>,
    pub schema_cache: Arc<SchemaCache>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Arc<Self>> {
        Self::with_stores(config, Arc::new(InitializedStores::in_memory()))
    }

    pub fn with_stores(
        config: GatewayConfig,
        stores: Arc<InitializedStores>,
    ) -> anyhow::Result<Arc<Self>> {
        let cipher = CredentialCipher::new(config.master_key()?)?;

        let list_ttl = Duration::from_secs(config.cache.tool_list_ttl_secs);
        let tool_list_cache = Arc::new(ToolListCache::new(list_ttl));
        let schema_cache = Arc::new(SchemaCache::new(list_ttl));

        let registry = Arc::new(ToolRegistry::new(
            stores,
            cipher,
            RegistryCaches {
                tool_list: tool_list_cache.clone(),
                schema: schema_cache.clone(),
            },
        ));

        let engine = Arc::new(DiscoveryEngine::new(config.discovery.clone()));
        let discovery = Arc::new(DiscoveryService::new(engine.clone(), registry.clone()));

        let providers = Arc::new(ProviderRegistry::new());
        let catalog = OperationCatalog::new(providers.clone(), engine, list_ttl);
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker.clone()));
        let pipeline = Arc::new(ExecutionPipeline::new(&config.http, catalog, breakers));

        let health = Arc::new(HealthCheckManager::new(providers));
        let health_scheduler = Arc::new(HealthCheckScheduler::new(
            health.clone(),
            registry.clone(),
            Arc::new(LogHealthSink),
            config.health.clone(),
        ));

        let dispatcher = Arc::new(handlers::build_dispatcher(config.server.auth_required));
        let limits = SessionLimits::default();
        let protocol_tools = Arc::new(ProtocolTools::new(limits.max_concurrent_tasks as usize));

        Ok(Arc::new(Self {
            config,
            registry,
            discovery,
            pipeline,
            health,
            health_scheduler,
            dispatcher,
            protocol_tools,
            resources: Arc::new(StaticResourceProvider),
            limits,
            sessions: DashMap::new(),
            connections: DashMap::new(),
            tool_list_cache,
            schema_cache,
        }))
    }

    /// Start background work (the periodic health sweep).
    pub async fn start_background(&self) {
        self.health_scheduler.clone().start().await;
    }

    pub async fn shutdown(&self) {
        self.health_scheduler.stop().await;
    }

    pub fn register_connection(&self, conn: Arc<Connection>) {
        self.connections.insert(conn.id.clone(), conn);
    }

    /// Destroys the connection and its session projection.
    pub fn remove_connection(&self, connection_id: &str) {
        self.connections.remove(connection_id);
        self.sessions.remove(connection_id);
    }

    /// Dynamic tool views for a tenant, served from the TTL cache. Registry
    /// failure degrades to an empty list so `tools/list` still answers with
    /// the protocol tools.
    pub async fn tool_views(&self, tenant_id: &str) -> Vec<McpToolView> {
        if let Some(cached) = self.tool_list_cache.get(&tenant_id.to_string()) {
            return cached;
        }
        let tools = match self
            .registry
            .list_tools(tenant_id, Some(ToolStatus::Active))
            .await
        {
            Ok(tools) => tools,
            Err(e) => {
                tracing::warn!(tenant_id, "tool listing degraded to protocol tools: {e}");
                return Vec::new();
            }
        };

        let mut views = Vec::with_capacity(tools.len());
        for tool in tools {
            views.push(self.tool_view(&tool).await);
        }
        self.tool_list_cache
            .insert(tenant_id.to_string(), views.clone());
        views
    }

    /// MCP view of one tool: the AI-enhanced schema when a spec is
    /// available, the minimal `{action, parameters}` shape otherwise.
    pub async fn tool_view(&self, tool: &ToolConfig) -> McpToolView {
        if let Some(cached) = self.schema_cache.get(&tool.id) {
            return cached;
        }

        let enhanced = if self.config.discovery.enhance {
            match &tool.openapi_url {
                Some(url) => match self.discovery.engine().fetch_spec(url).await {
                    Ok(spec) if !spec.operations.is_empty() => Some(enhance::enhanced_tool_view(
                        tool,
                        &spec,
                        self.config.discovery.max_operations_per_group,
                    )),
                    Ok(_) => None,
                    Err(e) => {
                        tracing::debug!(tool_id = %tool.id, "schema enhancement skipped: {e}");
                        None
                    }
                },
                None => None,
            }
        } else {
            None
        };

        let view = enhanced.unwrap_or_else(|| McpToolView {
            name: tool.name.clone(),
            description: format!("HTTP API at {}", tool.base_url),
            input_schema: McpToolView::fallback_schema(),
            operations: vec![],
            hints: enhance::domain_hints(tool),
            examples: vec![],
            capabilities: vec![],
        });

        self.schema_cache.insert(tool.id, view.clone());
        view
    }

    /// Execute `tool.action`, resolving the tool by name (or id string).
    pub async fn execute_by_name(
        &self,
        tenant_id: &str,
        tool_name: &str,
        action: &str,
        params: Value,
        passthrough: &PassthroughToken,
    ) -> Result<Value, GatewayError> {
        let tool = match Uuid::parse_str(tool_name) {
            Ok(id) => self.registry.get_tool(tenant_id, id).await?,
            Err(_) => self.registry.get_tool_by_name(tenant_id, tool_name).await?,
        };
        self.execute_config(&tool, action, params, passthrough)
            .await
    }

    pub async fn execute_by_id(
        &self,
        tenant_id: &str,
        tool_id: Uuid,
        action: &str,
        params: Value,
        passthrough: &PassthroughToken,
    ) -> Result<Value, GatewayError> {
        let tool = self.registry.get_tool(tenant_id, tool_id).await?;
        self.execute_config(&tool, action, params, passthrough)
            .await
    }

    async fn execute_config(
        &self,
        tool: &ToolConfig,
        action: &str,
        params: Value,
        passthrough: &PassthroughToken,
    ) -> Result<Value, GatewayError> {
        if tool.status != ToolStatus::Active {
            return Err(GatewayError::InvalidParams(format!(
                "tool {} is not active",
                sanitize_log_value(&tool.name)
            )));
        }

        let record = ExecutionRecord {
            id: Uuid::new_v4(),
            tool_config_id: tool.id,
            tenant_id: tool.tenant_id.clone(),
            action: action.to_string(),
            parameters: params.clone(),
            status: ExecutionStatus::Running,
            result: None,
            response_time_ms: None,
            retry_count: 0,
            executed_at: Utc::now(),
            completed_at: None,
        };
        let correlation_id = record.id;
        self.registry.record_execution_start(record.clone()).await;

        let started = std::time::Instant::now();
        match self.pipeline.execute(tool, action, params, passthrough).await {
            Ok(outcome) => {
                tracing::info!(
                    tool_id = %tool.id,
                    tenant_id = %tool.tenant_id,
                    method = %sanitize_log_value(action),
                    status = "success",
                    duration_ms = outcome.response_time_ms,
                    correlation_id = %correlation_id,
                    "tool executed"
                );
                self.registry
                    .record_execution_finish(
                        record,
                        ExecutionStatus::Success,
                        Some(outcome.result.clone()),
                        outcome.response_time_ms,
                        outcome.attempts.saturating_sub(1),
                    )
                    .await;
                Ok(outcome.result)
            }
            Err(error) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                tracing::warn!(
                    tool_id = %tool.id,
                    tenant_id = %tool.tenant_id,
                    method = %sanitize_log_value(action),
                    status = "failed",
                    duration_ms,
                    correlation_id = %correlation_id,
                    "tool execution failed: {}",
                    sanitize_log_value(&error.to_string())
                );
                self.registry
                    .record_execution_finish(
                        record,
                        ExecutionStatus::Failed,
                        Some(json!({ "error": error.to_string() })),
                        duration_ms,
                        0,
                    )
                    .await;
                Err(error)
            }
        }
    }

    /// Actions available on a tool (for `GET /tools/{id}/actions`).
    pub async fn tool_actions(
        &self,
        tenant_id: &str,
        tool_id: Uuid,
    ) -> Result<Vec<Value>, GatewayError> {
        let tool = self.registry.get_tool(tenant_id, tool_id).await?;
        let operations = self.pipeline.catalog().operations_for(&tool).await?;
        let mut actions: Vec<Value> = operations
            .operations
            .values()
            .map(|op| {
                json!({
                    "action": op.id,
                    "method": op.method,
                    "path": op.path_template,
                    "required_params": op.required_params,
                    "optional_params": op.optional_params,
                    "summary": op.summary,
                })
            })
            .collect();
        actions.sort_by(|a, b| {
            a["action"]
                .as_str()
                .unwrap_or_default()
                .cmp(b["action"].as_str().unwrap_or_default())
        });
        Ok(actions)
    }
}
