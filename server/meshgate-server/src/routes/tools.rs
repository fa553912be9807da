//! Tool control plane: CRUD, discovery, credentials, health, and direct
//! execution. All handlers are tenant-scoped through the request's
//! [`UserContext`].

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use meshgate::server::GatewayServer;
use meshgate_types::{
    ConfirmDiscoveryRequest, CreateToolRequest, DiscoverRequest, GatewayError, HealthStatus,
    ToolConfig, ToolStatus, UpdateCredentialsRequest, UpdateToolRequest,
};

use crate::context::{passthrough_token, user_context};

pub fn configure(cfg: &mut web::ServiceConfig) {
    // Discovery routes are registered before `{id}` so the literal segment
    // wins.
    cfg.service(
        web::resource("/tools/discover").route(web::post().to(discover_handler)),
    )
    .service(
        web::resource("/tools/discover-multiple")
            .route(web::post().to(discover_multiple_handler)),
    )
    .service(
        web::resource("/tools/discover-multiple/create")
            .route(web::post().to(discover_multiple_create_handler)),
    )
    .service(
        web::resource("/tools/discover/{session_id}")
            .route(web::get().to(discovery_session_handler)),
    )
    .service(
        web::resource("/tools/discover/{session_id}/confirm")
            .route(web::post().to(confirm_discovery_handler)),
    )
    .service(
        web::resource("/tools")
            .route(web::get().to(list_tools_handler))
            .route(web::post().to(create_tool_handler)),
    )
    .service(
        web::resource("/tools/{id}")
            .route(web::get().to(get_tool_handler))
            .route(web::put().to(update_tool_handler))
            .route(web::delete().to(delete_tool_handler)),
    )
    .service(
        web::resource("/tools/{id}/health").route(web::get().to(tool_health_handler)),
    )
    .service(
        web::resource("/tools/{id}/health/refresh")
            .route(web::post().to(refresh_health_handler)),
    )
    .service(
        web::resource("/tools/{id}/actions").route(web::get().to(tool_actions_handler)),
    )
    .service(
        web::resource("/tools/{id}/credentials")
            .route(web::put().to(update_credentials_handler)),
    )
    .service(
        web::resource("/tools/{id}/execute/{action}")
            .route(web::post().to(execute_handler)),
    );
}

fn error_response(error: &GatewayError) -> HttpResponse {
    let status = actix_web::http::StatusCode::from_u16(error.http_status())
        .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status).json(json!({ "error": error.to_string() }))
}

/// Control-surface view of a tool. The decrypted credential never leaves
/// the process; callers only learn whether one is set.
#[derive(Debug, Serialize)]
struct ToolResponse {
    id: Uuid,
    tenant_id: String,
    name: String,
    base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    openapi_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    documentation_url: Option<String>,
    auth_type: meshgate_types::AuthKind,
    has_credential: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    config: HashMap<String, Value>,
    retry_policy: meshgate_types::RetryPolicy,
    health_config: meshgate_types::HealthConfig,
    status: ToolStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    passthrough: Option<meshgate_types::PassthroughConfig>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    health: Option<HealthStatus>,
}

impl ToolResponse {
    fn from_config(config: ToolConfig, health: Option<HealthStatus>) -> Self {
        Self {
            id: config.id,
            tenant_id: config.tenant_id,
            name: config.name,
            base_url: config.base_url,
            openapi_url: config.openapi_url,
            documentation_url: config.documentation_url,
            auth_type: config.auth_type,
            has_credential: config.credential.map(|c| !c.is_empty()).unwrap_or(false),
            provider: config.provider,
            config: config.config,
            retry_policy: config.retry_policy,
            health_config: config.health_config,
            status: config.status,
            passthrough: config.passthrough,
            created_at: config.created_at,
            updated_at: config.updated_at,
            health,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListToolsQuery {
    #[serde(default)]
    status: Option<ToolStatus>,
    #[serde(default)]
    include_health: bool,
}

async fn list_tools_handler(
    req: HttpRequest,
    server: web::Data<Arc<GatewayServer>>,
    query: web::Query<ListToolsQuery>,
) -> HttpResponse {
    let ctx = user_context(&req);
    let tools = match server.registry.list_tools(ctx.tenant_id(), query.status).await {
        Ok(tools) => tools,
        Err(e) => return error_response(&e),
    };

    let mut responses = Vec::with_capacity(tools.len());
    for tool in tools {
        let health = if query.include_health {
            Some(server.health.check_health(&tool, false).await)
        } else {
            None
        };
        responses.push(ToolResponse::from_config(tool, health));
    }
    HttpResponse::Ok().json(json!({ "tools": responses }))
}

async fn create_tool_handler(
    req: HttpRequest,
    server: web::Data<Arc<GatewayServer>>,
    payload: web::Json<CreateToolRequest>,
) -> HttpResponse {
    let ctx = user_context(&req);
    if !ctx.claims.can_write() {
        return HttpResponse::Forbidden().json(json!({ "error": "write scope required" }));
    }
    match server
        .registry
        .create_tool(ctx.tenant_id(), payload.into_inner())
        .await
    {
        Ok(tool) => HttpResponse::Created().json(ToolResponse::from_config(tool, None)),
        Err(e) => error_response(&e),
    }
}

async fn get_tool_handler(
    req: HttpRequest,
    server: web::Data<Arc<GatewayServer>>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    let ctx = user_context(&req);
    match server.registry.get_tool(ctx.tenant_id(), path.into_inner()).await {
        Ok(tool) => HttpResponse::Ok().json(ToolResponse::from_config(tool, None)),
        Err(e) => error_response(&e),
    }
}

async fn update_tool_handler(
    req: HttpRequest,
    server: web::Data<Arc<GatewayServer>>,
    path: web::Path<Uuid>,
    payload: web::Json<UpdateToolRequest>,
) -> HttpResponse {
    let ctx = user_context(&req);
    if !ctx.claims.can_write() {
        return HttpResponse::Forbidden().json(json!({ "error": "write scope required" }));
    }
    match server
        .registry
        .update_tool(ctx.tenant_id(), path.into_inner(), payload.into_inner())
        .await
    {
        Ok(tool) => HttpResponse::Ok().json(ToolResponse::from_config(tool, None)),
        Err(e) => error_response(&e),
    }
}

async fn delete_tool_handler(
    req: HttpRequest,
    server: web::Data<Arc<GatewayServer>>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    let ctx = user_context(&req);
    if !ctx.claims.can_write() {
        return HttpResponse::Forbidden().json(json!({ "error": "write scope required" }));
    }
    let id = path.into_inner();
    match server.registry.delete_tool(ctx.tenant_id(), id).await {
        Ok(()) => {
            server.pipeline.breakers().remove(id);
            server.health.invalidate(id);
            HttpResponse::NoContent().finish()
        }
        Err(e) => error_response(&e),
    }
}

async fn update_credentials_handler(
    req: HttpRequest,
    server: web::Data<Arc<GatewayServer>>,
    path: web::Path<Uuid>,
    payload: web::Json<UpdateCredentialsRequest>,
) -> HttpResponse {
    let ctx = user_context(&req);
    if !ctx.claims.can_write() {
        return HttpResponse::Forbidden().json(json!({ "error": "write scope required" }));
    }
    match server
        .registry
        .update_credentials(ctx.tenant_id(), path.into_inner(), payload.into_inner().credential)
        .await
    {
        Ok(()) => HttpResponse::Ok().json(json!({ "updated": true })),
        Err(e) => error_response(&e),
    }
}

async fn discover_handler(
    req: HttpRequest,
    server: web::Data<Arc<GatewayServer>>,
    payload: web::Json<DiscoverRequest>,
) -> HttpResponse {
    let ctx = user_context(&req);
    if !ctx.claims.can_write() {
        return HttpResponse::Forbidden().json(json!({ "error": "write scope required" }));
    }
    match server
        .discovery
        .start_discovery(ctx.tenant_id(), payload.into_inner())
        .await
    {
        Ok(session) => HttpResponse::Accepted().json(session),
        Err(e) => error_response(&e),
    }
}

async fn discovery_session_handler(
    req: HttpRequest,
    server: web::Data<Arc<GatewayServer>>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    let ctx = user_context(&req);
    match server
        .discovery
        .get_session(ctx.tenant_id(), path.into_inner())
        .await
    {
        Ok(session) => HttpResponse::Ok().json(session),
        Err(e) => error_response(&e),
    }
}

async fn confirm_discovery_handler(
    req: HttpRequest,
    server: web::Data<Arc<GatewayServer>>,
    path: web::Path<Uuid>,
    payload: web::Json<ConfirmDiscoveryRequest>,
) -> HttpResponse {
    let ctx = user_context(&req);
    if !ctx.claims.can_write() {
        return HttpResponse::Forbidden().json(json!({ "error": "write scope required" }));
    }
    match server
        .discovery
        .confirm(ctx.tenant_id(), path.into_inner(), payload.into_inner())
        .await
    {
        Ok(tool) => HttpResponse::Created().json(ToolResponse::from_config(tool, None)),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct DiscoverMultiplePayload {
    requests: Vec<DiscoverRequest>,
}

async fn discover_multiple_handler(
    req: HttpRequest,
    server: web::Data<Arc<GatewayServer>>,
    payload: web::Json<DiscoverMultiplePayload>,
) -> HttpResponse {
    let ctx = user_context(&req);
    if !ctx.claims.can_write() {
        return HttpResponse::Forbidden().json(json!({ "error": "write scope required" }));
    }
    match server
        .discovery
        .discover_multiple(ctx.tenant_id(), payload.into_inner().requests)
        .await
    {
        Ok(sessions) => HttpResponse::Accepted().json(json!({ "sessions": sessions })),
        Err(e) => error_response(&e),
    }
}

async fn discover_multiple_create_handler(
    req: HttpRequest,
    server: web::Data<Arc<GatewayServer>>,
    payload: web::Json<DiscoverMultiplePayload>,
) -> HttpResponse {
    let ctx = user_context(&req);
    if !ctx.claims.can_write() {
        return HttpResponse::Forbidden().json(json!({ "error": "write scope required" }));
    }
    match server
        .discovery
        .discover_multiple_create(ctx.tenant_id(), payload.into_inner().requests)
        .await
    {
        Ok(results) => HttpResponse::Ok().json(json!({ "results": results })),
        Err(e) => error_response(&e),
    }
}

async fn tool_health_handler(
    req: HttpRequest,
    server: web::Data<Arc<GatewayServer>>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    let ctx = user_context(&req);
    let tool = match server.registry.get_tool(ctx.tenant_id(), path.into_inner()).await {
        Ok(tool) => tool,
        Err(e) => return error_response(&e),
    };
    let status = server.health.check_health(&tool, false).await;
    HttpResponse::Ok().json(status)
}

async fn refresh_health_handler(
    req: HttpRequest,
    server: web::Data<Arc<GatewayServer>>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    let ctx = user_context(&req);
    let tool = match server.registry.get_tool(ctx.tenant_id(), path.into_inner()).await {
        Ok(tool) => tool,
        Err(e) => return error_response(&e),
    };
    let status = server.health.check_health(&tool, true).await;
    HttpResponse::Ok().json(status)
}

async fn tool_actions_handler(
    req: HttpRequest,
    server: web::Data<Arc<GatewayServer>>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    let ctx = user_context(&req);
    match server.tool_actions(ctx.tenant_id(), path.into_inner()).await {
        Ok(actions) => HttpResponse::Ok().json(json!({ "actions": actions })),
        Err(e) => error_response(&e),
    }
}

async fn execute_handler(
    req: HttpRequest,
    server: web::Data<Arc<GatewayServer>>,
    path: web::Path<(Uuid, String)>,
    payload: web::Json<Value>,
) -> HttpResponse {
    let ctx = user_context(&req);
    if !ctx.claims.can_write() {
        return HttpResponse::Forbidden().json(json!({ "error": "write scope required" }));
    }
    let (tool_id, action) = path.into_inner();
    let passthrough = passthrough_token(&req);

    match server
        .execute_by_id(
            ctx.tenant_id(),
            tool_id,
            &action,
            payload.into_inner(),
            &passthrough,
        )
        .await
    {
        Ok(result) => HttpResponse::Ok().json(json!({ "result": result })),
        Err(e) => {
            tracing::warn!(%tool_id, "execute failed: {e}");
            error_response(&e)
        }
    }
}
