use serde_json::json;
use std::time::Duration;

use meshgate_types::{
    ConfirmDiscoveryRequest, DiscoverRequest, DiscoveryStatus, GatewayError, PassthroughToken,
};

use super::utils::{test_server, TestUpstream};

fn petstore_spec() -> String {
    json!({
        "openapi": "3.0.0",
        "info": {"title": "Petstore", "version": "1.0.0",
                 "description": "Manage pets"},
        "paths": {
            "/pets": {
                "get": {
                    "operationId": "listPets",
                    "summary": "List all pets",
                    "tags": ["pets"],
                    "parameters": [
                        {"name": "limit", "in": "query",
                         "schema": {"type": "integer"}}
                    ],
                    "responses": {"200": {"description": "A paged list of pets"}}
                },
                "post": {
                    "operationId": "createPet",
                    "summary": "Create a pet",
                    "tags": ["pets"],
                    "requestBody": {
                        "content": {"application/json": {"schema": {
                            "type": "object",
                            "properties": {"name": {"type": "string"}},
                            "required": ["name"]
                        }}}
                    },
                    "responses": {"201": {"description": "Created"}}
                }
            },
            "/pets/{petId}": {
                "get": {
                    "operationId": "getPet",
                    "summary": "Get a pet by id",
                    "tags": ["pets"],
                    "parameters": [
                        {"name": "petId", "in": "path", "required": true,
                         "schema": {"type": "string"}}
                    ],
                    "responses": {"200": {"description": "A pet"}}
                }
            }
        }
    })
    .to_string()
}

async fn wait_terminal(
    server: &std::sync::Arc<crate::server::GatewayServer>,
    tenant: &str,
    id: uuid::Uuid,
) -> meshgate_types::DiscoverySession {
    for _ in 0..100 {
        let session = server.discovery.get_session(tenant, id).await.unwrap();
        if session.status.is_terminal() {
            return session;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("discovery session never reached a terminal state");
}

#[tokio::test]
async fn discovery_probes_well_known_paths_and_succeeds() {
    // The first probe (/openapi.json) answers with the spec.
    let upstream = TestUpstream::start(200, &petstore_spec()).await;
    let server = test_server();

    let session = server
        .discovery
        .start_discovery(
            "tenant-a",
            DiscoverRequest {
                base_url: upstream.url(),
                openapi_url: None,
                hint_paths: vec![],
                name: None,
                auth_type: None,
                credential: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(session.status, DiscoveryStatus::InProgress);

    let session = wait_terminal(&server, "tenant-a", session.id).await;
    assert_eq!(session.status, DiscoveryStatus::Success);
    assert!(!session.discovered_urls.is_empty());
    assert_eq!(session.discovered_urls[0].operation_count, 3);
    assert!(session
        .selected_url
        .as_deref()
        .unwrap()
        .ends_with("/openapi.json"));
}

#[tokio::test]
async fn discovery_of_nothing_fails() {
    let upstream = TestUpstream::start(404, "not found").await;
    let server = test_server();

    let session = server
        .discovery
        .start_discovery(
            "tenant-a",
            DiscoverRequest {
                base_url: upstream.url(),
                openapi_url: None,
                hint_paths: vec![],
                name: None,
                auth_type: None,
                credential: None,
            },
        )
        .await
        .unwrap();
    let session = wait_terminal(&server, "tenant-a", session.id).await;
    assert_eq!(session.status, DiscoveryStatus::Failed);
    assert!(session.error.is_some());
}

#[tokio::test]
async fn confirm_creates_a_tool_from_the_selected_spec() {
    let upstream = TestUpstream::start(200, &petstore_spec()).await;
    let server = test_server();

    let session = server
        .discovery
        .start_discovery(
            "tenant-a",
            DiscoverRequest {
                base_url: upstream.url(),
                openapi_url: None,
                hint_paths: vec![],
                name: None,
                auth_type: None,
                credential: None,
            },
        )
        .await
        .unwrap();
    let session = wait_terminal(&server, "tenant-a", session.id).await;
    assert!(session.status.can_confirm());

    let tool = server
        .discovery
        .confirm(
            "tenant-a",
            session.id,
            ConfirmDiscoveryRequest {
                name: "petstore".to_string(),
                selected_url: None,
                auth_type: None,
                credential: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(tool.name, "petstore");
    assert!(tool.openapi_url.as_deref().unwrap().ends_with("/openapi.json"));

    // Session is terminal-confirmed; a second confirm is rejected.
    let session = server
        .discovery
        .get_session("tenant-a", session.id)
        .await
        .unwrap();
    assert_eq!(session.status, DiscoveryStatus::Confirmed);
    let again = server
        .discovery
        .confirm(
            "tenant-a",
            session.id,
            ConfirmDiscoveryRequest {
                name: "petstore-2".to_string(),
                selected_url: None,
                auth_type: None,
                credential: None,
            },
        )
        .await;
    assert!(matches!(again, Err(GatewayError::InvalidParams(_))));
}

#[tokio::test]
async fn confirmed_tool_executes_discovered_operations() {
    let upstream = TestUpstream::start(200, &petstore_spec()).await;
    let server = test_server();

    let session = server
        .discovery
        .start_discovery(
            "tenant-a",
            DiscoverRequest {
                base_url: upstream.url(),
                openapi_url: None,
                hint_paths: vec![],
                name: None,
                auth_type: None,
                credential: None,
            },
        )
        .await
        .unwrap();
    let session = wait_terminal(&server, "tenant-a", session.id).await;
    let tool = server
        .discovery
        .confirm(
            "tenant-a",
            session.id,
            ConfirmDiscoveryRequest {
                name: "petstore".to_string(),
                selected_url: None,
                auth_type: None,
                credential: None,
            },
        )
        .await
        .unwrap();

    // Operation ids are normalised from the spec's operationIds.
    let actions = server.tool_actions("tenant-a", tool.id).await.unwrap();
    let ids: Vec<&str> = actions
        .iter()
        .map(|a| a["action"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"get_pet"));
    assert!(ids.contains(&"list_pets"));
    assert!(ids.contains(&"create_pet"));

    upstream.queue_response(200, r#"{"id":"p1","name":"Rex"}"#);
    // The spec fetch consumed requests; count from here.
    let before = upstream.request_count();
    let result = server
        .execute_by_id(
            "tenant-a",
            tool.id,
            "get_pet",
            json!({"petId": "p1"}),
            &PassthroughToken::default(),
        )
        .await
        .unwrap();
    assert_eq!(result["name"], "Rex");
    let requests = upstream.requests();
    assert_eq!(requests.len(), before + 1);
    assert_eq!(requests[before].target, "/pets/p1");
}

#[tokio::test]
async fn tool_view_exposes_enhanced_schema() {
    let upstream = TestUpstream::start(200, &petstore_spec()).await;
    let server = test_server();

    let session = server
        .discovery
        .start_discovery(
            "tenant-a",
            DiscoverRequest {
                base_url: upstream.url(),
                openapi_url: None,
                hint_paths: vec![],
                name: None,
                auth_type: None,
                credential: None,
            },
        )
        .await
        .unwrap();
    let session = wait_terminal(&server, "tenant-a", session.id).await;
    server
        .discovery
        .confirm(
            "tenant-a",
            session.id,
            ConfirmDiscoveryRequest {
                name: "petstore".to_string(),
                selected_url: None,
                auth_type: None,
                credential: None,
            },
        )
        .await
        .unwrap();

    let views = server.tool_views("tenant-a").await;
    assert_eq!(views.len(), 1);
    let view = &views[0];
    assert_eq!(view.name, "petstore");
    assert_eq!(view.operations.len(), 3);
    assert!(view.description.contains("Manage pets"));
    let actions = view.input_schema["properties"]["action"]["enum"]
        .as_array()
        .unwrap();
    assert_eq!(actions.len(), 3);
    assert!(view.capabilities.contains(&"read".to_string()));
    assert!(view.capabilities.contains(&"create".to_string()));
}

#[tokio::test]
async fn explicit_spec_url_skips_probing() {
    let upstream = TestUpstream::start(200, &petstore_spec()).await;
    let server = test_server();

    let spec_url = format!("{}/custom/spec.json", upstream.url());
    let session = server
        .discovery
        .start_discovery(
            "tenant-a",
            DiscoverRequest {
                base_url: upstream.url(),
                openapi_url: Some(spec_url.clone()),
                hint_paths: vec![],
                name: None,
                auth_type: None,
                credential: None,
            },
        )
        .await
        .unwrap();
    let session = wait_terminal(&server, "tenant-a", session.id).await;
    assert_eq!(session.status, DiscoveryStatus::Success);
    assert_eq!(session.selected_url.as_deref(), Some(spec_url.as_str()));
    assert_eq!(upstream.request_count(), 1);
}

#[tokio::test]
async fn discovery_sessions_are_tenant_scoped() {
    let upstream = TestUpstream::start(200, &petstore_spec()).await;
    let server = test_server();

    let session = server
        .discovery
        .start_discovery(
            "tenant-a",
            DiscoverRequest {
                base_url: upstream.url(),
                openapi_url: None,
                hint_paths: vec![],
                name: None,
                auth_type: None,
                credential: None,
            },
        )
        .await
        .unwrap();
    assert!(matches!(
        server.discovery.get_session("tenant-b", session.id).await,
        Err(GatewayError::SessionNotFound(_))
    ));
}
