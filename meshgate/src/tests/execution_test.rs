use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use meshgate_types::{
    AuthKind, CreateToolRequest, GatewayError, PassthroughConfig, PassthroughMode,
    PassthroughToken, RetryPolicy, ToolCredential,
};

use super::utils::{test_server, writer_conn, TestUpstream};
use crate::server::GatewayServer;

async fn register_github_tool(
    server: &Arc<GatewayServer>,
    upstream: &TestUpstream,
    name: &str,
    retry_policy: Option<RetryPolicy>,
) -> meshgate_types::ToolConfig {
    server
        .registry
        .create_tool(
            "tenant-a",
            CreateToolRequest {
                name: name.to_string(),
                base_url: upstream.url(),
                openapi_url: None,
                documentation_url: None,
                auth_type: AuthKind::Bearer,
                credential: Some(ToolCredential {
                    token: Some("S3CR3T".to_string()),
                    ..Default::default()
                }),
                provider: Some("github".to_string()),
                config: Default::default(),
                retry_policy,
                health_config: None,
                passthrough: None,
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn dynamic_tool_execution_happy_path() {
    let upstream = TestUpstream::start(200, r#"{"ok":true}"#).await;
    let server = test_server();
    register_github_tool(&server, &upstream, "github-ci", None).await;

    let conn = writer_conn("c1", "tenant-a");
    server.register_connection(conn.clone());
    server
        .dispatcher
        .dispatch_raw(
            server.clone(),
            conn.clone(),
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
        )
        .await;

    let result = server
        .dispatcher
        .dispatch_raw(
            server.clone(),
            conn.clone(),
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"github-ci.repos/get","arguments":{"owner":"octo","repo":"hello"}}}"#,
        )
        .await;
    let body = result.response.unwrap().result.unwrap();
    assert_eq!(body["content"][0]["type"], "text");
    assert_eq!(body["content"][0]["text"], r#"{"ok":true}"#);

    let requests = upstream.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].target, "/repos/octo/hello");
    assert_eq!(
        requests[0].headers.get("authorization").map(String::as_str),
        Some("Bearer S3CR3T")
    );
}

#[tokio::test]
async fn retries_on_503_then_succeeds() {
    let upstream = TestUpstream::start(200, "\"ok\"").await;
    upstream.queue_response(503, "unavailable");
    upstream.queue_response(503, "unavailable");
    upstream.queue_response(200, "\"ok\"");

    let server = test_server();
    let policy = RetryPolicy {
        max_retries: 3,
        initial_delay_ms: 10,
        max_delay_ms: 1_000,
        multiplier: 2.0,
        ..Default::default()
    };
    let tool = register_github_tool(&server, &upstream, "github-ci", Some(policy)).await;

    let started = Instant::now();
    let result = server
        .execute_by_id(
            "tenant-a",
            tool.id,
            "repos/get",
            json!({"owner": "octo", "repo": "hello"}),
            &PassthroughToken::default(),
        )
        .await
        .unwrap();

    assert_eq!(result, json!("ok"));
    assert_eq!(upstream.request_count(), 3);
    // Two backoff delays: 10ms then 20ms.
    assert!(started.elapsed().as_millis() >= 30);
}

#[tokio::test]
async fn retry_attempts_bounded_by_policy() {
    let upstream = TestUpstream::start(503, "unavailable").await;
    let server = test_server();
    let policy = RetryPolicy {
        max_retries: 2,
        initial_delay_ms: 1,
        ..Default::default()
    };
    let tool = register_github_tool(&server, &upstream, "github-ci", Some(policy)).await;

    let result = server
        .execute_by_id(
            "tenant-a",
            tool.id,
            "repos/get",
            json!({"owner": "octo", "repo": "hello"}),
            &PassthroughToken::default(),
        )
        .await;

    assert!(matches!(result, Err(GatewayError::Upstream(_))));
    // max_retries + 1 attempts
    assert_eq!(upstream.request_count(), 3);
}

#[tokio::test]
async fn permanent_errors_are_not_retried() {
    let upstream = TestUpstream::start(404, r#"{"message":"missing"}"#).await;
    let server = test_server();
    let tool = register_github_tool(&server, &upstream, "github-ci", None).await;

    let result = server
        .execute_by_id(
            "tenant-a",
            tool.id,
            "repos/get",
            json!({"owner": "octo", "repo": "hello"}),
            &PassthroughToken::default(),
        )
        .await;

    match result {
        Err(GatewayError::Upstream(e)) => {
            assert_eq!(e.code, "HTTP_404");
            assert_eq!(e.status_code, 404);
            assert!(!e.is_retryable);
        }
        other => panic!("expected upstream error, got {other:?}"),
    }
    assert_eq!(upstream.request_count(), 1);
}

#[tokio::test]
async fn circuit_opens_after_consecutive_failures_and_blocks_requests() {
    let upstream = TestUpstream::start(500, "boom").await;
    let server = test_server();
    // No retries so each call is one outbound attempt and one breaker
    // observation; the default threshold is 3.
    let policy = RetryPolicy {
        max_retries: 0,
        ..Default::default()
    };
    let tool = register_github_tool(&server, &upstream, "github-ci", Some(policy)).await;
    let params = json!({"owner": "octo", "repo": "hello"});

    for _ in 0..3 {
        let result = server
            .execute_by_id(
                "tenant-a",
                tool.id,
                "repos/get",
                params.clone(),
                &PassthroughToken::default(),
            )
            .await;
        assert!(matches!(result, Err(GatewayError::Upstream(_))));
    }
    assert_eq!(upstream.request_count(), 3);

    // Breaker open: rejected without an outbound request.
    let result = server
        .execute_by_id(
            "tenant-a",
            tool.id,
            "repos/get",
            params,
            &PassthroughToken::default(),
        )
        .await;
    assert!(matches!(result, Err(GatewayError::CircuitOpen(_))));
    assert_eq!(upstream.request_count(), 3);
}

#[tokio::test]
async fn passthrough_provider_mismatch_is_a_403() {
    let upstream = TestUpstream::start(200, r#"{"ok":true}"#).await;
    let server = test_server();
    let tool = server
        .registry
        .create_tool(
            "tenant-a",
            CreateToolRequest {
                name: "github-ci".to_string(),
                base_url: upstream.url(),
                openapi_url: None,
                documentation_url: None,
                auth_type: AuthKind::Bearer,
                credential: Some(ToolCredential {
                    token: Some("S3CR3T".to_string()),
                    ..Default::default()
                }),
                provider: Some("github".to_string()),
                config: Default::default(),
                retry_policy: None,
                health_config: None,
                passthrough: Some(PassthroughConfig {
                    mode: PassthroughMode::RequiredWithProviderMatch,
                }),
            },
        )
        .await
        .unwrap();

    let result = server
        .execute_by_id(
            "tenant-a",
            tool.id,
            "repos/get",
            json!({"owner": "octo", "repo": "hello"}),
            &PassthroughToken {
                token: Some("t".to_string()),
                provider: Some("gitlab".to_string()),
            },
        )
        .await;

    let error = result.unwrap_err();
    assert_eq!(error.http_status(), 403);
    assert!(error.to_string().contains("provider mismatch"));
    assert_eq!(upstream.request_count(), 0);

    // Matching provider goes through with the user token.
    let result = server
        .execute_by_id(
            "tenant-a",
            tool.id,
            "repos/get",
            json!({"owner": "octo", "repo": "hello"}),
            &PassthroughToken {
                token: Some("USERTOK".to_string()),
                provider: Some("github".to_string()),
            },
        )
        .await;
    assert!(result.is_ok());
    let requests = upstream.requests();
    assert_eq!(
        requests[0].headers.get("authorization").map(String::as_str),
        Some("Bearer USERTOK")
    );
}

#[tokio::test]
async fn unknown_operation_is_operation_not_found() {
    let upstream = TestUpstream::start(200, "{}").await;
    let server = test_server();
    let tool = register_github_tool(&server, &upstream, "github-ci", None).await;

    let result = server
        .execute_by_id(
            "tenant-a",
            tool.id,
            "repos/destroy_all",
            json!({}),
            &PassthroughToken::default(),
        )
        .await;
    assert!(matches!(result, Err(GatewayError::OperationNotFound(_))));
    assert_eq!(upstream.request_count(), 0);
}

#[tokio::test]
async fn executions_are_recorded_with_terminal_state() {
    let upstream = TestUpstream::start(200, r#"{"ok":true}"#).await;
    let server = test_server();
    let tool = register_github_tool(&server, &upstream, "github-ci", None).await;

    server
        .execute_by_id(
            "tenant-a",
            tool.id,
            "repos/get",
            json!({"owner": "octo", "repo": "hello"}),
            &PassthroughToken::default(),
        )
        .await
        .unwrap();

    let records = server
        .registry
        .stores()
        .executions
        .list_for_tool("tenant-a", tool.id, 10)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.status, meshgate_types::ExecutionStatus::Success);
    assert_eq!(record.action, "repos/get");
    assert_eq!(record.retry_count, 0);
    assert!(record.completed_at.is_some());
    assert_eq!(record.result.as_ref().unwrap()["ok"], true);
}

#[tokio::test]
async fn credential_round_trips_through_rotation() {
    let upstream = TestUpstream::start(200, r#"{"ok":true}"#).await;
    let server = test_server();
    let tool = register_github_tool(&server, &upstream, "github-ci", None).await;

    server
        .registry
        .update_credentials(
            "tenant-a",
            tool.id,
            ToolCredential {
                token: Some("ROTATED".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    server
        .execute_by_id(
            "tenant-a",
            tool.id,
            "repos/get",
            json!({"owner": "octo", "repo": "hello"}),
            &PassthroughToken::default(),
        )
        .await
        .unwrap();

    let requests = upstream.requests();
    assert_eq!(
        requests[0].headers.get("authorization").map(String::as_str),
        Some("Bearer ROTATED")
    );
}

#[tokio::test]
async fn health_check_hits_the_health_endpoint_and_caches() {
    let upstream = TestUpstream::start(200, r#"{"status":"ok","version":"1.4.2"}"#).await;
    let server = test_server();
    let tool = register_github_tool(&server, &upstream, "github-ci", None).await;
    let config = server.registry.get_tool("tenant-a", tool.id).await.unwrap();

    let status = server.health.check_health(&config, false).await;
    assert!(status.is_healthy);
    assert_eq!(status.version.as_deref(), Some("1.4.2"));
    assert_eq!(upstream.request_count(), 1);
    assert_eq!(upstream.requests()[0].target, "/health");

    // Fresh cache short-circuits; force bypasses it.
    server.health.check_health(&config, false).await;
    assert_eq!(upstream.request_count(), 1);
    server.health.check_health(&config, true).await;
    assert_eq!(upstream.request_count(), 2);
}
