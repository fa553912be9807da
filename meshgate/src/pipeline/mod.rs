//! Invocation pipeline: resolve → bind → construct → authenticate →
//! circuit-break → retry → normalise. One outbound request per attempt,
//! retries strictly sequential, breaker observes the final outcome only.

pub mod auth;
pub mod breaker;
pub mod provider;

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;

use meshgate_types::{
    sanitize_log_value, GatewayError, PassthroughToken, ProviderError, RetryPolicy, ToolConfig,
};

use crate::config::HttpClientConfig;
use crate::discovery::schema::{path_placeholders, OperationSpec};
use auth::AuthHeader;
use breaker::CircuitBreakerRegistry;
use provider::OperationCatalog;

/// Query parameters always forwarded on GET/HEAD regardless of the
/// operation's declared parameters.
const QUERY_SAFELIST: &[&str] = &["per_page", "page", "limit", "offset", "sort", "direction"];

#[derive(Debug)]
pub struct ExecuteOutcome {
    pub result: Value,
    /// Outbound attempts actually made (1 = no retries).
    pub attempts: u32,
    pub response_time_ms: u64,
}

#[derive(Debug, PartialEq)]
struct BoundRequest {
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Bind call parameters against an operation: path placeholders substitute
/// (each required, missing → InvalidParams), GET/HEAD forward declared
/// params plus the safelist as query, body methods serialise the remainder
/// as JSON.
fn bind_parameters(op: &OperationSpec, params: &Value) -> Result<BoundRequest, GatewayError> {
    let mut remaining: Map<String, Value> = params.as_object().cloned().unwrap_or_default();
    let mut path = op.path_template.clone();

    for placeholder in path_placeholders(&op.path_template) {
        let value = remaining.remove(&placeholder).ok_or_else(|| {
            GatewayError::InvalidParams(format!(
                "missing required path parameter {placeholder:?}"
            ))
        })?;
        path = path.replace(&format!("{{{placeholder}}}"), &value_to_string(&value));
    }

    for required in &op.required_params {
        if !op.path_template.contains(&format!("{{{required}}}")) && !remaining.contains_key(required)
        {
            return Err(GatewayError::InvalidParams(format!(
                "missing required parameter {required:?}"
            )));
        }
    }

    if op.method == "GET" || op.method == "HEAD" {
        let mut query = Vec::new();
        for (key, value) in &remaining {
            let declared = op.required_params.contains(key)
                || op.optional_params.contains(key)
                || QUERY_SAFELIST.contains(&key.as_str());
            if declared && !value.is_null() {
                query.push((key.clone(), value_to_string(value)));
            }
        }
        Ok(BoundRequest {
            path,
            query,
            body: None,
        })
    } else {
        // A `body` object merges into the payload alongside loose fields.
        let mut body = Map::new();
        if let Some(Value::Object(explicit)) = remaining.remove("body") {
            body.extend(explicit);
        }
        for (key, value) in remaining {
            body.entry(key).or_insert(value);
        }
        Ok(BoundRequest {
            path,
            query: Vec::new(),
            body: if body.is_empty() {
                None
            } else {
                Some(Value::Object(body))
            },
        })
    }
}

fn status_is_retryable(status: u16, policy: &RetryPolicy) -> bool {
    policy.retryable_status_codes.contains(&status)
        || (500..600).contains(&status)
        || (status == 429 && policy.retry_on_rate_limit)
}

pub struct ExecutionPipeline {
    client: reqwest::Client,
    catalog: OperationCatalog,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl ExecutionPipeline {
    pub fn new(
        http: &HttpClientConfig,
        catalog: OperationCatalog,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(http.request_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            catalog,
            breakers,
        }
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn catalog(&self) -> &OperationCatalog {
        &self.catalog
    }

    /// Single entry point for dynamic tool invocation.
    pub async fn execute(
        &self,
        tool: &ToolConfig,
        action: &str,
        params: Value,
        passthrough: &PassthroughToken,
    ) -> Result<ExecuteOutcome, GatewayError> {
        let started = Instant::now();

        let operations = self.catalog.operations_for(tool).await?;
        let operation = operations.get(action).ok_or_else(|| {
            GatewayError::OperationNotFound(format!("{}.{action}", tool.name))
        })?;

        let bound = bind_parameters(operation, &params)?;

        let provider = self.catalog.providers().resolve(tool);
        let auth = auth::resolve_auth(tool, provider.as_ref(), passthrough)?;

        if !self.breakers.is_available(tool.id) {
            return Err(GatewayError::CircuitOpen(tool.name.clone()));
        }

        let policy = tool.retry_policy.clone();
        let url = format!("{}{}", tool.base_url.trim_end_matches('/'), bound.path);
        let provider_name = provider.name().to_string();

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match self
                .attempt(tool, &provider_name, provider.as_ref(), &auth, operation, &url, &bound)
                .await
            {
                Ok(result) => {
                    self.breakers.record_success(tool.id);
                    return Ok(ExecuteOutcome {
                        result,
                        attempts,
                        response_time_ms: started.elapsed().as_millis() as u64,
                    });
                }
                Err((error, retryable)) => {
                    if retryable && attempts <= policy.max_retries {
                        let delay = policy.delay_for_attempt(attempts - 1);
                        tracing::debug!(
                            tool_id = %tool.id,
                            attempt = attempts,
                            delay_ms = delay.as_millis() as u64,
                            "retrying upstream call"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    // Breaker observes the final attempt outcome only.
                    self.breakers.record_failure(tool.id);
                    return Err(error);
                }
            }
        }
    }

    /// One outbound attempt; the request is rebuilt each time so the body is
    /// rewound between retries.
    async fn attempt(
        &self,
        tool: &ToolConfig,
        provider_name: &str,
        provider: &dyn provider::ProviderAdapter,
        auth: &AuthHeader,
        operation: &OperationSpec,
        url: &str,
        bound: &BoundRequest,
    ) -> Result<Value, (GatewayError, bool)> {
        let method = reqwest::Method::from_bytes(operation.method.as_bytes())
            .map_err(|_| {
                (
                    GatewayError::Internal(format!("invalid method {}", operation.method)),
                    false,
                )
            })?;

        let mut request = self
            .client
            .request(method, url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");
        for (name, value) in provider.default_headers() {
            request = request.header(name, value);
        }
        if let AuthHeader::Header { name, value } = auth {
            request = request.header(name.as_str(), value.as_str());
        }
        if !bound.query.is_empty() {
            request = request.query(&bound.query);
        }
        if let Some(body) = &bound.body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                let retryable = tool.retry_policy.retry_on_timeout;
                let provider_error = ProviderError {
                    provider: provider_name.to_string(),
                    code: "TRANSPORT".to_string(),
                    status_code: 0,
                    is_retryable: retryable,
                    message: sanitize_log_value(&error.to_string()),
                };
                return Err((GatewayError::Upstream(provider_error), retryable));
            }
        };

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        if (200..300).contains(&status) {
            let parsed = serde_json::from_str::<Value>(&body)
                .unwrap_or_else(|_| Value::String(body));
            return Ok(parsed);
        }

        let retryable = status_is_retryable(status, &tool.retry_policy);
        let provider_error = ProviderError {
            provider: provider_name.to_string(),
            code: format!("HTTP_{status}"),
            status_code: status,
            is_retryable: retryable,
            message: sanitize_log_value(&body),
        };
        Err((GatewayError::Upstream(provider_error), retryable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn operation(method: &str, path: &str) -> OperationSpec {
        OperationSpec {
            id: "op".to_string(),
            method: method.to_string(),
            path_template: path.to_string(),
            required_params: path_placeholders(path),
            optional_params: vec!["state".to_string()],
            summary: None,
        }
    }

    #[test]
    fn bind_substitutes_path_placeholders() {
        let bound = bind_parameters(
            &operation("GET", "/repos/{owner}/{repo}"),
            &json!({"owner": "octo", "repo": "hello"}),
        )
        .unwrap();
        assert_eq!(bound.path, "/repos/octo/hello");
        assert!(bound.query.is_empty());
        assert!(bound.body.is_none());
    }

    #[test]
    fn bind_rejects_missing_placeholder() {
        let result = bind_parameters(
            &operation("GET", "/repos/{owner}/{repo}"),
            &json!({"owner": "octo"}),
        );
        assert!(matches!(result, Err(GatewayError::InvalidParams(_))));
    }

    #[test]
    fn get_forwards_declared_and_safelisted_query() {
        let bound = bind_parameters(
            &operation("GET", "/repos/{owner}/{repo}/issues"),
            &json!({
                "owner": "octo",
                "repo": "hello",
                "state": "open",
                "per_page": 50,
                "unknown_field": "dropped"
            }),
        )
        .unwrap();
        assert!(bound.query.contains(&("state".to_string(), "open".to_string())));
        assert!(bound.query.contains(&("per_page".to_string(), "50".to_string())));
        assert!(!bound.query.iter().any(|(k, _)| k == "unknown_field"));
    }

    #[test]
    fn post_serialises_remainder_as_body() {
        let bound = bind_parameters(
            &operation("POST", "/repos/{owner}/{repo}/issues"),
            &json!({"owner": "octo", "repo": "hello", "title": "bug", "labels": ["a"]}),
        )
        .unwrap();
        let body = bound.body.unwrap();
        assert_eq!(body["title"], "bug");
        assert_eq!(body["labels"], json!(["a"]));
        assert!(body.get("owner").is_none());
    }

    #[test]
    fn explicit_body_object_merges() {
        let bound = bind_parameters(
            &operation("POST", "/items"),
            &json!({"body": {"name": "x"}, "extra": 1}),
        )
        .unwrap();
        let body = bound.body.unwrap();
        assert_eq!(body["name"], "x");
        assert_eq!(body["extra"], 1);
    }

    #[test]
    fn retryable_statuses_follow_policy() {
        let policy = RetryPolicy::default();
        assert!(status_is_retryable(503, &policy));
        assert!(status_is_retryable(500, &policy));
        assert!(status_is_retryable(429, &policy));
        assert!(!status_is_retryable(404, &policy));
        assert!(!status_is_retryable(400, &policy));

        let no_rate_limit = RetryPolicy {
            retry_on_rate_limit: false,
            ..Default::default()
        };
        assert!(!status_is_retryable(429, &no_rate_limit));

        let custom = RetryPolicy {
            retryable_status_codes: vec![408],
            ..Default::default()
        };
        assert!(status_is_retryable(408, &custom));
    }
}
