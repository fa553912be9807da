//! Discovery: turn a base URL (plus hints) into a parsed API specification
//! and from there into AI-friendly MCP tool views.

pub mod enhance;
pub mod grouping;
pub mod openapi;
pub mod schema;

use chrono::Utc;
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use meshgate_types::{
    sanitize_log_value, validate_base_url, ConfirmDiscoveryRequest, CreateToolRequest,
    DiscoverRequest, DiscoveredSpec, DiscoverySession, DiscoveryStatus, GatewayError, SpecFormat,
    ToolConfig,
};

use crate::config::DiscoveryConfig;
use crate::registry::ToolRegistry;
use openapi::ApiSpec;

/// Probe order for well-known spec locations; hint paths append after.
const PROBE_PATHS: &[&str] = &[
    "/openapi.json",
    "/swagger.json",
    "/api-docs",
    "/v1/openapi.json",
    "/.well-known/openapi",
];

static LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(?:href|src)=["']([^"'<>\s]+)["']"#).expect("link regex"));

#[derive(Debug)]
pub struct DiscoveryOutcome {
    pub status: DiscoveryStatus,
    pub discovered: Vec<DiscoveredSpec>,
    pub selected: Option<(String, ApiSpec)>,
    pub error: Option<String>,
}

/// Pure fetch-and-parse engine; no session state.
pub struct DiscoveryEngine {
    client: reqwest::Client,
    config: DiscoveryConfig,
}

impl DiscoveryEngine {
    pub fn new(config: DiscoveryConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.probe_timeout_secs))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Fetch and parse one candidate spec URL.
    pub async fn fetch_spec(&self, url: &str) -> Result<ApiSpec, GatewayError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json, application/yaml, text/yaml")
            .send()
            .await
            .map_err(|e| GatewayError::DiscoveryFailed(format!("fetch {url} failed: {e}")))?;
        if !response.status().is_success() {
            return Err(GatewayError::DiscoveryFailed(format!(
                "fetch {url} returned {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::DiscoveryFailed(format!("read {url} failed: {e}")))?;
        openapi::parse_spec(&body)
    }

    async fn probe(&self, url: String) -> Option<(String, ApiSpec)> {
        match self.fetch_spec(&url).await {
            Ok(spec) => Some((url, spec)),
            Err(e) => {
                tracing::debug!("probe {url}: {e}");
                None
            }
        }
    }

    /// Run the full discovery algorithm against a base URL.
    pub async fn discover(
        &self,
        base_url: &str,
        openapi_url: Option<&str>,
        hint_paths: &[String],
    ) -> DiscoveryOutcome {
        // 1. Explicit spec URL wins.
        if let Some(url) = openapi_url {
            match self.fetch_spec(url).await {
                Ok(spec) => return self.outcome_from(vec![(url.to_string(), spec)]),
                Err(e) => {
                    return DiscoveryOutcome {
                        status: DiscoveryStatus::Failed,
                        discovered: vec![],
                        selected: None,
                        error: Some(e.to_string()),
                    }
                }
            }
        }

        // 2. Probe well-known paths plus hints, first usable wins; probes run
        //    with bounded concurrency but are evaluated in list order.
        let candidates: Vec<String> = PROBE_PATHS
            .iter()
            .map(|p| p.to_string())
            .chain(hint_paths.iter().cloned())
            .filter_map(|p| join_url(base_url, &p))
            .collect();

        let mut probes = futures::stream::iter(
            candidates
                .into_iter()
                .map(|url| self.probe(url)),
        )
        .buffered(self.config.max_concurrent_probes.max(1));

        let mut parseable: Vec<(String, ApiSpec)> = Vec::new();
        while let Some(result) = probes.next().await {
            if let Some((url, spec)) = result {
                let usable = matches!(spec.format, SpecFormat::OpenApi3 | SpecFormat::Swagger2);
                parseable.push((url, spec));
                if usable {
                    break;
                }
            }
        }
        drop(probes);

        if parseable
            .iter()
            .any(|(_, s)| matches!(s.format, SpecFormat::OpenApi3 | SpecFormat::Swagger2))
        {
            return self.outcome_from(parseable);
        }

        // 3. Bounded crawl of the portal page for linked spec documents.
        let crawled = self.crawl(base_url).await;
        for url in crawled {
            if let Ok(spec) = self.fetch_spec(&url).await {
                if matches!(spec.format, SpecFormat::OpenApi3 | SpecFormat::Swagger2) {
                    parseable.push((url, spec));
                    return self.outcome_from(parseable);
                }
                parseable.push((url, spec));
            }
        }

        self.outcome_from(parseable)
    }

    /// Breadth-bounded crawl: extract links that look like spec documents
    /// from the portal page and one level of linked HTML pages.
    async fn crawl(&self, base_url: &str) -> Vec<String> {
        let mut spec_links: Vec<String> = Vec::new();
        let mut html_queue: Vec<(String, usize)> = vec![(base_url.to_string(), 0)];
        let mut visited = 0usize;

        while let Some((page, depth)) = html_queue.pop() {
            if visited >= self.config.crawl_max_pages {
                break;
            }
            visited += 1;

            let Ok(response) = self.client.get(&page).send().await else {
                continue;
            };
            let Ok(body) = response.text().await else {
                continue;
            };

            for capture in LINK_RE.captures_iter(&body) {
                let Some(link) = join_url(&page, &capture[1]) else {
                    continue;
                };
                let lower = link.to_lowercase();
                if lower.contains("openapi")
                    || lower.contains("swagger")
                    || lower.contains("api-doc")
                    || lower.ends_with(".json")
                    || lower.ends_with(".yaml")
                    || lower.ends_with(".yml")
                {
                    if !spec_links.contains(&link) {
                        spec_links.push(link);
                    }
                } else if depth + 1 < self.config.crawl_max_depth
                    && lower.starts_with(&base_url.to_lowercase())
                    && html_queue.len() < self.config.crawl_max_pages
                {
                    html_queue.push((link, depth + 1));
                }
            }
        }

        spec_links.truncate(self.config.crawl_max_pages);
        spec_links
    }

    fn outcome_from(&self, parseable: Vec<(String, ApiSpec)>) -> DiscoveryOutcome {
        let discovered: Vec<DiscoveredSpec> = parseable
            .iter()
            .map(|(url, spec)| DiscoveredSpec {
                url: url.clone(),
                format: spec.format,
                operation_count: spec.operations.len(),
            })
            .collect();

        let best = parseable
            .into_iter()
            .find(|(_, s)| matches!(s.format, SpecFormat::OpenApi3 | SpecFormat::Swagger2));

        match best {
            Some((url, spec)) => {
                let status = if spec.operations.is_empty() || spec.incomplete_operations() > 0 {
                    DiscoveryStatus::Partial
                } else {
                    DiscoveryStatus::Success
                };
                DiscoveryOutcome {
                    status,
                    discovered,
                    selected: Some((url, spec)),
                    error: None,
                }
            }
            None if !discovered.is_empty() => DiscoveryOutcome {
                status: DiscoveryStatus::ManualNeeded,
                discovered,
                selected: None,
                error: Some("no OpenAPI or Swagger document found; a spec URL hint is needed".into()),
            },
            None => DiscoveryOutcome {
                status: DiscoveryStatus::Failed,
                discovered: vec![],
                selected: None,
                error: Some("no usable specification discovered".into()),
            },
        }
    }
}

fn join_url(base: &str, path: &str) -> Option<String> {
    if path.starts_with("http://") || path.starts_with("https://") {
        return Some(path.to_string());
    }
    Url::parse(base)
        .ok()?
        .join(path)
        .ok()
        .map(|u| u.to_string())
}

/// Per-item result of a bulk discover-and-create call.
#[derive(Debug, serde::Serialize)]
pub struct MultiDiscoveryResult {
    pub base_url: String,
    pub session_id: Uuid,
    pub status: DiscoveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Discovery session lifecycle on top of the engine and the registry.
pub struct DiscoveryService {
    engine: Arc<DiscoveryEngine>,
    registry: Arc<ToolRegistry>,
}

impl DiscoveryService {
    pub fn new(engine: Arc<DiscoveryEngine>, registry: Arc<ToolRegistry>) -> Self {
        Self { engine, registry }
    }

    pub fn engine(&self) -> &Arc<DiscoveryEngine> {
        &self.engine
    }

    /// Create a session and spawn its worker. The worker publishes exactly
    /// one terminal status within the discovery timeout; the timeout wrapper
    /// publishes `failed` and any late worker update is discarded by the
    /// store.
    pub async fn start_discovery(
        &self,
        tenant_id: &str,
        request: DiscoverRequest,
    ) -> Result<DiscoverySession, GatewayError> {
        validate_base_url(&request.base_url)?;

        let total_timeout = Duration::from_secs(self.engine.config.total_timeout_secs);
        let session = DiscoverySession {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            base_url: request.base_url.clone(),
            status: DiscoveryStatus::InProgress,
            discovered_urls: vec![],
            selected_url: None,
            error: None,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::from_std(total_timeout).unwrap_or_default(),
        };
        let store = self.registry.stores().discovery.clone();
        store
            .insert(session.clone())
            .await
            .map_err(|e| GatewayError::Storage(e.to_string()))?;

        let engine = self.engine.clone();
        let session_id = session.id;
        let base_url = request.base_url.clone();
        let openapi_url = request.openapi_url.clone();
        let hint_paths = request.hint_paths.clone();
        tokio::spawn(async move {
            let work = async {
                let outcome = engine
                    .discover(&base_url, openapi_url.as_deref(), &hint_paths)
                    .await;
                let selected_url = outcome.selected.as_ref().map(|(url, _)| url.clone());
                if let Err(e) = store
                    .complete(
                        session_id,
                        outcome.status,
                        outcome.discovered,
                        selected_url,
                        outcome.error,
                    )
                    .await
                {
                    tracing::warn!(%session_id, "failed to persist discovery outcome: {e}");
                }
            };
            if tokio::time::timeout(total_timeout, work).await.is_err() {
                tracing::warn!(%session_id, "discovery timed out");
                let _ = store
                    .complete(
                        session_id,
                        DiscoveryStatus::Failed,
                        vec![],
                        None,
                        Some("discovery timed out".to_string()),
                    )
                    .await;
            }
        });

        Ok(session)
    }

    pub async fn get_session(
        &self,
        tenant_id: &str,
        session_id: Uuid,
    ) -> Result<DiscoverySession, GatewayError> {
        self.registry
            .stores()
            .discovery
            .get(tenant_id, session_id)
            .await
            .map_err(|e| GatewayError::Storage(e.to_string()))?
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.to_string()))
    }

    /// Promote a terminal-success session into a tool registration.
    pub async fn confirm(
        &self,
        tenant_id: &str,
        session_id: Uuid,
        request: ConfirmDiscoveryRequest,
    ) -> Result<ToolConfig, GatewayError> {
        let session = self.get_session(tenant_id, session_id).await?;
        if !session.status.can_confirm() {
            return Err(GatewayError::InvalidParams(format!(
                "discovery session is {:?}; only successful sessions can be confirmed",
                session.status
            )));
        }

        let selected = request
            .selected_url
            .clone()
            .or(session.selected_url.clone())
            .or_else(|| session.discovered_urls.first().map(|d| d.url.clone()))
            .ok_or_else(|| {
                GatewayError::InvalidParams("session has no discovered spec URL".to_string())
            })?;
        if request.selected_url.is_some()
            && !session.discovered_urls.iter().any(|d| d.url == selected)
        {
            return Err(GatewayError::InvalidParams(
                "selected_url was not discovered by this session".to_string(),
            ));
        }

        let tool = self
            .registry
            .create_tool(
                tenant_id,
                CreateToolRequest {
                    name: request.name,
                    base_url: session.base_url.clone(),
                    openapi_url: Some(selected),
                    documentation_url: None,
                    auth_type: request.auth_type.unwrap_or_default(),
                    credential: request.credential,
                    provider: None,
                    config: HashMap::new(),
                    retry_policy: None,
                    health_config: None,
                    passthrough: None,
                },
            )
            .await?;

        let confirmed = self
            .registry
            .stores()
            .discovery
            .mark_confirmed(tenant_id, session_id)
            .await
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        if !confirmed {
            tracing::warn!(%session_id, "discovery session no longer confirmable after tool creation");
        }

        tracing::info!(
            tenant_id,
            %session_id,
            tool_id = %tool.id,
            "discovery confirmed into tool {}",
            sanitize_log_value(&tool.name)
        );
        Ok(tool)
    }

    /// Start one session per base URL.
    pub async fn discover_multiple(
        &self,
        tenant_id: &str,
        requests: Vec<DiscoverRequest>,
    ) -> Result<Vec<DiscoverySession>, GatewayError> {
        let mut sessions = Vec::with_capacity(requests.len());
        for request in requests {
            sessions.push(self.start_discovery(tenant_id, request).await?);
        }
        Ok(sessions)
    }

    /// Run discovery inline for each request and create tools for the
    /// successes. Each request must carry a tool name.
    pub async fn discover_multiple_create(
        &self,
        tenant_id: &str,
        requests: Vec<DiscoverRequest>,
    ) -> Result<Vec<MultiDiscoveryResult>, GatewayError> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            let name = request.name.clone();
            let auth_type = request.auth_type;
            let credential = request.credential.clone();
            let base_url = request.base_url.clone();
            let session = self.start_discovery(tenant_id, request).await?;

            // Poll the session to its terminal state.
            let deadline = tokio::time::Instant::now()
                + Duration::from_secs(self.engine.config.total_timeout_secs);
            let session = loop {
                let current = self.get_session(tenant_id, session.id).await?;
                if current.status.is_terminal() {
                    break current;
                }
                if tokio::time::Instant::now() >= deadline {
                    break current;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            };

            if !session.status.can_confirm() {
                results.push(MultiDiscoveryResult {
                    base_url,
                    session_id: session.id,
                    status: session.status,
                    tool_id: None,
                    error: session.error.clone(),
                });
                continue;
            }

            let Some(name) = name else {
                results.push(MultiDiscoveryResult {
                    base_url,
                    session_id: session.id,
                    status: session.status,
                    tool_id: None,
                    error: Some("request is missing a tool name".to_string()),
                });
                continue;
            };

            match self
                .confirm(
                    tenant_id,
                    session.id,
                    ConfirmDiscoveryRequest {
                        name,
                        selected_url: None,
                        auth_type,
                        credential,
                    },
                )
                .await
            {
                Ok(tool) => results.push(MultiDiscoveryResult {
                    base_url,
                    session_id: session.id,
                    status: DiscoveryStatus::Confirmed,
                    tool_id: Some(tool.id),
                    error: None,
                }),
                Err(e) => results.push(MultiDiscoveryResult {
                    base_url,
                    session_id: session.id,
                    status: session.status,
                    tool_id: None,
                    error: Some(e.to_string()),
                }),
            }
        }
        Ok(results)
    }
}
