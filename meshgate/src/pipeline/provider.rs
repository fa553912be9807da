//! Providers: built-in adapters for well-known API families plus a generic
//! adapter for everything else. Concrete providers expose a narrow surface
//! (operation map, default headers, auth header, credential validation);
//! URL construction, auth injection, and the retry loop live in the shared
//! pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use meshgate_types::{AuthKind, GatewayError, ToolConfig};
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::discovery::schema::{OperationMap, OperationSpec};
use crate::discovery::DiscoveryEngine;

pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Default headers applied before per-call headers.
    fn default_headers(&self) -> Vec<(&'static str, &'static str)> {
        Vec::new()
    }

    /// Target header for `api_key` authentication.
    fn api_key_header(&self) -> &'static str {
        "X-API-Key"
    }

    /// Static operation map for providers with curated operations.
    fn static_operations(&self) -> Option<OperationMap> {
        None
    }

    /// Cheap structural validation of credential material.
    fn validate_credentials(&self, config: &ToolConfig) -> Result<(), GatewayError> {
        match config.auth_type {
            AuthKind::None => Ok(()),
            AuthKind::Basic => {
                let has_pair = config
                    .credential
                    .as_ref()
                    .map(|c| c.username.is_some() && c.password.is_some())
                    .unwrap_or(false);
                if has_pair {
                    Ok(())
                } else {
                    Err(GatewayError::AuthMissing(
                        "basic auth requires username and password".to_string(),
                    ))
                }
            }
            _ => {
                let has_token = config
                    .credential
                    .as_ref()
                    .and_then(|c| c.token.as_ref())
                    .map(|t| !t.is_empty())
                    .unwrap_or(false);
                if has_token {
                    Ok(())
                } else {
                    Err(GatewayError::AuthMissing(format!(
                        "{:?} auth requires a token",
                        config.auth_type
                    )))
                }
            }
        }
    }
}

pub struct GenericProvider;

impl ProviderAdapter for GenericProvider {
    fn name(&self) -> &str {
        "generic"
    }
}

pub struct GithubProvider;

impl ProviderAdapter for GithubProvider {
    fn name(&self) -> &str {
        "github"
    }

    fn default_headers(&self) -> Vec<(&'static str, &'static str)> {
        vec![
            ("Accept", "application/vnd.github+json"),
            ("X-GitHub-Api-Version", "2022-11-28"),
        ]
    }

    fn static_operations(&self) -> Option<OperationMap> {
        let specs = [
            ("repos/get", "GET", "/repos/{owner}/{repo}", "Get a repository"),
            ("repos/list", "GET", "/user/repos", "List repositories for the authenticated user"),
            ("issues/list", "GET", "/repos/{owner}/{repo}/issues", "List repository issues"),
            ("issues/get", "GET", "/repos/{owner}/{repo}/issues/{issue_number}", "Get an issue"),
            ("issues/create", "POST", "/repos/{owner}/{repo}/issues", "Create an issue"),
            ("pulls/list", "GET", "/repos/{owner}/{repo}/pulls", "List pull requests"),
            ("pulls/get", "GET", "/repos/{owner}/{repo}/pulls/{pull_number}", "Get a pull request"),
            ("actions/list_runs", "GET", "/repos/{owner}/{repo}/actions/runs", "List workflow runs"),
            ("search/repos", "GET", "/search/repositories", "Search repositories"),
        ];
        let mut operations = HashMap::new();
        for (id, method, path, summary) in specs {
            operations.insert(
                id.to_string(),
                OperationSpec {
                    id: id.to_string(),
                    method: method.to_string(),
                    path_template: path.to_string(),
                    required_params: crate::discovery::schema::path_placeholders(path),
                    optional_params: match id {
                        "search/repos" => vec!["q".to_string(), "sort".to_string()],
                        _ => Vec::new(),
                    },
                    summary: Some(summary.to_string()),
                },
            );
        }
        Some(OperationMap { operations })
    }
}

pub struct SnykProvider;

impl ProviderAdapter for SnykProvider {
    fn name(&self) -> &str {
        "snyk"
    }

    fn api_key_header(&self) -> &'static str {
        "Authorization"
    }
}

/// Lookup table of built-in adapters; unmatched providers get the generic
/// adapter.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
    generic: Arc<dyn ProviderAdapter>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        let mut providers: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
        for adapter in [
            Arc::new(GithubProvider) as Arc<dyn ProviderAdapter>,
            Arc::new(SnykProvider) as Arc<dyn ProviderAdapter>,
        ] {
            providers.insert(adapter.name().to_string(), adapter);
        }
        Self {
            providers,
            generic: Arc::new(GenericProvider),
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.providers.insert(adapter.name().to_string(), adapter);
    }

    /// Resolve by the tool's declared provider, falling back to a substring
    /// match on the tool name, then to the generic adapter.
    pub fn resolve(&self, config: &ToolConfig) -> Arc<dyn ProviderAdapter> {
        if let Some(provider) = &config.provider {
            if let Some(adapter) = self.providers.get(provider.to_lowercase().as_str()) {
                return adapter.clone();
            }
        }
        let lower = config.name.to_lowercase();
        for (name, adapter) in &self.providers {
            if lower.contains(name.as_str()) {
                return adapter.clone();
            }
        }
        self.generic.clone()
    }
}

/// Operation maps per tool: provider statics first, then the tool's OpenAPI
/// document fetched on demand and cached.
pub struct OperationCatalog {
    providers: Arc<ProviderRegistry>,
    engine: Arc<DiscoveryEngine>,
    dynamic: TtlCache<Uuid, Arc<OperationMap>>,
}

impl OperationCatalog {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        engine: Arc<DiscoveryEngine>,
        ttl: Duration,
    ) -> Self {
        Self {
            providers,
            engine,
            dynamic: TtlCache::new(ttl),
        }
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn invalidate(&self, tool_id: Uuid) {
        self.dynamic.invalidate(&tool_id);
    }

    pub async fn operations_for(
        &self,
        config: &ToolConfig,
    ) -> Result<Arc<OperationMap>, GatewayError> {
        if let Some(map) = self.providers.resolve(config).static_operations() {
            return Ok(Arc::new(map));
        }
        if let Some(cached) = self.dynamic.get(&config.id) {
            return Ok(cached);
        }
        let Some(openapi_url) = &config.openapi_url else {
            return Ok(Arc::new(OperationMap::default()));
        };
        let mut spec = self.engine.fetch_spec(openapi_url).await?;
        crate::discovery::enhance::assign_operation_ids(&mut spec.operations);
        let map = Arc::new(OperationMap::from_spec(&spec));
        self.dynamic.insert(config.id, map.clone());
        Ok(map)
    }
}
