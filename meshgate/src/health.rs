//! Health tracking: on-demand checks with a per-tool TTL cache, plus a
//! periodic scheduler sweeping active tools through a bounded worker pool.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use meshgate_types::{
    HealthCheckMode, HealthStatus, PassthroughToken, ToolConfig,
};

use crate::config::HealthSchedulerConfig;
use crate::pipeline::auth::{resolve_auth, AuthHeader};
use crate::pipeline::provider::ProviderRegistry;
use crate::registry::ToolRegistry;

/// Write-through target for observed health; the relational store sits
/// behind this seam.
#[async_trait]
pub trait HealthCheckSink: Send + Sync {
    async fn update_tool_health(&self, tool_id: Uuid, status: &HealthStatus) -> anyhow::Result<()>;
}

/// Default sink: structured log only.
pub struct LogHealthSink;

#[async_trait]
impl HealthCheckSink for LogHealthSink {
    async fn update_tool_health(&self, tool_id: Uuid, status: &HealthStatus) -> anyhow::Result<()> {
        tracing::debug!(
            %tool_id,
            is_healthy = status.is_healthy,
            response_time_ms = status.response_time_ms,
            "health observed"
        );
        Ok(())
    }
}

pub struct HealthCheckManager {
    client: reqwest::Client,
    providers: Arc<ProviderRegistry>,
    /// Latest observation per tool; freshness judged against the tool's own
    /// `health_config.interval_secs`.
    cache: DashMap<Uuid, HealthStatus>,
}

impl HealthCheckManager {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self {
            client: reqwest::Client::new(),
            providers,
            cache: DashMap::new(),
        }
    }

    pub fn cached(&self, tool_id: Uuid) -> Option<HealthStatus> {
        self.cache.get(&tool_id).map(|s| s.clone())
    }

    fn fresh(&self, config: &ToolConfig) -> Option<HealthStatus> {
        let status = self.cache.get(&config.id)?;
        let age = Utc::now() - status.last_checked;
        if age.num_seconds() >= 0 && (age.num_seconds() as u64) < config.health_config.interval_secs
        {
            Some(status.clone())
        } else {
            None
        }
    }

    /// Check a tool's upstream health. Serves the cached observation unless
    /// it is stale or `force` is set.
    pub async fn check_health(&self, config: &ToolConfig, force: bool) -> HealthStatus {
        if !force {
            if let Some(status) = self.fresh(config) {
                return status;
            }
        }

        let endpoint = config
            .health_config
            .endpoint
            .as_deref()
            .unwrap_or("/health");
        let url = format!("{}{}", config.base_url.trim_end_matches('/'), endpoint);
        let timeout = Duration::from_secs(config.health_config.check_timeout_secs);
        let provider = self.providers.resolve(config);

        let mut request = self.client.get(&url).timeout(timeout);
        // Health probes reuse the tool's auth; a missing credential degrades
        // to an unauthenticated probe rather than failing the check.
        if let Ok(AuthHeader::Header { name, value }) =
            resolve_auth(config, provider.as_ref(), &PassthroughToken::default())
        {
            request = request.header(name, value);
        }

        let started = Instant::now();
        let mut status = match request.send().await {
            Ok(response) => {
                let elapsed = started.elapsed().as_millis() as u64;
                let code = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                let mut status = if (200..400).contains(&code) {
                    HealthStatus::healthy(elapsed)
                } else {
                    HealthStatus::unhealthy(elapsed, format!("health endpoint returned {code}"))
                };
                status
                    .details
                    .insert("status_code".to_string(), Value::from(code));
                status.version = serde_json::from_str::<Value>(&body)
                    .ok()
                    .and_then(|v| {
                        v.get("version")
                            .and_then(Value::as_str)
                            .map(String::from)
                    });
                status
            }
            Err(error) => HealthStatus::unhealthy(
                started.elapsed().as_millis() as u64,
                meshgate_types::sanitize_log_value(&error.to_string()),
            ),
        };
        status.last_checked = Utc::now();

        self.cache.insert(config.id, status.clone());
        status
    }

    pub fn invalidate(&self, tool_id: Uuid) {
        self.cache.remove(&tool_id);
    }
}

/// Fixed-rate sweep over active tools with periodic health checks enabled.
/// Start is idempotent; stop drains in-flight checks before returning.
pub struct HealthCheckScheduler {
    manager: Arc<HealthCheckManager>,
    registry: Arc<ToolRegistry>,
    sink: Arc<dyn HealthCheckSink>,
    config: HealthSchedulerConfig,
    running: AtomicBool,
    shutdown: Notify,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl HealthCheckScheduler {
    pub fn new(
        manager: Arc<HealthCheckManager>,
        registry: Arc<ToolRegistry>,
        sink: Arc<dyn HealthCheckSink>,
        config: HealthSchedulerConfig,
    ) -> Self {
        Self {
            manager,
            registry,
            sink,
            config,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            handle: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(scheduler.config.sweep_interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => scheduler.sweep().await,
                    _ = scheduler.shutdown.notified() => break,
                }
            }
        });
        *self.handle.lock().await = Some(handle);
    }

    async fn sweep(&self) {
        let tools = match self.registry.list_active_configs().await {
            Ok(tools) => tools,
            Err(e) => {
                tracing::warn!("health sweep could not list tools: {e}");
                return;
            }
        };

        let periodic: Vec<ToolConfig> = tools
            .into_iter()
            .filter(|t| t.health_config.mode == HealthCheckMode::Periodic)
            .collect();
        if periodic.is_empty() {
            return;
        }

        let checks = futures::stream::iter(periodic.into_iter().map(|tool| {
            let manager = self.manager.clone();
            let sink = self.sink.clone();
            async move {
                let status = manager.check_health(&tool, false).await;
                if let Err(e) = sink.update_tool_health(tool.id, &status).await {
                    tracing::warn!(tool_id = %tool.id, "health sink write failed: {e}");
                }
            }
        }))
        .buffer_unordered(self.config.max_parallel_checks.max(1));
        checks.collect::<Vec<()>>().await;
    }

    /// Stop the sweep loop and wait for in-flight checks to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_one();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use meshgate_types::{AuthKind, HealthConfig, ToolStatus};

    fn config(interval_secs: u64) -> ToolConfig {
        ToolConfig {
            id: Uuid::new_v4(),
            tenant_id: "t".to_string(),
            name: "internal-api".to_string(),
            base_url: "https://upstream.test".to_string(),
            openapi_url: None,
            documentation_url: None,
            auth_type: AuthKind::None,
            credential: None,
            provider: None,
            config: Default::default(),
            retry_policy: Default::default(),
            health_config: HealthConfig {
                interval_secs,
                ..Default::default()
            },
            status: ToolStatus::Active,
            passthrough: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn fresh_observation_served_from_cache() {
        let manager = HealthCheckManager::new(Arc::new(ProviderRegistry::new()));
        let tool = config(300);
        manager.cache.insert(tool.id, HealthStatus::healthy(5));
        assert!(manager.fresh(&tool).is_some());
    }

    #[test]
    fn stale_observation_misses() {
        let manager = HealthCheckManager::new(Arc::new(ProviderRegistry::new()));
        let tool = config(300);
        let mut status = HealthStatus::healthy(5);
        status.last_checked = Utc::now() - chrono::Duration::seconds(301);
        manager.cache.insert(tool.id, status);
        assert!(manager.fresh(&tool).is_none());
        // Stale but still present for callers wanting the last observation
        assert!(manager.cached(tool.id).is_some());
    }
}
