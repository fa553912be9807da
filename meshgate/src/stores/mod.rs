//! Store traits for tool configurations, discovery sessions, and execution
//! records. The relational store itself lives behind these seams; the
//! in-memory implementations back tests and single-node deployments.

pub mod memory;
pub use memory::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use meshgate_types::{
    DiscoverySession, DiscoveryStatus, ExecutionRecord, ToolConfigRecord, ToolStatus,
};

#[async_trait]
pub trait ToolConfigStore: Send + Sync {
    async fn insert(&self, record: ToolConfigRecord) -> anyhow::Result<()>;

    /// Conditional update: applies only when the stored row still carries
    /// `expected_updated_at`. Returns false on a lost race.
    async fn update(
        &self,
        record: ToolConfigRecord,
        expected_updated_at: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    async fn get(&self, tenant_id: &str, id: Uuid) -> anyhow::Result<Option<ToolConfigRecord>>;

    async fn get_by_name(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> anyhow::Result<Option<ToolConfigRecord>>;

    async fn list(
        &self,
        tenant_id: &str,
        status: Option<ToolStatus>,
    ) -> anyhow::Result<Vec<ToolConfigRecord>>;

    /// Active tools across tenants, for the periodic health sweep.
    async fn list_active(&self) -> anyhow::Result<Vec<ToolConfigRecord>>;
}

#[async_trait]
pub trait DiscoveryStore: Send + Sync {
    async fn insert(&self, session: DiscoverySession) -> anyhow::Result<()>;

    async fn get(&self, tenant_id: &str, id: Uuid) -> anyhow::Result<Option<DiscoverySession>>;

    /// Write a terminal status exactly once. Late updates against an
    /// already-terminal session are discarded (returns false).
    async fn complete(
        &self,
        id: Uuid,
        status: DiscoveryStatus,
        discovered: Vec<meshgate_types::DiscoveredSpec>,
        selected_url: Option<String>,
        error: Option<String>,
    ) -> anyhow::Result<bool>;

    /// `success | partial → confirmed`; anything else returns false.
    async fn mark_confirmed(&self, tenant_id: &str, id: Uuid) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn insert(&self, record: ExecutionRecord) -> anyhow::Result<()>;

    async fn update(&self, record: ExecutionRecord) -> anyhow::Result<()>;

    async fn get(&self, tenant_id: &str, id: Uuid) -> anyhow::Result<Option<ExecutionRecord>>;

    async fn list_for_tool(
        &self,
        tenant_id: &str,
        tool_config_id: Uuid,
        limit: usize,
    ) -> anyhow::Result<Vec<ExecutionRecord>>;
}

/// Initialized store collection.
pub struct InitializedStores {
    pub tools: Arc<dyn ToolConfigStore>,
    pub discovery: Arc<dyn DiscoveryStore>,
    pub executions: Arc<dyn ExecutionStore>,
}

impl InitializedStores {
    pub fn in_memory() -> Self {
        Self {
            tools: Arc::new(InMemoryToolConfigStore::new()),
            discovery: Arc::new(InMemoryDiscoveryStore::new()),
            executions: Arc::new(InMemoryExecutionStore::new()),
        }
    }
}
