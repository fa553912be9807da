use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use meshgate_types::{
    DiscoveredSpec, DiscoverySession, DiscoveryStatus, ExecutionRecord, ToolConfigRecord,
    ToolStatus,
};

use super::{DiscoveryStore, ExecutionStore, ToolConfigStore};

#[derive(Default)]
pub struct InMemoryToolConfigStore {
    rows: DashMap<Uuid, ToolConfigRecord>,
}

impl InMemoryToolConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ToolConfigStore for InMemoryToolConfigStore {
    async fn insert(&self, record: ToolConfigRecord) -> anyhow::Result<()> {
        self.rows.insert(record.id, record);
        Ok(())
    }

    async fn update(
        &self,
        record: ToolConfigRecord,
        expected_updated_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        match self.rows.entry(record.id) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if entry.get().updated_at != expected_updated_at {
                    return Ok(false);
                }
                entry.insert(record);
                Ok(true)
            }
            dashmap::mapref::entry::Entry::Vacant(_) => Ok(false),
        }
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> anyhow::Result<Option<ToolConfigRecord>> {
        Ok(self
            .rows
            .get(&id)
            .filter(|row| row.tenant_id == tenant_id)
            .map(|row| row.clone()))
    }

    async fn get_by_name(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> anyhow::Result<Option<ToolConfigRecord>> {
        Ok(self
            .rows
            .iter()
            .find(|row| {
                row.tenant_id == tenant_id
                    && row.name == name
                    && row.status != ToolStatus::Deleted
            })
            .map(|row| row.clone()))
    }

    async fn list(
        &self,
        tenant_id: &str,
        status: Option<ToolStatus>,
    ) -> anyhow::Result<Vec<ToolConfigRecord>> {
        let mut rows: Vec<ToolConfigRecord> = self
            .rows
            .iter()
            .filter(|row| row.tenant_id == tenant_id)
            .filter(|row| match status {
                Some(wanted) => row.status == wanted,
                None => row.status != ToolStatus::Deleted,
            })
            .map(|row| row.clone())
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn list_active(&self) -> anyhow::Result<Vec<ToolConfigRecord>> {
        let mut rows: Vec<ToolConfigRecord> = self
            .rows
            .iter()
            .filter(|row| row.status == ToolStatus::Active)
            .map(|row| row.clone())
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }
}

#[derive(Default)]
pub struct InMemoryDiscoveryStore {
    rows: DashMap<Uuid, DiscoverySession>,
}

impl InMemoryDiscoveryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DiscoveryStore for InMemoryDiscoveryStore {
    async fn insert(&self, session: DiscoverySession) -> anyhow::Result<()> {
        self.rows.insert(session.id, session);
        Ok(())
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> anyhow::Result<Option<DiscoverySession>> {
        Ok(self
            .rows
            .get(&id)
            .filter(|row| row.tenant_id == tenant_id)
            .map(|row| row.clone()))
    }

    async fn complete(
        &self,
        id: Uuid,
        status: DiscoveryStatus,
        discovered: Vec<DiscoveredSpec>,
        selected_url: Option<String>,
        error: Option<String>,
    ) -> anyhow::Result<bool> {
        let Some(mut row) = self.rows.get_mut(&id) else {
            return Ok(false);
        };
        if row.status.is_terminal() {
            return Ok(false);
        }
        row.status = status;
        row.discovered_urls = discovered;
        row.selected_url = selected_url;
        row.error = error;
        Ok(true)
    }

    async fn mark_confirmed(&self, tenant_id: &str, id: Uuid) -> anyhow::Result<bool> {
        let Some(mut row) = self.rows.get_mut(&id) else {
            return Ok(false);
        };
        if row.tenant_id != tenant_id || !row.status.can_confirm() {
            return Ok(false);
        }
        row.status = DiscoveryStatus::Confirmed;
        Ok(true)
    }
}

#[derive(Default)]
pub struct InMemoryExecutionStore {
    rows: DashMap<Uuid, ExecutionRecord>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn insert(&self, record: ExecutionRecord) -> anyhow::Result<()> {
        self.rows.insert(record.id, record);
        Ok(())
    }

    async fn update(&self, record: ExecutionRecord) -> anyhow::Result<()> {
        self.rows.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> anyhow::Result<Option<ExecutionRecord>> {
        Ok(self
            .rows
            .get(&id)
            .filter(|row| row.tenant_id == tenant_id)
            .map(|row| row.clone()))
    }

    async fn list_for_tool(
        &self,
        tenant_id: &str,
        tool_config_id: Uuid,
        limit: usize,
    ) -> anyhow::Result<Vec<ExecutionRecord>> {
        let mut rows: Vec<ExecutionRecord> = self
            .rows
            .iter()
            .filter(|row| row.tenant_id == tenant_id && row.tool_config_id == tool_config_id)
            .map(|row| row.clone())
            .collect();
        rows.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        rows.truncate(limit);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshgate_types::{AuthKind, HealthConfig, RetryPolicy};
    use std::collections::HashMap;

    fn record(tenant: &str, name: &str) -> ToolConfigRecord {
        let now = Utc::now();
        ToolConfigRecord {
            id: Uuid::new_v4(),
            tenant_id: tenant.to_string(),
            name: name.to_string(),
            base_url: "https://api.example.com".to_string(),
            openapi_url: None,
            documentation_url: None,
            auth_type: AuthKind::None,
            encrypted_credential: None,
            provider: None,
            config: HashMap::new(),
            retry_policy: RetryPolicy::default(),
            health_config: HealthConfig::default(),
            status: ToolStatus::Active,
            passthrough: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn get_is_tenant_scoped() {
        let store = InMemoryToolConfigStore::new();
        let row = record("tenant-a", "tool-a");
        let id = row.id;
        store.insert(row).await.unwrap();

        assert!(store.get("tenant-a", id).await.unwrap().is_some());
        assert!(store.get("tenant-b", id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conditional_update_detects_races() {
        let store = InMemoryToolConfigStore::new();
        let row = record("tenant-a", "tool-a");
        let stale = row.updated_at;
        store.insert(row.clone()).await.unwrap();

        let mut fresh = row.clone();
        fresh.updated_at = Utc::now();
        assert!(store.update(fresh.clone(), stale).await.unwrap());

        let mut conflicting = row;
        conflicting.updated_at = Utc::now();
        assert!(!store.update(conflicting, stale).await.unwrap());
    }

    #[tokio::test]
    async fn deleted_rows_hidden_from_name_lookup() {
        let store = InMemoryToolConfigStore::new();
        let mut row = record("tenant-a", "tool-a");
        row.status = ToolStatus::Deleted;
        store.insert(row).await.unwrap();

        assert!(store
            .get_by_name("tenant-a", "tool-a")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn discovery_terminal_state_written_once() {
        let store = InMemoryDiscoveryStore::new();
        let session = DiscoverySession {
            id: Uuid::new_v4(),
            tenant_id: "tenant-a".to_string(),
            base_url: "https://api.example.com".to_string(),
            status: DiscoveryStatus::InProgress,
            discovered_urls: vec![],
            selected_url: None,
            error: None,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::seconds(60),
        };
        let id = session.id;
        store.insert(session).await.unwrap();

        assert!(store
            .complete(id, DiscoveryStatus::Success, vec![], None, None)
            .await
            .unwrap());
        // Late update discarded
        assert!(!store
            .complete(id, DiscoveryStatus::Failed, vec![], None, Some("late".into()))
            .await
            .unwrap());
        let row = store.get("tenant-a", id).await.unwrap().unwrap();
        assert_eq!(row.status, DiscoveryStatus::Success);
    }
}
