//! Tool Registry Service: tenant-scoped CRUD over tool configurations,
//! credential encryption at rest, and execution recording. The control plane
//! is the only writer; every read and write is filtered by tenant.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use meshgate_types::{
    sanitize_log_value, validate_base_url, validate_tool_name, CreateToolRequest, ExecutionRecord,
    ExecutionStatus, GatewayError, ToolConfig, ToolConfigRecord, ToolCredential, ToolStatus,
    UpdateToolRequest,
};

use crate::cache::{SchemaCache, ToolListCache};
use crate::crypto::CredentialCipher;
use crate::stores::InitializedStores;

/// Caches the registry invalidates on writes. Owned by the server arena and
/// passed in explicitly.
#[derive(Clone)]
pub struct RegistryCaches {
    pub tool_list: Arc<ToolListCache>,
    pub schema: Arc<SchemaCache>,
}

pub struct ToolRegistry {
    stores: Arc<InitializedStores>,
    cipher: CredentialCipher,
    caches: RegistryCaches,
    /// Decrypted views on the hot path, keyed by `(tenant_id, tool_id)`.
    tool_cache: DashMap<(String, Uuid), ToolConfig>,
}

impl ToolRegistry {
    pub fn new(
        stores: Arc<InitializedStores>,
        cipher: CredentialCipher,
        caches: RegistryCaches,
    ) -> Self {
        Self {
            stores,
            cipher,
            caches,
            tool_cache: DashMap::new(),
        }
    }

    pub fn stores(&self) -> &Arc<InitializedStores> {
        &self.stores
    }

    fn decrypt_record(&self, record: ToolConfigRecord) -> Result<ToolConfig, GatewayError> {
        let credential = match &record.encrypted_credential {
            Some(packaged) => Some(self.cipher.decrypt_credential(&record.tenant_id, packaged)?),
            None => None,
        };
        Ok(ToolConfig {
            id: record.id,
            tenant_id: record.tenant_id,
            name: record.name,
            base_url: record.base_url,
            openapi_url: record.openapi_url,
            documentation_url: record.documentation_url,
            auth_type: record.auth_type,
            credential,
            provider: record.provider,
            config: record.config,
            retry_policy: record.retry_policy,
            health_config: record.health_config,
            status: record.status,
            passthrough: record.passthrough,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    fn invalidate(&self, tenant_id: &str, tool_id: Uuid) {
        self.tool_cache.remove(&(tenant_id.to_string(), tool_id));
        self.caches.tool_list.invalidate(&tenant_id.to_string());
        self.caches.schema.invalidate(&tool_id);
    }

    pub async fn create_tool(
        &self,
        tenant_id: &str,
        request: CreateToolRequest,
    ) -> Result<ToolConfig, GatewayError> {
        validate_tool_name(&request.name)?;
        validate_base_url(&request.base_url)?;

        if self
            .stores
            .tools
            .get_by_name(tenant_id, &request.name)
            .await
            .map_err(|e| GatewayError::Storage(e.to_string()))?
            .is_some()
        {
            return Err(GatewayError::InvalidParams(format!(
                "tool name {:?} already registered",
                sanitize_log_value(&request.name)
            )));
        }

        let encrypted_credential = match &request.credential {
            Some(credential) if !credential.is_empty() => {
                Some(self.cipher.encrypt_credential(tenant_id, credential)?)
            }
            _ => None,
        };

        let now = Utc::now();
        let record = ToolConfigRecord {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            name: request.name,
            base_url: request.base_url,
            openapi_url: request.openapi_url,
            documentation_url: request.documentation_url,
            auth_type: request.auth_type,
            encrypted_credential,
            provider: request.provider,
            config: request.config,
            retry_policy: request.retry_policy.unwrap_or_default(),
            health_config: request.health_config.unwrap_or_default(),
            status: ToolStatus::Active,
            passthrough: request.passthrough,
            created_at: now,
            updated_at: now,
        };

        self.stores
            .tools
            .insert(record.clone())
            .await
            .map_err(|e| GatewayError::Storage(e.to_string()))?;

        self.caches.tool_list.invalidate(&tenant_id.to_string());
        tracing::info!(
            tenant_id,
            tool_id = %record.id,
            name = %sanitize_log_value(&record.name),
            "tool registered"
        );
        self.decrypt_record(record)
    }

    pub async fn get_tool(&self, tenant_id: &str, id: Uuid) -> Result<ToolConfig, GatewayError> {
        let key = (tenant_id.to_string(), id);
        if let Some(cached) = self.tool_cache.get(&key) {
            return Ok(cached.clone());
        }
        let record = self
            .stores
            .tools
            .get(tenant_id, id)
            .await
            .map_err(|e| GatewayError::Storage(e.to_string()))?
            .filter(|r| r.status != ToolStatus::Deleted)
            .ok_or_else(|| GatewayError::ToolNotFound(id.to_string()))?;
        let config = self.decrypt_record(record)?;
        self.tool_cache.insert(key, config.clone());
        Ok(config)
    }

    pub async fn get_tool_by_name(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> Result<ToolConfig, GatewayError> {
        let record = self
            .stores
            .tools
            .get_by_name(tenant_id, name)
            .await
            .map_err(|e| GatewayError::Storage(e.to_string()))?
            .ok_or_else(|| GatewayError::ToolNotFound(sanitize_log_value(name)))?;
        self.decrypt_record(record)
    }

    pub async fn list_tools(
        &self,
        tenant_id: &str,
        status: Option<ToolStatus>,
    ) -> Result<Vec<ToolConfig>, GatewayError> {
        let records = self
            .stores
            .tools
            .list(tenant_id, status)
            .await
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        records
            .into_iter()
            .map(|record| self.decrypt_record(record))
            .collect()
    }

    pub async fn update_tool(
        &self,
        tenant_id: &str,
        id: Uuid,
        request: UpdateToolRequest,
    ) -> Result<ToolConfig, GatewayError> {
        // Conditional update with a bounded retry against concurrent writers.
        for _ in 0..3 {
            let record = self
                .stores
                .tools
                .get(tenant_id, id)
                .await
                .map_err(|e| GatewayError::Storage(e.to_string()))?
                .filter(|r| r.status != ToolStatus::Deleted)
                .ok_or_else(|| GatewayError::ToolNotFound(id.to_string()))?;

            let expected = record.updated_at;
            let mut next = record;

            if let Some(base_url) = &request.base_url {
                validate_base_url(base_url)?;
                next.base_url = base_url.clone();
            }
            if let Some(openapi_url) = &request.openapi_url {
                next.openapi_url = Some(openapi_url.clone());
            }
            if let Some(documentation_url) = &request.documentation_url {
                next.documentation_url = Some(documentation_url.clone());
            }
            if let Some(auth_type) = request.auth_type {
                next.auth_type = auth_type;
            }
            if let Some(credential) = &request.credential {
                next.encrypted_credential = if credential.is_empty() {
                    None
                } else {
                    Some(self.cipher.encrypt_credential(tenant_id, credential)?)
                };
            }
            if let Some(provider) = &request.provider {
                next.provider = Some(provider.clone());
            }
            if let Some(config) = &request.config {
                next.config = config.clone();
            }
            if let Some(retry_policy) = &request.retry_policy {
                next.retry_policy = retry_policy.clone();
            }
            if let Some(health_config) = &request.health_config {
                next.health_config = health_config.clone();
            }
            if let Some(status) = request.status {
                next.status = status;
            }
            if let Some(passthrough) = &request.passthrough {
                next.passthrough = Some(passthrough.clone());
            }
            next.updated_at = Utc::now();

            let applied = self
                .stores
                .tools
                .update(next.clone(), expected)
                .await
                .map_err(|e| GatewayError::Storage(e.to_string()))?;
            if applied {
                self.invalidate(tenant_id, id);
                return self.decrypt_record(next);
            }
        }
        Err(GatewayError::Storage(
            "concurrent updates exhausted retries".to_string(),
        ))
    }

    /// Soft delete; the name becomes reusable immediately.
    pub async fn delete_tool(&self, tenant_id: &str, id: Uuid) -> Result<(), GatewayError> {
        self.update_tool(
            tenant_id,
            id,
            UpdateToolRequest {
                status: Some(ToolStatus::Deleted),
                ..Default::default()
            },
        )
        .await?;
        Ok(())
    }

    pub async fn update_credentials(
        &self,
        tenant_id: &str,
        id: Uuid,
        credential: ToolCredential,
    ) -> Result<(), GatewayError> {
        self.update_tool(
            tenant_id,
            id,
            UpdateToolRequest {
                credential: Some(credential),
                ..Default::default()
            },
        )
        .await?;
        Ok(())
    }

    /// Decrypted active tools across tenants, for the periodic health sweep.
    pub async fn list_active_configs(&self) -> Result<Vec<ToolConfig>, GatewayError> {
        let records = self
            .stores
            .tools
            .list_active()
            .await
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        records
            .into_iter()
            .map(|record| self.decrypt_record(record))
            .collect()
    }

    /// Best-effort observability; failures log and never surface.
    pub async fn record_execution_start(&self, record: ExecutionRecord) {
        if let Err(e) = self.stores.executions.insert(record).await {
            tracing::warn!("failed to insert execution record: {e}");
        }
    }

    pub async fn record_execution_finish(
        &self,
        mut record: ExecutionRecord,
        status: ExecutionStatus,
        result: Option<serde_json::Value>,
        response_time_ms: u64,
        retry_count: u32,
    ) {
        record.status = status;
        record.result = result;
        record.response_time_ms = Some(response_time_ms);
        record.retry_count = retry_count;
        record.completed_at = Some(Utc::now());
        if let Err(e) = self.stores.executions.update(record).await {
            tracing::warn!("failed to update execution record: {e}");
        }
    }
}
