//! Resource and prompt providers backing `resources/*` and `prompts/*`.

use async_trait::async_trait;
use serde_json::Value;

use meshgate_types::{
    GatewayError, PromptArgument, PromptDescriptor, PromptMessage, ResourceContents,
    ResourceDescriptor, ToolContent,
};

#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn list_resources(&self, tenant_id: &str) -> Result<Vec<ResourceDescriptor>, GatewayError>;
    async fn read_resource(
        &self,
        tenant_id: &str,
        uri: &str,
    ) -> Result<ResourceContents, GatewayError>;
    async fn list_prompts(&self, tenant_id: &str) -> Result<Vec<PromptDescriptor>, GatewayError>;
    async fn get_prompt(
        &self,
        tenant_id: &str,
        name: &str,
        arguments: &Value,
    ) -> Result<Vec<PromptMessage>, GatewayError>;
}

const USAGE_URI: &str = "meshgate://docs/usage";

/// Built-in provider: gateway usage documentation and a tool-selection
/// prompt.
pub struct StaticResourceProvider;

#[async_trait]
impl ResourceProvider for StaticResourceProvider {
    async fn list_resources(
        &self,
        _tenant_id: &str,
    ) -> Result<Vec<ResourceDescriptor>, GatewayError> {
        Ok(vec![ResourceDescriptor {
            uri: USAGE_URI.to_string(),
            name: "Gateway usage".to_string(),
            description: Some("How to discover and invoke dynamic tools".to_string()),
            mime_type: Some("text/markdown".to_string()),
        }])
    }

    async fn read_resource(
        &self,
        _tenant_id: &str,
        uri: &str,
    ) -> Result<ResourceContents, GatewayError> {
        if uri != USAGE_URI {
            return Err(GatewayError::ToolNotFound(format!("resource {uri}")));
        }
        Ok(ResourceContents {
            uri: USAGE_URI.to_string(),
            mime_type: Some("text/markdown".to_string()),
            text: concat!(
                "# Meshgate\n\n",
                "Call `tools/list` to see built-in protocol tools and your ",
                "tenant's registered HTTP tools. Invoke a dynamic tool with ",
                "`tools/call` using `<tool>.<action>`; the action defaults ",
                "to `execute` when omitted.\n",
            )
            .to_string(),
        })
    }

    async fn list_prompts(&self, _tenant_id: &str) -> Result<Vec<PromptDescriptor>, GatewayError> {
        Ok(vec![PromptDescriptor {
            name: "select_tool".to_string(),
            description: Some("Guidance for choosing a registered tool".to_string()),
            arguments: vec![PromptArgument {
                name: "goal".to_string(),
                description: Some("What the agent is trying to accomplish".to_string()),
                required: true,
            }],
        }])
    }

    async fn get_prompt(
        &self,
        _tenant_id: &str,
        name: &str,
        arguments: &Value,
    ) -> Result<Vec<PromptMessage>, GatewayError> {
        if name != "select_tool" {
            return Err(GatewayError::ToolNotFound(format!("prompt {name}")));
        }
        let goal = arguments
            .get("goal")
            .and_then(Value::as_str)
            .unwrap_or("the task at hand");
        Ok(vec![PromptMessage {
            role: "user".to_string(),
            content: ToolContent::Text {
                text: format!(
                    "List the available tools and pick the one operation best \
                     suited to: {goal}. Prefer read operations when exploring."
                ),
            },
        }])
    }
}
