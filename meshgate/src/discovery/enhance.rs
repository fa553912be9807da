//! AI-oriented enhancement of discovered operations: normalised operation
//! ids, annotated parameter and operation descriptions, domain hints,
//! example prompts, and capability inference.

use serde_json::Value;
use std::collections::HashMap;

use meshgate_types::{McpToolView, ToolConfig};

use super::grouping::{group_operations, GroupingStrategy};
use super::openapi::{ApiOperation, ApiParameter, ApiSpec};
use super::schema::operation_input_schema;

const MAX_OPERATION_ID_LEN: usize = 60;
const MAX_ENUM_CHOICES: usize = 10;
const MAX_PATTERN_LEN: usize = 50;

/// Derive a semantic verb prefix from method + path shape.
fn verb_prefix(method: &str, path: &str) -> &'static str {
    let lower = path.to_lowercase();
    match method {
        "GET" => {
            if path.trim_end_matches('/').ends_with('}') {
                "get"
            } else {
                "list"
            }
        }
        "POST" => {
            if lower.contains("search") || lower.contains("query") {
                "search"
            } else if lower.contains("execute") || lower.contains("run") {
                "execute"
            } else {
                "create"
            }
        }
        "PUT" => "update",
        "PATCH" => "patch",
        "DELETE" => "delete",
        _ => "call",
    }
}

fn snake_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_lower = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() {
                if prev_lower {
                    out.push('_');
                }
                out.push(c.to_ascii_lowercase());
                prev_lower = false;
            } else {
                out.push(c);
                prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            }
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
            prev_lower = false;
        }
    }
    out.trim_matches('_').to_string()
}

/// Normalise an operation id: snake_case, verb-prefixed, capped at 60
/// characters.
pub fn normalize_operation_id(op: &ApiOperation) -> String {
    let base = if op.id.is_empty() {
        // Build from the path: `/repos/{owner}/{repo}` → `repos_by_id`.
        let segments: Vec<&str> = op
            .path
            .split('/')
            .filter(|s| !s.is_empty() && !s.starts_with('{'))
            .collect();
        let by_id = op.path.trim_end_matches('/').ends_with('}');
        let mut name = segments.join("_");
        if by_id && op.method == "GET" {
            name.push_str("_by_id");
        }
        name
    } else {
        snake_case(&op.id)
    };

    let prefix = verb_prefix(&op.method, &op.path);
    let mut id = if base.starts_with(prefix) {
        base
    } else {
        format!("{prefix}_{base}")
    };
    if id.len() > MAX_OPERATION_ID_LEN {
        id.truncate(MAX_OPERATION_ID_LEN);
        let trimmed = id.trim_end_matches('_').len();
        id.truncate(trimmed);
    }
    id
}

/// Assign normalised ids, deduplicating collisions with a monotonic numeric
/// suffix in sorted-operation order so the result is deterministic.
pub fn assign_operation_ids(operations: &mut [ApiOperation]) {
    let mut order: Vec<usize> = (0..operations.len()).collect();
    order.sort_by(|&a, &b| {
        (&operations[a].path, &operations[a].method)
            .cmp(&(&operations[b].path, &operations[b].method))
    });

    let mut seen: HashMap<String, u32> = HashMap::new();
    for index in order {
        let id = normalize_operation_id(&operations[index]);
        let id = match seen.get_mut(&id) {
            Some(count) => {
                *count += 1;
                format!("{id}_{count}")
            }
            None => {
                seen.insert(id.clone(), 1);
                id
            }
        };
        operations[index].id = id;
    }
}

/// Parameter description annotated with location, requiredness, enum
/// choices, format, and pattern.
pub fn annotate_parameter(param: &ApiParameter) -> String {
    let mut parts = vec![
        format!("[{}]", param.location.as_str()),
        if param.required {
            "[REQUIRED]".to_string()
        } else {
            "[OPTIONAL]".to_string()
        },
    ];
    if let Some(description) = &param.description {
        parts.push(description.clone());
    }
    if let Some(choices) = param.schema.get("enum").and_then(Value::as_array) {
        if !choices.is_empty() && choices.len() <= MAX_ENUM_CHOICES {
            let rendered: Vec<String> = choices
                .iter()
                .map(|c| match c {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            parts.push(format!("Choices: {}", rendered.join(", ")));
        }
    }
    if let Some(format) = param.schema.get("format").and_then(Value::as_str) {
        parts.push(format!("Format: {format}"));
    }
    if let Some(pattern) = param.schema.get("pattern").and_then(Value::as_str) {
        if pattern.len() <= MAX_PATTERN_LEN {
            parts.push(format!("Pattern: {pattern}"));
        }
    }
    parts.join(" ")
}

/// Operation description composed of summary, parameter lists, and the 200
/// response description.
pub fn compose_operation_description(op: &ApiOperation) -> String {
    let mut out = op
        .summary
        .clone()
        .or_else(|| op.description.clone())
        .unwrap_or_else(|| format!("{} {}", op.method, op.path));

    let required: Vec<&str> = op
        .parameters
        .iter()
        .filter(|p| p.required)
        .map(|p| p.name.as_str())
        .collect();
    let optional: Vec<&str> = op
        .parameters
        .iter()
        .filter(|p| !p.required)
        .map(|p| p.name.as_str())
        .collect();
    if !required.is_empty() {
        out.push_str(&format!(" Required: {}.", required.join(", ")));
    }
    if !optional.is_empty() {
        out.push_str(&format!(" Optional: {}.", optional.join(", ")));
    }
    if let Some(response) = &op.response_description {
        out.push_str(&format!(" Returns: {response}."));
    }
    out
}

struct DomainProfile {
    keys: &'static [&'static str],
    terminology: &'static str,
    best_practice: &'static str,
    capabilities: &'static [&'static str],
    examples: &'static [&'static str],
}

/// Curated domain knowledge matched by case-insensitive substring on the
/// tool name.
const DOMAIN_PROFILES: &[DomainProfile] = &[
    DomainProfile {
        keys: &["github"],
        terminology: "Repositories, issues, pull requests, workflows, releases",
        best_practice: "Prefer narrow queries with owner/repo; paginate with per_page and page",
        capabilities: &[
            "source_control",
            "issue_tracking",
            "ci_cd",
            "code_review",
        ],
        examples: &[
            "List the open pull requests for octo/hello",
            "Get the latest release of octo/hello",
        ],
    },
    DomainProfile {
        keys: &["snyk"],
        terminology: "Projects, issues, vulnerabilities, severities, remediation",
        best_practice: "Filter by severity and project to keep result sets reviewable",
        capabilities: &["security_scanning", "vulnerability_management"],
        examples: &[
            "List high severity vulnerabilities for the payments project",
            "Get remediation advice for issue SNYK-123",
        ],
    },
    DomainProfile {
        keys: &["jira"],
        terminology: "Issues, epics, sprints, boards, JQL",
        best_practice: "Use JQL for searches; reference issues by key (PROJ-42)",
        capabilities: &["issue_tracking", "project_management", "agile_planning"],
        examples: &[
            "Search for open bugs assigned to me in project PAY",
            "Transition PAY-17 to Done",
        ],
    },
    DomainProfile {
        keys: &["harness"],
        terminology: "Pipelines, stages, services, environments, deployments",
        best_practice: "Scope queries to an org and project identifier",
        capabilities: &["ci_cd", "deployment_automation"],
        examples: &[
            "List recent pipeline executions for the payments service",
            "Get the status of the latest production deployment",
        ],
    },
    DomainProfile {
        keys: &["slack"],
        terminology: "Channels, messages, threads, users",
        best_practice: "Address channels by id; keep message payloads small",
        capabilities: &["messaging", "notifications"],
        examples: &["Post a deployment summary to #releases"],
    },
    DomainProfile {
        keys: &["pagerduty", "opsgenie"],
        terminology: "Incidents, services, escalation policies, on-call schedules",
        best_practice: "Resolve service ids first; acknowledge before resolving",
        capabilities: &["incident_management", "alerting"],
        examples: &["List the open incidents for the checkout service"],
    },
];

fn domain_profile(tool_name: &str) -> Option<&'static DomainProfile> {
    let lower = tool_name.to_lowercase();
    DOMAIN_PROFILES
        .iter()
        .find(|profile| profile.keys.iter().any(|key| lower.contains(key)))
}

/// Tool-level hints: authentication, rate limiting, and domain vocabulary.
pub fn domain_hints(config: &ToolConfig) -> HashMap<String, String> {
    let mut hints = HashMap::new();
    let auth_hint = match config.auth_type {
        meshgate_types::AuthKind::None => "No authentication required",
        meshgate_types::AuthKind::ApiKey => "Authenticated with a service API key",
        meshgate_types::AuthKind::Bearer => "Authenticated with a bearer token",
        meshgate_types::AuthKind::Basic => "Authenticated with HTTP basic credentials",
        meshgate_types::AuthKind::OAuth2 => "Authenticated with an OAuth2 access token",
        meshgate_types::AuthKind::Custom => "Authenticated with a provider-specific scheme",
    };
    hints.insert("authentication".to_string(), auth_hint.to_string());
    hints.insert(
        "rate_limits".to_string(),
        "Upstream rate limits apply; 429 responses are retried automatically".to_string(),
    );
    if let Some(profile) = domain_profile(&config.name) {
        hints.insert("terminology".to_string(), profile.terminology.to_string());
        hints.insert(
            "best_practices".to_string(),
            profile.best_practice.to_string(),
        );
    }
    hints
}

/// Example prompts: curated per domain, otherwise derived from the first GET
/// operation's summary.
pub fn example_prompts(config: &ToolConfig, operations: &[ApiOperation]) -> Vec<String> {
    if let Some(profile) = domain_profile(&config.name) {
        return profile.examples.iter().map(|s| s.to_string()).collect();
    }
    operations
        .iter()
        .find(|op| op.method == "GET")
        .and_then(|op| op.summary.clone())
        .map(|summary| vec![format!("{} using {}", summary, config.name)])
        .unwrap_or_default()
}

/// Capabilities inferred from verb/path patterns, with curated sets for
/// known domains.
pub fn infer_capabilities(config: &ToolConfig, operations: &[ApiOperation]) -> Vec<String> {
    let mut capabilities: Vec<String> = Vec::new();
    if let Some(profile) = domain_profile(&config.name) {
        capabilities.extend(profile.capabilities.iter().map(|s| s.to_string()));
    }

    let mut push = |cap: &str| {
        if !capabilities.iter().any(|c| c == cap) {
            capabilities.push(cap.to_string());
        }
    };
    if operations.iter().any(|op| op.method == "GET") {
        push("read");
    }
    if operations.iter().any(|op| {
        op.method == "POST"
            && !op.path.to_lowercase().contains("search")
            && !op.path.to_lowercase().contains("query")
    }) {
        push("create");
    }
    if operations
        .iter()
        .any(|op| op.method == "PUT" || op.method == "PATCH")
    {
        push("update");
    }
    if operations.iter().any(|op| op.method == "DELETE") {
        push("delete");
    }
    if operations.iter().any(|op| {
        let lower = op.path.to_lowercase();
        lower.contains("search") || lower.contains("query")
    }) {
        push("search");
    }
    capabilities
}

/// Build the AI-enhanced MCP view of a tool from its parsed spec.
pub fn enhanced_tool_view(
    config: &ToolConfig,
    spec: &ApiSpec,
    max_operations_per_group: usize,
) -> McpToolView {
    let mut operations = spec.operations.clone();
    assign_operation_ids(&mut operations);

    let groups = group_operations(
        &operations,
        GroupingStrategy::default(),
        max_operations_per_group,
    );

    let mut action_enum: Vec<String> = Vec::new();
    let mut action_docs: Vec<String> = Vec::new();
    for op in &operations {
        action_enum.push(op.id.clone());
        action_docs.push(format!("{}: {}", op.id, compose_operation_description(op)));
    }

    // Per-operation parameter schemas, keyed by action id.
    let mut parameter_schemas = serde_json::Map::new();
    for op in &operations {
        parameter_schemas.insert(op.id.clone(), operation_input_schema(op));
    }

    let input_schema = serde_json::json!({
        "type": "object",
        "properties": {
            "action": {
                "type": "string",
                "enum": action_enum,
                "description": format!(
                    "Operation to invoke. {}",
                    action_docs.join(" | ")
                )
            },
            "parameters": {
                "type": "object",
                "description": "Operation parameters; see the per-action schemas",
                "additionalProperties": true
            }
        },
        "required": ["action"],
        "x-action-schemas": parameter_schemas,
    });

    let description = spec
        .description
        .clone()
        .or_else(|| spec.title.clone())
        .unwrap_or_else(|| format!("HTTP API at {}", config.base_url));

    let mut hints = domain_hints(config);
    if groups.len() > 1 {
        let summary: Vec<String> = groups
            .iter()
            .map(|g| format!("{}({})", g.name, g.operations.len()))
            .collect();
        hints.insert("operation_groups".to_string(), summary.join(", "));
    }

    McpToolView {
        name: config.name.clone(),
        description,
        input_schema,
        operations: operations.iter().map(|op| op.id.clone()).collect(),
        hints,
        examples: example_prompts(config, &operations),
        capabilities: infer_capabilities(config, &operations),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::openapi::ParamLocation;
    use serde_json::json;

    fn op(method: &str, path: &str) -> ApiOperation {
        ApiOperation {
            id: String::new(),
            method: method.to_string(),
            path: path.to_string(),
            summary: None,
            description: None,
            tags: vec![],
            parameters: vec![],
            request_body: None,
            response_description: None,
            incomplete: false,
        }
    }

    #[test]
    fn verb_prefixes_follow_method_and_path() {
        assert_eq!(normalize_operation_id(&op("GET", "/items")), "list_items");
        assert_eq!(
            normalize_operation_id(&op("GET", "/items/{id}")),
            "get_items_by_id"
        );
        assert_eq!(
            normalize_operation_id(&op("POST", "/items")),
            "create_items"
        );
        assert_eq!(
            normalize_operation_id(&op("POST", "/items/search")),
            "search_items_search"
        );
        assert_eq!(
            normalize_operation_id(&op("POST", "/jobs/run")),
            "execute_jobs_run"
        );
        assert_eq!(
            normalize_operation_id(&op("PUT", "/items/{id}")),
            "update_items"
        );
        assert_eq!(
            normalize_operation_id(&op("DELETE", "/items/{id}")),
            "delete_items"
        );
    }

    #[test]
    fn raw_ids_are_snake_cased_and_capped() {
        let mut operation = op("GET", "/repos/{owner}/{repo}");
        operation.id = "ReposGetByOwnerAndRepo".to_string();
        let id = normalize_operation_id(&operation);
        assert_eq!(id, "get_repos_get_by_owner_and_repo");

        operation.id = "x".repeat(100);
        assert!(normalize_operation_id(&operation).len() <= MAX_OPERATION_ID_LEN);
    }

    #[test]
    fn colliding_ids_get_numeric_suffixes() {
        let mut operations = vec![op("GET", "/a/{id}"), op("GET", "/b/{id}")];
        operations[0].id = "fetch".to_string();
        operations[1].id = "fetch".to_string();
        assign_operation_ids(&mut operations);
        let mut ids: Vec<&str> = operations.iter().map(|o| o.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["get_fetch", "get_fetch_2"]);
    }

    #[test]
    fn parameter_annotation_lists_constraints() {
        let param = ApiParameter {
            name: "state".to_string(),
            location: ParamLocation::Query,
            required: true,
            description: Some("Issue state".to_string()),
            schema: json!({"type": "string", "enum": ["open", "closed"], "format": "enum"}),
        };
        let annotated = annotate_parameter(&param);
        assert!(annotated.contains("[query]"));
        assert!(annotated.contains("[REQUIRED]"));
        assert!(annotated.contains("Choices: open, closed"));
    }

    #[test]
    fn long_enums_and_patterns_are_omitted() {
        let param = ApiParameter {
            name: "code".to_string(),
            location: ParamLocation::Query,
            required: false,
            description: None,
            schema: json!({
                "enum": (0..20).collect::<Vec<i32>>(),
                "pattern": "x".repeat(60),
            }),
        };
        let annotated = annotate_parameter(&param);
        assert!(!annotated.contains("Choices"));
        assert!(!annotated.contains("Pattern"));
    }

    fn config(name: &str) -> ToolConfig {
        ToolConfig {
            id: uuid::Uuid::new_v4(),
            tenant_id: "t".to_string(),
            name: name.to_string(),
            base_url: "https://upstream.test".to_string(),
            openapi_url: None,
            documentation_url: None,
            auth_type: meshgate_types::AuthKind::Bearer,
            credential: None,
            provider: None,
            config: Default::default(),
            retry_policy: Default::default(),
            health_config: Default::default(),
            status: meshgate_types::ToolStatus::Active,
            passthrough: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn domain_hints_match_by_substring() {
        let hints = domain_hints(&config("github-ci"));
        assert!(hints.contains_key("terminology"));
        assert!(hints["authentication"].contains("bearer"));

        let hints = domain_hints(&config("internal-api"));
        assert!(!hints.contains_key("terminology"));
        assert!(hints.contains_key("rate_limits"));
    }

    #[test]
    fn capabilities_inferred_from_verbs() {
        let operations = vec![
            op("GET", "/items"),
            op("POST", "/items"),
            op("DELETE", "/items/{id}"),
            op("POST", "/items/search"),
        ];
        let caps = infer_capabilities(&config("internal-api"), &operations);
        assert!(caps.contains(&"read".to_string()));
        assert!(caps.contains(&"create".to_string()));
        assert!(caps.contains(&"delete".to_string()));
        assert!(caps.contains(&"search".to_string()));
        assert!(!caps.contains(&"update".to_string()));
    }

    #[test]
    fn enhanced_view_lists_actions() {
        let spec = ApiSpec {
            title: Some("Repo API".to_string()),
            description: None,
            version: None,
            format: meshgate_types::SpecFormat::OpenApi3,
            operations: vec![op("GET", "/repos/{owner}/{repo}"), op("POST", "/repos")],
        };
        let view = enhanced_tool_view(&config("github-ci"), &spec, 50);
        assert_eq!(view.operations.len(), 2);
        assert!(view
            .input_schema["properties"]["action"]["enum"]
            .as_array()
            .unwrap()
            .iter()
            .any(|v| v == "create_repos"));
        assert!(!view.examples.is_empty());
    }
}
