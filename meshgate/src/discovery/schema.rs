//! Per-operation MCP JSON schema synthesis and the operation map the
//! invocation pipeline binds against.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

use super::openapi::{ApiOperation, ApiSpec, ParamLocation};

static PATH_PARAM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}]+)\}").expect("path param regex"));

/// `{name}` placeholders in a path template, in order of appearance.
pub fn path_placeholders(path: &str) -> Vec<String> {
    PATH_PARAM_RE
        .captures_iter(path)
        .map(|c| c[1].to_string())
        .collect()
}

/// Synthesize the MCP input schema for one operation: path and query
/// parameters merge into top-level properties (first writer wins on name
/// collisions), a JSON request body becomes a `body` object.
pub fn operation_input_schema(op: &ApiOperation) -> Value {
    let mut properties = Map::new();
    let mut required: Vec<String> = Vec::new();

    for placeholder in path_placeholders(&op.path) {
        if !properties.contains_key(&placeholder) {
            properties.insert(
                placeholder.clone(),
                json!({"type": "string", "description": format!("[path] [REQUIRED] {placeholder}")}),
            );
        }
        if !required.contains(&placeholder) {
            required.push(placeholder);
        }
    }

    for param in &op.parameters {
        if matches!(param.location, ParamLocation::Path | ParamLocation::Query) {
            let mut schema = match param.schema.as_object() {
                Some(obj) => obj.clone(),
                None => Map::new(),
            };
            schema.insert(
                "description".to_string(),
                Value::String(super::enhance::annotate_parameter(param)),
            );
            if !schema.contains_key("type") {
                schema.insert("type".to_string(), Value::String("string".to_string()));
            }
            // Merged once across duplicate declarations.
            properties.entry(param.name.clone()).or_insert(Value::Object(schema));
            if param.required && !required.contains(&param.name) {
                required.push(param.name.clone());
            }
        }
    }

    if let Some(body) = &op.request_body {
        let mut body_schema = match body.as_object() {
            Some(obj) => obj.clone(),
            None => Map::new(),
        };
        body_schema
            .entry("type".to_string())
            .or_insert(Value::String("object".to_string()));
        body_schema.insert(
            "description".to_string(),
            Value::String("JSON request body".to_string()),
        );
        properties.insert("body".to_string(), Value::Object(body_schema));
        let body_required = body
            .get("required")
            .and_then(Value::as_array)
            .map(|r| !r.is_empty())
            .unwrap_or(false);
        if body_required && !required.contains(&"body".to_string()) {
            required.push("body".to_string());
        }
    }

    let mut schema = json!({
        "type": "object",
        "properties": properties,
    });
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    schema
}

/// Binding-time view of one operation.
#[derive(Debug, Clone)]
pub struct OperationSpec {
    pub id: String,
    pub method: String,
    pub path_template: String,
    pub required_params: Vec<String>,
    pub optional_params: Vec<String>,
    pub summary: Option<String>,
}

/// Operation map for one tool, keyed by normalised operation id.
#[derive(Debug, Clone, Default)]
pub struct OperationMap {
    pub operations: HashMap<String, OperationSpec>,
}

impl OperationMap {
    pub fn from_spec(spec: &ApiSpec) -> Self {
        let mut operations = HashMap::new();
        for op in &spec.operations {
            let mut required: Vec<String> = path_placeholders(&op.path);
            let mut optional = Vec::new();
            for param in &op.parameters {
                if param.location == ParamLocation::Header
                    || param.location == ParamLocation::Cookie
                {
                    continue;
                }
                if param.required {
                    if !required.contains(&param.name) {
                        required.push(param.name.clone());
                    }
                } else if !optional.contains(&param.name) {
                    optional.push(param.name.clone());
                }
            }
            operations.insert(
                op.id.clone(),
                OperationSpec {
                    id: op.id.clone(),
                    method: op.method.clone(),
                    path_template: op.path.clone(),
                    required_params: required,
                    optional_params: optional,
                    summary: op.summary.clone(),
                },
            );
        }
        Self { operations }
    }

    pub fn get(&self, operation_id: &str) -> Option<&OperationSpec> {
        self.operations.get(operation_id)
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::openapi::ApiParameter;

    fn operation() -> ApiOperation {
        ApiOperation {
            id: "get_repo".to_string(),
            method: "GET".to_string(),
            path: "/repos/{owner}/{repo}".to_string(),
            summary: Some("Get a repository".to_string()),
            description: None,
            tags: vec![],
            parameters: vec![ApiParameter {
                name: "page".to_string(),
                location: ParamLocation::Query,
                required: false,
                description: Some("Page number".to_string()),
                schema: json!({"type": "integer"}),
            }],
            request_body: None,
            response_description: Some("The repository".to_string()),
            incomplete: false,
        }
    }

    #[test]
    fn placeholders_extracted_in_order() {
        assert_eq!(
            path_placeholders("/repos/{owner}/{repo}/issues/{number}"),
            vec!["owner", "repo", "number"]
        );
        assert!(path_placeholders("/plain/path").is_empty());
    }

    #[test]
    fn schema_includes_path_and_query_params() {
        let schema = operation_input_schema(&operation());
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["owner"].is_object());
        assert!(schema["properties"]["repo"].is_object());
        assert_eq!(schema["properties"]["page"]["type"], "integer");
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(required, vec!["owner", "repo"]);
    }

    #[test]
    fn body_becomes_body_property() {
        let mut op = operation();
        op.method = "POST".to_string();
        op.request_body = Some(json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        }));
        let schema = operation_input_schema(&op);
        assert_eq!(schema["properties"]["body"]["properties"]["name"]["type"], "string");
        assert!(schema["required"]
            .as_array()
            .unwrap()
            .contains(&json!("body")));
    }

    #[test]
    fn operation_map_separates_required_and_optional() {
        let spec = ApiSpec {
            title: None,
            description: None,
            version: None,
            format: meshgate_types::SpecFormat::OpenApi3,
            operations: vec![operation()],
        };
        let map = OperationMap::from_spec(&spec);
        let op = map.get("get_repo").unwrap();
        assert_eq!(op.required_params, vec!["owner", "repo"]);
        assert_eq!(op.optional_params, vec!["page"]);
        assert_eq!(op.method, "GET");
    }
}
