//! Tolerant OpenAPI 3.x / Swagger 2 parsing into a flat operation model.
//! Documents arrive as JSON or YAML; unknown shapes are classified rather
//! than rejected so discovery can report `manual_needed` instead of failing.

use serde_json::{Map, Value};

use meshgate_types::{GatewayError, SpecFormat};

const METHODS: &[&str] = &["get", "post", "put", "patch", "delete", "head", "options"];

/// Reference resolution depth cap; specs with deeper nesting get the
/// unresolved node back.
const MAX_REF_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl ParamLocation {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "path" => Some(ParamLocation::Path),
            "query" => Some(ParamLocation::Query),
            "header" => Some(ParamLocation::Header),
            "cookie" => Some(ParamLocation::Cookie),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamLocation::Path => "path",
            ParamLocation::Query => "query",
            ParamLocation::Header => "header",
            ParamLocation::Cookie => "cookie",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiParameter {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    pub description: Option<String>,
    pub schema: Value,
}

#[derive(Debug, Clone)]
pub struct ApiOperation {
    /// Normalised id; assigned during enhancement, raw id until then.
    pub id: String,
    pub method: String,
    pub path: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub parameters: Vec<ApiParameter>,
    /// Flattened JSON schema of the request body, when one exists.
    pub request_body: Option<Value>,
    /// Description of the 200 response.
    pub response_description: Option<String>,
    /// True when part of the operation failed to resolve.
    pub incomplete: bool,
}

#[derive(Debug, Clone)]
pub struct ApiSpec {
    pub title: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub format: SpecFormat,
    pub operations: Vec<ApiOperation>,
}

impl ApiSpec {
    pub fn incomplete_operations(&self) -> usize {
        self.operations.iter().filter(|op| op.incomplete).count()
    }
}

/// Parse a raw document (JSON or YAML) into an [`ApiSpec`].
pub fn parse_spec(raw: &str) -> Result<ApiSpec, GatewayError> {
    let doc = parse_document(raw)?;
    match classify(&doc) {
        SpecFormat::OpenApi3 => Ok(parse_openapi(&doc, SpecFormat::OpenApi3)),
        SpecFormat::Swagger2 => Ok(parse_openapi(&doc, SpecFormat::Swagger2)),
        format => Ok(ApiSpec {
            title: None,
            description: None,
            version: None,
            format,
            operations: Vec::new(),
        }),
    }
}

/// Decode JSON first, falling back to YAML.
pub fn parse_document(raw: &str) -> Result<Value, GatewayError> {
    if let Ok(doc) = serde_json::from_str::<Value>(raw) {
        return Ok(doc);
    }
    serde_yaml::from_str::<Value>(raw)
        .map_err(|e| GatewayError::DiscoveryFailed(format!("document is neither JSON nor YAML: {e}")))
}

pub fn classify(doc: &Value) -> SpecFormat {
    let Some(obj) = doc.as_object() else {
        return SpecFormat::Unknown;
    };
    if let Some(version) = obj.get("openapi").and_then(Value::as_str) {
        if version.starts_with('3') {
            return SpecFormat::OpenApi3;
        }
    }
    if let Some(version) = obj.get("swagger").and_then(Value::as_str) {
        if version.starts_with('2') {
            return SpecFormat::Swagger2;
        }
    }
    if obj.contains_key("raml") || obj.contains_key("#%RAML") {
        return SpecFormat::Raml;
    }
    if obj.contains_key("paths") || obj.contains_key("endpoints") || obj.contains_key("apis") {
        return SpecFormat::CustomJson;
    }
    SpecFormat::Unknown
}

/// Walk `paths` into a flat operation list. Swagger 2 documents go through
/// the same walk; their parameter shape is normalised in
/// [`parse_parameter`] and body parameters become the request body.
fn parse_openapi(doc: &Value, format: SpecFormat) -> ApiSpec {
    let resolver = Resolver { root: doc };
    let info = doc.get("info").and_then(Value::as_object);
    let mut operations = Vec::new();

    if let Some(paths) = doc.get("paths").and_then(Value::as_object) {
        for (path, item) in paths {
            let Some(item) = item.as_object() else {
                continue;
            };
            // Path-level parameters apply to every operation beneath.
            let shared_params = item
                .get("parameters")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            for method in METHODS {
                let Some(op) = item.get(*method).and_then(Value::as_object) else {
                    continue;
                };
                operations.push(parse_operation(
                    &resolver,
                    path,
                    method,
                    op,
                    &shared_params,
                    format,
                ));
            }
        }
    }

    ApiSpec {
        title: info
            .and_then(|i| i.get("title"))
            .and_then(Value::as_str)
            .map(String::from),
        description: info
            .and_then(|i| i.get("description"))
            .and_then(Value::as_str)
            .map(String::from),
        version: info
            .and_then(|i| i.get("version"))
            .and_then(Value::as_str)
            .map(String::from),
        format,
        operations,
    }
}

fn parse_operation(
    resolver: &Resolver<'_>,
    path: &str,
    method: &str,
    op: &Map<String, Value>,
    shared_params: &[Value],
    format: SpecFormat,
) -> ApiOperation {
    let mut incomplete = false;
    let mut parameters = Vec::new();
    let mut body: Option<Value> = None;

    let own_params = op
        .get("parameters")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for raw in shared_params.iter().chain(own_params.iter()) {
        let resolved = resolver.resolve(raw, 0);
        let Some(obj) = resolved.as_object() else {
            incomplete = true;
            continue;
        };
        // Swagger 2 `in: body` carries the request body schema.
        if obj.get("in").and_then(Value::as_str) == Some("body") {
            let schema = obj.get("schema").cloned().unwrap_or(Value::Null);
            body = Some(resolver.flatten(&schema, 0));
            continue;
        }
        if obj.get("in").and_then(Value::as_str) == Some("formData") {
            // Treated as body fields.
            continue;
        }
        match parse_parameter(resolver, obj) {
            Some(param) => parameters.push(param),
            None => incomplete = true,
        }
    }

    // OpenAPI 3 request body.
    if format == SpecFormat::OpenApi3 {
        if let Some(request_body) = op.get("requestBody") {
            let resolved = resolver.resolve(request_body, 0);
            if let Some(schema) = json_body_schema(&resolved) {
                body = Some(resolver.flatten(&schema, 0));
            } else if resolved.get("content").is_some() {
                // A body exists but is not JSON; the pipeline only binds
                // JSON bodies.
                incomplete = true;
            }
        }
    }

    let response_description = op
        .get("responses")
        .and_then(|r| r.get("200").or_else(|| r.get("201")))
        .map(|r| resolver.resolve(r, 0))
        .and_then(|r| {
            r.get("description")
                .and_then(Value::as_str)
                .map(String::from)
        });

    ApiOperation {
        id: op
            .get("operationId")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_default(),
        method: method.to_uppercase(),
        path: path.to_string(),
        summary: op.get("summary").and_then(Value::as_str).map(String::from),
        description: op
            .get("description")
            .and_then(Value::as_str)
            .map(String::from),
        tags: op
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default(),
        parameters,
        request_body: body,
        response_description,
        incomplete,
    }
}

fn parse_parameter(resolver: &Resolver<'_>, obj: &Map<String, Value>) -> Option<ApiParameter> {
    let name = obj.get("name").and_then(Value::as_str)?.to_string();
    let location = ParamLocation::parse(obj.get("in").and_then(Value::as_str)?)?;
    // Swagger 2 puts `type`/`format`/`enum` directly on the parameter;
    // OpenAPI 3 nests them under `schema`.
    let schema = match obj.get("schema") {
        Some(schema) => resolver.flatten(schema, 0),
        None => {
            let mut inline = Map::new();
            for key in ["type", "format", "enum", "pattern", "items", "default"] {
                if let Some(v) = obj.get(key) {
                    inline.insert(key.to_string(), v.clone());
                }
            }
            Value::Object(inline)
        }
    };
    Some(ApiParameter {
        required: location == ParamLocation::Path
            || obj.get("required").and_then(Value::as_bool).unwrap_or(false),
        name,
        location,
        description: obj
            .get("description")
            .and_then(Value::as_str)
            .map(String::from),
        schema,
    })
}

/// Extract the JSON media-type schema from an OpenAPI 3 requestBody.
fn json_body_schema(request_body: &Value) -> Option<Value> {
    let content = request_body.get("content")?.as_object()?;
    let media = content
        .get("application/json")
        .or_else(|| {
            content
                .iter()
                .find(|(k, _)| k.contains("json"))
                .map(|(_, v)| v)
        })?;
    media.get("schema").cloned()
}

/// `$ref` resolution and composition flattening against the root document.
pub struct Resolver<'a> {
    pub root: &'a Value,
}

impl<'a> Resolver<'a> {
    /// Resolve a node that may be a `{"$ref": "#/..."}` pointer.
    pub fn resolve(&self, node: &Value, depth: usize) -> Value {
        if depth >= MAX_REF_DEPTH {
            return node.clone();
        }
        if let Some(reference) = node.get("$ref").and_then(Value::as_str) {
            if let Some(target) = self.lookup(reference) {
                return self.resolve(&target, depth + 1);
            }
            return Value::Null;
        }
        node.clone()
    }

    fn lookup(&self, reference: &str) -> Option<Value> {
        let pointer = reference.strip_prefix('#')?;
        self.root.pointer(pointer).cloned()
    }

    /// Resolve refs recursively and flatten composition keywords: downstream
    /// consumers reject `oneOf`/`anyOf`/`allOf`, so `oneOf`/`anyOf` collapse
    /// to their first branch and `allOf` merges property sets.
    pub fn flatten(&self, schema: &Value, depth: usize) -> Value {
        if depth >= MAX_REF_DEPTH {
            return schema.clone();
        }
        let resolved = self.resolve(schema, depth);
        let Some(obj) = resolved.as_object() else {
            return resolved;
        };

        for key in ["oneOf", "anyOf"] {
            if let Some(branches) = obj.get(key).and_then(Value::as_array) {
                if let Some(first) = branches.first() {
                    return self.flatten(first, depth + 1);
                }
            }
        }

        if let Some(branches) = obj.get("allOf").and_then(Value::as_array) {
            let mut properties = Map::new();
            let mut required: Vec<Value> = Vec::new();
            let mut merged = Map::new();
            merged.insert("type".to_string(), Value::String("object".to_string()));
            for branch in branches {
                let flat = self.flatten(branch, depth + 1);
                if let Some(props) = flat.get("properties").and_then(Value::as_object) {
                    for (k, v) in props {
                        properties.insert(k.clone(), self.flatten(v, depth + 1));
                    }
                }
                if let Some(req) = flat.get("required").and_then(Value::as_array) {
                    for entry in req {
                        if !required.contains(entry) {
                            required.push(entry.clone());
                        }
                    }
                }
            }
            merged.insert("properties".to_string(), Value::Object(properties));
            if !required.is_empty() {
                merged.insert("required".to_string(), Value::Array(required));
            }
            return Value::Object(merged);
        }

        // Recurse into object properties and array items.
        let mut out = obj.clone();
        if let Some(props) = obj.get("properties").and_then(Value::as_object) {
            let mut flat_props = Map::new();
            for (k, v) in props {
                flat_props.insert(k.clone(), self.flatten(v, depth + 1));
            }
            out.insert("properties".to_string(), Value::Object(flat_props));
        }
        if let Some(items) = obj.get("items") {
            out.insert("items".to_string(), self.flatten(items, depth + 1));
        }
        Value::Object(out)
    }
}
