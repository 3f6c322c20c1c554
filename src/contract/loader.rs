//! Contract loading from OpenAPI 3.x and Swagger 2.0 documents.
//!
//! The loader produces a [`ContractDocument`] in which every local `$ref`
//! has been inlined. Recursive schemas are cut at the point of re-entry so
//! the result is always a finite tree.

use super::{ContractDocument, HttpMethod, Operation, OperationId, ParamLocation, Parameter};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Errors raised while loading a contract document.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read contract {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON contract: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid YAML contract: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported contract document: {0}")]
    Unsupported(String),
    #[error("unresolvable reference {0}")]
    UnresolvedRef(String),
    #[error("remote reference {0} is not supported")]
    RemoteRef(String),
    #[error("invalid operation {id}: {reason}")]
    InvalidOperation { id: String, reason: String },
}

/// Serialization format of a contract document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractFormat {
    Json,
    Yaml,
}

impl ContractFormat {
    /// Pick a format from the file extension, if it has a recognized one.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(ContractFormat::Json),
            "yaml" | "yml" => Some(ContractFormat::Yaml),
            _ => None,
        }
    }

    /// Guess the format from the content: JSON documents open with `{`.
    pub fn sniff(content: &str) -> Self {
        if content.trim_start().starts_with('{') {
            ContractFormat::Json
        } else {
            ContractFormat::Yaml
        }
    }
}

/// Load and dereference the contract at `path`.
pub fn load_contract(path: &Path) -> Result<ContractDocument, LoadError> {
    let content = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let format = ContractFormat::from_path(path).unwrap_or_else(|| ContractFormat::sniff(&content));
    let document = parse_contract(&content, format)?;

    tracing::debug!(
        "Loaded {} operations from {}",
        document.operations.len(),
        path.display()
    );

    Ok(document)
}

/// Parse contract text in the given format.
pub fn parse_contract(content: &str, format: ContractFormat) -> Result<ContractDocument, LoadError> {
    let raw = match format {
        ContractFormat::Json => serde_json::from_str(content)?,
        ContractFormat::Yaml => yaml_to_json(serde_yaml::from_str(content)?)?,
    };
    from_value(&raw)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    OpenApi3,
    Swagger2,
}

/// Build a contract from an already parsed document tree.
pub fn from_value(raw: &Value) -> Result<ContractDocument, LoadError> {
    let dialect = if raw
        .get("openapi")
        .and_then(Value::as_str)
        .is_some_and(|v| v.starts_with('3'))
    {
        Dialect::OpenApi3
    } else if raw.get("swagger").and_then(Value::as_str) == Some("2.0") {
        Dialect::Swagger2
    } else {
        return Err(LoadError::Unsupported(
            "expected an `openapi: 3.x` or `swagger: \"2.0\"` document".to_string(),
        ));
    };

    let resolver = Resolver { root: raw };
    let mut operations = BTreeMap::new();

    if let Some(paths) = raw.get("paths").and_then(Value::as_object) {
        for (path, item) in paths {
            if !path.starts_with('/') || path.contains(char::is_whitespace) {
                return Err(LoadError::InvalidOperation {
                    id: path.clone(),
                    reason: "path template must start with '/' and contain no whitespace"
                        .to_string(),
                });
            }
            let item = resolver.resolve(item)?;
            let shared_params = item
                .get("parameters")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            for method in HttpMethod::all() {
                let key = method.as_str().to_ascii_lowercase();
                let Some(op) = item.get(&key) else {
                    continue;
                };
                let id = OperationId::new(*method, path.clone());
                let operation = build_operation(dialect, &id, &shared_params, op)?;
                operations.insert(id, operation);
            }
        }
    }

    Ok(ContractDocument {
        base_address: base_address(raw, dialect),
        operations,
    })
}

fn base_address(raw: &Value, dialect: Dialect) -> Option<String> {
    match dialect {
        Dialect::OpenApi3 => raw
            .get("servers")
            .and_then(Value::as_array)
            .and_then(|servers| servers.first())
            .and_then(|server| server.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string),
        Dialect::Swagger2 => {
            let base_path = raw.get("basePath").and_then(Value::as_str).unwrap_or("");
            match raw.get("host").and_then(Value::as_str) {
                Some(host) => {
                    let scheme = raw
                        .get("schemes")
                        .and_then(Value::as_array)
                        .and_then(|s| s.first())
                        .and_then(Value::as_str)
                        .unwrap_or("https");
                    Some(format!("{scheme}://{host}{base_path}"))
                }
                None if !base_path.is_empty() => Some(base_path.to_string()),
                None => None,
            }
        }
    }
}

/// Build one operation from its already dereferenced definition.
fn build_operation(
    dialect: Dialect,
    id: &OperationId,
    shared_params: &[Value],
    op: &Value,
) -> Result<Operation, LoadError> {
    // Operation-level parameters override path-level ones with the same (name, in).
    let mut by_key: BTreeMap<(String, String), Value> = BTreeMap::new();
    let own_params = op
        .get("parameters")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for param in shared_params.iter().chain(own_params.iter()) {
        let name = param.get("name").and_then(Value::as_str).unwrap_or_default();
        let location = param.get("in").and_then(Value::as_str).unwrap_or_default();
        if name.is_empty() || location.is_empty() {
            return Err(LoadError::InvalidOperation {
                id: id.to_string(),
                reason: "parameter without `name` or `in`".to_string(),
            });
        }
        by_key.insert((name.to_string(), location.to_string()), param.clone());
    }

    let mut parameters = Vec::new();
    let mut request_body = None;
    let mut form_fields = Map::new();
    let mut form_required = Vec::new();

    for ((name, location), param) in by_key {
        match (dialect, location.as_str()) {
            (Dialect::Swagger2, "body") => {
                request_body = Some(param.get("schema").cloned().unwrap_or_else(|| json!({})));
            }
            (Dialect::Swagger2, "formData") => {
                if param.get("required").and_then(Value::as_bool).unwrap_or(false) {
                    form_required.push(Value::String(name.clone()));
                }
                form_fields.insert(name, swagger2_param_schema(&param));
            }
            _ => {
                let location: ParamLocation = location.parse().map_err(|reason| {
                    LoadError::InvalidOperation {
                        id: id.to_string(),
                        reason,
                    }
                })?;
                let schema = match dialect {
                    Dialect::OpenApi3 => param.get("schema").cloned(),
                    Dialect::Swagger2 => Some(swagger2_param_schema(&param)),
                };
                parameters.push(Parameter {
                    required: location == ParamLocation::Path
                        || param.get("required").and_then(Value::as_bool).unwrap_or(false),
                    name,
                    location,
                    schema,
                });
            }
        }
    }

    if !form_fields.is_empty() {
        request_body = Some(json!({
            "type": "object",
            "properties": form_fields,
            "required": form_required,
        }));
    }

    if dialect == Dialect::OpenApi3 {
        if let Some(body) = op.get("requestBody") {
            request_body = Some(media_schema(body).unwrap_or_else(|| json!({})));
        }
    }

    let mut responses = BTreeMap::new();
    if let Some(map) = op.get("responses").and_then(Value::as_object) {
        for (code, response) in map {
            let schema = match dialect {
                Dialect::OpenApi3 => media_schema(response),
                Dialect::Swagger2 => response.get("schema").cloned(),
            };
            responses.insert(code.clone(), schema);
        }
    }

    Ok(Operation {
        parameters,
        request_body,
        responses,
    })
}

/// Swagger 2 parameters carry their type inline rather than under `schema`.
fn swagger2_param_schema(param: &Value) -> Value {
    const TYPE_KEYS: &[&str] = &["type", "format", "items", "enum", "default", "minimum", "maximum"];
    let mut schema = Map::new();
    if let Some(obj) = param.as_object() {
        for key in TYPE_KEYS {
            if let Some(v) = obj.get(*key) {
                schema.insert((*key).to_string(), v.clone());
            }
        }
    }
    Value::Object(schema)
}

/// Schema of the preferred media type: JSON if offered, otherwise the first one.
fn media_schema(holder: &Value) -> Option<Value> {
    let content = holder.get("content")?.as_object()?;
    let media = content
        .get("application/json")
        .or_else(|| content.values().next())?;
    Some(media.get("schema").cloned().unwrap_or_else(|| json!({})))
}

/// Inlines local references against the document root.
struct Resolver<'a> {
    root: &'a Value,
}

impl Resolver<'_> {
    fn resolve(&self, value: &Value) -> Result<Value, LoadError> {
        let mut stack = Vec::new();
        self.resolve_inner(value, &mut stack)
    }

    fn resolve_inner(&self, value: &Value, stack: &mut Vec<String>) -> Result<Value, LoadError> {
        match value {
            Value::Object(map) => {
                if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
                    if map.get("x-recursive") == Some(&Value::Bool(true)) {
                        return Ok(value.clone());
                    }
                    return self.follow(reference, stack);
                }
                let mut out = Map::new();
                for (key, inner) in map {
                    out.insert(key.clone(), self.resolve_inner(inner, stack)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_inner(item, stack))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    fn follow(&self, reference: &str, stack: &mut Vec<String>) -> Result<Value, LoadError> {
        let Some(pointer) = reference.strip_prefix('#') else {
            return Err(LoadError::RemoteRef(reference.to_string()));
        };
        if stack.iter().any(|seen| seen == reference) {
            return Ok(json!({ "$ref": reference, "x-recursive": true }));
        }
        let target = self
            .root
            .pointer(pointer)
            .ok_or_else(|| LoadError::UnresolvedRef(reference.to_string()))?;

        stack.push(reference.to_string());
        let resolved = self.resolve_inner(target, stack);
        stack.pop();
        resolved
    }
}

/// Convert YAML into JSON, stringifying non-string mapping keys such as
/// unquoted status codes.
fn yaml_to_json(value: serde_yaml::Value) -> Result<Value, LoadError> {
    use serde_yaml::Value as Yaml;

    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                json!(i)
            } else if let Some(u) = n.as_u64() {
                json!(u)
            } else {
                n.as_f64().map(|f| json!(f)).unwrap_or(Value::Null)
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Yaml::Mapping(map) => {
            let mut out = Map::new();
            for (key, inner) in map {
                let key = match key {
                    Yaml::String(s) => s,
                    Yaml::Number(n) => n.to_string(),
                    Yaml::Bool(b) => b.to_string(),
                    other => {
                        return Err(LoadError::Unsupported(format!(
                            "mapping key {other:?} is not a scalar"
                        )))
                    }
                };
                out.insert(key, yaml_to_json(inner)?);
            }
            Value::Object(out)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}
