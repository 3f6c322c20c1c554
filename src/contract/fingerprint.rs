//! Order-independent operation fingerprints.

use super::Operation;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

/// Schema keywords whose array values are sets rather than sequences.
const UNORDERED_KEYWORDS: &[&str] = &["required", "enum", "type", "allOf", "anyOf", "oneOf"];

/// Stable hash over the shape of one operation.
///
/// Two operations that differ only in key order or in the order of
/// set-like lists hash identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationFingerprint(String);

impl OperationFingerprint {
    pub fn of(operation: &Operation) -> Self {
        let mut parameters: Vec<Value> = operation
            .parameters
            .iter()
            .map(|p| {
                json!({
                    "name": p.name,
                    "in": p.location.as_str(),
                    "required": p.required,
                    "schema": p.schema.as_ref().map(canonicalize),
                })
            })
            .collect();
        parameters.sort_by_key(canonical_key);

        let responses: Map<String, Value> = operation
            .responses
            .iter()
            .map(|(code, schema)| {
                (
                    code.clone(),
                    schema.as_ref().map(canonicalize).unwrap_or(Value::Null),
                )
            })
            .collect();

        let shape = json!({
            "parameters": parameters,
            "request_body": operation.request_body.as_ref().map(canonicalize),
            "responses": responses,
        });

        Self(compute_hash(&canonical_key(&shape)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OperationFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute a SHA256 hash of the content
fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compact JSON rendering of an already canonicalized value.
fn canonical_key(value: &Value) -> String {
    value.to_string()
}

/// Rebuild a schema with set-like arrays sorted.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                let inner = canonicalize(&map[key]);
                let inner = match inner {
                    Value::Array(mut items) if UNORDERED_KEYWORDS.contains(&key.as_str()) => {
                        items.sort_by_key(canonical_key);
                        Value::Array(items)
                    }
                    other => other,
                };
                out.insert(key.clone(), inner);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
