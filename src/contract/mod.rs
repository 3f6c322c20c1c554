//! API contract model.
//!
//! A [`ContractDocument`] is the fully dereferenced view of an API contract:
//! one [`Operation`] per `(method, path)` pair plus the base address the
//! contract is served from. Shared schema definitions are inlined by the
//! loader, so nothing downstream ever has to follow a reference.

pub mod fingerprint;
pub mod loader;

pub use fingerprint::OperationFingerprint;
pub use loader::{load_contract, parse_contract, ContractFormat, LoadError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

/// HTTP methods an operation can be declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
    Options,
    Head,
    Patch,
    Trace,
}

impl HttpMethod {
    /// All methods, in the order path items list them.
    pub fn all() -> &'static [HttpMethod] {
        &[
            HttpMethod::Get,
            HttpMethod::Put,
            HttpMethod::Post,
            HttpMethod::Delete,
            HttpMethod::Options,
            HttpMethod::Head,
            HttpMethod::Patch,
            HttpMethod::Trace,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Head => "HEAD",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Trace => "TRACE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HttpMethod::all()
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseIdError::UnknownMethod(s.to_string()))
    }
}

/// Error parsing an operation id from its `"METHOD /path"` form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseIdError {
    #[error("unknown HTTP method: {0:?}")]
    UnknownMethod(String),
    #[error("operation id must look like \"METHOD /path\", got {0:?}")]
    Malformed(String),
}

/// Identity of an operation within a contract.
///
/// Ordered by path first so that all methods of one path sit together.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OperationId {
    pub path: String,
    pub method: HttpMethod,
}

impl OperationId {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
        }
    }

    /// Identifier-safe rendering, e.g. `get_pets_pet_id` for `GET /pets/{petId}`.
    pub fn slug(&self) -> String {
        let mut out = self.method.as_str().to_ascii_lowercase();
        let mut last_underscore = false;
        for c in self.path.chars() {
            if c.is_ascii_alphanumeric() {
                if c.is_ascii_uppercase() && !last_underscore && !out.ends_with('_') {
                    out.push('_');
                }
                out.push(c.to_ascii_lowercase());
                last_underscore = false;
            } else if !last_underscore {
                out.push('_');
                last_underscore = true;
            }
        }
        out.trim_end_matches('_').to_string()
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

impl FromStr for OperationId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (Some(method), Some(path), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ParseIdError::Malformed(s.to_string()));
        };
        if !path.starts_with('/') {
            return Err(ParseIdError::Malformed(s.to_string()));
        }
        Ok(Self::new(method.parse()?, path))
    }
}

impl TryFrom<String> for OperationId {
    type Error = ParseIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OperationId> for String {
    fn from(id: OperationId) -> Self {
        id.to_string()
    }
}

/// Where a parameter is carried in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl ParamLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamLocation::Path => "path",
            ParamLocation::Query => "query",
            ParamLocation::Header => "header",
            ParamLocation::Cookie => "cookie",
        }
    }
}

impl FromStr for ParamLocation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "path" => Ok(ParamLocation::Path),
            "query" => Ok(ParamLocation::Query),
            "header" => Ok(ParamLocation::Header),
            "cookie" => Ok(ParamLocation::Cookie),
            other => Err(format!("unsupported parameter location: {other}")),
        }
    }
}

/// A single operation parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub location: ParamLocation,
    #[serde(default)]
    pub required: bool,
    /// Resolved type schema of the parameter, if the contract declares one.
    #[serde(default)]
    pub schema: Option<Value>,
}

/// Shape of one operation: what goes in and what comes back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub request_body: Option<Value>,
    /// Status code (`"200"`, `"4XX"`, `"default"`) to response schema.
    #[serde(default)]
    pub responses: BTreeMap<String, Option<Value>>,
}

impl Operation {
    pub fn fingerprint(&self) -> OperationFingerprint {
        OperationFingerprint::of(self)
    }
}

/// A loaded, fully dereferenced contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractDocument {
    /// Server / base URL the operations are relative to.
    #[serde(default)]
    pub base_address: Option<String>,
    #[serde(default)]
    pub operations: BTreeMap<OperationId, Operation>,
}

impl ContractDocument {
    pub fn operation_ids(&self) -> impl Iterator<Item = &OperationId> {
        self.operations.keys()
    }

    pub fn get(&self, id: &OperationId) -> Option<&Operation> {
        self.operations.get(id)
    }

    /// Drop every operation whose path template matches one of `patterns`.
    ///
    /// Returns the number of operations removed.
    pub fn exclude_paths(&mut self, patterns: &[String]) -> usize {
        if patterns.is_empty() {
            return 0;
        }
        let before = self.operations.len();
        self.operations.retain(|id, _| {
            !patterns
                .iter()
                .any(|pattern| glob_match::glob_match(pattern, &id.path))
        });
        before - self.operations.len()
    }
}
