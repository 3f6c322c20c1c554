//! Versioned test artifacts.
//!
//! This module provides:
//! - The on-disk convention for test units ([`UnitSyntax`])
//! - Structural parsing of previous artifacts ([`parser`])
//! - The selective merge of preserved and regenerated units ([`merge`])
//! - A store that numbers artifact versions per contract ([`ArtifactStore`])

pub mod merge;
pub mod parser;

pub use merge::{merge_artifact, GeneratedUnit, MergeOptions, MergeOutput, MergeReport};
pub use parser::{parse_units, ParsedArtifact, UnitParseFailure};

use crate::contract::OperationId;
use crate::snapshot::is_valid_contract_id;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of every annotation line the engine writes itself.
const ANNOTATION_TAG: &str = "[contract-sync]";

/// Keyword of the per-unit ownership marker.
const OPERATION_TAG: &str = "@operation";

/// One named test, attributed to exactly one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestUnit {
    pub name: String,
    pub operation: OperationId,
    /// Source text from the declaration (or its decorators) to the end of the unit.
    pub body: String,
}

/// Source conventions of the generated test suite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitSyntax {
    /// Python `def test_*` functions run by pytest.
    #[default]
    Pytest,
    /// Rust `#[test] fn` functions.
    Rust,
}

impl UnitSyntax {
    pub fn name(&self) -> &'static str {
        match self {
            UnitSyntax::Pytest => "pytest",
            UnitSyntax::Rust => "rust",
        }
    }

    pub fn line_comment(&self) -> &'static str {
        match self {
            UnitSyntax::Pytest => "#",
            UnitSyntax::Rust => "//",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            UnitSyntax::Pytest => "py",
            UnitSyntax::Rust => "rs",
        }
    }

    /// The line that opens a unit owned by `operation`.
    pub fn operation_marker(&self, operation: &OperationId) -> String {
        format!("{} {} {}", self.line_comment(), OPERATION_TAG, operation)
    }

    /// If `line` is an ownership marker, the raw operation text it names.
    pub fn parse_marker<'a>(&self, line: &'a str) -> Option<&'a str> {
        let rest = line.trim().strip_prefix(self.line_comment())?;
        let rest = rest.trim_start().strip_prefix(OPERATION_TAG)?;
        if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
            return None;
        }
        Some(rest.trim())
    }

    /// An engine-owned annotation line.
    pub fn annotation(&self, text: &str) -> String {
        format!("{} {} {}", self.line_comment(), ANNOTATION_TAG, text)
    }

    pub fn is_annotation(&self, line: &str) -> bool {
        line.trim()
            .strip_prefix(self.line_comment())
            .is_some_and(|rest| rest.trim_start().starts_with(ANNOTATION_TAG))
    }

    /// Name declared by a test function line, if `line` declares one.
    pub fn declared_name(&self, line: &str) -> Option<String> {
        let mut rest = line.trim_start();
        match self {
            UnitSyntax::Pytest => {
                rest = rest.strip_prefix("async ").map(str::trim_start).unwrap_or(rest);
                rest = rest.strip_prefix("def ")?;
            }
            UnitSyntax::Rust => {
                rest = rest.strip_prefix("pub ").map(str::trim_start).unwrap_or(rest);
                rest = rest.strip_prefix("async ").map(str::trim_start).unwrap_or(rest);
                rest = rest.strip_prefix("fn ")?;
            }
        }
        let rest = rest.trim_start();
        let name: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        let after = rest[name.len()..].trim_start();
        let opens_signature = after.starts_with('(') || after.starts_with('<');
        (!name.is_empty() && opens_signature).then_some(name)
    }

    /// Assertion pinning the response status to `status`.
    pub fn status_assertion(&self, status: u16) -> String {
        match self {
            UnitSyntax::Pytest => format!("assert response.status_code == {status}"),
            UnitSyntax::Rust => format!("assert_eq!(response.status().as_u16(), {status});"),
        }
    }

    /// Assertion checking that `key` is present instead of indexing it.
    pub fn membership_assertion(&self, key: &str) -> String {
        match self {
            UnitSyntax::Pytest => format!("assert {key:?} in data"),
            UnitSyntax::Rust => format!("assert!(data.get({key:?}).is_some());"),
        }
    }

    /// Stand-in for a fix a person has to write.
    pub fn manual_placeholder(&self, test_name: &str) -> String {
        format!(
            "{} FIXME: {} needs a manual fix; failure did not match a known pattern",
            self.line_comment(),
            test_name
        )
    }
}

impl std::fmt::Display for UnitSyntax {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Errors from the artifact store.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("invalid contract id {0:?}")]
    InvalidContractId(String),
    #[error("artifact version v{version} already exists for {contract_id}")]
    VersionExists { contract_id: String, version: u32 },
    #[error("artifact I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A stored artifact version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub version: u32,
    pub path: PathBuf,
    pub content: String,
}

/// Append-only store of artifact versions, one directory per contract.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    syntax: UnitSyntax,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, syntax: UnitSyntax) -> Self {
        Self {
            dir: dir.into(),
            syntax,
        }
    }

    fn contract_dir(&self, contract_id: &str) -> Result<PathBuf, ArtifactError> {
        if !is_valid_contract_id(contract_id) {
            return Err(ArtifactError::InvalidContractId(contract_id.to_string()));
        }
        Ok(self.dir.join(contract_id))
    }

    /// All retained versions for `contract_id`, ascending.
    pub fn versions(&self, contract_id: &str) -> Result<Vec<(u32, PathBuf)>, ArtifactError> {
        let dir = self.contract_dir(contract_id)?;
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(ArtifactError::Io { path: dir, source }),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ArtifactError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if let Some(version) = parse_version(&path) {
                versions.push((version, path));
            }
        }
        versions.sort_by_key(|(version, _)| *version);
        Ok(versions)
    }

    /// The most recent artifact, if any has been written.
    pub fn latest(&self, contract_id: &str) -> Result<Option<StoredArtifact>, ArtifactError> {
        let Some((version, path)) = self.versions(contract_id)?.pop() else {
            return Ok(None);
        };
        let content = std::fs::read_to_string(&path).map_err(|source| ArtifactError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(Some(StoredArtifact {
            version,
            path,
            content,
        }))
    }

    /// Version number the next write will use.
    pub fn next_version(&self, contract_id: &str) -> Result<u32, ArtifactError> {
        Ok(self
            .versions(contract_id)?
            .last()
            .map(|(version, _)| version + 1)
            .unwrap_or(1))
    }

    /// Write `content` as `version`. Existing versions are never overwritten.
    pub fn write(
        &self,
        contract_id: &str,
        version: u32,
        content: &str,
    ) -> Result<PathBuf, ArtifactError> {
        use std::io::Write;

        let dir = self.contract_dir(contract_id)?;
        std::fs::create_dir_all(&dir).map_err(|source| ArtifactError::Io {
            path: dir.clone(),
            source,
        })?;

        let path = dir.join(format!("v{}.{}", version, self.syntax.file_extension()));
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ArtifactError::VersionExists {
                    contract_id: contract_id.to_string(),
                    version,
                })
            }
            Err(source) => return Err(ArtifactError::Io { path, source }),
        };
        file.write_all(content.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|source| ArtifactError::Io {
                path: path.clone(),
                source,
            })?;

        tracing::info!("Wrote artifact v{} for {} to {}", version, contract_id, path.display());
        Ok(path)
    }

    /// Write `content` as the version after the latest one.
    pub fn write_next(&self, contract_id: &str, content: &str) -> Result<(u32, PathBuf), ArtifactError> {
        let version = self.next_version(contract_id)?;
        let path = self.write(contract_id, version, content)?;
        Ok((version, path))
    }

    pub fn syntax(&self) -> UnitSyntax {
        self.syntax
    }
}

/// `v12.py` -> 12
fn parse_version(path: &Path) -> Option<u32> {
    if !path.is_file() {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let digits = stem.strip_prefix('v')?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
