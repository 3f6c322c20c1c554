//! Last-seen contract snapshots.
//!
//! One JSON file per contract id holds the contract as of the last
//! successful synchronization. Only the latest snapshot is kept. Saves go
//! through a temporary file in the same directory followed by a rename, so a
//! crash mid-write leaves either the old snapshot or the new one.

use crate::contract::ContractDocument;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Envelope version written by this build.
const FORMAT_VERSION: u32 = 1;

/// Errors the snapshot store cannot absorb locally.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("invalid contract id {0:?}: use letters, digits, '.', '_' or '-'")]
    InvalidContractId(String),
    #[error("snapshot I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result of looking up the previous snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotLoad {
    Found(ContractDocument),
    /// First run for this contract id.
    NotFound,
    /// A snapshot exists but cannot be trusted as a diff baseline.
    Corrupted { reason: String },
}

impl SnapshotLoad {
    /// The previous document, if one was found intact.
    pub fn into_document(self) -> Option<ContractDocument> {
        match self {
            SnapshotLoad::Found(doc) => Some(doc),
            SnapshotLoad::NotFound | SnapshotLoad::Corrupted { .. } => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u32,
    contract_id: String,
    saved_at: DateTime<Utc>,
    document: ContractDocument,
}

/// File-backed snapshot store.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the snapshot file for `contract_id`.
    pub fn snapshot_path(&self, contract_id: &str) -> Result<PathBuf, SnapshotError> {
        if !is_valid_contract_id(contract_id) {
            return Err(SnapshotError::InvalidContractId(contract_id.to_string()));
        }
        Ok(self.dir.join(format!("{contract_id}.snapshot.json")))
    }

    /// Load the last saved contract for `contract_id`.
    pub fn load(&self, contract_id: &str) -> Result<SnapshotLoad, SnapshotError> {
        let path = self.snapshot_path(contract_id)?;

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No snapshot for {} at {}", contract_id, path.display());
                return Ok(SnapshotLoad::NotFound);
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Ok(corrupted(contract_id, format!("not valid UTF-8: {e}")));
            }
            Err(source) => return Err(SnapshotError::Io { path, source }),
        };

        let envelope: SnapshotEnvelope = match serde_json::from_str(&content) {
            Ok(envelope) => envelope,
            Err(e) => return Ok(corrupted(contract_id, format!("unparseable snapshot: {e}"))),
        };

        if envelope.format_version != FORMAT_VERSION {
            return Ok(corrupted(
                contract_id,
                format!("unknown format version {}", envelope.format_version),
            ));
        }
        if envelope.contract_id != contract_id {
            return Ok(corrupted(
                contract_id,
                format!("snapshot belongs to contract {:?}", envelope.contract_id),
            ));
        }

        tracing::debug!(
            "Loaded snapshot for {} saved at {} ({} operations)",
            contract_id,
            envelope.saved_at.to_rfc3339(),
            envelope.document.operations.len()
        );

        Ok(SnapshotLoad::Found(envelope.document))
    }

    /// Replace the snapshot for `contract_id` atomically.
    pub fn save(&self, contract_id: &str, document: &ContractDocument) -> Result<(), SnapshotError> {
        let path = self.snapshot_path(contract_id)?;

        std::fs::create_dir_all(&self.dir).map_err(|source| SnapshotError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let envelope = SnapshotEnvelope {
            format_version: FORMAT_VERSION,
            contract_id: contract_id.to_string(),
            saved_at: Utc::now(),
            document: document.clone(),
        };
        let contents = serde_json::to_vec_pretty(&envelope)?;

        let io_err = |source: std::io::Error| SnapshotError::Io {
            path: path.clone(),
            source,
        };
        let mut temp = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        temp.write_all(&contents).map_err(io_err)?;
        temp.as_file().sync_all().map_err(io_err)?;
        temp.persist(&path).map_err(|e| io_err(e.error))?;

        tracing::debug!("Saved snapshot for {} to {}", contract_id, path.display());
        Ok(())
    }
}

fn corrupted(contract_id: &str, reason: String) -> SnapshotLoad {
    tracing::warn!("Snapshot for {} is corrupted: {}", contract_id, reason);
    SnapshotLoad::Corrupted { reason }
}

/// Contract ids double as file names.
pub fn is_valid_contract_id(contract_id: &str) -> bool {
    !contract_id.is_empty()
        && !contract_id.starts_with('.')
        && contract_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
