//! Contract differ.
//!
//! Classifies every operation of two contract versions as new, modified,
//! removed or unchanged. A change of base address is a global change: every
//! operation that survives into the new version is re-validated.

use crate::contract::{ContractDocument, OperationId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Classification of operations between two contract versions.
///
/// The four sets are pairwise disjoint and together cover every operation id
/// of both documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub new: BTreeSet<OperationId>,
    pub modified: BTreeSet<OperationId>,
    pub removed: BTreeSet<OperationId>,
    pub unchanged: BTreeSet<OperationId>,
    pub global_change: bool,
}

/// Counts for logs and events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub new: usize,
    pub modified: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub global_change: bool,
}

impl DiffResult {
    /// Whether anything requires regeneration or removal.
    pub fn has_changes(&self) -> bool {
        self.global_change
            || !self.new.is_empty()
            || !self.modified.is_empty()
            || !self.removed.is_empty()
    }

    /// Operations that need fresh tests, in classification order.
    pub fn changed(&self) -> Vec<&OperationId> {
        self.new.union(&self.modified).collect()
    }

    pub fn needs_regeneration(&self, id: &OperationId) -> bool {
        self.new.contains(id) || self.modified.contains(id)
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            new: self.new.len(),
            modified: self.modified.len(),
            removed: self.removed.len(),
            unchanged: self.unchanged.len(),
            global_change: self.global_change,
        }
    }
}

impl std::fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} new, {} modified, {} removed, {} unchanged{}",
            self.new,
            self.modified,
            self.removed,
            self.unchanged,
            if self.global_change {
                " (global change)"
            } else {
                ""
            }
        )
    }
}

/// Compare `previous` (if any) against `current`.
pub fn diff_contracts(previous: Option<&ContractDocument>, current: &ContractDocument) -> DiffResult {
    let Some(previous) = previous else {
        return DiffResult {
            new: current.operation_ids().cloned().collect(),
            ..Default::default()
        };
    };

    let mut diff = DiffResult {
        global_change: previous.base_address != current.base_address,
        ..Default::default()
    };

    for (id, operation) in &current.operations {
        match previous.get(id) {
            None => {
                diff.new.insert(id.clone());
            }
            Some(old) if diff.global_change || old.fingerprint() != operation.fingerprint() => {
                tracing::debug!("Operation {} modified", id);
                diff.modified.insert(id.clone());
            }
            Some(_) => {
                diff.unchanged.insert(id.clone());
            }
        }
    }

    diff.removed = previous
        .operation_ids()
        .filter(|id| current.get(id).is_none())
        .cloned()
        .collect();

    if diff.global_change {
        tracing::info!(
            "Base address changed from {:?} to {:?}; re-validating all {} surviving operations",
            previous.base_address,
            current.base_address,
            diff.modified.len()
        );
    }

    diff
}
