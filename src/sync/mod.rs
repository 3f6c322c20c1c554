//! End-to-end synchronization of one contract with its test artifact.
//!
//! A run loads the last snapshot, diffs it against the current contract,
//! asks a [`TestGenerator`] for tests of new and modified operations only,
//! merges them into the latest artifact, writes the next artifact version
//! and finally replaces the snapshot. Nothing is written until every
//! generator call has succeeded, so a failed run is retried in full next
//! time.

use crate::artifact::{merge_artifact, ArtifactStore, GeneratedUnit, MergeOptions, MergeReport};
use crate::config::Config;
use crate::contract::{ContractDocument, Operation, OperationId};
use crate::diff::{diff_contracts, DiffResult};
use crate::events::{EventSink, SyncEvent, TracingSink};
use crate::snapshot::{is_valid_contract_id, SnapshotLoad, SnapshotStore};
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Produces test units for one operation.
pub trait TestGenerator {
    fn generate(&self, id: &OperationId, operation: &Operation) -> Result<Vec<GeneratedUnit>>;
}

impl<F> TestGenerator for F
where
    F: Fn(&OperationId, &Operation) -> Result<Vec<GeneratedUnit>>,
{
    fn generate(&self, id: &OperationId, operation: &Operation) -> Result<Vec<GeneratedUnit>> {
        self(id, operation)
    }
}

/// Serves units produced ahead of time by an external generator.
///
/// The file is a JSON object mapping operation ids (`"GET /pets"`) to lists
/// of `{ "name": ..., "body": ... }`.
#[derive(Debug, Clone, Default)]
pub struct UnitsFileGenerator {
    units: BTreeMap<OperationId, Vec<GeneratedUnit>>,
}

impl UnitsFileGenerator {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read units file {:?}", path))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse units file {:?}", path))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let units = serde_json::from_str(contents)?;
        Ok(Self { units })
    }
}

impl TestGenerator for UnitsFileGenerator {
    fn generate(&self, id: &OperationId, _operation: &Operation) -> Result<Vec<GeneratedUnit>> {
        match self.units.get(id) {
            Some(units) => Ok(units.clone()),
            None => {
                tracing::warn!("Units file has no tests for {}", id);
                Ok(Vec::new())
            }
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The contract did not change and an artifact already exists.
    Skipped { diff: DiffResult },
    Synced {
        version: u32,
        path: PathBuf,
        report: MergeReport,
        diff: DiffResult,
    },
}

impl SyncOutcome {
    pub fn diff(&self) -> &DiffResult {
        match self {
            SyncOutcome::Skipped { diff } | SyncOutcome::Synced { diff, .. } => diff,
        }
    }
}

/// Owns the stores and drives synchronization runs.
pub struct Synchronizer<S: EventSink = TracingSink> {
    snapshots: SnapshotStore,
    artifacts: ArtifactStore,
    exclude_paths: Vec<String>,
    sink: S,
}

impl Synchronizer<TracingSink> {
    pub fn from_config(config: &Config) -> Self {
        Synchronizer::new(
            SnapshotStore::new(config.snapshot_dir()),
            ArtifactStore::new(config.artifact_dir(), config.merge.syntax),
            TracingSink,
        )
        .with_exclude_paths(config.contract.exclude_paths.clone())
    }
}

impl<S: EventSink> Synchronizer<S> {
    pub fn new(snapshots: SnapshotStore, artifacts: ArtifactStore, sink: S) -> Self {
        Self {
            snapshots,
            artifacts,
            exclude_paths: Vec::new(),
            sink,
        }
    }

    pub fn with_exclude_paths(mut self, patterns: Vec<String>) -> Self {
        self.exclude_paths = patterns;
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Diff `current` against the stored snapshot without writing anything.
    pub fn diff(&self, contract_id: &str, current: &ContractDocument) -> Result<DiffResult> {
        check_contract_id(contract_id)?;
        let mut current = current.clone();
        current.exclude_paths(&self.exclude_paths);
        let previous = self.previous(contract_id)?;
        Ok(diff_contracts(previous.as_ref(), &current))
    }

    /// Run one synchronization for `contract_id`.
    pub fn run(
        &mut self,
        contract_id: &str,
        mut current: ContractDocument,
        generator: &dyn TestGenerator,
    ) -> Result<SyncOutcome> {
        check_contract_id(contract_id)?;

        let excluded = current.exclude_paths(&self.exclude_paths);
        if excluded > 0 {
            tracing::debug!("Excluded {} operations from {}", excluded, contract_id);
        }

        let previous = self.previous(contract_id)?;
        let diff = diff_contracts(previous.as_ref(), &current);
        self.sink
            .emit(&SyncEvent::diff_computed(contract_id, diff.summary()));

        let latest = self.artifacts.latest(contract_id)?;
        if !diff.has_changes() && latest.is_some() {
            self.sink.emit(&SyncEvent::SyncSkipped {
                contract_id: contract_id.to_string(),
                reason: "contract unchanged since last run".to_string(),
            });
            return Ok(SyncOutcome::Skipped { diff });
        }

        let mut generated = BTreeMap::new();
        for id in diff.changed() {
            let operation = current
                .get(id)
                .with_context(|| format!("Operation {} missing from current contract", id))?;
            let units = generator
                .generate(id, operation)
                .with_context(|| format!("Test generation failed for {}", id))?;
            tracing::debug!("Generated {} units for {}", units.len(), id);
            generated.insert(id.clone(), units);
        }

        let version = self.artifacts.next_version(contract_id)?;
        let options = MergeOptions {
            syntax: self.artifacts.syntax(),
            contract_id: contract_id.to_string(),
            version,
            preamble: None,
        };
        let output = merge_artifact(
            latest.as_ref().map(|artifact| artifact.content.as_str()),
            &diff,
            &generated,
            &options,
        );

        let path = self.artifacts.write(contract_id, version, &output.text)?;
        self.sink.emit(&SyncEvent::ArtifactWritten {
            contract_id: contract_id.to_string(),
            version,
            path: path.clone(),
            report: output.report,
        });

        self.snapshots.save(contract_id, &current)?;
        self.sink.emit(&SyncEvent::SnapshotSaved {
            contract_id: contract_id.to_string(),
            path: self.snapshots.snapshot_path(contract_id)?,
        });

        Ok(SyncOutcome::Synced {
            version,
            path,
            report: output.report,
            diff,
        })
    }

    fn previous(&self, contract_id: &str) -> Result<Option<ContractDocument>> {
        Ok(match self.snapshots.load(contract_id)? {
            SnapshotLoad::Found(doc) => Some(doc),
            SnapshotLoad::NotFound => {
                tracing::info!("No snapshot for {}; treating every operation as new", contract_id);
                None
            }
            SnapshotLoad::Corrupted { reason } => {
                tracing::warn!(
                    "Snapshot for {} is unusable ({}); regenerating every operation",
                    contract_id,
                    reason
                );
                None
            }
        })
    }
}

fn check_contract_id(contract_id: &str) -> Result<()> {
    if !is_valid_contract_id(contract_id) {
        bail!(
            "Invalid contract id {:?}: use letters, digits, '.', '_' or '-'",
            contract_id
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{parse_units, UnitSyntax};
    use crate::events::MemorySink;
    use serde_json::json;
    use std::cell::RefCell;
    use tempfile::TempDir;

    fn id(s: &str) -> OperationId {
        s.parse().unwrap()
    }

    fn op(status: &str, schema: serde_json::Value) -> Operation {
        Operation {
            responses: [(status.to_string(), Some(schema))].into_iter().collect(),
            ..Default::default()
        }
    }

    fn contract(ops: Vec<(&str, Operation)>) -> ContractDocument {
        ContractDocument {
            base_address: Some("https://api.example.com".to_string()),
            operations: ops.into_iter().map(|(k, v)| (id(k), v)).collect(),
        }
    }

    fn petstore_v1() -> ContractDocument {
        contract(vec![
            ("GET /pets", op("200", json!({"type": "array"}))),
            ("POST /pets", op("201", json!({"type": "object"}))),
            ("DELETE /pets/{id}", op("204", json!(null))),
        ])
    }

    /// v1 with POST modified, DELETE removed and GET /owners added.
    fn petstore_v2() -> ContractDocument {
        contract(vec![
            ("GET /pets", op("200", json!({"type": "array"}))),
            (
                "POST /pets",
                op("201", json!({"type": "object", "required": ["id"]})),
            ),
            ("GET /owners", op("200", json!({"type": "array"}))),
        ])
    }

    fn unit_for(id: &OperationId, tag: &str) -> GeneratedUnit {
        let name = format!("test_{}", id.slug());
        GeneratedUnit {
            body: format!("def {name}(client):\n    # {tag}\n    assert True"),
            name,
        }
    }

    fn synchronizer(temp_dir: &TempDir) -> Synchronizer<MemorySink> {
        Synchronizer::new(
            SnapshotStore::new(temp_dir.path().join("snapshots")),
            ArtifactStore::new(temp_dir.path().join("artifacts"), UnitSyntax::Pytest),
            MemorySink::default(),
        )
    }

    fn tagged(tag: &'static str) -> impl Fn(&OperationId, &Operation) -> Result<Vec<GeneratedUnit>> {
        move |id: &OperationId, _: &Operation| -> Result<Vec<GeneratedUnit>> {
            Ok(vec![unit_for(id, tag)])
        }
    }

    // =========================================================================
    // Run tests
    // =========================================================================

    #[test]
    fn test_first_run_generates_everything() {
        let temp_dir = TempDir::new().unwrap();
        let mut sync = synchronizer(&temp_dir);

        let outcome = sync.run("petstore", petstore_v1(), &tagged("v1")).unwrap();
        let SyncOutcome::Synced {
            version, report, diff, path
        } = outcome
        else {
            panic!("expected a synced outcome");
        };
        assert_eq!(version, 1);
        assert_eq!(diff.new.len(), 3);
        assert_eq!(report.regenerated, 3);
        assert_eq!(report.preserved, 0);
        assert!(path.ends_with("petstore/v1.py"));
        assert!(temp_dir
            .path()
            .join("snapshots/petstore.snapshot.json")
            .exists());
    }

    #[test]
    fn test_unchanged_contract_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let mut sync = synchronizer(&temp_dir);
        sync.run("petstore", petstore_v1(), &tagged("v1")).unwrap();

        let calls = RefCell::new(0);
        let counting = |id: &OperationId, _: &Operation| -> Result<Vec<GeneratedUnit>> {
            *calls.borrow_mut() += 1;
            Ok(vec![unit_for(id, "again")])
        };
        let outcome = sync.run("petstore", petstore_v1(), &counting).unwrap();

        assert!(matches!(outcome, SyncOutcome::Skipped { .. }));
        assert_eq!(outcome.diff().unchanged.len(), 3);
        assert_eq!(*calls.borrow(), 0);
        let versions = ArtifactStore::new(temp_dir.path().join("artifacts"), UnitSyntax::Pytest)
            .versions("petstore")
            .unwrap();
        assert_eq!(versions.len(), 1);
    }

    #[test]
    fn test_selective_regeneration() {
        let temp_dir = TempDir::new().unwrap();
        let mut sync = synchronizer(&temp_dir);
        sync.run("petstore", petstore_v1(), &tagged("v1")).unwrap();

        let seen = RefCell::new(Vec::new());
        let recording = |id: &OperationId, _: &Operation| -> Result<Vec<GeneratedUnit>> {
            seen.borrow_mut().push(id.to_string());
            Ok(vec![unit_for(id, "v2")])
        };
        let outcome = sync.run("petstore", petstore_v2(), &recording).unwrap();

        // Only new and modified operations reach the generator, in id order.
        assert_eq!(*seen.borrow(), vec!["GET /owners", "POST /pets"]);

        let SyncOutcome::Synced { version, report, .. } = outcome else {
            panic!("expected a synced outcome");
        };
        assert_eq!(version, 2);
        assert_eq!(report.preserved, 1);
        assert_eq!(report.regenerated, 2);
        assert_eq!(report.dropped_removed, 1);
        assert_eq!(report.dropped_stale, 1);

        let latest = ArtifactStore::new(temp_dir.path().join("artifacts"), UnitSyntax::Pytest)
            .latest("petstore")
            .unwrap()
            .unwrap();
        let parsed = parse_units(&latest.content, UnitSyntax::Pytest);
        let units: Vec<(String, bool)> = parsed
            .units
            .iter()
            .map(|u| (u.name.clone(), u.body.contains("# v1")))
            .collect();
        assert_eq!(
            units,
            vec![
                ("test_get_pets".to_string(), true),
                ("test_get_owners".to_string(), false),
                ("test_post_pets".to_string(), false),
            ]
        );
        assert!(!latest.content.contains("test_delete_pets_id"));
    }

    #[test]
    fn test_generator_failure_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let mut sync = synchronizer(&temp_dir);
        sync.run("petstore", petstore_v1(), &tagged("v1")).unwrap();

        let failing = |id: &OperationId, _: &Operation| -> Result<Vec<GeneratedUnit>> {
            if id.path == "/owners" {
                bail!("model unavailable");
            }
            Ok(vec![unit_for(id, "v2")])
        };
        let err = sync.run("petstore", petstore_v2(), &failing).unwrap_err();
        assert!(format!("{err:#}").contains("model unavailable"));

        let store = ArtifactStore::new(temp_dir.path().join("artifacts"), UnitSyntax::Pytest);
        assert_eq!(store.next_version("petstore").unwrap(), 2);

        // The snapshot still holds v1, so the retry sees the same changes.
        let diff = sync.diff("petstore", &petstore_v2()).unwrap();
        assert_eq!(diff.new.len(), 1);
        assert_eq!(diff.modified.len(), 1);
        assert_eq!(diff.removed.len(), 1);

        let outcome = sync.run("petstore", petstore_v2(), &tagged("v2")).unwrap();
        assert!(matches!(outcome, SyncOutcome::Synced { version: 2, .. }));
    }

    #[test]
    fn test_corrupted_snapshot_regenerates_everything() {
        let temp_dir = TempDir::new().unwrap();
        let mut sync = synchronizer(&temp_dir);
        sync.run("petstore", petstore_v1(), &tagged("v1")).unwrap();

        std::fs::write(
            temp_dir.path().join("snapshots/petstore.snapshot.json"),
            "{ not json",
        )
        .unwrap();

        let outcome = sync.run("petstore", petstore_v1(), &tagged("again")).unwrap();
        let SyncOutcome::Synced { version, report, diff, .. } = outcome else {
            panic!("expected a synced outcome");
        };
        assert_eq!(version, 2);
        assert_eq!(diff.new.len(), 3);
        assert_eq!(report.regenerated, 3);
        assert_eq!(report.preserved, 0);
    }

    #[test]
    fn test_base_address_change_regenerates_survivors() {
        let temp_dir = TempDir::new().unwrap();
        let mut sync = synchronizer(&temp_dir);
        sync.run("petstore", petstore_v1(), &tagged("v1")).unwrap();

        let mut moved = petstore_v1();
        moved.base_address = Some("https://v2.example.com".to_string());
        let outcome = sync.run("petstore", moved, &tagged("moved")).unwrap();

        assert!(outcome.diff().global_change);
        assert_eq!(outcome.diff().modified.len(), 3);
        assert!(matches!(outcome, SyncOutcome::Synced { version: 2, .. }));
    }

    #[test]
    fn test_excluded_paths_are_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let mut sync = synchronizer(&temp_dir).with_exclude_paths(vec!["/pets/*".to_string()]);

        let outcome = sync.run("petstore", petstore_v1(), &tagged("v1")).unwrap();
        let diff = outcome.diff();
        assert_eq!(diff.new.len(), 2);
        assert!(!diff.new.contains(&id("DELETE /pets/{id}")));
    }

    #[test]
    fn test_events_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let mut sync = synchronizer(&temp_dir);
        sync.run("petstore", petstore_v1(), &tagged("v1")).unwrap();
        sync.run("petstore", petstore_v1(), &tagged("v1")).unwrap();

        let names: Vec<&str> = sync.sink().events.iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec![
                "diff_computed",
                "artifact_written",
                "snapshot_saved",
                "diff_computed",
                "sync_skipped",
            ]
        );
    }

    #[test]
    fn test_invalid_contract_id_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut sync = synchronizer(&temp_dir);
        assert!(sync.run("../etc", petstore_v1(), &tagged("x")).is_err());
        assert!(sync.into_sink().events.is_empty());
    }

    // =========================================================================
    // UnitsFileGenerator tests
    // =========================================================================

    #[test]
    fn test_units_file_generator() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("units.json");
        std::fs::write(
            &path,
            r#"{
  "GET /pets": [
    {"name": "test_list_pets", "body": "def test_list_pets(client):\n    assert True"}
  ]
}"#,
        )
        .unwrap();

        let generator = UnitsFileGenerator::load(&path).unwrap();
        let units = generator
            .generate(&id("GET /pets"), &Operation::default())
            .unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].name, "test_list_pets");

        let none = generator
            .generate(&id("POST /pets"), &Operation::default())
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_units_file_bad_operation_id() {
        let result = UnitsFileGenerator::parse(r#"{"FETCH /pets": []}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_units_file_end_to_end() {
        let temp_dir = TempDir::new().unwrap();
        let mut sync = synchronizer(&temp_dir);
        let generator = UnitsFileGenerator::parse(
            r#"{
  "GET /pets": [{"name": "test_list", "body": "def test_list(client):\n    assert True"}],
  "POST /pets": [{"name": "test_create", "body": "def test_create(client):\n    assert True"}]
}"#,
        )
        .unwrap();

        let outcome = sync.run("petstore", petstore_v1(), &generator).unwrap();
        let SyncOutcome::Synced { report, .. } = outcome else {
            panic!("expected a synced outcome");
        };
        // DELETE /pets/{id} has no entry and simply gets no tests.
        assert_eq!(report.regenerated, 2);
    }
}
