//! Selective regeneration.
//!
//! Builds the next artifact from three inputs: the previous artifact text,
//! the contract diff, and freshly generated units for new and modified
//! operations. Units of unchanged operations are carried over verbatim,
//! units of removed operations disappear, and every unit name appears in
//! the output exactly once.

use super::parser::{parse_units, trim_blank_lines};
use super::{TestUnit, UnitSyntax};
use crate::contract::OperationId;
use crate::diff::DiffResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A test produced by the external generator for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedUnit {
    pub name: String,
    pub body: String,
}

/// Per-run merge settings.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub syntax: UnitSyntax,
    pub contract_id: String,
    /// Version number the output will be stored under.
    pub version: u32,
    /// Replaces the preamble carried over from the previous artifact.
    pub preamble: Option<String>,
}

/// Accounting for one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub preserved: usize,
    pub regenerated: usize,
    pub total: usize,
    /// Previous units whose operation was removed.
    pub dropped_removed: usize,
    /// Previous units of new or modified operations.
    pub dropped_stale: usize,
    /// Previous units whose operation is in no diff set.
    pub dropped_unowned: usize,
    /// Preserved units overridden by a regenerated unit of the same name.
    pub collisions: usize,
    /// Repeated names within the preserved or the regenerated set.
    pub duplicates: usize,
    /// Generated units for operations that were not due for regeneration.
    pub ignored_generated: usize,
    /// Generated units whose body declares no test.
    pub rejected_generated: usize,
    /// Previous units that could not be isolated.
    pub parse_failures: usize,
}

/// The merged artifact and its accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutput {
    pub text: String,
    pub report: MergeReport,
    pub preserved: Vec<TestUnit>,
    pub regenerated: Vec<TestUnit>,
}

impl MergeOutput {
    /// Names of every unit in the output, preserved first.
    pub fn unit_names(&self) -> Vec<&str> {
        self.preserved
            .iter()
            .chain(self.regenerated.iter())
            .map(|u| u.name.as_str())
            .collect()
    }
}

/// Merge `previous` with `generated` according to `diff`.
pub fn merge_artifact(
    previous: Option<&str>,
    diff: &DiffResult,
    generated: &BTreeMap<OperationId, Vec<GeneratedUnit>>,
    options: &MergeOptions,
) -> MergeOutput {
    let syntax = options.syntax;
    let mut report = MergeReport::default();

    let parsed = previous
        .map(|text| parse_units(text, syntax))
        .unwrap_or_default();
    for failure in &parsed.failures {
        tracing::warn!(
            "Dropping unit at line {} of previous artifact: {}",
            failure.line,
            failure.reason
        );
    }
    report.parse_failures = parsed.failures.len();

    for (operation, units) in generated {
        if !diff.needs_regeneration(operation) {
            tracing::warn!(
                "Ignoring {} generated units for {}: operation is not new or modified",
                units.len(),
                operation
            );
            report.ignored_generated += units.len();
        }
    }

    // Regenerated units, in classification order.
    let mut regenerated: Vec<TestUnit> = Vec::new();
    let mut regenerated_names: HashSet<String> = HashSet::new();
    for operation in diff.changed() {
        let Some(units) = generated.get(operation) else {
            tracing::debug!("No generated units for {}", operation);
            continue;
        };
        for unit in units {
            let Some(unit) = normalize_generated(unit, operation, syntax) else {
                report.rejected_generated += 1;
                continue;
            };
            if !regenerated_names.insert(unit.name.clone()) {
                tracing::warn!(
                    "Duplicate generated unit name {} for {}; keeping the first",
                    unit.name,
                    operation
                );
                report.duplicates += 1;
                continue;
            }
            regenerated.push(unit);
        }
    }

    // Preserved units, in order of appearance.
    let mut preserved: Vec<TestUnit> = Vec::new();
    let mut preserved_names: HashSet<String> = HashSet::new();
    for unit in parsed.units {
        if diff.unchanged.contains(&unit.operation) {
            if regenerated_names.contains(&unit.name) {
                tracing::debug!(
                    "Preserved unit {} replaced by regenerated unit of the same name",
                    unit.name
                );
                report.collisions += 1;
            } else if !preserved_names.insert(unit.name.clone()) {
                tracing::warn!("Duplicate unit name {} in previous artifact; keeping the first", unit.name);
                report.duplicates += 1;
            } else {
                preserved.push(unit);
            }
        } else if diff.removed.contains(&unit.operation) {
            report.dropped_removed += 1;
        } else if diff.needs_regeneration(&unit.operation) {
            report.dropped_stale += 1;
        } else {
            tracing::warn!(
                "Dropping unit {}: operation {} is not part of the contract",
                unit.name,
                unit.operation
            );
            report.dropped_unowned += 1;
        }
    }

    report.preserved = preserved.len();
    report.regenerated = regenerated.len();
    report.total = report.preserved + report.regenerated;

    let preamble = options.preamble.clone().unwrap_or(parsed.preamble);
    let text = render(&preamble, &preserved, &regenerated, options);

    tracing::info!(
        "Merged artifact v{} for {}: {} preserved, {} regenerated, {} total",
        options.version,
        options.contract_id,
        report.preserved,
        report.regenerated,
        report.total
    );

    MergeOutput {
        text,
        report,
        preserved,
        regenerated,
    }
}

/// Attribute a generated unit to `operation` and clean its text.
///
/// The declared name in the body is authoritative because it is what the
/// next parse will see.
fn normalize_generated(
    unit: &GeneratedUnit,
    operation: &OperationId,
    syntax: UnitSyntax,
) -> Option<TestUnit> {
    let lines: Vec<&str> = unit
        .body
        .lines()
        .filter(|line| !syntax.is_annotation(line) && syntax.parse_marker(line).is_none())
        .collect();

    let declarations = top_level_declarations(&lines, syntax);
    let declared = match declarations.as_slice() {
        [] => {
            tracing::warn!(
                "Rejecting generated unit {} for {}: body declares no test",
                unit.name,
                operation
            );
            return None;
        }
        [only] => only.clone(),
        [_, ..] => {
            tracing::warn!(
                "Rejecting generated unit {} for {}: body declares {} tests ({})",
                unit.name,
                operation,
                declarations.len(),
                declarations.join(", ")
            );
            return None;
        }
    };
    if declared != unit.name {
        tracing::warn!(
            "Generated unit {} for {} declares {}; using the declared name",
            unit.name,
            operation,
            declared
        );
    }

    Some(TestUnit {
        name: declared,
        operation: operation.clone(),
        body: trim_blank_lines(&lines),
    })
}

/// Names declared at the indentation of the first declaration.
///
/// Deeper declarations are helpers nested inside the test and do not count.
fn top_level_declarations(lines: &[&str], syntax: UnitSyntax) -> Vec<String> {
    let indent = |line: &str| line.len() - line.trim_start().len();
    let mut top: Option<usize> = None;
    let mut names = Vec::new();
    for line in lines {
        let Some(name) = syntax.declared_name(line) else {
            continue;
        };
        let depth = indent(line);
        match top {
            Some(top) if depth > top => continue,
            _ => top = Some(depth),
        }
        names.push(name);
    }
    names
}

fn render(
    preamble: &str,
    preserved: &[TestUnit],
    regenerated: &[TestUnit],
    options: &MergeOptions,
) -> String {
    let syntax = options.syntax;
    let mut out = String::new();

    out.push_str(&syntax.annotation(&format!(
        "artifact v{} for contract {}",
        options.version, options.contract_id
    )));
    out.push('\n');
    if !preamble.trim().is_empty() {
        out.push_str(preamble.trim_end());
        out.push('\n');
    }

    let blocks = [
        ("preserved from previous version", preserved),
        ("regenerated for new or modified operations", regenerated),
    ];
    for (label, units) in blocks {
        out.push('\n');
        out.push_str(&syntax.annotation(&format!("{} ({} units)", label, units.len())));
        out.push('\n');
        for unit in units {
            out.push_str(&syntax.operation_marker(&unit.operation));
            out.push('\n');
            out.push_str(&unit.body);
            out.push_str("\n\n");
        }
    }

    out
}
