//! Structured events emitted while synchronizing and healing.
//!
//! Sinks never fail from the caller's point of view: delivery problems are
//! logged and the run continues.

use crate::artifact::MergeReport;
use crate::diff::DiffSummary;
use crate::healing::{Decision, HealingDecision};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;

// ============================================================================
// SECTION: Events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    DiffComputed {
        contract_id: String,
        new: usize,
        modified: usize,
        removed: usize,
        unchanged: usize,
        global_change: bool,
    },
    SyncSkipped {
        contract_id: String,
        reason: String,
    },
    ArtifactWritten {
        contract_id: String,
        version: u32,
        path: PathBuf,
        report: MergeReport,
    },
    SnapshotSaved {
        contract_id: String,
        path: PathBuf,
    },
    HealingDecided {
        test_name: String,
        decision: Decision,
        confidence: f64,
    },
}

impl SyncEvent {
    pub fn diff_computed(contract_id: &str, summary: DiffSummary) -> Self {
        SyncEvent::DiffComputed {
            contract_id: contract_id.to_string(),
            new: summary.new,
            modified: summary.modified,
            removed: summary.removed,
            unchanged: summary.unchanged,
            global_change: summary.global_change,
        }
    }

    pub fn healing_decided(decision: &HealingDecision) -> Self {
        SyncEvent::HealingDecided {
            test_name: decision.test_name.clone(),
            decision: decision.decision,
            confidence: decision.confidence,
        }
    }

    /// Short event name, matching the serialized tag.
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::DiffComputed { .. } => "diff_computed",
            SyncEvent::SyncSkipped { .. } => "sync_skipped",
            SyncEvent::ArtifactWritten { .. } => "artifact_written",
            SyncEvent::SnapshotSaved { .. } => "snapshot_saved",
            SyncEvent::HealingDecided { .. } => "healing_decided",
        }
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Receives events as they happen.
pub trait EventSink {
    fn emit(&mut self, event: &SyncEvent);
}

/// Writes events to the `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&mut self, event: &SyncEvent) {
        match event {
            SyncEvent::DiffComputed {
                contract_id,
                new,
                modified,
                removed,
                unchanged,
                global_change,
            } => tracing::info!(
                "[{}] diff: {} new, {} modified, {} removed, {} unchanged{}",
                contract_id,
                new,
                modified,
                removed,
                unchanged,
                if *global_change { " (global change)" } else { "" }
            ),
            SyncEvent::SyncSkipped { contract_id, reason } => {
                tracing::info!("[{}] skipped: {}", contract_id, reason)
            }
            SyncEvent::ArtifactWritten {
                contract_id,
                version,
                path,
                report,
            } => tracing::info!(
                "[{}] artifact v{} written to {} ({} preserved, {} regenerated)",
                contract_id,
                version,
                path.display(),
                report.preserved,
                report.regenerated
            ),
            SyncEvent::SnapshotSaved { contract_id, path } => {
                tracing::info!("[{}] snapshot saved to {}", contract_id, path.display())
            }
            SyncEvent::HealingDecided {
                test_name,
                decision,
                confidence,
            } => tracing::info!("{}: {} ({:.2})", test_name, decision, confidence),
        }
    }
}

/// Appends one JSON object per event to a writer.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_event(&mut self, event: &SyncEvent) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn emit(&mut self, event: &SyncEvent) {
        if let Err(e) = self.write_event(event) {
            tracing::warn!("Failed to record {} event: {}", event.name(), e);
        }
    }
}

/// Keeps events in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub events: Vec<SyncEvent>,
}

impl EventSink for MemorySink {
    fn emit(&mut self, event: &SyncEvent) {
        self.events.push(event.clone());
    }
}
