//! Snapshot model and checkpoint-aligned snapshot filtering.
//!
//! A snapshot is data-bearing when at least one of its manifests was added
//! by the snapshot itself. Maintenance operations such as manifest rewrites
//! create snapshots that only carry existing manifests forward; readers that
//! reason per checkpoint skip those.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary key holding the id of the job that committed a snapshot.
pub const SUMMARY_JOB_ID: &str = "arco.sink.job-id";

/// Summary key holding the checkpoint a snapshot was committed for.
pub const SUMMARY_CHECKPOINT_ID: &str = "arco.sink.checkpoint-id";

/// Summary key holding the number of inserted rows.
pub const SUMMARY_ADDED_RECORDS: &str = "added-records";

/// Summary key holding the number of equality deletes.
pub const SUMMARY_ADDED_EQUALITY_DELETES: &str = "added-equality-deletes";

/// Operation that produced a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotOperation {
    /// Only rows were added.
    Append,
    /// Rows were added and/or deleted.
    Overwrite,
    /// Files were rewritten without changing table contents.
    Replace,
}

/// Content type of a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestContent {
    /// Tracks data files.
    Data,
    /// Tracks delete files.
    Deletes,
}

/// A manifest referenced by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestFile {
    /// Manifest location.
    pub path: String,
    /// What the manifest tracks.
    pub content: ManifestContent,
    /// Snapshot that added the manifest.
    pub added_snapshot_id: u64,
    /// Sequence number at which the manifest was added.
    pub sequence_number: u64,
    /// Rows (or delete predicates) tracked by the manifest.
    pub record_count: u64,
}

/// Immutable, versioned view of a table branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Snapshot id, unique per table.
    pub snapshot_id: u64,
    /// Previous snapshot on the same branch.
    pub parent_snapshot_id: Option<u64>,
    /// Table-wide commit sequence number.
    pub sequence_number: u64,
    /// Branch the snapshot was committed to.
    pub branch: String,
    /// Operation that produced the snapshot.
    pub operation: SnapshotOperation,
    /// Every manifest reachable from the snapshot.
    pub manifests: Vec<ManifestFile>,
    /// Free-form commit properties.
    pub summary: BTreeMap<String, String>,
    /// Commit time.
    pub committed_at: DateTime<Utc>,
}

impl Snapshot {
    /// Returns true if the snapshot added at least one manifest.
    #[must_use]
    pub fn is_data_bearing(&self) -> bool {
        self.manifests
            .iter()
            .any(|m| m.added_snapshot_id == self.snapshot_id)
    }

    /// Returns the checkpoint recorded for `job_id`, if any.
    #[must_use]
    pub fn checkpoint_id(&self, job_id: &str) -> Option<u64> {
        if self.summary.get(SUMMARY_JOB_ID).map(String::as_str) != Some(job_id) {
            return None;
        }
        self.summary
            .get(SUMMARY_CHECKPOINT_ID)
            .and_then(|v| v.parse().ok())
    }
}

/// Binding of a committed snapshot to its source checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointSnapshotBinding {
    /// Source checkpoint.
    pub checkpoint_id: u64,
    /// Snapshot committed for it.
    pub snapshot_id: u64,
    /// Branch the snapshot lives on.
    pub branch: String,
    /// Commit time.
    pub committed_at: DateTime<Utc>,
}

impl CheckpointSnapshotBinding {
    /// Builds the binding for `snapshot`.
    #[must_use]
    pub fn new(checkpoint_id: u64, snapshot: &Snapshot) -> Self {
        Self {
            checkpoint_id,
            snapshot_id: snapshot.snapshot_id,
            branch: snapshot.branch.clone(),
            committed_at: snapshot.committed_at,
        }
    }
}

/// Returns the data-bearing snapshots of a history, preserving order.
#[must_use]
pub fn data_snapshots(history: &[Snapshot]) -> Vec<&Snapshot> {
    history.iter().filter(|s| s.is_data_bearing()).collect()
}

/// Returns the checkpoint bindings committed by `job_id`, in history order.
#[must_use]
pub fn checkpoint_bindings(history: &[Snapshot], job_id: &str) -> Vec<CheckpointSnapshotBinding> {
    history
        .iter()
        .filter(|s| s.is_data_bearing())
        .filter_map(|s| {
            s.checkpoint_id(job_id)
                .map(|checkpoint_id| CheckpointSnapshotBinding::new(checkpoint_id, s))
        })
        .collect()
}

/// Returns the snapshot committed by `job_id` for `checkpoint_id`.
#[must_use]
pub fn snapshot_for_checkpoint<'a>(
    history: &'a [Snapshot],
    job_id: &str,
    checkpoint_id: u64,
) -> Option<&'a Snapshot> {
    history
        .iter()
        .find(|s| s.is_data_bearing() && s.checkpoint_id(job_id) == Some(checkpoint_id))
}

/// Returns the highest checkpoint id committed by `job_id`.
#[must_use]
pub fn max_committed_checkpoint(history: &[Snapshot], job_id: &str) -> Option<u64> {
    history.iter().filter_map(|s| s.checkpoint_id(job_id)).max()
}
