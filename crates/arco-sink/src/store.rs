//! Table store boundary.
//!
//! The sink hands one merged delta per checkpoint to a [`TableStore`] as a
//! [`CommitRequest`] built against the branch head it last observed. A
//! concurrent change to that head is reported as [`CommitOutcome::Conflict`],
//! a normal result the coordinator retries on, not an error.
//!
//! [`MemoryTableStore`] is an in-memory implementation for tests and local
//! runs. It keeps every snapshot's full row set so reads at any snapshot are
//! exact.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use arco_core::{Error, Result, Row};
use async_trait::async_trait;
use chrono::Utc;

use crate::handoff::MergedDelta;
use crate::schema::TableSchema;
use crate::snapshot::{
    ManifestContent, ManifestFile, SUMMARY_ADDED_EQUALITY_DELETES, SUMMARY_ADDED_RECORDS, Snapshot,
    SnapshotOperation,
};

/// A request to commit one delta on top of a known branch head.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    /// Branch to commit into.
    pub branch: String,
    /// Head the delta was computed against; `None` for an empty branch.
    pub base_snapshot_id: Option<u64>,
    /// Rows to insert and equality deletes to apply.
    pub delta: MergedDelta,
    /// Properties recorded in the snapshot summary.
    pub summary: BTreeMap<String, String>,
}

/// Outcome of a commit attempt.
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    /// The commit landed as a new snapshot.
    Committed(Snapshot),
    /// The branch head moved; nothing was written.
    Conflict {
        /// The branch head at the time of the attempt.
        current: Option<u64>,
    },
}

/// Snapshot persistence and atomic commit for one table.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Returns the head snapshot of `branch`, if any.
    async fn head(&self, branch: &str) -> Result<Option<Snapshot>>;

    /// Atomically commits a delta if `request.base_snapshot_id` is still the
    /// branch head.
    async fn commit(&self, request: CommitRequest) -> Result<CommitOutcome>;

    /// Returns the history of `branch`, oldest first.
    async fn snapshots(&self, branch: &str) -> Result<Vec<Snapshot>>;

    /// Returns the rows visible at `snapshot_id`.
    async fn scan(&self, snapshot_id: u64) -> Result<Vec<Row>>;
}

/// In-memory table store for testing.
///
/// Thread-safe via `RwLock`. Not suitable for production.
#[derive(Debug)]
pub struct MemoryTableStore {
    schema: TableSchema,
    state: RwLock<StoreState>,
}

#[derive(Debug, Default)]
struct StoreState {
    last_snapshot_id: u64,
    last_sequence_number: u64,
    heads: HashMap<String, u64>,
    snapshots: HashMap<u64, StoredSnapshot>,
    injected_conflicts: u32,
    injected_failures: u32,
}

#[derive(Debug, Clone)]
struct StoredSnapshot {
    snapshot: Snapshot,
    rows: Vec<Row>,
}

impl StoreState {
    fn head(&self, branch: &str) -> Option<&StoredSnapshot> {
        self.heads.get(branch).and_then(|id| self.snapshots.get(id))
    }

    fn append(
        &mut self,
        branch: &str,
        operation: SnapshotOperation,
        new_manifests: impl FnOnce(u64, u64) -> Vec<ManifestFile>,
        rows: Vec<Row>,
        summary: BTreeMap<String, String>,
    ) -> Snapshot {
        let parent = self.head(branch).map(|s| s.snapshot.clone());
        self.last_snapshot_id += 1;
        self.last_sequence_number += 1;
        let snapshot_id = self.last_snapshot_id;
        let sequence_number = self.last_sequence_number;

        let mut manifests = parent.as_ref().map(|p| p.manifests.clone()).unwrap_or_default();
        manifests.extend(new_manifests(snapshot_id, sequence_number));

        let snapshot = Snapshot {
            snapshot_id,
            parent_snapshot_id: parent.map(|p| p.snapshot_id),
            sequence_number,
            branch: branch.to_string(),
            operation,
            manifests,
            summary,
            committed_at: Utc::now(),
        };
        self.snapshots.insert(
            snapshot_id,
            StoredSnapshot {
                snapshot: snapshot.clone(),
                rows,
            },
        );
        self.heads.insert(branch.to_string(), snapshot_id);
        snapshot
    }

    fn rewrite_manifests(&mut self, branch: &str) -> Result<Snapshot> {
        let head = self
            .head(branch)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("branch has no snapshots: {branch}")))?;
        Ok(self.append(
            branch,
            SnapshotOperation::Replace,
            |_, _| Vec::new(),
            head.rows,
            BTreeMap::new(),
        ))
    }
}

impl MemoryTableStore {
    /// Creates an empty table with `schema`.
    #[must_use]
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Makes the next `count` commits lose a race against a concurrent
    /// maintenance commit.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the state lock is poisoned.
    pub fn inject_conflicts(&self, count: u32) -> Result<()> {
        let mut state = self.state.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        state.injected_conflicts = count;
        Ok(())
    }

    /// Makes the next `count` commits fail with a storage error before
    /// touching the table.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the state lock is poisoned.
    pub fn inject_failures(&self, count: u32) -> Result<()> {
        let mut state = self.state.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        state.injected_failures = count;
        Ok(())
    }

    /// Commits a metadata-only snapshot that carries the branch head's
    /// manifests forward without adding data.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the branch has no snapshots.
    pub fn rewrite_manifests(&self, branch: &str) -> Result<Snapshot> {
        let mut state = self.state.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        state.rewrite_manifests(branch)
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn head(&self, branch: &str) -> Result<Option<Snapshot>> {
        let state = self.state.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        Ok(state.head(branch).map(|s| s.snapshot.clone()))
    }

    async fn commit(&self, request: CommitRequest) -> Result<CommitOutcome> {
        for row in &request.delta.inserts {
            row.check_arity(self.schema.len())?;
        }

        let mut state = self.state.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        if state.injected_failures > 0 {
            state.injected_failures -= 1;
            return Err(Error::storage(format!(
                "commit to branch {} rejected by the catalog",
                request.branch
            )));
        }

        if state.injected_conflicts > 0 && state.head(&request.branch).is_some() {
            state.injected_conflicts -= 1;
            let concurrent = state.rewrite_manifests(&request.branch)?;
            return Ok(CommitOutcome::Conflict {
                current: Some(concurrent.snapshot_id),
            });
        }

        let current = state.heads.get(&request.branch).copied();
        if current != request.base_snapshot_id {
            return Ok(CommitOutcome::Conflict { current });
        }

        let MergedDelta {
            inserts,
            equality_deletes,
        } = request.delta;

        let mut rows: Vec<Row> = state
            .head(&request.branch)
            .map(|s| s.rows.clone())
            .unwrap_or_default();
        rows.retain(|row| !equality_deletes.iter().any(|d| d.matches(row)));
        rows.extend(inserts.iter().cloned());

        let added_records = u64::try_from(inserts.len()).unwrap_or(u64::MAX);
        let added_deletes = u64::try_from(equality_deletes.len()).unwrap_or(u64::MAX);
        let operation = if equality_deletes.is_empty() {
            SnapshotOperation::Append
        } else {
            SnapshotOperation::Overwrite
        };

        let mut summary = request.summary;
        summary.insert(SUMMARY_ADDED_RECORDS.to_string(), added_records.to_string());
        summary.insert(
            SUMMARY_ADDED_EQUALITY_DELETES.to_string(),
            added_deletes.to_string(),
        );

        let snapshot = state.append(
            &request.branch,
            operation,
            |snapshot_id, sequence_number| {
                let mut manifests = Vec::new();
                if added_records > 0 {
                    manifests.push(ManifestFile {
                        path: format!("metadata/snap-{snapshot_id}-data.avro"),
                        content: ManifestContent::Data,
                        added_snapshot_id: snapshot_id,
                        sequence_number,
                        record_count: added_records,
                    });
                }
                if added_deletes > 0 {
                    manifests.push(ManifestFile {
                        path: format!("metadata/snap-{snapshot_id}-deletes.avro"),
                        content: ManifestContent::Deletes,
                        added_snapshot_id: snapshot_id,
                        sequence_number,
                        record_count: added_deletes,
                    });
                }
                manifests
            },
            rows,
            summary,
        );

        Ok(CommitOutcome::Committed(snapshot))
    }

    async fn snapshots(&self, branch: &str) -> Result<Vec<Snapshot>> {
        let state = self.state.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        let mut history = Vec::new();
        let mut next = state.heads.get(branch).copied();
        while let Some(id) = next {
            let stored = state
                .snapshots
                .get(&id)
                .ok_or_else(|| Error::internal(format!("dangling snapshot reference: {id}")))?;
            history.push(stored.snapshot.clone());
            next = stored.snapshot.parent_snapshot_id;
        }
        history.reverse();
        Ok(history)
    }

    async fn scan(&self, snapshot_id: u64) -> Result<Vec<Row>> {
        let state = self.state.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        state
            .snapshots
            .get(&snapshot_id)
            .map(|s| s.rows.clone())
            .ok_or_else(|| Error::NotFound(format!("snapshot not found: {snapshot_id}")))
    }
}
