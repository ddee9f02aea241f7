//! Checkpoint commit coordination.
//!
//! The coordinator collects every task's delta for a checkpoint, merges them
//! and commits the result as exactly one snapshot. Checkpoints commit strictly
//! in ascending id order; a checkpoint that cannot commit stays pending and
//! blocks later ones until it succeeds or is aborted.
//!
//! Every snapshot records the job id and checkpoint id in its summary. On
//! restart, [`CommitCoordinator::restore`] reads them back so deltas replayed
//! for already committed checkpoints are dropped instead of applied twice.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arco_core::observability::commit_span;
use tracing::Instrument;

use crate::config::SinkConfig;
use crate::error::{Result, SinkError};
use crate::handoff::{CheckpointDeltas, MergedDelta, TaskDelta};
use crate::metrics;
use crate::snapshot::{
    CheckpointSnapshotBinding, SUMMARY_CHECKPOINT_ID, SUMMARY_JOB_ID, Snapshot,
    checkpoint_bindings, max_committed_checkpoint,
};
use crate::store::{CommitOutcome, CommitRequest, TableStore};

/// Commit coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitCoordinatorConfig {
    /// Branch to commit into.
    pub branch: String,
    /// Job id recorded on every snapshot.
    pub job_id: String,
    /// Number of writer tasks expected per checkpoint.
    pub parallelism: usize,
    /// Retries after a conflicting first attempt; zero commits once.
    pub max_commit_retries: u32,
    /// Delay between conflicting attempts.
    pub retry_backoff: Duration,
}

impl CommitCoordinatorConfig {
    /// Derives coordinator settings from a sink configuration.
    #[must_use]
    pub fn from_sink_config(config: &SinkConfig) -> Self {
        Self {
            branch: config.target_branch.clone(),
            job_id: config.job_id.clone(),
            parallelism: config.write_parallelism,
            max_commit_retries: config.max_commit_retries,
            retry_backoff: Duration::from_millis(config.commit_retry_backoff_ms),
        }
    }
}

/// What happened to one checkpoint during [`CommitCoordinator::commit_through`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitReport {
    /// The checkpoint was committed as a new snapshot.
    Committed(CheckpointSnapshotBinding),
    /// The checkpoint produced no changes; no snapshot was created.
    SkippedEmpty {
        /// The empty checkpoint.
        checkpoint_id: u64,
    },
}

/// Merges per-task deltas and commits one snapshot per checkpoint.
#[derive(Debug)]
pub struct CommitCoordinator<S: TableStore + ?Sized> {
    store: Arc<S>,
    config: CommitCoordinatorConfig,
    pending: BTreeMap<u64, CheckpointDeltas>,
    restored_through: Option<u64>,
    last_committed: Option<u64>,
    last_binding: Option<CheckpointSnapshotBinding>,
}

impl<S: TableStore + ?Sized> CommitCoordinator<S> {
    /// Creates a coordinator with no commit history.
    #[must_use]
    pub fn new(store: Arc<S>, config: CommitCoordinatorConfig) -> Self {
        Self {
            store,
            config,
            pending: BTreeMap::new(),
            restored_through: None,
            last_committed: None,
            last_binding: None,
        }
    }

    /// Returns the coordinator settings.
    #[must_use]
    pub fn config(&self) -> &CommitCoordinatorConfig {
        &self.config
    }

    /// Loads this job's commit history from the target branch.
    ///
    /// Returns the highest checkpoint already committed by the job.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Store` if the history cannot be read.
    pub async fn restore(&mut self) -> Result<Option<u64>> {
        let history = self.store.snapshots(&self.config.branch).await?;
        let restored = max_committed_checkpoint(&history, &self.config.job_id);
        self.last_binding = checkpoint_bindings(&history, &self.config.job_id)
            .into_iter()
            .max_by_key(|b| b.checkpoint_id);
        self.restored_through = restored;
        self.last_committed = restored;
        self.pending.retain(|&id, _| restored.is_none_or(|r| id > r));

        tracing::info!(
            branch = %self.config.branch,
            job_id = %self.config.job_id,
            restored_checkpoint = ?restored,
            snapshots = history.len(),
            "restored commit history"
        );
        Ok(restored)
    }

    /// Registers one task's delta.
    ///
    /// Deltas for checkpoints committed before the last restore are replays
    /// and are dropped.
    ///
    /// # Errors
    ///
    /// - `SinkError::OutOfOrderCheckpoint` if the checkpoint is not after the
    ///   last checkpoint committed by this coordinator.
    /// - `SinkError::Configuration` if the task is outside the parallelism.
    pub fn register(&mut self, task_delta: TaskDelta) -> Result<()> {
        let checkpoint_id = task_delta.checkpoint_id;
        if self.restored_through.is_some_and(|r| checkpoint_id <= r) {
            tracing::info!(
                checkpoint_id,
                task = task_delta.task,
                "skipping delta of already committed checkpoint"
            );
            return Ok(());
        }
        if let Some(last_committed) = self.last_committed {
            if checkpoint_id <= last_committed {
                return Err(SinkError::OutOfOrderCheckpoint {
                    checkpoint_id,
                    last_committed,
                });
            }
        }

        let parallelism = self.config.parallelism;
        self.pending
            .entry(checkpoint_id)
            .or_insert_with(|| CheckpointDeltas::new(checkpoint_id, parallelism))
            .register(task_delta)
    }

    /// Discards every delta registered for `checkpoint_id`.
    pub fn abort(&mut self, checkpoint_id: u64) {
        if self.pending.remove(&checkpoint_id).is_some() {
            tracing::warn!(checkpoint_id, "discarded pending checkpoint deltas");
        }
    }

    /// Returns the checkpoints with registered deltas, ascending.
    #[must_use]
    pub fn pending_checkpoints(&self) -> Vec<u64> {
        self.pending.keys().copied().collect()
    }

    /// Returns the highest committed checkpoint.
    #[must_use]
    pub fn max_committed_checkpoint(&self) -> Option<u64> {
        self.last_committed
    }

    /// Returns the binding of the highest committed checkpoint.
    #[must_use]
    pub fn last_binding(&self) -> Option<&CheckpointSnapshotBinding> {
        self.last_binding.as_ref()
    }

    /// Reads every checkpoint binding of this job from the branch history,
    /// oldest first.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Store` if the history cannot be read.
    pub async fn bindings(&self) -> Result<Vec<CheckpointSnapshotBinding>> {
        let history = self.store.snapshots(&self.config.branch).await?;
        Ok(checkpoint_bindings(&history, &self.config.job_id))
    }

    /// Commits every pending checkpoint up to and including `checkpoint_id`,
    /// in ascending order.
    ///
    /// Stops at the first checkpoint that fails; it stays pending, and later
    /// checkpoints are not committed ahead of it.
    ///
    /// # Errors
    ///
    /// - `SinkError::IncompleteCheckpoint` if a task has not reported.
    /// - `SinkError::OwnershipViolation` if two tasks resolved the same key.
    /// - `SinkError::CommitRetriesExhausted` if every attempt conflicted.
    /// - `SinkError::Store` if the table store fails.
    pub async fn commit_through(&mut self, checkpoint_id: u64) -> Result<Vec<CommitReport>> {
        let ready: Vec<u64> = self
            .pending
            .range(..=checkpoint_id)
            .map(|(&id, _)| id)
            .collect();

        let mut reports = Vec::with_capacity(ready.len());
        for id in ready {
            let Some(deltas) = self.pending.get(&id) else {
                continue;
            };
            let merged = deltas.merge()?;

            let report = if merged.is_empty() {
                tracing::info!(
                    checkpoint_id = id,
                    "checkpoint produced no changes; skipping commit"
                );
                metrics::record_commit(&self.config.branch, "skipped_empty", 0.0);
                CommitReport::SkippedEmpty { checkpoint_id: id }
            } else {
                let span = commit_span("commit_checkpoint", id, &self.config.branch);
                let binding = self.commit_checkpoint(id, merged).instrument(span).await?;
                self.last_binding = Some(binding.clone());
                CommitReport::Committed(binding)
            };

            self.pending.remove(&id);
            self.last_committed = Some(id);
            reports.push(report);
        }
        Ok(reports)
    }

    async fn commit_checkpoint(
        &self,
        checkpoint_id: u64,
        merged: MergedDelta,
    ) -> Result<CheckpointSnapshotBinding> {
        let branch = &self.config.branch;
        let attempts = self.config.max_commit_retries.saturating_add(1);
        let started = Instant::now();

        let mut summary = BTreeMap::new();
        summary.insert(SUMMARY_JOB_ID.to_string(), self.config.job_id.clone());
        summary.insert(SUMMARY_CHECKPOINT_ID.to_string(), checkpoint_id.to_string());

        for attempt in 1..=attempts {
            match self.attempt_commit(&merged, &summary).await {
                Ok(snapshot) => {
                    metrics::record_commit(branch, "committed", started.elapsed().as_secs_f64());
                    tracing::info!(
                        checkpoint_id,
                        snapshot_id = snapshot.snapshot_id,
                        attempt,
                        inserts = merged.inserts.len(),
                        equality_deletes = merged.equality_deletes.len(),
                        "committed checkpoint"
                    );
                    return Ok(CheckpointSnapshotBinding::new(checkpoint_id, &snapshot));
                }
                Err(err) if err.is_retryable() => {
                    metrics::record_commit_conflict(branch);
                    tracing::warn!(
                        checkpoint_id,
                        attempt,
                        max_attempts = attempts,
                        error = %err,
                        "commit lost race against concurrent change"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_backoff).await;
                    }
                }
                Err(err) => {
                    metrics::record_commit(branch, "failed", started.elapsed().as_secs_f64());
                    return Err(err);
                }
            }
        }

        metrics::record_commit(branch, "failed", started.elapsed().as_secs_f64());
        Err(SinkError::CommitRetriesExhausted {
            checkpoint_id,
            attempts,
        })
    }

    /// Commits against the current branch head once.
    async fn attempt_commit(
        &self,
        merged: &MergedDelta,
        summary: &BTreeMap<String, String>,
    ) -> Result<Snapshot> {
        let base_snapshot_id = self
            .store
            .head(&self.config.branch)
            .await?
            .map(|s| s.snapshot_id);
        let request = CommitRequest {
            branch: self.config.branch.clone(),
            base_snapshot_id,
            delta: merged.clone(),
            summary: summary.clone(),
        };

        match self.store.commit(request).await? {
            CommitOutcome::Committed(snapshot) => Ok(snapshot),
            CommitOutcome::Conflict { current } => Err(SinkError::commit_conflict(format!(
                "branch '{}' moved from {base_snapshot_id:?} to {current:?}",
                self.config.branch
            ))),
        }
    }
}
