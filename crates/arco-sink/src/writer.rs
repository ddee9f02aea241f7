//! Per-task writer.
//!
//! A [`TaskWriter`] owns the open checkpoint accumulators of one parallel
//! task. Any classification or key error discards the checkpoint's state on
//! that task and poisons it, so no partial delta can reach the coordinator.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arco_core::observability::checkpoint_span;

use crate::accumulator::{CheckpointAccumulator, LogicalDelta};
use crate::error::{Result, SinkError};
use crate::handoff::TaskDelta;
use crate::key::KeyProjector;
use crate::metrics;
use crate::row_event::{RawRow, classify};

/// Accumulation state of one writer task.
#[derive(Debug)]
pub struct TaskWriter {
    task: usize,
    projector: Arc<KeyProjector>,
    upsert: bool,
    open: BTreeMap<u64, CheckpointAccumulator>,
    failed: BTreeMap<u64, String>,
    closed: BTreeSet<u64>,
}

impl TaskWriter {
    /// Creates a writer for `task`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if upsert is enabled without equality
    /// fields.
    pub fn new(task: usize, projector: Arc<KeyProjector>, upsert: bool) -> Result<Self> {
        if upsert && projector.is_full_row() {
            return Err(SinkError::configuration(
                "upsert mode requires equality field columns",
            ));
        }
        Ok(Self {
            task,
            projector,
            upsert,
            open: BTreeMap::new(),
            failed: BTreeMap::new(),
            closed: BTreeSet::new(),
        })
    }

    /// Returns the task index.
    #[must_use]
    pub fn task(&self) -> usize {
        self.task
    }

    /// Classifies a raw row and folds it into `checkpoint_id`.
    ///
    /// # Errors
    ///
    /// - `SinkError::CheckpointClosed` if the checkpoint was already prepared.
    /// - `SinkError::CheckpointAborted` if an earlier row failed.
    /// - The classification or key error of this row; the checkpoint is then
    ///   aborted on this task.
    pub fn write(&mut self, checkpoint_id: u64, raw: RawRow) -> Result<()> {
        if self.closed.contains(&checkpoint_id) {
            return Err(SinkError::CheckpointClosed {
                checkpoint_id,
                task: self.task,
            });
        }
        if let Some(reason) = self.failed.get(&checkpoint_id) {
            return Err(SinkError::CheckpointAborted {
                checkpoint_id,
                task: self.task,
                reason: reason.clone(),
            });
        }

        let result = classify(raw).and_then(|event| {
            let accumulator = match self.open.entry(checkpoint_id) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => e.insert(
                    CheckpointAccumulator::new(
                        checkpoint_id,
                        self.task,
                        Arc::clone(&self.projector),
                        self.upsert,
                    )?,
                ),
            };
            accumulator.apply(event)
        });

        if let Err(err) = &result {
            self.fail(checkpoint_id, err.to_string());
        }
        result
    }

    /// Closes `checkpoint_id` and hands off its final delta.
    ///
    /// A checkpoint that received no rows yields an empty delta.
    ///
    /// # Errors
    ///
    /// - `SinkError::CheckpointAborted` if the checkpoint failed or was aborted.
    /// - `SinkError::CheckpointClosed` if it was already prepared.
    pub fn prepare_commit(&mut self, checkpoint_id: u64) -> Result<TaskDelta> {
        let span = checkpoint_span("prepare_commit", checkpoint_id, self.task);
        let _guard = span.enter();

        if let Some(reason) = self.failed.get(&checkpoint_id) {
            return Err(SinkError::CheckpointAborted {
                checkpoint_id,
                task: self.task,
                reason: reason.clone(),
            });
        }
        if !self.closed.insert(checkpoint_id) {
            return Err(SinkError::CheckpointClosed {
                checkpoint_id,
                task: self.task,
            });
        }

        let delta = match self.open.remove(&checkpoint_id) {
            Some(accumulator) => accumulator.finish(),
            None => LogicalDelta::empty(Arc::clone(&self.projector)),
        };
        tracing::debug!(
            inserts = delta.insert_count(),
            deletes = delta.delete_count(),
            "prepared task delta"
        );

        Ok(TaskDelta {
            checkpoint_id,
            task: self.task,
            delta,
        })
    }

    /// Discards all state of `checkpoint_id` on this task.
    pub fn abort(&mut self, checkpoint_id: u64) {
        self.fail(checkpoint_id, "aborted by the stream runtime".to_string());
    }

    /// Returns the checkpoints with buffered state, ascending.
    #[must_use]
    pub fn open_checkpoints(&self) -> Vec<u64> {
        self.open.keys().copied().collect()
    }

    /// Forgets bookkeeping for checkpoints up to and including `checkpoint_id`.
    pub fn release_through(&mut self, checkpoint_id: u64) {
        self.open.retain(|&id, _| id > checkpoint_id);
        self.failed.retain(|&id, _| id > checkpoint_id);
        self.closed.retain(|&id| id > checkpoint_id);
    }

    fn fail(&mut self, checkpoint_id: u64, reason: String) {
        let discarded = self.open.remove(&checkpoint_id).map_or(0, |acc| acc.len());
        tracing::warn!(
            checkpoint_id,
            task = self.task,
            discarded_keys = discarded,
            reason = %reason,
            "aborting checkpoint on task"
        );
        metrics::record_checkpoint_aborted(self.task);
        self.failed.entry(checkpoint_id).or_insert(reason);
    }
}
