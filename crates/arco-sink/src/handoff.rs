//! Delta handoff between writer tasks and the commit coordinator.
//!
//! Each task hands off one [`TaskDelta`] per checkpoint. [`CheckpointDeltas`]
//! collects them until every task has reported, then merges them into the
//! single table-level [`MergedDelta`] committed as one snapshot.

use std::collections::{BTreeMap, HashMap};

use arco_core::Row;
use serde::{Deserialize, Serialize};

use crate::accumulator::LogicalDelta;
use crate::error::{Result, SinkError};
use crate::key::{EqualityDelete, EqualityKey};
use crate::metrics;

/// One task's final delta for one checkpoint.
#[derive(Debug, Clone)]
pub struct TaskDelta {
    /// Checkpoint the delta belongs to.
    pub checkpoint_id: u64,
    /// Writer task that produced it.
    pub task: usize,
    /// Final per-key dispositions.
    pub delta: LogicalDelta,
}

/// Table-level delta of one checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedDelta {
    /// Rows to insert.
    pub inserts: Vec<Row>,
    /// Equality deletes applied to previously committed rows.
    pub equality_deletes: Vec<EqualityDelete>,
}

impl MergedDelta {
    /// Returns true if there is nothing to commit.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.equality_deletes.is_empty()
    }
}

/// Task deltas registered for one checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointDeltas {
    checkpoint_id: u64,
    parallelism: usize,
    by_task: BTreeMap<usize, LogicalDelta>,
}

impl CheckpointDeltas {
    /// Creates an empty registry expecting `parallelism` tasks.
    #[must_use]
    pub fn new(checkpoint_id: u64, parallelism: usize) -> Self {
        Self {
            checkpoint_id,
            parallelism,
            by_task: BTreeMap::new(),
        }
    }

    /// Returns the checkpoint id.
    #[must_use]
    pub fn checkpoint_id(&self) -> u64 {
        self.checkpoint_id
    }

    /// Registers a task delta. A second delta from the same task replaces the
    /// first.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Configuration` if the delta belongs to another
    /// checkpoint or to a task outside the configured parallelism.
    pub fn register(&mut self, task_delta: TaskDelta) -> Result<()> {
        if task_delta.checkpoint_id != self.checkpoint_id {
            return Err(SinkError::configuration(format!(
                "delta for checkpoint {} registered under checkpoint {}",
                task_delta.checkpoint_id, self.checkpoint_id
            )));
        }
        if task_delta.task >= self.parallelism {
            return Err(SinkError::configuration(format!(
                "task {} is outside write parallelism {}",
                task_delta.task, self.parallelism
            )));
        }
        self.by_task.insert(task_delta.task, task_delta.delta);
        Ok(())
    }

    /// Returns the tasks that have not reported yet.
    #[must_use]
    pub fn missing_tasks(&self) -> Vec<usize> {
        (0..self.parallelism)
            .filter(|task| !self.by_task.contains_key(task))
            .collect()
    }

    /// Returns true once every task has reported.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.by_task.len() == self.parallelism
    }

    /// Merges the task deltas into one table-level delta.
    ///
    /// Inserts and deletes are unioned without deduplication. Each key must
    /// have been resolved by exactly one task.
    ///
    /// # Errors
    ///
    /// - `SinkError::IncompleteCheckpoint` if a task has not reported.
    /// - `SinkError::OwnershipViolation` if two tasks hold a disposition for
    ///   the same key.
    pub fn merge(&self) -> Result<MergedDelta> {
        let missing_tasks = self.missing_tasks();
        if !missing_tasks.is_empty() {
            return Err(SinkError::IncompleteCheckpoint {
                checkpoint_id: self.checkpoint_id,
                missing_tasks,
            });
        }

        let mut owners: HashMap<&EqualityKey, usize> = HashMap::new();
        let mut merged = MergedDelta::default();

        for (&task, delta) in &self.by_task {
            for key in delta.keys() {
                if let Some(&first_task) = owners.get(key) {
                    metrics::record_ownership_violation();
                    tracing::error!(
                        checkpoint_id = self.checkpoint_id,
                        key = %key,
                        first_task,
                        second_task = task,
                        "equality key resolved by two writer tasks"
                    );
                    return Err(SinkError::OwnershipViolation {
                        checkpoint_id: self.checkpoint_id,
                        key: key.to_string(),
                        first_task,
                        second_task: task,
                    });
                }
                owners.insert(key, task);
            }
            merged.inserts.extend(delta.inserts());
            merged.equality_deletes.extend(delta.equality_deletes());
        }

        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::CheckpointAccumulator;
    use crate::key::KeyProjector;
    use crate::row_event::{RowEvent, RowKind};
    use crate::schema::TableSchema;
    use arco_core::ScalarValue;
    use std::sync::Arc;

    fn projector() -> Arc<KeyProjector> {
        let schema = TableSchema::new(["id", "data"]).unwrap();
        Arc::new(KeyProjector::new(&schema, &["id".to_string()]).unwrap())
    }

    fn task_delta(task: usize, events: &[(RowKind, i64, &str)]) -> TaskDelta {
        let mut acc = CheckpointAccumulator::new(7, task, projector(), false).unwrap();
        for (kind, id, data) in events {
            let row = Row::from_values([ScalarValue::Int64(*id), ScalarValue::from(*data)]);
            acc.apply(RowEvent::new(*kind, row)).unwrap();
        }
        TaskDelta {
            checkpoint_id: 7,
            task,
            delta: acc.finish(),
        }
    }

    #[test]
    fn test_merge_unions_disjoint_tasks() {
        let mut deltas = CheckpointDeltas::new(7, 2);
        deltas
            .register(task_delta(0, &[(RowKind::Insert, 1, "aaa")]))
            .unwrap();
        deltas
            .register(task_delta(1, &[(RowKind::Delete, 2, "bbb")]))
            .unwrap();
        assert!(deltas.is_complete());

        let merged = deltas.merge().unwrap();
        assert_eq!(merged.inserts.len(), 1);
        assert_eq!(merged.equality_deletes.len(), 1);
    }

    #[test]
    fn test_merge_reports_missing_tasks() {
        let mut deltas = CheckpointDeltas::new(7, 3);
        deltas.register(task_delta(1, &[])).unwrap();
        match deltas.merge().unwrap_err() {
            SinkError::IncompleteCheckpoint { missing_tasks, .. } => {
                assert_eq!(missing_tasks, vec![0, 2]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_merge_rejects_shared_key() {
        let mut deltas = CheckpointDeltas::new(7, 2);
        deltas
            .register(task_delta(0, &[(RowKind::Insert, 1, "aaa")]))
            .unwrap();
        deltas
            .register(task_delta(1, &[(RowKind::Delete, 1, "bbb")]))
            .unwrap();
        assert!(matches!(
            deltas.merge(),
            Err(SinkError::OwnershipViolation {
                first_task: 0,
                second_task: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_register_rejects_foreign_delta() {
        let mut deltas = CheckpointDeltas::new(8, 2);
        assert!(deltas.register(task_delta(0, &[])).is_err());
        let mut deltas = CheckpointDeltas::new(7, 1);
        assert!(deltas.register(task_delta(1, &[])).is_err());
    }
}
