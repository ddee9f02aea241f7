//! Changelog sink pipeline.
//!
//! [`ChangelogSink`] wires the pieces together for one table: every raw row is
//! routed to a writer task and folded into the open checkpoint, and
//! [`ChangelogSink::complete_checkpoint`] hands all task deltas to the commit
//! coordinator. All configuration checks run in
//! [`ChangelogSinkBuilder::build`], before any row is accepted.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use arco_core::{Row, ScalarValue};
//! use arco_sink::{ChangelogSink, MemoryTableStore, PartitionSpec, RawRow, TableSchema, TableStore};
//!
//! # tokio_test::block_on(async {
//! let schema = TableSchema::new(["id", "data"])?;
//! let store = Arc::new(MemoryTableStore::new(schema.clone()));
//! let mut sink = ChangelogSink::builder(schema, PartitionSpec::unpartitioned())
//!     .equality_field_columns(["id"])
//!     .upsert(true)
//!     .build(Arc::clone(&store))
//!     .await?;
//!
//! let row = |id: i64, data: &str| Row::from_values([ScalarValue::Int64(id), ScalarValue::from(data)]);
//! sink.write(RawRow::new("+I", row(1, "aaa")))?;
//! sink.write(RawRow::new("+U", row(1, "bbb")))?;
//! sink.complete_checkpoint().await?;
//!
//! let head = store.head("main").await?.expect("snapshot");
//! assert_eq!(store.scan(head.snapshot_id).await?, vec![row(1, "bbb")]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```

use std::sync::Arc;

use arco_core::ScalarValue;

use crate::config::{DistributionMode, SinkConfig};
use crate::coordinator::{CommitCoordinator, CommitCoordinatorConfig, CommitReport};
use crate::distribution::{DistributionConfig, TaskRouter};
use crate::error::{Result, SinkError};
use crate::key::KeyProjector;
use crate::row_event::RawRow;
use crate::schema::{PartitionSpec, TableSchema};
use crate::snapshot::CheckpointSnapshotBinding;
use crate::store::TableStore;
use crate::writer::TaskWriter;

/// Builder for [`ChangelogSink`].
#[derive(Debug, Clone)]
pub struct ChangelogSinkBuilder {
    schema: TableSchema,
    partition_spec: PartitionSpec,
    config: SinkConfig,
}

impl ChangelogSinkBuilder {
    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: SinkConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the equality field columns.
    #[must_use]
    pub fn equality_field_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config = self.config.with_equality_fields(columns);
        self
    }

    /// Enables or disables upsert mode.
    #[must_use]
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.config.upsert = upsert;
        self
    }

    /// Sets the distribution mode.
    #[must_use]
    pub fn distribution_mode(mut self, mode: DistributionMode) -> Self {
        self.config.distribution_mode = mode;
        self
    }

    /// Sets the number of writer tasks.
    #[must_use]
    pub fn write_parallelism(mut self, parallelism: usize) -> Self {
        self.config.write_parallelism = parallelism;
        self
    }

    /// Sets the branch to commit into.
    #[must_use]
    pub fn target_branch(mut self, branch: impl Into<String>) -> Self {
        self.config.target_branch = branch.into();
        self
    }

    /// Sets the job id recorded on committed snapshots.
    #[must_use]
    pub fn job_id(mut self, job_id: impl Into<String>) -> Self {
        self.config.job_id = job_id.into();
        self
    }

    /// Sets the RANGE routing split points.
    #[must_use]
    pub fn range_bounds(mut self, bounds: Vec<ScalarValue>) -> Self {
        self.config.range_bounds = bounds;
        self
    }

    /// Returns the configuration collected so far.
    #[must_use]
    pub fn sink_config(&self) -> &SinkConfig {
        &self.config
    }

    /// Runs every pre-flight check without touching the table.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Configuration` or `SinkError::DistributionConflict`
    /// for unsafe or malformed configurations.
    pub fn validate(&self) -> Result<()> {
        if self.config.target_branch.trim().is_empty() {
            return Err(SinkError::configuration("target branch must not be empty"));
        }
        if self.config.write_parallelism == 0 {
            return Err(SinkError::configuration(
                "write parallelism must be at least 1",
            ));
        }
        self.schema
            .resolve(self.partition_spec.source_columns(), "partition source")?;
        KeyProjector::new(&self.schema, &self.config.equality_field_columns)?;
        DistributionConfig::from_sink_config(&self.config, &self.partition_spec).validate()
    }

    /// Validates the configuration, restores commit history and opens the
    /// first checkpoint after the last one committed by this job.
    ///
    /// # Errors
    ///
    /// Returns a configuration error, or `SinkError::Store` if the commit
    /// history cannot be read.
    pub async fn build<S: TableStore + ?Sized>(self, store: Arc<S>) -> Result<ChangelogSink<S>> {
        self.validate()?;

        let router = TaskRouter::new(&self.schema, &self.partition_spec, &self.config)?;
        let projector = Arc::new(KeyProjector::new(
            &self.schema,
            &self.config.equality_field_columns,
        )?);
        let writers = (0..router.parallelism())
            .map(|task| TaskWriter::new(task, Arc::clone(&projector), self.config.upsert))
            .collect::<Result<Vec<_>>>()?;

        let mut coordinator =
            CommitCoordinator::new(store, CommitCoordinatorConfig::from_sink_config(&self.config));
        let restored = coordinator.restore().await?;

        tracing::info!(
            job_id = %self.config.job_id,
            branch = %self.config.target_branch,
            mode = %self.config.distribution_mode,
            parallelism = self.config.write_parallelism,
            upsert = self.config.upsert,
            equality_fields = ?self.config.equality_field_columns,
            "changelog sink started"
        );

        Ok(ChangelogSink {
            config: self.config,
            router,
            writers,
            coordinator,
            current_checkpoint: restored.map_or(1, |c| c + 1),
        })
    }
}

/// Checkpoint-aligned changelog sink for one table.
#[derive(Debug)]
pub struct ChangelogSink<S: TableStore + ?Sized> {
    config: SinkConfig,
    router: TaskRouter,
    writers: Vec<TaskWriter>,
    coordinator: CommitCoordinator<S>,
    current_checkpoint: u64,
}

impl ChangelogSink<dyn TableStore> {
    /// Starts building a sink for a table.
    #[must_use]
    pub fn builder(schema: TableSchema, partition_spec: PartitionSpec) -> ChangelogSinkBuilder {
        ChangelogSinkBuilder {
            schema,
            partition_spec,
            config: SinkConfig::default(),
        }
    }
}

impl<S: TableStore + ?Sized> ChangelogSink<S> {
    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Returns the id of the open checkpoint.
    #[must_use]
    pub fn current_checkpoint(&self) -> u64 {
        self.current_checkpoint
    }

    /// Returns the binding of the highest checkpoint committed by this job.
    #[must_use]
    pub fn last_binding(&self) -> Option<&CheckpointSnapshotBinding> {
        self.coordinator.last_binding()
    }

    /// Reads the checkpoint bindings committed by this job from the target
    /// branch.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Store` if the history cannot be read.
    pub async fn bindings(&self) -> Result<Vec<CheckpointSnapshotBinding>> {
        self.coordinator.bindings().await
    }

    /// Returns checkpoints waiting for a successful commit.
    #[must_use]
    pub fn pending_checkpoints(&self) -> Vec<u64> {
        self.coordinator.pending_checkpoints()
    }

    /// Routes a raw row to its writer task and folds it into the open
    /// checkpoint.
    ///
    /// # Errors
    ///
    /// Returns the classification, key or routing error of the row; the open
    /// checkpoint is then aborted on the affected task (on every task when
    /// the row cannot be routed).
    pub fn write(&mut self, raw: RawRow) -> Result<()> {
        let checkpoint_id = self.current_checkpoint;
        let task = match self.router.route_row(&raw.row) {
            Ok(task) => task,
            Err(err) => {
                for writer in &mut self.writers {
                    writer.abort(checkpoint_id);
                }
                return Err(err);
            }
        };
        match self.writers.get_mut(task) {
            Some(writer) => writer.write(checkpoint_id, raw),
            None => Err(SinkError::configuration(format!(
                "router picked task {task} outside write parallelism {}",
                self.writers.len()
            ))),
        }
    }

    /// Closes the open checkpoint, commits it and opens the next one.
    ///
    /// Earlier checkpoints that failed to commit are retried first.
    ///
    /// # Errors
    ///
    /// - `SinkError::CheckpointAborted` if any task failed during the
    ///   checkpoint; nothing of it is committed.
    /// - Any commit error; the checkpoint then stays pending.
    pub async fn complete_checkpoint(&mut self) -> Result<Vec<CommitReport>> {
        let checkpoint_id = self.current_checkpoint;
        self.current_checkpoint += 1;

        let mut deltas = Vec::with_capacity(self.writers.len());
        for writer in &mut self.writers {
            match writer.prepare_commit(checkpoint_id) {
                Ok(delta) => deltas.push(delta),
                Err(err) => {
                    self.discard(checkpoint_id);
                    return Err(err);
                }
            }
        }
        for delta in deltas {
            if let Err(err) = self.coordinator.register(delta) {
                self.discard(checkpoint_id);
                return Err(err);
            }
        }

        let reports = self.coordinator.commit_through(checkpoint_id).await?;
        if let Some(committed) = self.coordinator.max_committed_checkpoint() {
            for writer in &mut self.writers {
                writer.release_through(committed);
            }
        }
        Ok(reports)
    }

    /// Discards the open checkpoint on every task and opens the next one.
    pub fn abort_checkpoint(&mut self) {
        let checkpoint_id = self.current_checkpoint;
        self.current_checkpoint += 1;
        self.discard(checkpoint_id);
    }

    fn discard(&mut self, checkpoint_id: u64) {
        for writer in &mut self.writers {
            writer.abort(checkpoint_id);
        }
        self.coordinator.abort(checkpoint_id);
    }
}
