//! Error types for `arco-sink`.
//!
//! Variants follow the sink's failure taxonomy: configuration errors are fatal
//! and surface before any row is processed, classification and key errors
//! abort one task's checkpoint, commit conflicts are retried at the
//! coordinator, and ownership violations are unrecoverable consistency faults.

/// Result type for sink operations.
pub type Result<T> = std::result::Result<T, SinkError>;

/// Sink-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The pipeline configuration is invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Human-readable error details.
        message: String,
    },

    /// Partition source columns are not covered by the equality fields.
    ///
    /// Rows sharing an equality key could be split across writer tasks (or
    /// partitions), so per-key dispositions would no longer be authoritative.
    #[error(
        "in {rule} with equality fields set, source column(s) {missing_columns:?} of the partition spec should be included in equality fields: {equality_fields:?}"
    )]
    DistributionConflict {
        /// The rule that was violated (e.g. `'hash' distribution mode`).
        rule: &'static str,
        /// Partition source columns missing from the equality fields.
        missing_columns: Vec<String>,
        /// The configured equality field columns.
        equality_fields: Vec<String>,
    },

    /// A raw row carried a change-kind marker that is not recognized.
    #[error("unrecognized row kind marker: {marker}")]
    UnrecognizedRowKind {
        /// The offending marker.
        marker: String,
    },

    /// An equality key could not be derived from a row.
    #[error("key extraction failed: {message}")]
    KeyExtraction {
        /// Human-readable error details.
        message: String,
    },

    /// A checkpoint was aborted for a task; no partial delta survives.
    #[error("checkpoint {checkpoint_id} aborted on task {task}: {reason}")]
    CheckpointAborted {
        /// The aborted checkpoint.
        checkpoint_id: u64,
        /// The writer task that aborted it.
        task: usize,
        /// Why the checkpoint was aborted.
        reason: String,
    },

    /// A write targeted a checkpoint window that is already closed.
    #[error("checkpoint {checkpoint_id} is already closed on task {task}")]
    CheckpointClosed {
        /// The closed checkpoint.
        checkpoint_id: u64,
        /// The writer task that rejected the write.
        task: usize,
    },

    /// Not every writer task has handed off its delta for a checkpoint.
    #[error("checkpoint {checkpoint_id} is missing deltas from tasks {missing_tasks:?}")]
    IncompleteCheckpoint {
        /// The incomplete checkpoint.
        checkpoint_id: u64,
        /// Tasks that have not registered a delta.
        missing_tasks: Vec<usize>,
    },

    /// Two tasks produced a disposition for the same equality key.
    ///
    /// Indicates that the distribution validation was bypassed; the merged
    /// delta cannot be trusted and is never committed.
    #[error(
        "checkpoint {checkpoint_id}: equality key {key} claimed by tasks {first_task} and {second_task}"
    )]
    OwnershipViolation {
        /// The checkpoint whose merge failed.
        checkpoint_id: u64,
        /// Display form of the contested key.
        key: String,
        /// First task holding a disposition for the key.
        first_task: usize,
        /// Second task holding a disposition for the key.
        second_task: usize,
    },

    /// The table store rejected a commit because of a concurrent change.
    #[error("commit conflict: {message}")]
    CommitConflict {
        /// Human-readable conflict details.
        message: String,
    },

    /// A checkpoint's commit kept conflicting until the retry budget ran out.
    #[error("checkpoint {checkpoint_id} failed to commit after {attempts} attempts")]
    CommitRetriesExhausted {
        /// The checkpoint that could not be committed.
        checkpoint_id: u64,
        /// Number of commit attempts made.
        attempts: u32,
    },

    /// A checkpoint was offered for commit after a later one was committed.
    #[error("checkpoint {checkpoint_id} is not after last committed checkpoint {last_committed}")]
    OutOfOrderCheckpoint {
        /// The rejected checkpoint.
        checkpoint_id: u64,
        /// The highest checkpoint already committed.
        last_committed: u64,
    },

    /// A table store operation failed.
    #[error(transparent)]
    Store(#[from] arco_core::Error),
}

impl SinkError {
    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a key extraction error.
    #[must_use]
    pub fn key_extraction(message: impl Into<String>) -> Self {
        Self::KeyExtraction {
            message: message.into(),
        }
    }

    /// Creates a commit conflict error.
    #[must_use]
    pub fn commit_conflict(message: impl Into<String>) -> Self {
        Self::CommitConflict {
            message: message.into(),
        }
    }

    /// Returns true if retrying the same operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CommitConflict { .. })
    }

    /// Returns true for errors raised while validating the pipeline configuration.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::DistributionConflict { .. }
        )
    }
}
