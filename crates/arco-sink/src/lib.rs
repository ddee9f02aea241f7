//! # arco-sink
//!
//! Checkpoint-aligned changelog reconciliation for Arco tables.
//!
//! A changelog stream of `+I`, `-D`, `-U` and `+U` row events is folded per
//! checkpoint into equality-key dispositions and committed as exactly one
//! table snapshot per checkpoint:
//!
//! - **Classification**: raw change markers become [`RowKind`]s
//! - **Equality Keys**: rows are projected onto the configured identity columns
//! - **Distribution Safety**: configurations that could split a key across
//!   writer tasks are rejected before any row flows
//! - **Accumulation**: last-writer-wins per key, with upsert normalization
//! - **Commit Coordination**: task deltas are merged, ownership-checked and
//!   committed with conflict retries
//! - **Snapshot Filtering**: readers map checkpoints to data-bearing snapshots
//!
//! ## Data Flow
//!
//! ```text
//!   RawRow ──► TaskRouter ──► TaskWriter[task]
//!                               │ classify → key → CheckpointAccumulator
//!                               ▼
//!                        prepare_commit(N) ──► TaskDelta
//!                                                 │
//!   CommitCoordinator ◄───────────────────────────┘
//!     merge (ownership check) ──► TableStore::commit ──► Snapshot(N)
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod accumulator;
pub mod config;
pub mod coordinator;
pub mod distribution;
pub mod error;
pub mod handoff;
pub mod key;
pub mod metrics;
pub mod row_event;
pub mod schema;
pub mod sink;
pub mod snapshot;
pub mod store;
pub mod writer;

// Re-export main types at crate root
pub use accumulator::{CheckpointAccumulator, Disposition, LogicalDelta};
pub use config::{DistributionMode, SinkConfig};
pub use coordinator::{CommitCoordinator, CommitCoordinatorConfig, CommitReport};
pub use distribution::{DistributionConfig, TaskRouter};
pub use error::{Result, SinkError};
pub use handoff::{CheckpointDeltas, MergedDelta, TaskDelta};
pub use key::{EqualityDelete, EqualityKey, KeyProjector};
pub use row_event::{RawRow, RowEvent, RowKind, classify};
pub use schema::{PartitionSpec, TableSchema};
pub use sink::{ChangelogSink, ChangelogSinkBuilder};
pub use snapshot::{
    CheckpointSnapshotBinding, ManifestContent, ManifestFile, Snapshot, SnapshotOperation,
};
pub use store::{CommitOutcome, CommitRequest, MemoryTableStore, TableStore};
pub use writer::TaskWriter;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{DistributionMode, SinkConfig};
    pub use crate::error::{Result, SinkError};
    pub use crate::row_event::{RawRow, RowKind};
    pub use crate::schema::{PartitionSpec, TableSchema};
    pub use crate::sink::ChangelogSink;
    pub use crate::store::{MemoryTableStore, TableStore};
}
