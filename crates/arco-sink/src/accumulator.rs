//! Per-task, per-checkpoint change accumulation.
//!
//! Each writer task folds the events of one open checkpoint into a map from
//! [`EqualityKey`] to its current [`Disposition`]. The fold is last-writer-wins
//! by arrival order: a key ends the checkpoint either inserted with its last
//! payload or deleted, never both.
//!
//! # Output Delta
//!
//! ```text
//!   final disposition                 insert artifact   equality delete
//!   Insert { replaces_existing: no }  row               -
//!   Insert { replaces_existing: yes } row               key
//!   Delete { .. }                     -                 key
//! ```
//!
//! Equality deletes only remove rows committed by earlier checkpoints, so a
//! key that was deleted and then re-inserted in the same checkpoint emits the
//! insert together with a delete of its previously committed row. A delete
//! that only cancels an insert made earlier in the same checkpoint does not
//! retract the committed row, so a later re-insert appends alongside it.

use std::collections::BTreeMap;
use std::sync::Arc;

use arco_core::Row;

use crate::error::{Result, SinkError};
use crate::key::{EqualityDelete, EqualityKey, KeyProjector};
use crate::metrics;
use crate::row_event::{RowEvent, RowKind};

/// Resolved state of one key within a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The key ends the checkpoint holding `row`.
    Insert {
        /// Full row payload to write.
        row: Row,
        /// Whether a committed row with the same key must be removed first.
        replaces_existing: bool,
    },
    /// The key ends the checkpoint deleted.
    Delete {
        /// Whether the delete reached a row committed by an earlier
        /// checkpoint rather than only cancelling an in-checkpoint insert.
        retracts_committed: bool,
    },
}

impl Disposition {
    /// Folds one event into the prior disposition of its key.
    ///
    /// `INSERT`/`UPDATE_AFTER` produce an insert and `DELETE`/`UPDATE_BEFORE`
    /// a delete, whatever came before. An insert replaces committed rows when
    /// upsert is enabled or when an earlier event in the checkpoint already
    /// retracted the committed row. A delete following a non-replacing insert
    /// only cancels that insert.
    #[must_use]
    pub fn transition(prior: Option<&Self>, kind: RowKind, row: Row, upsert: bool) -> Self {
        if kind.is_retraction() {
            return Self::Delete {
                retracts_committed: prior.is_none_or(Self::retracts_committed),
            };
        }
        let replaces_existing = upsert || prior.is_some_and(Self::retracts_committed);
        Self::Insert {
            row,
            replaces_existing,
        }
    }

    /// Returns true for insert dispositions.
    #[must_use]
    pub fn is_insert(&self) -> bool {
        matches!(self, Self::Insert { .. })
    }

    /// Returns true if the key's committed row is gone by this point of the
    /// checkpoint.
    #[must_use]
    pub fn retracts_committed(&self) -> bool {
        match self {
            Self::Insert {
                replaces_existing, ..
            } => *replaces_existing,
            Self::Delete { retracts_committed } => *retracts_committed,
        }
    }

    /// Returns true if the disposition emits an equality delete.
    ///
    /// Every final delete emits one; applying it to a key with no committed
    /// row is a no-op.
    #[must_use]
    pub fn emits_equality_delete(&self) -> bool {
        match self {
            Self::Insert {
                replaces_existing, ..
            } => *replaces_existing,
            Self::Delete { .. } => true,
        }
    }

    /// Returns the row to insert, if any.
    #[must_use]
    pub fn row(&self) -> Option<&Row> {
        match self {
            Self::Insert { row, .. } => Some(row),
            Self::Delete { .. } => None,
        }
    }
}

/// Open state of one checkpoint on one writer task.
#[derive(Debug)]
pub struct CheckpointAccumulator {
    checkpoint_id: u64,
    task: usize,
    projector: Arc<KeyProjector>,
    upsert: bool,
    dispositions: BTreeMap<EqualityKey, Disposition>,
}

impl CheckpointAccumulator {
    /// Opens an empty accumulator.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if upsert is enabled without equality
    /// fields; a full-row key gives upsert nothing to replace by.
    pub fn new(
        checkpoint_id: u64,
        task: usize,
        projector: Arc<KeyProjector>,
        upsert: bool,
    ) -> Result<Self> {
        if upsert && projector.is_full_row() {
            return Err(SinkError::configuration(
                "upsert mode requires equality field columns",
            ));
        }
        Ok(Self {
            checkpoint_id,
            task,
            projector,
            upsert,
            dispositions: BTreeMap::new(),
        })
    }

    /// Returns the checkpoint this accumulator belongs to.
    #[must_use]
    pub fn checkpoint_id(&self) -> u64 {
        self.checkpoint_id
    }

    /// Folds one event into the per-key state.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::KeyExtraction` if no key can be derived; the
    /// accumulator is left unchanged.
    pub fn apply(&mut self, event: RowEvent) -> Result<()> {
        let key = self.projector.project(&event)?;
        let kind = event.kind();
        tracing::trace!(
            checkpoint_id = self.checkpoint_id,
            task = self.task,
            kind = %kind,
            key = %key,
            "accumulating row event"
        );

        let next = Disposition::transition(
            self.dispositions.get(&key),
            kind,
            event.into_row(),
            self.upsert,
        );
        self.dispositions.insert(key, next);
        metrics::record_row(kind);
        Ok(())
    }

    /// Returns the number of keys with a disposition.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dispositions.len()
    }

    /// Returns true if no event has been applied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dispositions.is_empty()
    }

    /// Returns the current disposition of `key`.
    #[must_use]
    pub fn disposition(&self, key: &EqualityKey) -> Option<&Disposition> {
        self.dispositions.get(key)
    }

    /// Closes the window and yields its final per-key dispositions.
    #[must_use]
    pub fn finish(self) -> LogicalDelta {
        LogicalDelta {
            projector: self.projector,
            dispositions: self.dispositions,
        }
    }
}

/// Final per-key dispositions of one task for one checkpoint.
#[derive(Debug, Clone)]
pub struct LogicalDelta {
    projector: Arc<KeyProjector>,
    dispositions: BTreeMap<EqualityKey, Disposition>,
}

impl LogicalDelta {
    /// Creates an empty delta for `projector`.
    #[must_use]
    pub fn empty(projector: Arc<KeyProjector>) -> Self {
        Self {
            projector,
            dispositions: BTreeMap::new(),
        }
    }

    /// Returns the final dispositions in key order.
    #[must_use]
    pub fn dispositions(&self) -> &BTreeMap<EqualityKey, Disposition> {
        &self.dispositions
    }

    /// Returns the keys touched in this checkpoint.
    pub fn keys(&self) -> impl Iterator<Item = &EqualityKey> {
        self.dispositions.keys()
    }

    /// Returns the rows to insert, in key order.
    #[must_use]
    pub fn inserts(&self) -> Vec<Row> {
        self.dispositions
            .values()
            .filter_map(Disposition::row)
            .cloned()
            .collect()
    }

    /// Returns the equality deletes to apply, in key order.
    #[must_use]
    pub fn equality_deletes(&self) -> Vec<EqualityDelete> {
        self.dispositions
            .iter()
            .filter(|(_, d)| d.emits_equality_delete())
            .map(|(key, _)| EqualityDelete::new(&self.projector, key.clone()))
            .collect()
    }

    /// Returns the number of insert artifacts.
    #[must_use]
    pub fn insert_count(&self) -> usize {
        self.dispositions.values().filter(|d| d.is_insert()).count()
    }

    /// Returns the number of equality delete artifacts.
    #[must_use]
    pub fn delete_count(&self) -> usize {
        self.dispositions
            .values()
            .filter(|d| d.emits_equality_delete())
            .count()
    }

    /// Returns true if the delta carries no artifacts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dispositions.is_empty()
    }
}
