//! Equality key extraction.
//!
//! An [`EqualityKey`] is a row projected onto the configured equality field
//! columns, in configuration order. With no equality fields every column takes
//! part, so a delete has to match the full row.
//!
//! Keys compare and hash structurally. [`EqualityKey::routing_hash`] is derived
//! from the canonical encoding, so independent writer tasks (and processes)
//! agree on it.

use std::fmt;

use arco_core::row::canonical_join;
use arco_core::{Row, ScalarValue, stable_hash64};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SinkError};
use crate::row_event::RowEvent;
use crate::schema::TableSchema;

/// Identity of a row for upsert/delete matching.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EqualityKey(Vec<ScalarValue>);

impl EqualityKey {
    /// Creates a key from already-projected values.
    #[must_use]
    pub fn new(values: Vec<ScalarValue>) -> Self {
        Self(values)
    }

    /// Returns the key values in equality field order.
    #[must_use]
    pub fn values(&self) -> &[ScalarValue] {
        &self.0
    }

    /// Returns the canonical string of the key.
    #[must_use]
    pub fn canonical_string(&self) -> String {
        canonical_join(&self.0)
    }

    /// Returns a process-independent hash used for task routing.
    #[must_use]
    pub fn routing_hash(&self) -> u64 {
        stable_hash64(self.canonical_string().as_bytes())
    }
}

impl fmt::Display for EqualityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Row::new(self.0.clone()))
    }
}

/// Projects rows onto the equality field columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyProjector {
    columns: Vec<String>,
    positions: Vec<usize>,
    arity: usize,
    full_row: bool,
}

impl KeyProjector {
    /// Builds a projector for `equality_columns` over `schema`.
    ///
    /// An empty column list selects every schema column.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a column is missing from the schema or
    /// listed twice.
    pub fn new(schema: &TableSchema, equality_columns: &[String]) -> Result<Self> {
        for (i, name) in equality_columns.iter().enumerate() {
            if equality_columns[..i].contains(name) {
                return Err(SinkError::configuration(format!(
                    "equality field column '{name}' is listed more than once"
                )));
            }
        }

        if equality_columns.is_empty() {
            return Ok(Self {
                columns: schema.columns().to_vec(),
                positions: (0..schema.len()).collect(),
                arity: schema.len(),
                full_row: true,
            });
        }

        let positions = schema.resolve(equality_columns, "equality field")?;
        Ok(Self {
            columns: equality_columns.to_vec(),
            positions,
            arity: schema.len(),
            full_row: false,
        })
    }

    /// Returns the columns that make up a key, in key order.
    #[must_use]
    pub fn key_columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the schema positions of the key columns, in key order.
    #[must_use]
    pub fn key_positions(&self) -> &[usize] {
        &self.positions
    }

    /// Returns true when no equality fields are configured.
    #[must_use]
    pub fn is_full_row(&self) -> bool {
        self.full_row
    }

    /// Derives the key of an event.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::KeyExtraction` if the row does not match the schema arity.
    pub fn project(&self, event: &RowEvent) -> Result<EqualityKey> {
        self.project_row(event.row())
    }

    /// Derives the key of a bare row.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::KeyExtraction` if the row does not match the schema arity.
    pub fn project_row(&self, row: &Row) -> Result<EqualityKey> {
        row.check_arity(self.arity)
            .and_then(|()| row.project(&self.positions))
            .map(EqualityKey)
            .map_err(|e| SinkError::key_extraction(e.to_string()))
    }
}

/// Equality-predicate delete: removes every committed row whose key columns
/// equal the given values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EqualityDelete {
    columns: Vec<String>,
    positions: Vec<usize>,
    key: EqualityKey,
}

impl EqualityDelete {
    /// Creates a delete predicate for `key` using the projector's columns.
    #[must_use]
    pub fn new(projector: &KeyProjector, key: EqualityKey) -> Self {
        Self {
            columns: projector.key_columns().to_vec(),
            positions: projector.key_positions().to_vec(),
            key,
        }
    }

    /// Returns the equality field columns the predicate compares.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the key values the predicate matches.
    #[must_use]
    pub fn key(&self) -> &EqualityKey {
        &self.key
    }

    /// Returns true if `row` is removed by this predicate.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        self.positions.len() == self.key.0.len()
            && self
                .positions
                .iter()
                .zip(&self.key.0)
                .all(|(&pos, value)| row.get(pos) == Some(value))
    }
}
