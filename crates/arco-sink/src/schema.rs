//! Target table shape: ordered columns and the partition spec.
//!
//! Schema binding between the upstream row type and the table is handled
//! before rows reach the sink; here a schema is just the ordered column names
//! that give positional row values their meaning.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SinkError};

/// Ordered column names of the target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    columns: Vec<String>,
}

impl TableSchema {
    /// Creates a schema from ordered column names.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the schema is empty, a name is blank,
    /// or a name appears twice.
    pub fn new<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            return Err(SinkError::configuration(
                "table schema must have at least one column",
            ));
        }
        for (i, name) in columns.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(SinkError::configuration(format!(
                    "column {i} has an empty name"
                )));
            }
            if columns[..i].contains(name) {
                return Err(SinkError::configuration(format!(
                    "duplicate column '{name}' in table schema"
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Returns the column names in order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Always false; a schema has at least one column.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns the position of `name`, if it is a column.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Resolves column names to positions, preserving the given order.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first column that is not in
    /// the schema. `purpose` describes the columns in the message.
    pub fn resolve(&self, names: &[String], purpose: &str) -> Result<Vec<usize>> {
        names
            .iter()
            .map(|name| {
                self.position(name).ok_or_else(|| {
                    SinkError::configuration(format!(
                        "missing required {purpose} column '{name}' in table schema {:?}",
                        self.columns
                    ))
                })
            })
            .collect()
    }
}

/// Partition spec of the target table.
///
/// Only the partition source columns matter to the sink: they decide HASH
/// routing and which columns must be part of row identity. Transforms applied
/// on top of them belong to the table store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PartitionSpec {
    source_columns: Vec<String>,
}

impl PartitionSpec {
    /// Creates an unpartitioned spec.
    #[must_use]
    pub fn unpartitioned() -> Self {
        Self::default()
    }

    /// Creates a spec partitioned by the given source columns.
    pub fn by_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source_columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if the table has no partition fields.
    #[must_use]
    pub fn is_unpartitioned(&self) -> bool {
        self.source_columns.is_empty()
    }

    /// Returns the partition source columns in spec order.
    #[must_use]
    pub fn source_columns(&self) -> &[String] {
        &self.source_columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_preserves_order() {
        let schema = TableSchema::new(["id", "data"]).unwrap();
        let positions = schema
            .resolve(&["data".to_string(), "id".to_string()], "equality field")
            .unwrap();
        assert_eq!(positions, vec![1, 0]);
    }

    #[test]
    fn test_resolve_unknown_column() {
        let schema = TableSchema::new(["id", "data"]).unwrap();
        let err = schema
            .resolve(&["name".to_string()], "equality field")
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("'name'"));
    }

    #[test]
    fn test_duplicate_column_rejected() {
        assert!(TableSchema::new(["id", "id"]).is_err());
        assert!(TableSchema::new(Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_partition_spec() {
        assert!(PartitionSpec::unpartitioned().is_unpartitioned());
        let spec = PartitionSpec::by_columns(["data"]);
        assert!(!spec.is_unpartitioned());
        assert_eq!(spec.source_columns(), &["data".to_string()]);
    }
}
