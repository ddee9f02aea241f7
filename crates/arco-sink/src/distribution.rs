//! Distribution validation and task routing.
//!
//! Per-key dispositions are only authoritative if every row of a key lands on
//! the same writer task. [`DistributionConfig::validate`] proves that from
//! configuration before any row flows; [`TaskRouter`] picks the task for each
//! row under the validated configuration. The shuffle itself belongs to the
//! stream runtime.

use arco_core::row::canonical_join;
use arco_core::{Row, ScalarValue, stable_hash64};

use crate::config::{DistributionMode, SinkConfig};
use crate::error::{Result, SinkError};
use crate::key::KeyProjector;
use crate::schema::{PartitionSpec, TableSchema};

/// Distribution settings checked once at pipeline construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionConfig {
    /// Routing strategy.
    pub mode: DistributionMode,
    /// Partition source columns (the HASH columns for partitioned tables).
    pub partition_columns: Vec<String>,
    /// Ordered equality field columns; empty means full-row identity.
    pub equality_columns: Vec<String>,
    /// Whether upsert mode is enabled.
    pub upsert: bool,
}

impl DistributionConfig {
    /// Builds the distribution settings of a sink.
    #[must_use]
    pub fn from_sink_config(config: &SinkConfig, partition_spec: &PartitionSpec) -> Self {
        Self {
            mode: config.distribution_mode,
            partition_columns: partition_spec.source_columns().to_vec(),
            equality_columns: config.equality_field_columns.clone(),
            upsert: config.upsert,
        }
    }

    /// Rejects configurations that could split one key across writers.
    ///
    /// # Errors
    ///
    /// - `SinkError::Configuration` if upsert is enabled without equality fields.
    /// - `SinkError::DistributionConflict` if HASH mode (with equality fields)
    ///   or upsert mode runs on a partitioned table whose partition source
    ///   columns are not all equality fields.
    pub fn validate(&self) -> Result<()> {
        if self.upsert && self.equality_columns.is_empty() {
            tracing::warn!("rejecting upsert mode without equality fields");
            return Err(SinkError::configuration(
                "equality field columns shouldn't be empty when configuring to use upsert data stream",
            ));
        }

        let missing = self.partition_columns_outside_key();

        if self.mode == DistributionMode::Hash
            && !self.equality_columns.is_empty()
            && !missing.is_empty()
        {
            return Err(self.conflict("'hash' distribution mode", missing));
        }

        if self.upsert && !missing.is_empty() {
            return Err(self.conflict("upsert mode", missing));
        }

        if self.mode == DistributionMode::Range && self.upsert {
            // Range routing gives no key colocation guarantee of its own.
            tracing::warn!(
                equality_fields = ?self.equality_columns,
                "upsert with 'range' distribution mode is not validated for key colocation"
            );
        }

        Ok(())
    }

    fn partition_columns_outside_key(&self) -> Vec<String> {
        if self.equality_columns.is_empty() {
            return Vec::new();
        }
        self.partition_columns
            .iter()
            .filter(|c| !self.equality_columns.contains(c))
            .cloned()
            .collect()
    }

    fn conflict(&self, rule: &'static str, missing_columns: Vec<String>) -> SinkError {
        tracing::warn!(
            rule,
            missing = ?missing_columns,
            equality_fields = ?self.equality_columns,
            "rejecting distribution configuration"
        );
        SinkError::DistributionConflict {
            rule,
            missing_columns,
            equality_fields: self.equality_columns.clone(),
        }
    }
}

#[derive(Debug, Clone)]
enum Strategy {
    Key,
    Columns(Vec<usize>),
    Range {
        position: usize,
        bounds: Vec<ScalarValue>,
    },
}

/// Picks the writer task for each row.
///
/// - NONE: hash of the equality key.
/// - HASH: hash of the partition source values on partitioned tables,
///   otherwise hash of the equality key.
/// - RANGE: with equality fields set, falls back to the equality key hash;
///   in full-row mode the task is the number of range bounds not above the
///   value of the first partition column (or first schema column).
#[derive(Debug, Clone)]
pub struct TaskRouter {
    strategy: Strategy,
    projector: KeyProjector,
    parallelism: usize,
}

impl TaskRouter {
    /// Creates a router for `parallelism` writer tasks.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `parallelism` is zero or a partition
    /// column is missing from the schema.
    pub fn new(
        schema: &TableSchema,
        partition_spec: &PartitionSpec,
        config: &SinkConfig,
    ) -> Result<Self> {
        if config.write_parallelism == 0 {
            return Err(SinkError::configuration(
                "write parallelism must be at least 1",
            ));
        }
        let projector = KeyProjector::new(schema, &config.equality_field_columns)?;
        let partition_positions =
            schema.resolve(partition_spec.source_columns(), "partition source")?;

        let strategy = match config.distribution_mode {
            DistributionMode::None => Strategy::Key,
            DistributionMode::Hash if partition_positions.is_empty() => Strategy::Key,
            DistributionMode::Hash => Strategy::Columns(partition_positions),
            DistributionMode::Range if !projector.is_full_row() => {
                tracing::warn!(
                    equality_fields = ?config.equality_field_columns,
                    "'range' distribution mode with equality fields set; routing rows by equality key"
                );
                Strategy::Key
            }
            DistributionMode::Range => {
                let mut bounds = config.range_bounds.clone();
                bounds.sort();
                Strategy::Range {
                    position: partition_positions.first().copied().unwrap_or(0),
                    bounds,
                }
            }
        };

        Ok(Self {
            strategy,
            projector,
            parallelism: config.write_parallelism,
        })
    }

    /// Returns the number of writer tasks.
    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Routes a bare row.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::KeyExtraction` if the row does not fit the schema.
    pub fn route_row(&self, row: &Row) -> Result<usize> {
        match &self.strategy {
            Strategy::Key => {
                let key = self.projector.project_row(row)?;
                Ok(self.bucket(key.routing_hash()))
            }
            Strategy::Columns(positions) => {
                let values = row
                    .project(positions)
                    .map_err(|e| SinkError::key_extraction(e.to_string()))?;
                Ok(self.bucket(stable_hash64(canonical_join(&values).as_bytes())))
            }
            Strategy::Range { position, bounds } => {
                let value = row.get(*position).ok_or_else(|| {
                    SinkError::key_extraction(format!(
                        "range column position {position} out of range for row {row}"
                    ))
                })?;
                let range = bounds.partition_point(|bound| bound <= value);
                Ok(range.min(self.parallelism - 1))
            }
        }
    }

    fn bucket(&self, hash: u64) -> usize {
        // parallelism >= 1, so the modulus always fits back into usize.
        let parallelism = u64::try_from(self.parallelism).unwrap_or(u64::MAX);
        usize::try_from(hash % parallelism).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(
        mode: DistributionMode,
        partition: &[&str],
        equality: &[&str],
        upsert: bool,
    ) -> DistributionConfig {
        DistributionConfig {
            mode,
            partition_columns: partition.iter().map(ToString::to_string).collect(),
            equality_columns: equality.iter().map(ToString::to_string).collect(),
            upsert,
        }
    }

    fn schema() -> TableSchema {
        TableSchema::new(["id", "data"]).unwrap()
    }

    fn row(id: i64, data: &str) -> Row {
        Row::from_values([ScalarValue::Int64(id), ScalarValue::from(data)])
    }

    #[test]
    fn test_hash_partition_column_outside_key_rejected() {
        let err = config(DistributionMode::Hash, &["id"], &["data"], false)
            .validate()
            .unwrap_err();
        match err {
            SinkError::DistributionConflict {
                missing_columns,
                equality_fields,
                ..
            } => {
                assert_eq!(missing_columns, vec!["id"]);
                assert_eq!(equality_fields, vec!["data"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_hash_error_message_names_rule_and_fields() {
        let err = config(DistributionMode::Hash, &["data"], &["id"], false)
            .validate()
            .unwrap_err()
            .to_string();
        assert!(
            err.starts_with("in 'hash' distribution mode with equality fields set, source column")
        );
        assert!(err.contains("should be included in equality fields:"));
    }

    #[test]
    fn test_hash_without_equality_fields_passes() {
        config(DistributionMode::Hash, &["data"], &[], false)
            .validate()
            .unwrap();
    }

    #[test]
    fn test_hash_with_covered_partition_passes() {
        config(DistributionMode::Hash, &["data"], &["id", "data"], true)
            .validate()
            .unwrap();
    }

    #[test]
    fn test_upsert_requires_equality_fields() {
        let err = config(DistributionMode::None, &[], &[], true)
            .validate()
            .unwrap_err();
        assert!(matches!(err, SinkError::Configuration { .. }));
    }

    #[test]
    fn test_upsert_on_partitioned_table_checked_in_every_mode() {
        for mode in [DistributionMode::None, DistributionMode::Range] {
            let err = config(mode, &["data"], &["id"], true).validate().unwrap_err();
            assert!(
                matches!(err, SinkError::DistributionConflict { rule: "upsert mode", .. }),
                "{mode}"
            );
        }
    }

    #[test]
    fn test_range_without_upsert_is_not_checked() {
        config(DistributionMode::Range, &["data"], &["id"], false)
            .validate()
            .unwrap();
        config(DistributionMode::None, &["data"], &["id"], false)
            .validate()
            .unwrap();
    }

    #[test]
    fn test_router_keeps_key_on_one_task() {
        let sink = SinkConfig::default()
            .with_equality_fields(["id"])
            .with_distribution_mode(DistributionMode::None)
            .with_write_parallelism(4);
        let router = TaskRouter::new(&schema(), &PartitionSpec::unpartitioned(), &sink).unwrap();
        for id in 0..50 {
            let a = router.route_row(&row(id, "aaa")).unwrap();
            let b = router.route_row(&row(id, "zzz")).unwrap();
            assert_eq!(a, b);
            assert!(a < 4);
        }
    }

    #[test]
    fn test_hash_router_uses_partition_values() {
        let sink = SinkConfig::default()
            .with_equality_fields(["id", "data"])
            .with_distribution_mode(DistributionMode::Hash)
            .with_write_parallelism(8);
        let router =
            TaskRouter::new(&schema(), &PartitionSpec::by_columns(["data"]), &sink).unwrap();
        let first = router.route_row(&row(1, "aaa")).unwrap();
        for id in 2..20 {
            assert_eq!(router.route_row(&row(id, "aaa")).unwrap(), first);
        }
    }

    #[test]
    fn test_range_router_in_full_row_mode() {
        let sink = SinkConfig::default()
            .with_distribution_mode(DistributionMode::Range)
            .with_write_parallelism(3)
            .with_range_bounds(vec![ScalarValue::Int64(20), ScalarValue::Int64(10)]);
        let router = TaskRouter::new(&schema(), &PartitionSpec::unpartitioned(), &sink).unwrap();
        assert_eq!(router.route_row(&row(5, "a")).unwrap(), 0);
        assert_eq!(router.route_row(&row(10, "a")).unwrap(), 1);
        assert_eq!(router.route_row(&row(15, "a")).unwrap(), 1);
        assert_eq!(router.route_row(&row(25, "a")).unwrap(), 2);
    }

    #[test]
    fn test_range_router_without_bounds_uses_first_task() {
        let sink = SinkConfig::default()
            .with_distribution_mode(DistributionMode::Range)
            .with_write_parallelism(4);
        let router = TaskRouter::new(&schema(), &PartitionSpec::unpartitioned(), &sink).unwrap();
        for id in 0..10 {
            assert_eq!(router.route_row(&row(id, "x")).unwrap(), 0);
        }
    }

    #[test]
    fn test_range_router_clamps_to_last_task() {
        let sink = SinkConfig::default()
            .with_distribution_mode(DistributionMode::Range)
            .with_write_parallelism(2)
            .with_range_bounds(vec![
                ScalarValue::Int64(1),
                ScalarValue::Int64(2),
                ScalarValue::Int64(3),
            ]);
        let router = TaskRouter::new(&schema(), &PartitionSpec::unpartitioned(), &sink).unwrap();
        assert_eq!(router.route_row(&row(100, "x")).unwrap(), 1);
    }

    #[test]
    fn test_router_rejects_zero_parallelism_and_unknown_partition_column() {
        let zero = SinkConfig::default().with_write_parallelism(0);
        assert!(TaskRouter::new(&schema(), &PartitionSpec::unpartitioned(), &zero).is_err());

        let sink = SinkConfig::default();
        let err =
            TaskRouter::new(&schema(), &PartitionSpec::by_columns(["region"]), &sink).unwrap_err();
        assert!(err.is_configuration());
    }
}
