//! Pre-flight configuration checks.
//!
//! Unsafe distribution/equality-field combinations must be rejected at build
//! time, before the table store is touched or any row is accepted.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use arco_core::ScalarValue;
use arco_sink::{
    ChangelogSink, DistributionMode, MemoryTableStore, PartitionSpec, SinkConfig, SinkError,
    TableSchema, TableStore,
};

fn schema() -> TableSchema {
    TableSchema::new(["id", "data"]).unwrap()
}

#[tokio::test]
async fn test_hash_partition_column_outside_equality_fields_rejected() {
    for parallelism in 1..=8 {
        let store = Arc::new(MemoryTableStore::new(schema()));
        let err = ChangelogSink::builder(schema(), PartitionSpec::by_columns(["id"]))
            .distribution_mode(DistributionMode::Hash)
            .equality_field_columns(["data"])
            .write_parallelism(parallelism)
            .build(Arc::clone(&store))
            .await
            .unwrap_err();

        match &err {
            SinkError::DistributionConflict {
                missing_columns,
                equality_fields,
                ..
            } => {
                assert_eq!(missing_columns, &vec!["id".to_string()]);
                assert_eq!(equality_fields, &vec!["data".to_string()]);
            }
            other => panic!("unexpected error for parallelism {parallelism}: {other}"),
        }
        assert!(err.to_string().contains("\"id\""));
        assert!(err.is_configuration());
        assert!(store.head("main").await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_upsert_without_equality_fields_rejected() {
    let store = Arc::new(MemoryTableStore::new(schema()));
    let err = ChangelogSink::builder(schema(), PartitionSpec::unpartitioned())
        .upsert(true)
        .build(store)
        .await
        .unwrap_err();
    assert!(matches!(err, SinkError::Configuration { .. }));
}

#[tokio::test]
async fn test_unknown_equality_column_rejected() {
    let store = Arc::new(MemoryTableStore::new(schema()));
    let err = ChangelogSink::builder(schema(), PartitionSpec::unpartitioned())
        .equality_field_columns(["name"])
        .build(store)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("'name'"), "{err}");
}

#[tokio::test]
async fn test_unknown_partition_column_rejected() {
    let store = Arc::new(MemoryTableStore::new(schema()));
    let err = ChangelogSink::builder(schema(), PartitionSpec::by_columns(["region"]))
        .build(store)
        .await
        .unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_zero_parallelism_and_blank_branch_rejected() {
    let builder = ChangelogSink::builder(schema(), PartitionSpec::unpartitioned());
    assert!(builder.clone().write_parallelism(0).validate().is_err());
    assert!(builder.clone().target_branch(" ").validate().is_err());
    builder.validate().unwrap();
}

#[tokio::test]
async fn test_hash_without_equality_fields_on_partitioned_table_allowed() {
    let builder = ChangelogSink::builder(schema(), PartitionSpec::by_columns(["data"]))
        .distribution_mode(DistributionMode::Hash)
        .write_parallelism(4);
    builder.validate().unwrap();
}

#[tokio::test]
async fn test_range_with_upsert_on_unpartitioned_table_allowed() {
    let store = Arc::new(MemoryTableStore::new(schema()));
    let sink = ChangelogSink::builder(schema(), PartitionSpec::unpartitioned())
        .config(
            SinkConfig::default()
                .with_equality_fields(["id"])
                .with_upsert(true)
                .with_distribution_mode(DistributionMode::Range)
                .with_write_parallelism(2)
                .with_range_bounds(vec![ScalarValue::Int64(100)]),
        )
        .build(store)
        .await
        .unwrap();
    assert_eq!(sink.current_checkpoint(), 1);
}

#[tokio::test]
async fn test_upsert_on_partitioned_table_requires_partition_in_key() {
    for mode in [
        DistributionMode::None,
        DistributionMode::Hash,
        DistributionMode::Range,
    ] {
        let builder = ChangelogSink::builder(schema(), PartitionSpec::by_columns(["data"]))
            .distribution_mode(mode)
            .equality_field_columns(["id"])
            .upsert(true);
        assert!(
            matches!(
                builder.validate(),
                Err(SinkError::DistributionConflict { .. })
            ),
            "{mode}"
        );

        let covered = builder.equality_field_columns(["id", "data"]);
        covered.validate().unwrap();
    }
}
