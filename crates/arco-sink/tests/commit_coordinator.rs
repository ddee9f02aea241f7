//! Commit coordination against the in-memory table store.
//!
//! Covers conflict retries, ownership checks between writer tasks, checkpoint
//! aborts and exactly-once replay after a restart.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use arco_core::{Row, ScalarValue};
use arco_sink::snapshot::{checkpoint_bindings, data_snapshots, snapshot_for_checkpoint};
use arco_sink::{
    ChangelogSink, CheckpointAccumulator, CommitCoordinator, CommitCoordinatorConfig,
    CommitReport, DistributionMode, KeyProjector, MemoryTableStore, PartitionSpec, RawRow,
    RowEvent, RowKind, SinkConfig, SinkError, TableSchema, TableStore, TaskDelta,
};

fn schema() -> TableSchema {
    TableSchema::new(["id", "data"]).unwrap()
}

fn row(id: i64, data: &str) -> Row {
    Row::from_values([ScalarValue::Int64(id), ScalarValue::from(data)])
}

fn sink_config(job_id: &str, parallelism: usize) -> SinkConfig {
    SinkConfig::default()
        .with_equality_fields(["id"])
        .with_upsert(true)
        .with_distribution_mode(DistributionMode::Hash)
        .with_write_parallelism(parallelism)
        .with_job_id(job_id)
        .with_max_commit_retries(3)
        .with_commit_retry_backoff_ms(1)
}

async fn build_sink(
    store: &Arc<MemoryTableStore>,
    config: SinkConfig,
) -> ChangelogSink<MemoryTableStore> {
    ChangelogSink::builder(schema(), PartitionSpec::unpartitioned())
        .config(config)
        .build(Arc::clone(store))
        .await
        .unwrap()
}

async fn head_rows(store: &MemoryTableStore) -> Vec<Row> {
    let head = store.head("main").await.unwrap().expect("head snapshot");
    let mut rows = store.scan(head.snapshot_id).await.unwrap();
    rows.sort();
    rows
}

fn task_delta(checkpoint_id: u64, task: usize, events: &[(RowKind, i64, &str)]) -> TaskDelta {
    let projector = Arc::new(KeyProjector::new(&schema(), &["id".to_string()]).unwrap());
    let mut acc = CheckpointAccumulator::new(checkpoint_id, task, projector, false).unwrap();
    for (kind, id, data) in events {
        acc.apply(RowEvent::new(*kind, row(*id, data))).unwrap();
    }
    TaskDelta {
        checkpoint_id,
        task,
        delta: acc.finish(),
    }
}

#[tokio::test]
async fn test_snapshot_per_checkpoint_skips_maintenance_snapshots() {
    let store = Arc::new(MemoryTableStore::new(schema()));
    let mut sink = build_sink(&store, sink_config("job-a", 4)).await;

    for checkpoint in 0..5_i64 {
        sink.write(RawRow::new("+I", row(checkpoint, "aaa"))).unwrap();
        sink.complete_checkpoint().await.unwrap();
        store.rewrite_manifests("main").unwrap();
    }

    let history = store.snapshots("main").await.unwrap();
    assert_eq!(history.len(), 10);
    assert_eq!(data_snapshots(&history).len(), 5);

    let bindings = checkpoint_bindings(&history, "job-a");
    let checkpoints: Vec<u64> = bindings.iter().map(|b| b.checkpoint_id).collect();
    assert_eq!(checkpoints, vec![1, 2, 3, 4, 5]);
    assert_eq!(sink.bindings().await.unwrap(), bindings);
    assert_eq!(sink.last_binding(), bindings.last());

    let third = snapshot_for_checkpoint(&history, "job-a", 3).unwrap();
    let mut rows = store.scan(third.snapshot_id).await.unwrap();
    rows.sort();
    assert_eq!(rows, vec![row(0, "aaa"), row(1, "aaa"), row(2, "aaa")]);
}

#[tokio::test]
async fn test_conflicts_are_retried_against_new_head() {
    let store = Arc::new(MemoryTableStore::new(schema()));
    let mut sink = build_sink(&store, sink_config("job-a", 2)).await;

    sink.write(RawRow::new("+I", row(1, "aaa"))).unwrap();
    sink.complete_checkpoint().await.unwrap();

    store.inject_conflicts(2).unwrap();
    sink.write(RawRow::new("+U", row(1, "bbb"))).unwrap();
    let reports = sink.complete_checkpoint().await.unwrap();
    assert!(matches!(
        reports.as_slice(),
        [CommitReport::Committed(binding)] if binding.checkpoint_id == 2
    ));

    assert_eq!(head_rows(&store).await, vec![row(1, "bbb")]);
    let history = store.snapshots("main").await.unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(data_snapshots(&history).len(), 2);
}

#[tokio::test]
async fn test_exhausted_retries_fail_checkpoint_and_keep_it_pending() {
    let store = Arc::new(MemoryTableStore::new(schema()));
    let mut sink = build_sink(&store, sink_config("job-a", 1)).await;

    sink.write(RawRow::new("+I", row(1, "aaa"))).unwrap();
    sink.complete_checkpoint().await.unwrap();

    store.inject_conflicts(4).unwrap();
    sink.write(RawRow::new("+I", row(2, "bbb"))).unwrap();
    let err = sink.complete_checkpoint().await.unwrap_err();
    assert!(matches!(
        err,
        SinkError::CommitRetriesExhausted {
            checkpoint_id: 2,
            attempts: 4
        }
    ));
    assert_eq!(sink.pending_checkpoints(), vec![2]);
    assert_eq!(head_rows(&store).await, vec![row(1, "aaa")]);

    sink.write(RawRow::new("+I", row(3, "ccc"))).unwrap();
    let reports = sink.complete_checkpoint().await.unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(
        head_rows(&store).await,
        vec![row(1, "aaa"), row(2, "bbb"), row(3, "ccc")]
    );
}

#[tokio::test]
async fn test_storage_failure_surfaces_and_checkpoint_commits_later() {
    let store = Arc::new(MemoryTableStore::new(schema()));
    let mut sink = build_sink(&store, sink_config("job-a", 2)).await;

    sink.write(RawRow::new("+I", row(1, "aaa"))).unwrap();
    sink.complete_checkpoint().await.unwrap();

    store.inject_failures(1).unwrap();
    sink.write(RawRow::new("+U", row(1, "bbb"))).unwrap();
    let err = sink.complete_checkpoint().await.unwrap_err();
    assert!(matches!(err, SinkError::Store(_)), "{err}");
    assert_eq!(sink.pending_checkpoints(), vec![2]);
    assert_eq!(head_rows(&store).await, vec![row(1, "aaa")]);
    assert_eq!(sink.last_binding().map(|b| b.checkpoint_id), Some(1));

    sink.write(RawRow::new("+I", row(2, "ccc"))).unwrap();
    let reports = sink.complete_checkpoint().await.unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(head_rows(&store).await, vec![row(1, "bbb"), row(2, "ccc")]);
    assert_eq!(sink.bindings().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_ownership_violation_is_never_committed() {
    let store = Arc::new(MemoryTableStore::new(schema()));
    let config = CommitCoordinatorConfig {
        branch: "main".to_string(),
        job_id: "job-a".to_string(),
        parallelism: 2,
        max_commit_retries: 1,
        retry_backoff: Duration::from_millis(1),
    };
    let mut coordinator = CommitCoordinator::new(Arc::clone(&store), config);

    coordinator
        .register(task_delta(1, 0, &[(RowKind::Insert, 1, "aaa")]))
        .unwrap();
    coordinator
        .register(task_delta(1, 1, &[(RowKind::Insert, 1, "bbb")]))
        .unwrap();

    let err = coordinator.commit_through(1).await.unwrap_err();
    assert!(matches!(
        err,
        SinkError::OwnershipViolation {
            checkpoint_id: 1,
            ..
        }
    ));
    assert!(store.head("main").await.unwrap().is_none());
    assert_eq!(coordinator.pending_checkpoints(), vec![1]);

    coordinator.abort(1);
    assert!(coordinator.commit_through(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_row_aborts_whole_checkpoint() {
    let store = Arc::new(MemoryTableStore::new(schema()));
    let mut sink = build_sink(&store, sink_config("job-a", 4)).await;

    sink.write(RawRow::new("+I", row(1, "aaa"))).unwrap();
    sink.write(RawRow::new("+I", row(2, "bbb"))).unwrap();
    let err = sink.write(RawRow::new("*X", row(3, "ccc"))).unwrap_err();
    assert!(matches!(err, SinkError::UnrecognizedRowKind { .. }));

    let err = sink.complete_checkpoint().await.unwrap_err();
    assert!(matches!(err, SinkError::CheckpointAborted { checkpoint_id: 1, .. }));
    assert!(store.head("main").await.unwrap().is_none());

    assert_eq!(sink.current_checkpoint(), 2);
    sink.write(RawRow::new("+I", row(4, "ddd"))).unwrap();
    sink.complete_checkpoint().await.unwrap();
    assert_eq!(head_rows(&store).await, vec![row(4, "ddd")]);
}

#[tokio::test]
async fn test_unroutable_row_aborts_checkpoint_on_every_task() {
    let store = Arc::new(MemoryTableStore::new(schema()));
    let mut sink = build_sink(&store, sink_config("job-a", 4)).await;

    sink.write(RawRow::new("+I", row(1, "aaa"))).unwrap();
    let short = Row::from_values([ScalarValue::Int64(9)]);
    assert!(matches!(
        sink.write(RawRow::new("+I", short)),
        Err(SinkError::KeyExtraction { .. })
    ));
    assert!(sink.complete_checkpoint().await.is_err());
    assert!(store.head("main").await.unwrap().is_none());
}

#[tokio::test]
async fn test_aborted_checkpoint_leaves_no_trace() {
    let store = Arc::new(MemoryTableStore::new(schema()));
    let mut sink = build_sink(&store, sink_config("job-a", 2)).await;

    sink.write(RawRow::new("+I", row(1, "aaa"))).unwrap();
    sink.abort_checkpoint();
    sink.write(RawRow::new("+I", row(2, "bbb"))).unwrap();
    let reports = sink.complete_checkpoint().await.unwrap();

    assert!(matches!(
        reports.as_slice(),
        [CommitReport::Committed(binding)] if binding.checkpoint_id == 2
    ));
    assert_eq!(head_rows(&store).await, vec![row(2, "bbb")]);
}

#[tokio::test]
async fn test_restart_resumes_after_last_committed_checkpoint() {
    let store = Arc::new(MemoryTableStore::new(schema()));
    {
        let mut sink = build_sink(&store, sink_config("job-a", 2)).await;
        sink.write(RawRow::new("+I", row(1, "aaa"))).unwrap();
        sink.complete_checkpoint().await.unwrap();
        sink.write(RawRow::new("+I", row(2, "bbb"))).unwrap();
        sink.complete_checkpoint().await.unwrap();
    }

    let mut restarted = build_sink(&store, sink_config("job-a", 2)).await;
    assert_eq!(restarted.current_checkpoint(), 3);
    assert_eq!(restarted.bindings().await.unwrap().len(), 2);
    assert_eq!(restarted.last_binding().map(|b| b.checkpoint_id), Some(2));

    restarted.write(RawRow::new("-D", row(1, "aaa"))).unwrap();
    restarted.complete_checkpoint().await.unwrap();
    assert_eq!(head_rows(&store).await, vec![row(2, "bbb")]);

    let other_job = build_sink(&store, sink_config("job-b", 2)).await;
    assert_eq!(other_job.current_checkpoint(), 1);
}

#[tokio::test]
async fn test_replayed_deltas_are_dropped_after_restore() {
    let store = Arc::new(MemoryTableStore::new(schema()));
    let config = CommitCoordinatorConfig {
        branch: "main".to_string(),
        job_id: "job-a".to_string(),
        parallelism: 1,
        max_commit_retries: 1,
        retry_backoff: Duration::from_millis(1),
    };

    let mut first = CommitCoordinator::new(Arc::clone(&store), config.clone());
    first
        .register(task_delta(1, 0, &[(RowKind::Insert, 1, "aaa")]))
        .unwrap();
    first.commit_through(1).await.unwrap();

    let mut second = CommitCoordinator::new(Arc::clone(&store), config);
    assert_eq!(second.restore().await.unwrap(), Some(1));
    second
        .register(task_delta(1, 0, &[(RowKind::Insert, 1, "aaa")]))
        .unwrap();
    assert!(second.pending_checkpoints().is_empty());
    assert!(second.commit_through(1).await.unwrap().is_empty());

    assert_eq!(head_rows(&store).await, vec![row(1, "aaa")]);
    assert_eq!(store.snapshots("main").await.unwrap().len(), 1);
}
