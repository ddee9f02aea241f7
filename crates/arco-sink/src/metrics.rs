//! Sink metrics.
//!
//! Counters and histograms for row processing, checkpoint aborts and table
//! commits. They complement the structured logs emitted at the same points.

use metrics::{counter, describe_counter, describe_histogram, histogram};

use crate::row_event::RowKind;

// ============================================================================
// Row Metrics
// ============================================================================

/// Rows folded into checkpoint accumulators, labelled by kind.
pub const ROWS_TOTAL: &str = "arco_sink_rows_total";

/// Checkpoints discarded on a writer task.
pub const CHECKPOINTS_ABORTED: &str = "arco_sink_checkpoints_aborted_total";

// ============================================================================
// Commit Metrics
// ============================================================================

/// Commit attempts rejected by the table store.
pub const COMMIT_CONFLICTS: &str = "arco_sink_commit_conflicts_total";

/// Checkpoints committed, labelled by outcome.
pub const COMMITS_TOTAL: &str = "arco_sink_commits_total";

/// Time from first commit attempt to a committed snapshot.
pub const COMMIT_DURATION: &str = "arco_sink_commit_duration_seconds";

/// Merges that found one key claimed by two tasks.
pub const OWNERSHIP_VIOLATIONS: &str = "arco_sink_ownership_violations_total";

// ============================================================================
// Metric Registration
// ============================================================================

/// Registers all sink metric descriptions.
///
/// Call this once at application startup after initializing the metrics recorder.
pub fn register_metrics() {
    describe_counter!(ROWS_TOTAL, "Total change rows accumulated by kind");
    describe_counter!(CHECKPOINTS_ABORTED, "Total checkpoints aborted on a writer task");
    describe_counter!(COMMIT_CONFLICTS, "Total commit attempts rejected by a conflict");
    describe_counter!(COMMITS_TOTAL, "Total checkpoint commits by outcome");
    describe_histogram!(COMMIT_DURATION, "Duration of checkpoint commits in seconds");
    describe_counter!(OWNERSHIP_VIOLATIONS, "Total equality keys claimed by two tasks");
}

// ============================================================================
// Metric Recording
// ============================================================================

/// Records one accumulated row.
pub fn record_row(kind: RowKind) {
    counter!(ROWS_TOTAL, "kind" => kind.short_string()).increment(1);
}

/// Records a checkpoint abort on a task.
pub fn record_checkpoint_aborted(task: usize) {
    counter!(CHECKPOINTS_ABORTED, "task" => task.to_string()).increment(1);
}

/// Records a rejected commit attempt.
pub fn record_commit_conflict(branch: &str) {
    counter!(COMMIT_CONFLICTS, "branch" => branch.to_string()).increment(1);
}

/// Records a finished checkpoint commit.
///
/// `outcome` is `committed`, `skipped_empty` or `failed`.
pub fn record_commit(branch: &str, outcome: &'static str, duration_secs: f64) {
    let labels = [("branch", branch.to_string()), ("outcome", outcome.to_string())];

    counter!(COMMITS_TOTAL, &labels).increment(1);
    histogram!(COMMIT_DURATION, &labels).record(duration_secs);
}

/// Records an ownership violation found while merging task deltas.
pub fn record_ownership_violation() {
    counter!(OWNERSHIP_VIOLATIONS).increment(1);
}
