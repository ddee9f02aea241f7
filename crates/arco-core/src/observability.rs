//! Observability infrastructure for Arco.
//!
//! Structured logging with consistent spans. Checkpoint processing and table
//! commits each get a span constructor so log lines carry the checkpoint id,
//! task index and branch they belong to.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `arco_sink=debug`)
///
/// # Example
///
/// ```rust
/// use arco_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for per-task checkpoint processing.
///
/// # Example
///
/// ```rust
/// use arco_core::observability::checkpoint_span;
///
/// let span = checkpoint_span("prepare_commit", 7, 0);
/// let _guard = span.enter();
/// // ... fold events / flush the task delta
/// ```
#[must_use]
pub fn checkpoint_span(operation: &str, checkpoint_id: u64, task: usize) -> Span {
    tracing::info_span!(
        "checkpoint",
        op = operation,
        checkpoint_id = checkpoint_id,
        task = task,
    )
}

/// Creates a span for table commit operations.
///
/// # Example
///
/// ```rust
/// use arco_core::observability::commit_span;
///
/// let span = commit_span("commit_checkpoint", 7, "main");
/// let _guard = span.enter();
/// // ... hand the merged delta to the table store
/// ```
#[must_use]
pub fn commit_span(operation: &str, checkpoint_id: u64, branch: &str) -> Span {
    tracing::info_span!(
        "commit",
        op = operation,
        checkpoint_id = checkpoint_id,
        branch = branch,
    )
}
