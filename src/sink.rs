use crate::error::TaskFailure;

/// Process-wide destination for task failures.
///
/// Called at most once per failed task, from the thread that observed the
/// failure. Implementations must be fire-and-forget; a panicking sink is caught
/// and reported through `tracing` instead.
pub trait FailureSink: Send + Sync + 'static {
  fn log(&self, source: &str, failure: &TaskFailure, context: &str);
}

/// Forwards failures to `tracing` at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl FailureSink for TracingSink {
  fn log(&self, source: &str, failure: &TaskFailure, context: &str) {
    tracing::error!(
      %source,
      %context,
      panicked = failure.is_panic(),
      error = %failure,
      "Task execution failed."
    );
  }
}
