use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error type returned by submitted work.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Why a task's work did not produce a value.
#[derive(Debug, Clone)]
pub enum TaskFailure {
  /// The work returned an error.
  Error(Arc<dyn StdError + Send + Sync + 'static>),
  /// The work panicked. Holds the panic message when one could be recovered.
  Panicked(String),
}

impl TaskFailure {
  pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
    let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
      (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      "non-string panic payload".to_string()
    };
    TaskFailure::Panicked(message)
  }

  /// Returns `true` if the failure was a panic rather than a returned error.
  pub fn is_panic(&self) -> bool {
    matches!(self, TaskFailure::Panicked(_))
  }
}

impl From<BoxError> for TaskFailure {
  fn from(err: BoxError) -> Self {
    TaskFailure::Error(Arc::from(err))
  }
}

impl fmt::Display for TaskFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TaskFailure::Error(err) => write!(f, "{}", err),
      TaskFailure::Panicked(msg) => write!(f, "task panicked: {}", msg),
    }
  }
}

/// Errors surfaced by the `transfer_gate` scheduler and its task handles.
#[derive(Error, Debug, Clone)]
pub enum SchedulerError {
  #[error("Scheduler is closed, cannot accept new tasks")]
  SchedulerClosed,

  #[error("Worker pool refused the task: {0}")]
  SchedulerUnavailable(String),

  #[error("Task execution failed: {0}")]
  TaskFailed(TaskFailure),

  #[error("Task was cancelled")]
  TaskCancelled,

  #[error("Invalid capacity {0}, capacity must be at least 1")]
  CapacityInvalid(usize),

  #[error("Invalid scheduler configuration: {0}")]
  InvalidConfig(String),

  #[error("Task result channel error (handle outlived its scheduler or the job was dropped): {0}")]
  ResultChannelError(String),

  #[error("Task result already taken or channel was not available")]
  ResultUnavailable,
}

impl SchedulerError {
  /// Returns the failure carried by a `TaskFailed` error.
  pub fn task_failure(&self) -> Option<&TaskFailure> {
    match self {
      SchedulerError::TaskFailed(failure) => Some(failure),
      _ => None,
    }
  }
}
