use crate::error::SchedulerError;
use crate::scheduler::AdmissionScheduler;
use crate::task::TaskId;

use std::fmt;
use std::sync::{Arc, Weak};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// A handle to a task submitted to an `AdmissionScheduler`.
///
/// Allows for requesting cancellation of the task and awaiting its result.
pub struct TaskHandle<R: Send + 'static> {
  pub(crate) task_id: TaskId,
  pub(crate) origin: Arc<str>,
  pub(crate) cancellation_token: CancellationToken,
  pub(crate) result_receiver: Option<oneshot::Receiver<Result<R, SchedulerError>>>,
  pub(crate) scheduler: Weak<AdmissionScheduler<R>>,
}

impl<R: Send + 'static> fmt::Debug for TaskHandle<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskHandle")
      .field("task_id", &self.task_id)
      .field("origin", &self.origin)
      .field("cancel_requested", &self.cancellation_token.is_cancelled())
      .finish_non_exhaustive()
  }
}

impl<R: Send + 'static> TaskHandle<R> {
  /// Returns the unique ID of this task.
  pub fn id(&self) -> TaskId {
    self.task_id
  }

  /// Returns the source identity the task was submitted with.
  pub fn origin(&self) -> &str {
    &self.origin
  }

  /// Checks if cancellation has been requested for this task.
  pub fn is_cancellation_requested(&self) -> bool {
    self.cancellation_token.is_cancelled()
  }

  /// The token handed to the task's work.
  pub fn cancellation_token(&self) -> &CancellationToken {
    &self.cancellation_token
  }

  /// Requests cancellation of this task.
  ///
  /// A task still waiting for capacity is withdrawn and resolves as cancelled
  /// without its work ever being invoked. A running task only has its token
  /// cancelled; the work must observe it.
  pub fn cancel(&self) {
    tracing::debug!(task_id = %self.task_id, "TaskHandle: Cancellation requested.");
    self.cancellation_token.cancel();
    if let Some(scheduler) = self.scheduler.upgrade() {
      scheduler.withdraw_pending(self.task_id);
    }
  }

  /// Awaits the completion of the task and returns its result of type `R`.
  ///
  /// # Errors
  /// Returns `SchedulerError::TaskFailed` if the work returned an error or panicked.
  /// Returns `SchedulerError::TaskCancelled` if the task was cancelled.
  /// Returns `SchedulerError::SchedulerClosed` if the task was discarded by shutdown before it started.
  /// Returns `SchedulerError::SchedulerUnavailable` if the executor refused the task.
  /// Returns `SchedulerError::ResultChannelError` if the task was dropped without being resolved.
  /// Returns `SchedulerError::ResultUnavailable` if the result has already been taken.
  pub async fn await_result(&mut self) -> Result<R, SchedulerError> {
    match self.result_receiver.take() {
      Some(rx) => match rx.await {
        Ok(task_outcome) => task_outcome,
        Err(recv_error) => {
          // The sender was dropped unresolved, e.g. the executor dropped the job.
          tracing::warn!(task_id = %self.task_id, "Result channel receive error: {}", recv_error);
          Err(SchedulerError::ResultChannelError(format!(
            "Task (id: {}) result channel unexpectedly closed: {}",
            self.task_id, recv_error
          )))
        }
      },
      None => Err(SchedulerError::ResultUnavailable),
    }
  }
}
