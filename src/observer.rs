use crate::error::{BoxError, SchedulerError, TaskFailure};
use crate::notifier::{CompletionNotifier, TaskCompletionStatus};
use crate::sink::FailureSink;
use crate::task::TaskId;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tracing::{debug, error, trace};

/// Terminal state of a task that was dispatched.
#[derive(Debug)]
pub(crate) enum Outcome<R> {
  Completed(R),
  Failed(TaskFailure),
  Cancelled,
}

impl<R> Outcome<R> {
  /// Classifies what a task's work produced.
  ///
  /// A panic is always a failure. Otherwise a raised cancellation flag wins
  /// over whatever the work returned.
  pub(crate) fn classify(
    raw: Result<Result<R, BoxError>, Box<dyn Any + Send>>,
    cancel_requested: bool,
  ) -> Self {
    match raw {
      Err(panic_payload) => Outcome::Failed(TaskFailure::from_panic(panic_payload)),
      Ok(_) if cancel_requested => Outcome::Cancelled,
      Ok(Ok(value)) => Outcome::Completed(value),
      Ok(Err(err)) => Outcome::Failed(TaskFailure::from(err)),
    }
  }
}

/// Post-execution hook shared by every dispatched job of one scheduler.
pub(crate) struct CompletionObserver {
  scheduler_name: Arc<String>,
  sink: Arc<dyn FailureSink>,
  notifier: Arc<CompletionNotifier>,
}

impl CompletionObserver {
  pub(crate) fn new(scheduler_name: Arc<String>, sink: Arc<dyn FailureSink>, notifier: Arc<CompletionNotifier>) -> Self {
    Self {
      scheduler_name,
      sink,
      notifier,
    }
  }

  /// Turns an outcome into what the task's handle resolves to. Failures are
  /// forwarded to the sink here, and only here.
  pub(crate) fn observe<R>(&self, task_id: TaskId, origin: &Arc<str>, outcome: Outcome<R>) -> Result<R, SchedulerError> {
    let result = match outcome {
      Outcome::Completed(value) => {
        trace!(%task_id, "Task completed successfully.");
        Ok(value)
      }
      Outcome::Cancelled => {
        debug!(%task_id, "Task finished after cancellation was requested.");
        Err(SchedulerError::TaskCancelled)
      }
      Outcome::Failed(failure) => {
        self.report_failure(task_id, origin, &failure);
        Err(SchedulerError::TaskFailed(failure))
      }
    };
    self.notifier.notify(task_id, origin.clone(), TaskCompletionStatus::from(&result));
    result
  }

  /// Reports a task that reached a terminal state without running.
  pub(crate) fn discarded(&self, task_id: TaskId, origin: &Arc<str>, status: TaskCompletionStatus) {
    self.notifier.notify(task_id, origin.clone(), status);
  }

  fn report_failure(&self, task_id: TaskId, origin: &str, failure: &TaskFailure) {
    let context = format!("task {} on scheduler '{}'", task_id, self.scheduler_name);
    let logged = std::panic::catch_unwind(AssertUnwindSafe(|| self.sink.log(origin, failure, &context)));
    if logged.is_err() {
      error!(%task_id, %origin, error = %failure, "Failure sink panicked while logging a task failure.");
    }
  }
}
