use crate::error::{BoxError, SchedulerError};

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Identity of a submitted task, unique per submission within the process.
pub type TaskId = u64;

/// The future produced by a task's work once it is dispatched.
pub type TaskFuture<R> = Pin<Box<dyn Future<Output = Result<R, BoxError>> + Send + 'static>>;

/// Deferred work. It is only invoked when the task is dispatched and receives
/// the task's cancellation token, which it is expected to observe.
pub type TaskWork<R> = Box<dyn FnOnce(CancellationToken) -> TaskFuture<R> + Send + 'static>;

pub(crate) type ResultSender<R> = oneshot::Sender<Result<R, SchedulerError>>;

/// Internal representation of a task owned by the scheduler.
pub(crate) struct ScheduledTask<R: Send + 'static> {
  pub(crate) task_id: TaskId,
  pub(crate) origin: Arc<str>,
  pub(crate) work: TaskWork<R>,
  pub(crate) token: CancellationToken,
  pub(crate) result_sender: Option<ResultSender<R>>, // Option to allow taking
}

impl<R: Send + 'static> ScheduledTask<R> {
  /// Resolves the task's handle. Later calls are no-ops.
  pub(crate) fn resolve(&mut self, outcome: Result<R, SchedulerError>) {
    if let Some(tx) = self.result_sender.take() {
      if tx.send(outcome).is_err() {
        tracing::trace!(task_id = %self.task_id, "Handle dropped before its task was resolved.");
      }
    }
  }
}

impl<R: Send + 'static> fmt::Debug for ScheduledTask<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ScheduledTask")
      .field("task_id", &self.task_id)
      .field("origin", &self.origin)
      .field("cancel_requested", &self.token.is_cancelled())
      .finish_non_exhaustive()
  }
}
