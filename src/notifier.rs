use crate::error::SchedulerError;
use crate::task::TaskId;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, trace, Instrument};

// --- Public Event Structs for Handlers ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCompletionStatus {
  Success,
  Failed,
  Cancelled,
  /// Never started: withdrawn by shutdown or refused by the executor.
  Discarded,
}

impl<R> From<&Result<R, SchedulerError>> for TaskCompletionStatus {
  fn from(result: &Result<R, SchedulerError>) -> Self {
    match result {
      Ok(_) => TaskCompletionStatus::Success,
      Err(SchedulerError::TaskCancelled) => TaskCompletionStatus::Cancelled,
      Err(SchedulerError::TaskFailed(_)) => TaskCompletionStatus::Failed,
      Err(_) => TaskCompletionStatus::Discarded,
    }
  }
}

#[derive(Debug, Clone)]
pub struct TaskCompletionInfo {
  pub task_id: TaskId,
  pub scheduler_name: Arc<String>,
  pub origin: Arc<str>,
  pub status: TaskCompletionStatus,
  pub completion_time: SystemTime,
}

type CompletionHandler = Arc<dyn Fn(TaskCompletionInfo) + Send + Sync + 'static>;

struct NotifierWorker {
  rx: Option<UnboundedReceiver<TaskCompletionInfo>>,
  join_handle: Option<JoinHandle<()>>,
}

/// Delivers completion events to registered handlers, in completion order, on
/// a background worker started with the first handler.
pub(crate) struct CompletionNotifier {
  handlers: Arc<RwLock<Vec<CompletionHandler>>>,
  has_handlers: AtomicBool,
  tx: Mutex<Option<UnboundedSender<TaskCompletionInfo>>>,
  worker: Mutex<NotifierWorker>,
  tokio_handle: TokioHandle,
  scheduler_name: Arc<String>,
}

impl fmt::Debug for CompletionNotifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CompletionNotifier")
      .field("scheduler_name", &self.scheduler_name)
      .field("handler_count", &self.handlers.read().len())
      .field("closed", &self.tx.lock().is_none())
      .finish_non_exhaustive()
  }
}

impl CompletionNotifier {
  pub(crate) fn new(tokio_handle: TokioHandle, scheduler_name: Arc<String>) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self {
      handlers: Arc::new(RwLock::new(Vec::new())),
      has_handlers: AtomicBool::new(false),
      tx: Mutex::new(Some(tx)),
      worker: Mutex::new(NotifierWorker {
        rx: Some(rx),
        join_handle: None,
      }),
      tokio_handle,
      scheduler_name,
    }
  }

  pub(crate) fn add_handler(&self, handler: impl Fn(TaskCompletionInfo) + Send + Sync + 'static) {
    self.ensure_worker_started();
    let mut handlers = self.handlers.write();
    handlers.push(Arc::new(handler));
    self.has_handlers.store(true, Ordering::Release);
    info!(scheduler = %self.scheduler_name, "Added completion handler. Total handlers: {}", handlers.len());
  }

  fn ensure_worker_started(&self) {
    let mut worker = self.worker.lock();
    let Some(rx) = worker.rx.take() else {
      return;
    };
    debug!(scheduler = %self.scheduler_name, "First completion handler added. Starting notification worker.");
    let handlers = self.handlers.clone();
    worker.join_handle = Some(self.tokio_handle.spawn(
      Self::run_notification_worker(rx, handlers)
        .instrument(info_span!("notification_worker", scheduler = %self.scheduler_name)),
    ));
  }

  /// Queues a completion event. Dropped silently when nobody listens.
  pub(crate) fn notify(&self, task_id: TaskId, origin: Arc<str>, status: TaskCompletionStatus) {
    if !self.has_handlers.load(Ordering::Acquire) {
      return;
    }
    let info = TaskCompletionInfo {
      task_id,
      scheduler_name: self.scheduler_name.clone(),
      origin,
      status,
      completion_time: SystemTime::now(),
    };
    match self.tx.lock().as_ref() {
      Some(tx) => {
        if tx.send(info).is_err() {
          trace!(%task_id, "Notification worker gone, dropping completion event.");
        }
      }
      None => trace!(%task_id, "Notifier closed, dropping completion event."),
    }
  }

  async fn run_notification_worker(
    mut rx: UnboundedReceiver<TaskCompletionInfo>,
    handlers: Arc<RwLock<Vec<CompletionHandler>>>,
  ) {
    info!("Notification worker started.");
    while let Some(info) = rx.recv().await {
      // Clone the list so handlers never run under the lock.
      let current: Vec<CompletionHandler> = handlers.read().clone();
      trace!(task_id = %info.task_id, "Dispatching notification to {} handlers.", current.len());
      for handler in current {
        let event = info.clone();
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(event))).is_err() {
          error!(task_id = %info.task_id, "A completion handler panicked during execution.");
        }
      }
    }
    info!("Notification worker stopped (input queue closed and drained).");
  }

  /// Closes the event queue and waits for the worker to deliver what is left.
  pub(crate) async fn close_and_join(&self) {
    self.tx.lock().take();
    let join_handle = {
      let mut worker = self.worker.lock();
      worker.rx.take();
      worker.join_handle.take()
    };
    if let Some(handle) = join_handle {
      if let Err(e) = handle.await {
        error!(scheduler = %self.scheduler_name, "Error joining notification worker: {:?}", e);
      } else {
        debug!(scheduler = %self.scheduler_name, "Notification worker joined.");
      }
    }
  }

  pub(crate) fn close(&self) {
    self.tx.lock().take();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::TaskFailure;

  #[test]
  fn test_status_from_result() {
    let ok: Result<u8, SchedulerError> = Ok(1);
    let cancelled: Result<u8, SchedulerError> = Err(SchedulerError::TaskCancelled);
    let failed: Result<u8, SchedulerError> =
      Err(SchedulerError::TaskFailed(TaskFailure::Panicked("boom".to_string())));
    let closed: Result<u8, SchedulerError> = Err(SchedulerError::SchedulerClosed);

    assert_eq!(TaskCompletionStatus::from(&ok), TaskCompletionStatus::Success);
    assert_eq!(TaskCompletionStatus::from(&cancelled), TaskCompletionStatus::Cancelled);
    assert_eq!(TaskCompletionStatus::from(&failed), TaskCompletionStatus::Failed);
    assert_eq!(TaskCompletionStatus::from(&closed), TaskCompletionStatus::Discarded);
  }

  #[tokio::test]
  async fn test_events_delivered_in_order_and_worker_exits_on_close() {
    let notifier = CompletionNotifier::new(TokioHandle::current(), Arc::new("test".to_string()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    notifier.add_handler(move |info| sink.lock().push(info.task_id));

    for id in 0..5 {
      notifier.notify(id, Arc::from("drive"), TaskCompletionStatus::Success);
    }
    notifier.close_and_join().await;

    assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
  }

  #[tokio::test]
  async fn test_panicking_handler_does_not_stop_delivery() {
    let notifier = CompletionNotifier::new(TokioHandle::current(), Arc::new("test".to_string()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    notifier.add_handler(|_| panic!("handler failure"));
    notifier.add_handler(move |info| sink.lock().push(info.status));

    notifier.notify(1, Arc::from("drive"), TaskCompletionStatus::Failed);
    notifier.notify(2, Arc::from("drive"), TaskCompletionStatus::Cancelled);
    notifier.close_and_join().await;

    assert_eq!(
      *seen.lock(),
      vec![TaskCompletionStatus::Failed, TaskCompletionStatus::Cancelled]
    );
  }
}
