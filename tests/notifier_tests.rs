use transfer_gate::{
  AdmissionScheduler, BoxError, SchedulerConfig, SchedulerError, ShutdownMode, TaskCompletionInfo,
  TaskCompletionStatus,
};

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle as TokioHandle;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

// Helper to initialize tracing for tests
fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,transfer_gate=trace"));
    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

// Helper for collecting notifications in tests
fn create_collecting_handler() -> (
  Arc<Mutex<Vec<TaskCompletionInfo>>>,
  impl Fn(TaskCompletionInfo) + Send + Sync + 'static,
) {
  let collected_notifications = Arc::new(Mutex::new(Vec::new()));
  let collected_notifications_clone = collected_notifications.clone();
  let handler = move |info: TaskCompletionInfo| {
    tracing::debug!(
      "Test Collecting Handler: Received notification for task_id: {}, status: {:?}",
      info.task_id,
      info.status
    );
    collected_notifications_clone.lock().unwrap().push(info);
  };
  (collected_notifications, handler)
}

fn scheduler(name: &str, capacity: usize) -> Arc<AdmissionScheduler<String>> {
  let config = SchedulerConfig::new(name)
    .with_capacity(capacity)
    .with_tick_interval(Duration::from_millis(10));
  AdmissionScheduler::with_tokio(config, TokioHandle::current()).unwrap()
}

#[tokio::test]
async fn test_completion_notifier_success() {
  setup_tracing_for_test();
  let scheduler_name = "test_notifier_success";
  let scheduler = scheduler(scheduler_name, 1);
  let (notifications, handler) = create_collecting_handler();
  scheduler.add_completion_handler(handler);

  let mut handle = scheduler
    .submit("gdrive", |_token| async { Ok::<_, BoxError>("uploaded".to_string()) })
    .unwrap();
  let task_id = handle.id();
  assert_eq!(handle.await_result().await.ok(), Some("uploaded".to_string()));
  scheduler.shutdown(ShutdownMode::Graceful).await.unwrap();

  let notifs = notifications.lock().unwrap();
  assert_eq!(notifs.len(), 1);
  let info = &notifs[0];
  assert_eq!(info.task_id, task_id);
  assert_eq!(*info.scheduler_name, scheduler_name);
  assert_eq!(&*info.origin, "gdrive");
  assert_eq!(info.status, TaskCompletionStatus::Success);
  assert!(info.completion_time <= std::time::SystemTime::now());
}

#[tokio::test]
async fn test_completion_notifier_failure() {
  setup_tracing_for_test();
  let scheduler = scheduler("test_notifier_failure", 1);
  let (notifications, handler) = create_collecting_handler();
  scheduler.add_completion_handler(handler);

  let mut handle = scheduler
    .submit("dropbox", |_token| async {
      Err::<String, BoxError>(Box::new(io::Error::new(io::ErrorKind::TimedOut, "remote timed out")))
    })
    .unwrap();
  assert!(matches!(handle.await_result().await, Err(SchedulerError::TaskFailed(_))));
  scheduler.shutdown(ShutdownMode::Graceful).await.unwrap();

  let notifs = notifications.lock().unwrap();
  assert_eq!(notifs.len(), 1);
  assert_eq!(notifs[0].status, TaskCompletionStatus::Failed);
  assert_eq!(&*notifs[0].origin, "dropbox");
}

#[tokio::test]
async fn test_completion_notifier_cancelled_while_pending() {
  setup_tracing_for_test();
  let scheduler = scheduler("test_notifier_cancel_pending", 1);
  let (notifications, handler) = create_collecting_handler();
  scheduler.add_completion_handler(handler);

  let (tx, rx) = oneshot::channel::<()>();
  let mut running = scheduler
    .submit("drive", move |_token| async move {
      let _ = rx.await;
      Ok::<_, BoxError>("done".to_string())
    })
    .unwrap();
  let mut pending = scheduler
    .submit("drive", |_token| async { Ok::<_, BoxError>("never".to_string()) })
    .unwrap();
  let pending_id = pending.id();

  pending.cancel();
  assert!(matches!(pending.await_result().await, Err(SchedulerError::TaskCancelled)));
  let _ = tx.send(());
  running.await_result().await.unwrap();
  scheduler.shutdown(ShutdownMode::Graceful).await.unwrap();

  let notifs = notifications.lock().unwrap();
  let statuses: Vec<_> = notifs.iter().map(|n| (n.task_id, n.status)).collect();
  assert_eq!(
    statuses,
    vec![
      (pending_id, TaskCompletionStatus::Cancelled),
      (running.id(), TaskCompletionStatus::Success),
    ]
  );
}

#[tokio::test]
async fn test_completion_notifier_reports_discarded_on_shutdown() {
  setup_tracing_for_test();
  let scheduler = scheduler("test_notifier_discarded", 1);
  let (notifications, handler) = create_collecting_handler();
  scheduler.add_completion_handler(handler);

  let mut running = scheduler
    .submit("drive", |token: CancellationToken| async move {
      tokio::select! {
        _ = token.cancelled() => {}
        _ = sleep(Duration::from_millis(100)) => {}
      }
      Ok::<_, BoxError>("finished".to_string())
    })
    .unwrap();
  let mut queued = Vec::new();
  for _ in 0..2 {
    queued.push(
      scheduler
        .submit("drive", |_token| async { Ok::<_, BoxError>("never".to_string()) })
        .unwrap(),
    );
  }

  scheduler.shutdown(ShutdownMode::Graceful).await.unwrap();
  assert_eq!(running.await_result().await.ok(), Some("finished".to_string()));
  for handle in queued.iter_mut() {
    assert!(matches!(handle.await_result().await, Err(SchedulerError::SchedulerClosed)));
  }

  let notifs = notifications.lock().unwrap();
  let discarded = notifs.iter().filter(|n| n.status == TaskCompletionStatus::Discarded).count();
  let succeeded = notifs.iter().filter(|n| n.status == TaskCompletionStatus::Success).count();
  assert_eq!(discarded, 2);
  assert_eq!(succeeded, 1);
}

#[tokio::test]
async fn test_panicking_handler_does_not_affect_tasks() {
  setup_tracing_for_test();
  let scheduler = scheduler("test_notifier_panicking_handler", 2);
  scheduler.add_completion_handler(|_info| panic!("handler failure"));
  let (notifications, handler) = create_collecting_handler();
  scheduler.add_completion_handler(handler);

  let mut handles = Vec::new();
  for i in 0..3 {
    handles.push(
      scheduler
        .submit("drive", move |_token| async move { Ok::<_, BoxError>(format!("chunk_{}", i)) })
        .unwrap(),
    );
  }
  scheduler.initialize().unwrap();
  for (i, handle) in handles.iter_mut().enumerate() {
    assert_eq!(handle.await_result().await.ok(), Some(format!("chunk_{}", i)));
  }
  scheduler.shutdown(ShutdownMode::Graceful).await.unwrap();

  assert_eq!(notifications.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_completion_notifier_reports_discarded_on_drop() {
  setup_tracing_for_test();
  let (notifications, handler) = create_collecting_handler();
  let (tx, rx) = oneshot::channel::<()>();

  let (mut running, mut queued) = {
    let scheduler = scheduler("test_notifier_drop", 1);
    scheduler.add_completion_handler(handler);
    let running = scheduler
      .submit("drive", move |_token| async move {
        let _ = rx.await;
        Ok::<_, BoxError>("done".to_string())
      })
      .unwrap();
    let queued = scheduler
      .submit("drive", |_token| async { Ok::<_, BoxError>("never".to_string()) })
      .unwrap();
    (running, queued)
  };
  let queued_id = queued.id();
  assert!(matches!(queued.await_result().await, Err(SchedulerError::SchedulerClosed)));

  // Delivery is asynchronous; the worker drains what was queued before the drop.
  let delivered = tokio::time::timeout(Duration::from_secs(5), async {
    while notifications.lock().unwrap().is_empty() {
      sleep(Duration::from_millis(5)).await;
    }
  })
  .await;
  assert!(delivered.is_ok(), "no completion event after drop");
  {
    let notifs = notifications.lock().unwrap();
    assert_eq!(notifs.len(), 1);
    assert_eq!(notifs[0].task_id, queued_id);
    assert_eq!(notifs[0].status, TaskCompletionStatus::Discarded);
  }

  let _ = tx.send(());
  assert_eq!(running.await_result().await.ok(), Some("done".to_string()));
}
